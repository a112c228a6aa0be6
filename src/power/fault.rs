//! Short-circuit analysis by symmetrical components.
//!
//! Each sequence network is assembled as a bus admittance matrix over the
//! island of buses it connects to the faulted bus. One column of its
//! impedance matrix (`Y z = e_k`) gives the Thevenin impedance at the fault
//! and the transfer impedances needed for every other bus voltage.

use std::collections::VecDeque;
use std::fmt;

use num_complex::Complex64;

use crate::error::{Result, SimError};
use crate::solver::{SparseLuSolver, SparseMatrix};

use super::flow::PowerFlowResult;
use super::network::{BusId, PowerNetwork, WindingConnection};

/// Fault kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    ThreePhase,
    SingleLineToGround,
    LineToLine,
    DoubleLineToGround,
}

impl FaultType {
    fn needs_negative(self) -> bool {
        !matches!(self, Self::ThreePhase)
    }

    fn needs_zero(self) -> bool {
        matches!(self, Self::SingleLineToGround | Self::DoubleLineToGround)
    }
}

/// Symmetrical-component sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Zero,
    Positive,
    Negative,
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Zero => "zero",
            Self::Positive => "positive",
            Self::Negative => "negative",
        })
    }
}

/// Bus voltages before the fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Prefault {
    /// 1.0 pu at zero angle everywhere
    Flat,
    /// Phasors indexed by `BusId`, typically from a load flow
    Voltages(Vec<Complex64>),
}

impl From<&PowerFlowResult> for Prefault {
    fn from(result: &PowerFlowResult) -> Self {
        Prefault::Voltages(result.voltages())
    }
}

/// IEC 60255 inverse-time overcurrent characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCurve {
    StandardInverse,
    VeryInverse,
    ExtremelyInverse,
    LongTimeInverse,
}

impl RelayCurve {
    /// Curve constants `(k, alpha)` in `t = TMS * k / (M^alpha - 1)`.
    pub fn constants(self) -> (f64, f64) {
        match self {
            Self::StandardInverse => (0.14, 0.02),
            Self::VeryInverse => (13.5, 1.0),
            Self::ExtremelyInverse => (80.0, 2.0),
            Self::LongTimeInverse => (120.0, 1.0),
        }
    }

    /// Operating time for a current of `multiple` times pickup; `None` when
    /// the relay does not pick up.
    pub fn trip_time(self, multiple: f64, time_multiplier: f64) -> Option<f64> {
        if multiple <= 1.0 {
            return None;
        }
        let (k, alpha) = self.constants();
        Some(time_multiplier * k / (multiple.powf(alpha) - 1.0))
    }
}

/// Overcurrent relay watching the faulted bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaySettings {
    pub curve: RelayCurve,
    /// Pickup current (A)
    pub pickup_amps: f64,
    /// Time multiplier setting
    pub time_multiplier: f64,
}

/// Fault study parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Name of the faulted bus
    pub bus: String,
    pub fault_type: FaultType,
    /// Fault impedance Zf (pu)
    pub impedance: Complex64,
    pub prefault: Prefault,
    pub relay: Option<RelaySettings>,
}

impl FaultConfig {
    /// Bolted fault with flat prefault voltages.
    pub fn new(bus: impl Into<String>, fault_type: FaultType) -> Self {
        Self {
            bus: bus.into(),
            fault_type,
            impedance: Complex64::new(0.0, 0.0),
            prefault: Prefault::Flat,
            relay: None,
        }
    }

    pub fn with_impedance(mut self, impedance: Complex64) -> Self {
        self.impedance = impedance;
        self
    }

    pub fn with_prefault(mut self, prefault: Prefault) -> Self {
        self.prefault = prefault;
        self
    }

    pub fn with_relay(mut self, relay: RelaySettings) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.impedance.re.is_finite() && self.impedance.im.is_finite()) || self.impedance.re < 0.0 {
            return Err(SimError::invalid_analysis("fault impedance must be finite with non-negative resistance"));
        }
        if let Some(relay) = &self.relay {
            if relay.pickup_amps <= 0.0 || relay.time_multiplier <= 0.0 {
                return Err(SimError::invalid_analysis("relay pickup and time multiplier must be positive"));
            }
        }
        Ok(())
    }
}

/// Sequence admittance matrix over the island containing one bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceNetwork {
    pub sequence: Sequence,
    /// Island buses; row `k` of the matrix belongs to `buses[k]`
    pub buses: Vec<BusId>,
    pub matrix: SparseMatrix<Complex64>,
    local: Vec<Option<usize>>,
}

/// Series element of a sequence network.
struct SeriesElement<'a> {
    name: &'a str,
    from: BusId,
    to: BusId,
    z: Option<Complex64>,
    tap: f64,
}

impl SequenceNetwork {
    /// Assemble one sequence network around `bus`.
    ///
    /// Fails with `UndefinedSequenceNetwork` when a branch in the island
    /// lacks the impedance data for this sequence, or when the island has no
    /// source or ground return.
    pub fn build(network: &PowerNetwork, sequence: Sequence, bus: BusId) -> Result<Self> {
        let undefined = |message: String| SimError::undefined_sequence(sequence.to_string(), message);
        let mut series: Vec<SeriesElement<'_>> = Vec::new();
        let mut shunts: Vec<(BusId, Complex64)> = Vec::new();

        for line in &network.lines {
            let z = match sequence {
                Sequence::Zero => line.zero_sequence.map(|(r0, x0)| Complex64::new(r0, x0)),
                Sequence::Positive | Sequence::Negative => Some(line.impedance()),
            };
            series.push(SeriesElement {
                name: &line.name,
                from: line.from,
                to: line.to,
                z,
                tap: 1.0,
            });
        }
        for t in &network.transformers {
            match sequence {
                Sequence::Positive | Sequence::Negative => series.push(SeriesElement {
                    name: &t.name,
                    from: t.from,
                    to: t.to,
                    z: Some(t.impedance()),
                    tap: t.tap,
                }),
                Sequence::Zero => match t.connection {
                    WindingConnection::GroundedWyeGroundedWye => series.push(SeriesElement {
                        name: &t.name,
                        from: t.from,
                        to: t.to,
                        z: Some(t.zero_sequence_impedance()),
                        tap: 1.0,
                    }),
                    WindingConnection::DeltaGroundedWye => shunts.push((t.to, t.zero_sequence_impedance())),
                    WindingConnection::GroundedWyeDelta => shunts.push((t.from, t.zero_sequence_impedance())),
                    WindingConnection::DeltaDelta | WindingConnection::WyeWye => {}
                },
            }
        }
        for g in &network.generators {
            let z = match sequence {
                Sequence::Positive => Complex64::new(0.0, g.xd_subtransient),
                Sequence::Negative => Complex64::new(0.0, g.negative_sequence_reactance()),
                Sequence::Zero => match (g.neutral, g.x0) {
                    (None, _) => continue,
                    (Some(zn), Some(x0)) => Complex64::new(0.0, x0) + 3.0 * zn,
                    (Some(_), None) => {
                        return Err(undefined(format!("generator '{}' has no zero-sequence reactance", g.name)))
                    }
                },
            };
            shunts.push((g.bus, z));
        }

        // Island of the faulted bus
        let n = network.num_buses();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (k, e) in series.iter().enumerate() {
            adjacency[e.from.0].push(k);
            adjacency[e.to.0].push(k);
        }
        let mut local = vec![None; n];
        let mut buses = vec![bus];
        local[bus.0] = Some(0);
        let mut queue = VecDeque::from([bus]);
        while let Some(b) = queue.pop_front() {
            for &k in &adjacency[b.0] {
                let e = &series[k];
                if e.z.is_none() {
                    return Err(undefined(format!("branch '{}' has no {sequence}-sequence impedance", e.name)));
                }
                let other = if e.from == b { e.to } else { e.from };
                if local[other.0].is_none() {
                    local[other.0] = Some(buses.len());
                    buses.push(other);
                    queue.push_back(other);
                }
            }
        }

        let mut matrix = SparseMatrix::new(buses.len());
        let mut grounded = false;
        for e in &series {
            if let (Some(f), Some(t), Some(z)) = (local[e.from.0], local[e.to.0], e.z) {
                let y = z.inv();
                matrix.add(f, f, y / (e.tap * e.tap));
                matrix.add(t, t, y);
                matrix.add(f, t, -y / e.tap);
                matrix.add(t, f, -y / e.tap);
            }
        }
        for &(b, z) in &shunts {
            if let Some(i) = local[b.0] {
                matrix.add(i, i, z.inv());
                grounded = true;
            }
        }
        if !grounded {
            return Err(undefined(format!(
                "island of bus '{}' has no source or ground return",
                network.buses[bus.0].name
            )));
        }

        Ok(Self {
            sequence,
            buses,
            matrix,
            local,
        })
    }

    /// Column `k` of the bus impedance matrix, indexed by `BusId` (zero
    /// outside the island).
    pub fn impedance_column(&self, bus: BusId) -> Result<Vec<Complex64>> {
        let k = self.local.get(bus.0).copied().flatten().ok_or_else(|| {
            SimError::undefined_sequence(self.sequence.to_string(), format!("bus {bus} is outside the island"))
        })?;
        let mut e = vec![Complex64::new(0.0, 0.0); self.buses.len()];
        e[k] = Complex64::new(1.0, 0.0);
        let z = SparseLuSolver::new().factor_and_solve(&self.matrix, &e)?;
        let mut column = vec![Complex64::new(0.0, 0.0); self.local.len()];
        for (i, &b) in self.buses.iter().enumerate() {
            column[b.0] = z[i];
        }
        Ok(column)
    }
}

/// The operator `a = 1 at 120 degrees`.
fn rotator() -> Complex64 {
    Complex64::from_polar(1.0, 120f64.to_radians())
}

/// Phase quantities `[a, b, c]` from sequence quantities `[0, 1, 2]`.
pub fn to_phase(seq: [Complex64; 3]) -> [Complex64; 3] {
    let a = rotator();
    let a2 = a * a;
    let [x0, x1, x2] = seq;
    [x0 + x1 + x2, x0 + a2 * x1 + a * x2, x0 + a * x1 + a2 * x2]
}

/// Voltages at one bus during the fault.
#[derive(Debug, Clone, PartialEq)]
pub struct BusFaultVoltage {
    pub bus: BusId,
    pub name: String,
    /// `[V0, V1, V2]` (pu)
    pub sequence: [Complex64; 3],
    /// `[Va, Vb, Vc]` (pu)
    pub phase: [Complex64; 3],
}

/// Outcome of a fault study.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultReport {
    pub bus: BusId,
    pub bus_name: String,
    pub fault_type: FaultType,
    /// Thevenin impedances `[Z0, Z1, Z2]` at the fault (zero when unused)
    pub thevenin: [Complex64; 3],
    /// `[I0, I1, I2]` into the fault (pu)
    pub sequence_currents: [Complex64; 3],
    /// `[Ia, Ib, Ic]` into the fault (pu)
    pub phase_currents: [Complex64; 3],
    /// Largest phase current magnitude (pu)
    pub fault_current_pu: f64,
    /// Largest phase current magnitude (A)
    pub fault_current_amps: f64,
    /// Ground return current `3 I0` magnitude (pu)
    pub ground_current_pu: f64,
    pub bus_voltages: Vec<BusFaultVoltage>,
    /// Relay operating time (s), `None` without a relay or below pickup
    pub relay_trip_time: Option<f64>,
}

impl FaultReport {
    /// Fault-time voltages of a bus looked up by name.
    pub fn bus_voltage(&self, name: &str) -> Option<&BusFaultVoltage> {
        self.bus_voltages.iter().find(|v| v.name == name)
    }
}

/// Sequence currents into a fault behind Thevenin impedances `[Z0, Z1, Z2]`.
pub fn sequence_currents(fault_type: FaultType, vf: Complex64, z: [Complex64; 3], zf: Complex64) -> [Complex64; 3] {
    let zero = Complex64::new(0.0, 0.0);
    let [z0, z1, z2] = z;
    match fault_type {
        FaultType::ThreePhase => [zero, vf / (z1 + zf), zero],
        FaultType::SingleLineToGround => {
            let i = vf / (z1 + z2 + z0 + 3.0 * zf);
            [i, i, i]
        }
        FaultType::LineToLine => {
            let i1 = vf / (z1 + z2 + zf);
            [zero, i1, -i1]
        }
        FaultType::DoubleLineToGround => {
            let z0f = z0 + 3.0 * zf;
            let i1 = vf / (z1 + z2 * z0f / (z2 + z0f));
            [-i1 * z2 / (z2 + z0f), i1, -i1 * z0f / (z2 + z0f)]
        }
    }
}

/// Fault analyzer.
#[derive(Debug, Clone)]
pub struct FaultAnalyzer {
    pub config: FaultConfig,
}

impl FaultAnalyzer {
    pub fn new(config: FaultConfig) -> Self {
        Self { config }
    }

    /// Check the configuration and every sequence network the fault needs,
    /// without solving anything.
    pub fn check(&self, network: &PowerNetwork) -> Result<()> {
        self.config.validate()?;
        let bus = network.bus(&self.config.bus)?;
        self.prefault_voltages(network)?;
        self.sequence_networks(network, bus).map(|_| ())
    }

    fn prefault_voltages(&self, network: &PowerNetwork) -> Result<Vec<Complex64>> {
        match &self.config.prefault {
            Prefault::Flat => Ok(vec![Complex64::new(1.0, 0.0); network.num_buses()]),
            Prefault::Voltages(v) if v.len() == network.num_buses() => Ok(v.clone()),
            Prefault::Voltages(_) => Err(SimError::invalid_analysis(
                "prefault voltages do not match the network's buses",
            )),
        }
    }

    /// Positive, negative and zero networks; the latter two only when the
    /// fault type involves them.
    fn sequence_networks(
        &self,
        network: &PowerNetwork,
        bus: BusId,
    ) -> Result<(SequenceNetwork, Option<SequenceNetwork>, Option<SequenceNetwork>)> {
        let fault_type = self.config.fault_type;
        let positive = SequenceNetwork::build(network, Sequence::Positive, bus)?;
        let negative = match fault_type.needs_negative() {
            true => Some(SequenceNetwork::build(network, Sequence::Negative, bus)?),
            false => None,
        };
        let zero = match fault_type.needs_zero() {
            true => Some(SequenceNetwork::build(network, Sequence::Zero, bus)?),
            false => None,
        };
        Ok((positive, negative, zero))
    }

    /// Run the fault study on `network`.
    pub fn analyze(&self, network: &PowerNetwork) -> Result<FaultReport> {
        let config = &self.config;
        config.validate()?;
        let bus = network.bus(&config.bus)?;
        let _span = tracing::info_span!("fault_analysis", bus = %config.bus, fault = ?config.fault_type).entered();

        let prefault = self.prefault_voltages(network)?;
        // All required networks are checked before anything is solved
        let (positive, negative, zero) = self.sequence_networks(network, bus)?;

        let n = network.num_buses();
        let zeros = vec![Complex64::new(0.0, 0.0); n];
        let z1 = positive.impedance_column(bus)?;
        let z2 = match &negative {
            Some(net) => net.impedance_column(bus)?,
            None => zeros.clone(),
        };
        let z0 = match &zero {
            Some(net) => net.impedance_column(bus)?,
            None => zeros,
        };

        let k = bus.0;
        let thevenin = [z0[k], z1[k], z2[k]];
        let currents = sequence_currents(config.fault_type, prefault[k], thevenin, config.impedance);
        let [i0, i1, i2] = currents;
        let phase_currents = to_phase(currents);

        let bus_voltages = network
            .buses
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let sequence = [-z0[i] * i0, prefault[i] - z1[i] * i1, -z2[i] * i2];
                BusFaultVoltage {
                    bus: BusId(i),
                    name: b.name.clone(),
                    sequence,
                    phase: to_phase(sequence),
                }
            })
            .collect();

        let fault_current_pu = phase_currents.iter().map(|c| c.norm()).fold(0.0, f64::max);
        let fault_current_amps = fault_current_pu * network.base_current_amps(bus);
        let relay_trip_time = config
            .relay
            .and_then(|r| r.curve.trip_time(fault_current_amps / r.pickup_amps, r.time_multiplier));

        tracing::debug!(fault_current_pu, fault_current_amps, "fault solved");
        Ok(FaultReport {
            bus,
            bus_name: network.buses[k].name.clone(),
            fault_type: config.fault_type,
            thevenin,
            sequence_currents: currents,
            phase_currents,
            fault_current_pu,
            fault_current_amps,
            ground_current_pu: (3.0 * i0).norm(),
            bus_voltages,
            relay_trip_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::network::{Bus, BusKind, Generator, Line, Transformer};
    use approx::assert_relative_eq;

    /// Generator (X''d = 0.2, X0 = 0.05) at A, line j0.1 (Z0 = j0.3) to B.
    fn feeder() -> PowerNetwork {
        let mut net = PowerNetwork::default();
        let a = net.add_bus(Bus::new("A", BusKind::Slack, 13.8)).unwrap();
        let b = net.add_bus(Bus::new("B", BusKind::Pq, 13.8)).unwrap();
        net.add_generator(Generator::new("G1", a, 0.2).with_x0(0.05)).unwrap();
        net.add_line(Line::new("L1", a, b, 0.0, 0.1, 0.0).with_zero_sequence(0.0, 0.3))
            .unwrap();
        net
    }

    #[test]
    fn test_three_phase_bolted() {
        let report = FaultAnalyzer::new(FaultConfig::new("B", FaultType::ThreePhase))
            .analyze(&feeder())
            .unwrap();
        assert_relative_eq!(report.fault_current_pu, 1.0 / 0.3, epsilon = 1e-9);
        assert_relative_eq!(report.bus_voltage("B").unwrap().phase[0].norm(), 0.0, epsilon = 1e-12);
        // Divider between the generator and the line
        assert_relative_eq!(report.bus_voltage("A").unwrap().phase[0].norm(), 1.0 / 3.0, epsilon = 1e-9);
        let amps = 100e3 / (3f64.sqrt() * 13.8) / 0.3;
        assert_relative_eq!(report.fault_current_amps, amps, max_relative = 1e-9);
    }

    #[test]
    fn test_single_line_to_ground() {
        let report = FaultAnalyzer::new(FaultConfig::new("A", FaultType::SingleLineToGround))
            .analyze(&feeder())
            .unwrap();
        // 3V / (Z1 + Z2 + Z0) with X2 defaulting to X''d
        assert_relative_eq!(report.phase_currents[0].norm(), 3.0 / 0.45, epsilon = 1e-9);
        assert_relative_eq!(report.phase_currents[1].norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(report.ground_current_pu, 3.0 / 0.45, epsilon = 1e-9);
    }

    #[test]
    fn test_line_to_line_and_double_line_to_ground() {
        let net = feeder();
        let ll = FaultAnalyzer::new(FaultConfig::new("B", FaultType::LineToLine))
            .analyze(&net)
            .unwrap();
        // |Ib| = sqrt(3) V / (Z1 + Z2)
        assert_relative_eq!(ll.phase_currents[1].norm(), 3f64.sqrt() / 0.6, epsilon = 1e-9);
        assert_relative_eq!(ll.phase_currents[0].norm(), 0.0, epsilon = 1e-12);

        let dlg = FaultAnalyzer::new(FaultConfig::new("B", FaultType::DoubleLineToGround))
            .analyze(&net)
            .unwrap();
        let [i0, i1, i2] = dlg.sequence_currents;
        assert_relative_eq!((i0 + i1 + i2).norm(), 0.0, epsilon = 1e-12);
        // Faulted phases b and c are at ground potential
        let v = &dlg.bus_voltage("B").unwrap().phase;
        assert_relative_eq!(v[1].norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(v[2].norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fault_impedance_limits_current() {
        let config = FaultConfig::new("B", FaultType::ThreePhase).with_impedance(Complex64::new(0.4, 0.0));
        let report = FaultAnalyzer::new(config).analyze(&feeder()).unwrap();
        assert_relative_eq!(report.fault_current_pu, 1.0 / 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_zero_sequence_data() {
        let mut net = PowerNetwork::default();
        let a = net.add_bus(Bus::new("A", BusKind::Slack, 13.8)).unwrap();
        let b = net.add_bus(Bus::new("B", BusKind::Pq, 13.8)).unwrap();
        net.add_generator(Generator::new("G1", a, 0.2).with_x0(0.05)).unwrap();
        net.add_line(Line::new("L1", a, b, 0.0, 0.1, 0.0)).unwrap();

        let slg = FaultAnalyzer::new(FaultConfig::new("B", FaultType::SingleLineToGround));
        assert!(matches!(
            slg.check(&net),
            Err(SimError::UndefinedSequenceNetwork { .. })
        ));
        assert!(matches!(
            slg.analyze(&net),
            Err(SimError::UndefinedSequenceNetwork { .. })
        ));
        // Balanced faults never need it
        assert!(FaultAnalyzer::new(FaultConfig::new("B", FaultType::ThreePhase))
            .analyze(&net)
            .is_ok());
    }

    #[test]
    fn test_delta_wye_transformer_grounds_wye_side() {
        let mut net = PowerNetwork::default();
        let hv = net.add_bus(Bus::new("HV", BusKind::Slack, 138.0)).unwrap();
        let lv = net.add_bus(Bus::new("LV", BusKind::Pq, 13.8)).unwrap();
        net.add_generator(Generator::new("G1", hv, 0.2).with_neutral(None)).unwrap();
        net.add_transformer(
            Transformer::new("T1", hv, lv, 0.0, 0.1).with_connection(WindingConnection::DeltaGroundedWye),
        )
        .unwrap();

        let report = FaultAnalyzer::new(FaultConfig::new("LV", FaultType::SingleLineToGround))
            .analyze(&net)
            .unwrap();
        // Z1 = Z2 = j0.3, Z0 = transformer only
        assert_relative_eq!(report.phase_currents[0].norm(), 3.0 / 0.7, epsilon = 1e-9);

        // The delta side has no ground return with an ungrounded machine
        let hv_fault = FaultAnalyzer::new(FaultConfig::new("HV", FaultType::SingleLineToGround));
        assert!(matches!(
            hv_fault.analyze(&net),
            Err(SimError::UndefinedSequenceNetwork { .. })
        ));
    }

    #[test]
    fn test_relay_curves() {
        assert_relative_eq!(
            RelayCurve::StandardInverse.trip_time(10.0, 1.0).unwrap(),
            0.14 / (10f64.powf(0.02) - 1.0)
        );
        assert_relative_eq!(RelayCurve::VeryInverse.trip_time(10.0, 0.5).unwrap(), 0.75);
        assert_relative_eq!(RelayCurve::ExtremelyInverse.trip_time(5.0, 1.0).unwrap(), 80.0 / 24.0);
        assert_eq!(RelayCurve::LongTimeInverse.trip_time(0.8, 1.0), None);

        let relay = RelaySettings {
            curve: RelayCurve::VeryInverse,
            pickup_amps: 1000.0,
            time_multiplier: 0.1,
        };
        let report = FaultAnalyzer::new(FaultConfig::new("B", FaultType::ThreePhase).with_relay(relay))
            .analyze(&feeder())
            .unwrap();
        let multiple = report.fault_current_amps / 1000.0;
        assert_relative_eq!(report.relay_trip_time.unwrap(), 0.1 * 13.5 / (multiple - 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_bus() {
        let analyzer = FaultAnalyzer::new(FaultConfig::new("Z", FaultType::ThreePhase));
        assert!(matches!(analyzer.analyze(&feeder()), Err(SimError::NodeNotFound { .. })));
    }
}
