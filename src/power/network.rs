//! Three-phase bus network for load flow and fault studies.
//!
//! All impedances and admittances are per unit on the network's MVA base
//! and the nominal voltage of the bus they attach to. Scheduled powers are
//! in MW / MVAr and converted at solve time.

use std::collections::{HashMap, HashSet};
use std::fmt;

use num_complex::Complex64;

use crate::error::{Result, SimError};
use crate::solver::SparseMatrix;

/// Default system MVA base.
pub const DEFAULT_BASE_MVA: f64 = 100.0;

/// Index of a bus in its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(pub usize);

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Load-flow bus classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// Fixed |V| and angle; absorbs the power mismatch
    Slack,
    /// Fixed P and |V|
    Pv,
    /// Fixed P and Q
    Pq,
}

/// A network bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub name: String,
    pub kind: BusKind,
    /// Nominal line-to-line voltage (kV)
    pub base_kv: f64,
    /// Voltage magnitude setpoint for Slack and PV buses (pu)
    pub voltage_setpoint: f64,
    pub p_gen_mw: f64,
    pub q_gen_mvar: f64,
    pub p_load_mw: f64,
    pub q_load_mvar: f64,
}

impl Bus {
    /// Create a bus with no generation or load and a 1.0 pu setpoint.
    pub fn new(name: impl Into<String>, kind: BusKind, base_kv: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            base_kv,
            voltage_setpoint: 1.0,
            p_gen_mw: 0.0,
            q_gen_mvar: 0.0,
            p_load_mw: 0.0,
            q_load_mvar: 0.0,
        }
    }

    /// Set the scheduled load.
    pub fn with_load(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.p_load_mw = p_mw;
        self.q_load_mvar = q_mvar;
        self
    }

    /// Set the scheduled generation.
    pub fn with_generation(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.p_gen_mw = p_mw;
        self.q_gen_mvar = q_mvar;
        self
    }

    /// Set the voltage magnitude setpoint.
    pub fn with_voltage(mut self, v_pu: f64) -> Self {
        self.voltage_setpoint = v_pu;
        self
    }

    /// Net scheduled injection in per unit.
    pub fn scheduled_injection(&self, base_mva: f64) -> Complex64 {
        Complex64::new(self.p_gen_mw - self.p_load_mw, self.q_gen_mvar - self.q_load_mvar) / base_mva
    }
}

/// Transmission line, modelled as a nominal pi section.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    pub r: f64,
    pub x: f64,
    /// Total charging susceptance, split half to each end
    pub b: f64,
    /// Zero-sequence resistance and reactance
    pub zero_sequence: Option<(f64, f64)>,
}

impl Line {
    pub fn new(name: impl Into<String>, from: BusId, to: BusId, r: f64, x: f64, b: f64) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            r,
            x,
            b,
            zero_sequence: None,
        }
    }

    /// Provide zero-sequence impedance data.
    pub fn with_zero_sequence(mut self, r0: f64, x0: f64) -> Self {
        self.zero_sequence = Some((r0, x0));
        self
    }

    pub fn impedance(&self) -> Complex64 {
        Complex64::new(self.r, self.x)
    }
}

/// Transformer winding arrangement, `from` side first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindingConnection {
    /// Grounded wye on both sides
    GroundedWyeGroundedWye,
    /// Delta on `from`, grounded wye on `to`
    DeltaGroundedWye,
    /// Grounded wye on `from`, delta on `to`
    GroundedWyeDelta,
    DeltaDelta,
    /// Ungrounded wye on both sides
    WyeWye,
}

/// Two-winding transformer with an off-nominal tap on the `from` side.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformer {
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    pub r: f64,
    pub x: f64,
    /// Off-nominal turns ratio
    pub tap: f64,
    pub connection: WindingConnection,
    /// Zero-sequence impedance; the series impedance when absent
    pub zero_sequence: Option<(f64, f64)>,
}

impl Transformer {
    pub fn new(name: impl Into<String>, from: BusId, to: BusId, r: f64, x: f64) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            r,
            x,
            tap: 1.0,
            connection: WindingConnection::GroundedWyeGroundedWye,
            zero_sequence: None,
        }
    }

    pub fn with_tap(mut self, tap: f64) -> Self {
        self.tap = tap;
        self
    }

    pub fn with_connection(mut self, connection: WindingConnection) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_zero_sequence(mut self, r0: f64, x0: f64) -> Self {
        self.zero_sequence = Some((r0, x0));
        self
    }

    pub fn impedance(&self) -> Complex64 {
        Complex64::new(self.r, self.x)
    }

    pub fn zero_sequence_impedance(&self) -> Complex64 {
        self.zero_sequence
            .map_or_else(|| self.impedance(), |(r0, x0)| Complex64::new(r0, x0))
    }
}

/// Synchronous machine as seen by fault studies.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub name: String,
    pub bus: BusId,
    /// Sub-transient reactance X''d (pu)
    pub xd_subtransient: f64,
    /// Negative-sequence reactance, X''d when absent
    pub x2: Option<f64>,
    /// Zero-sequence reactance
    pub x0: Option<f64>,
    /// Neutral grounding impedance; `None` for an ungrounded neutral
    pub neutral: Option<Complex64>,
}

impl Generator {
    /// Create a solidly grounded generator.
    pub fn new(name: impl Into<String>, bus: BusId, xd_subtransient: f64) -> Self {
        Self {
            name: name.into(),
            bus,
            xd_subtransient,
            x2: None,
            x0: None,
            neutral: Some(Complex64::new(0.0, 0.0)),
        }
    }

    pub fn with_x2(mut self, x2: f64) -> Self {
        self.x2 = Some(x2);
        self
    }

    pub fn with_x0(mut self, x0: f64) -> Self {
        self.x0 = Some(x0);
        self
    }

    /// Set the neutral grounding impedance (`None` leaves it ungrounded).
    pub fn with_neutral(mut self, neutral: Option<Complex64>) -> Self {
        self.neutral = neutral;
        self
    }

    pub fn negative_sequence_reactance(&self) -> f64 {
        self.x2.unwrap_or(self.xd_subtransient)
    }
}

/// Constant-admittance shunt (capacitor bank, reactor).
#[derive(Debug, Clone, PartialEq)]
pub struct Shunt {
    pub name: String,
    pub bus: BusId,
    pub g: f64,
    pub b: f64,
}

impl Shunt {
    pub fn new(name: impl Into<String>, bus: BusId, g: f64, b: f64) -> Self {
        Self {
            name: name.into(),
            bus,
            g,
            b,
        }
    }
}

/// Two-port admittance of a series branch between two buses.
///
/// `[I_from; I_to] = [[y_ff, y_ft]; [y_tf, y_tt]] [V_from; V_to]`
#[derive(Debug, Clone, PartialEq)]
pub struct BranchModel {
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    pub y_ff: Complex64,
    pub y_ft: Complex64,
    pub y_tf: Complex64,
    pub y_tt: Complex64,
}

impl BranchModel {
    fn pi_section(name: &str, from: BusId, to: BusId, z: Complex64, b_total: f64, tap: f64) -> Self {
        let y = z.inv();
        let charging = Complex64::new(0.0, 0.5 * b_total);
        Self {
            name: name.to_string(),
            from,
            to,
            y_ff: (y + charging) / (tap * tap),
            y_ft: -y / tap,
            y_tf: -y / tap,
            y_tt: y + charging,
        }
    }

    /// Stamp into a bus admittance matrix.
    pub fn stamp(&self, y: &mut SparseMatrix<Complex64>) {
        let (f, t) = (self.from.0, self.to.0);
        y.add(f, f, self.y_ff);
        y.add(f, t, self.y_ft);
        y.add(t, f, self.y_tf);
        y.add(t, t, self.y_tt);
    }
}

/// Bus network with lines, transformers, generators and shunts.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerNetwork {
    /// System MVA base
    pub base_mva: f64,
    pub buses: Vec<Bus>,
    pub lines: Vec<Line>,
    pub transformers: Vec<Transformer>,
    pub generators: Vec<Generator>,
    pub shunts: Vec<Shunt>,
    bus_map: HashMap<String, BusId>,
    element_names: HashSet<String>,
}

impl Default for PowerNetwork {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_MVA)
    }
}

fn require(element: &str, param: &str, ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SimError::invalid_parameter(element, param, message))
    }
}

impl PowerNetwork {
    /// Create an empty network on the given MVA base.
    pub fn new(base_mva: f64) -> Self {
        Self {
            base_mva,
            buses: Vec::new(),
            lines: Vec::new(),
            transformers: Vec::new(),
            generators: Vec::new(),
            shunts: Vec::new(),
            bus_map: HashMap::new(),
            element_names: HashSet::new(),
        }
    }

    /// Number of buses.
    pub fn num_buses(&self) -> usize {
        self.buses.len()
    }

    /// Look up a bus by name.
    pub fn find_bus(&self, name: &str) -> Option<BusId> {
        self.bus_map.get(name).copied()
    }

    /// Look up a bus by name, failing with `NodeNotFound`.
    pub fn bus(&self, name: &str) -> Result<BusId> {
        self.find_bus(name).ok_or_else(|| SimError::NodeNotFound { node: name.to_string() })
    }

    fn check_bus(&self, element: &str, bus: BusId) -> Result<()> {
        if bus.0 < self.buses.len() {
            Ok(())
        } else {
            Err(SimError::NodeNotFound {
                node: format!("{bus} (referenced by '{element}')"),
            })
        }
    }

    fn claim_name(&mut self, name: &str) -> Result<()> {
        if !self.element_names.insert(name.to_string()) {
            return Err(SimError::DuplicateComponent { name: name.to_string() });
        }
        Ok(())
    }

    /// Add a bus.
    pub fn add_bus(&mut self, bus: Bus) -> Result<BusId> {
        require(&bus.name, "base_kv", bus.base_kv > 0.0 && bus.base_kv.is_finite(), "must be positive")?;
        require(
            &bus.name,
            "voltage_setpoint",
            bus.voltage_setpoint > 0.0 && bus.voltage_setpoint.is_finite(),
            "must be positive",
        )?;
        let scheduled = [bus.p_gen_mw, bus.q_gen_mvar, bus.p_load_mw, bus.q_load_mvar];
        require(&bus.name, "power", scheduled.iter().all(|v| v.is_finite()), "must be finite")?;
        if self.bus_map.contains_key(&bus.name) {
            return Err(SimError::DuplicateComponent { name: bus.name });
        }
        let id = BusId(self.buses.len());
        self.bus_map.insert(bus.name.clone(), id);
        self.buses.push(bus);
        Ok(id)
    }

    /// Add a transmission line.
    pub fn add_line(&mut self, line: Line) -> Result<()> {
        self.check_bus(&line.name, line.from)?;
        self.check_bus(&line.name, line.to)?;
        require(&line.name, "to", line.from != line.to, "line must join two different buses")?;
        require(&line.name, "r", line.r >= 0.0 && line.r.is_finite(), "must be non-negative")?;
        require(&line.name, "x", line.x.is_finite() && line.impedance().norm() > 0.0, "impedance must be non-zero")?;
        require(&line.name, "b", line.b.is_finite(), "must be finite")?;
        if let Some((r0, x0)) = line.zero_sequence {
            require(&line.name, "z0", r0 >= 0.0 && Complex64::new(r0, x0).norm() > 0.0, "must be non-zero")?;
        }
        self.claim_name(&line.name)?;
        self.lines.push(line);
        Ok(())
    }

    /// Add a two-winding transformer.
    pub fn add_transformer(&mut self, transformer: Transformer) -> Result<()> {
        let name = transformer.name.clone();
        self.check_bus(&name, transformer.from)?;
        self.check_bus(&name, transformer.to)?;
        require(&name, "to", transformer.from != transformer.to, "transformer must join two different buses")?;
        require(&name, "x", transformer.impedance().norm() > 0.0, "impedance must be non-zero")?;
        require(&name, "tap", transformer.tap > 0.0 && transformer.tap.is_finite(), "must be positive")?;
        require(&name, "z0", transformer.zero_sequence_impedance().norm() > 0.0, "must be non-zero")?;
        self.claim_name(&name)?;
        self.transformers.push(transformer);
        Ok(())
    }

    /// Add a generator.
    pub fn add_generator(&mut self, generator: Generator) -> Result<()> {
        let name = generator.name.clone();
        self.check_bus(&name, generator.bus)?;
        require(&name, "xd_subtransient", generator.xd_subtransient > 0.0, "must be positive")?;
        require(&name, "x2", generator.x2.map_or(true, |x| x > 0.0), "must be positive")?;
        require(&name, "x0", generator.x0.map_or(true, |x| x > 0.0), "must be positive")?;
        self.claim_name(&name)?;
        self.generators.push(generator);
        Ok(())
    }

    /// Add a shunt admittance.
    pub fn add_shunt(&mut self, shunt: Shunt) -> Result<()> {
        self.check_bus(&shunt.name, shunt.bus)?;
        require(&shunt.name, "b", shunt.g.is_finite() && shunt.b.is_finite(), "must be finite")?;
        self.claim_name(&shunt.name)?;
        self.shunts.push(shunt);
        Ok(())
    }

    /// The single slack bus.
    pub fn slack_bus(&self) -> Result<BusId> {
        let mut slack = self.buses.iter().enumerate().filter(|(_, b)| b.kind == BusKind::Slack);
        let first = slack.next().map(|(i, _)| BusId(i)).ok_or(SimError::MissingSlackBus)?;
        if slack.next().is_some() {
            return Err(SimError::invalid_topology("network has more than one slack bus"));
        }
        Ok(first)
    }

    /// Check the network is solvable by load flow.
    pub fn validate(&self) -> Result<()> {
        if self.base_mva <= 0.0 || !self.base_mva.is_finite() {
            return Err(SimError::invalid_parameter("network", "base_mva", "must be positive"));
        }
        if self.buses.is_empty() {
            return Err(SimError::invalid_topology("network has no buses"));
        }
        let slack = self.slack_bus()?;
        let island = self.connected_buses(slack);
        if let Some(bus) = self.buses.iter().enumerate().find(|(i, _)| !island.contains(&BusId(*i))) {
            return Err(SimError::invalid_topology(format!(
                "bus '{}' is not connected to the slack bus",
                bus.1.name
            )));
        }
        Ok(())
    }

    /// Series branch endpoints (lines and transformers).
    pub fn branch_endpoints(&self) -> impl Iterator<Item = (BusId, BusId)> + '_ {
        self.lines
            .iter()
            .map(|l| (l.from, l.to))
            .chain(self.transformers.iter().map(|t| (t.from, t.to)))
    }

    /// Buses reachable from `start` through lines and transformers.
    pub fn connected_buses(&self, start: BusId) -> HashSet<BusId> {
        let mut adjacency = vec![Vec::new(); self.buses.len()];
        for (a, b) in self.branch_endpoints() {
            adjacency[a.0].push(b);
            adjacency[b.0].push(a);
        }
        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(bus) = stack.pop() {
            for &next in &adjacency[bus.0] {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Positive-sequence two-port models of every line and transformer.
    pub fn branch_models(&self) -> Vec<BranchModel> {
        let lines = self
            .lines
            .iter()
            .map(|l| BranchModel::pi_section(&l.name, l.from, l.to, l.impedance(), l.b, 1.0));
        let transformers = self
            .transformers
            .iter()
            .map(|t| BranchModel::pi_section(&t.name, t.from, t.to, t.impedance(), 0.0, t.tap));
        lines.chain(transformers).collect()
    }

    /// Bus admittance matrix used by load flow (branches plus shunts).
    pub fn admittance_matrix(&self) -> SparseMatrix<Complex64> {
        let mut y = SparseMatrix::new(self.buses.len());
        for i in 0..self.buses.len() {
            y.add(i, i, Complex64::new(0.0, 0.0));
        }
        for branch in self.branch_models() {
            branch.stamp(&mut y);
        }
        for shunt in &self.shunts {
            y.add(shunt.bus.0, shunt.bus.0, Complex64::new(shunt.g, shunt.b));
        }
        y
    }

    /// Copy of the network with one element parameter replaced.
    ///
    /// Buses take `p_load`, `q_load`, `p_gen`, `q_gen` and `voltage`; lines
    /// `r`, `x`, `b`; transformers `r`, `x`, `tap`; generators `xd`, `x2`,
    /// `x0`; shunts `g`, `b`.
    pub fn with_parameter(&self, element: &str, param: &str, value: f64) -> Result<PowerNetwork> {
        require(element, param, value.is_finite(), "must be finite")?;
        let positive = value > 0.0;
        let mut net = self.clone();
        let p = param.to_ascii_lowercase();
        let unknown = || SimError::invalid_parameter(element, param, "no such parameter for this element");

        if let Some(id) = self.find_bus(element) {
            let bus = &mut net.buses[id.0];
            match p.as_str() {
                "p_load" => bus.p_load_mw = value,
                "q_load" => bus.q_load_mvar = value,
                "p_gen" => bus.p_gen_mw = value,
                "q_gen" => bus.q_gen_mvar = value,
                "voltage" => {
                    require(element, param, positive, "must be positive")?;
                    bus.voltage_setpoint = value;
                }
                _ => return Err(unknown()),
            }
        } else if let Some(line) = net.lines.iter_mut().find(|l| l.name == element) {
            match p.as_str() {
                "r" => line.r = value,
                "x" => line.x = value,
                "b" => line.b = value,
                _ => return Err(unknown()),
            }
            require(element, param, line.r >= 0.0 && line.impedance().norm() > 0.0, "impedance must be non-zero")?;
        } else if let Some(t) = net.transformers.iter_mut().find(|t| t.name == element) {
            match p.as_str() {
                "r" => t.r = value,
                "x" => t.x = value,
                "tap" => {
                    require(element, param, positive, "must be positive")?;
                    t.tap = value;
                }
                _ => return Err(unknown()),
            }
            require(element, param, t.r >= 0.0 && t.impedance().norm() > 0.0, "impedance must be non-zero")?;
        } else if let Some(g) = net.generators.iter_mut().find(|g| g.name == element) {
            require(element, param, positive, "must be positive")?;
            match p.as_str() {
                "xd" => g.xd_subtransient = value,
                "x2" => g.x2 = Some(value),
                "x0" => g.x0 = Some(value),
                _ => return Err(unknown()),
            }
        } else if let Some(s) = net.shunts.iter_mut().find(|s| s.name == element) {
            match p.as_str() {
                "g" => s.g = value,
                "b" => s.b = value,
                _ => return Err(unknown()),
            }
        } else {
            return Err(SimError::UnknownComponent {
                name: element.to_string(),
            });
        }
        Ok(net)
    }

    /// Base current of a bus in amperes.
    pub fn base_current_amps(&self, bus: BusId) -> f64 {
        self.base_mva * 1e3 / (3f64.sqrt() * self.buses[bus.0].base_kv)
    }
}
