//! Analysis configurations, results and the synchronous entry point.
//!
//! [`run`] drives one analysis of one snapshot to completion on the calling
//! thread. [`Session`](crate::session::Session) wraps the same call on a
//! background thread.

use std::sync::Arc;

use crate::circuit::{validate_circuit, Circuit};
use crate::error::{Result, SimError};
use crate::power::{
    FaultAnalyzer, FaultConfig, FaultReport, PowerFlowConfig, PowerFlowResult, PowerFlowSolver, PowerNetwork,
};
use crate::session::RunControl;
use crate::solver::{
    AcConfig, AcResult, AcSolver, DcConfig, DcSolver, OperatingPoint, TransientConfig, TransientResult,
    TransientSolver,
};
use crate::sweep::{self, SweepConfig, SweepResult};

/// Immutable model an analysis runs on.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Circuit(Arc<Circuit>),
    Network(Arc<PowerNetwork>),
}

impl From<Circuit> for Snapshot {
    fn from(circuit: Circuit) -> Self {
        Snapshot::Circuit(Arc::new(circuit))
    }
}

impl From<Arc<Circuit>> for Snapshot {
    fn from(circuit: Arc<Circuit>) -> Self {
        Snapshot::Circuit(circuit)
    }
}

impl From<PowerNetwork> for Snapshot {
    fn from(network: PowerNetwork) -> Self {
        Snapshot::Network(Arc::new(network))
    }
}

impl From<Arc<PowerNetwork>> for Snapshot {
    fn from(network: Arc<PowerNetwork>) -> Self {
        Snapshot::Network(network)
    }
}

impl Snapshot {
    pub fn kind(&self) -> &'static str {
        match self {
            Snapshot::Circuit(_) => "circuit",
            Snapshot::Network(_) => "power network",
        }
    }

    /// New snapshot with one component or network element parameter replaced.
    pub fn with_parameter(&self, element: &str, param: &str, value: f64) -> Result<Snapshot> {
        Ok(match self {
            Snapshot::Circuit(c) => c.with_parameter(element, param, value)?.into(),
            Snapshot::Network(n) => n.with_parameter(element, param, value)?.into(),
        })
    }

    fn circuit(&self, analysis: &str) -> Result<&Circuit> {
        match self {
            Snapshot::Circuit(c) => Ok(c),
            Snapshot::Network(_) => Err(mismatch(analysis, self)),
        }
    }

    fn network(&self, analysis: &str) -> Result<&PowerNetwork> {
        match self {
            Snapshot::Network(n) => Ok(n),
            Snapshot::Circuit(_) => Err(mismatch(analysis, self)),
        }
    }
}

fn mismatch(analysis: &str, snapshot: &Snapshot) -> SimError {
    SimError::invalid_analysis(format!(
        "{analysis} analysis cannot run on a {} snapshot",
        snapshot.kind()
    ))
}

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisConfig {
    Dc(DcConfig),
    Ac(AcConfig),
    Transient(TransientConfig),
    PowerFlow(PowerFlowConfig),
    Fault(FaultConfig),
    Sweep(SweepConfig),
}

impl AnalysisConfig {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisConfig::Dc(_) => "dc",
            AnalysisConfig::Ac(_) => "ac",
            AnalysisConfig::Transient(_) => "transient",
            AnalysisConfig::PowerFlow(_) => "power flow",
            AnalysisConfig::Fault(_) => "fault",
            AnalysisConfig::Sweep(_) => "sweep",
        }
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        match self {
            AnalysisConfig::Dc(c) => c.validate(),
            AnalysisConfig::Ac(c) => c.validate(),
            AnalysisConfig::Transient(c) => c.validate(),
            AnalysisConfig::PowerFlow(c) => c.validate(),
            AnalysisConfig::Fault(c) => c.validate(),
            AnalysisConfig::Sweep(c) => c.validate(),
        }
    }
}

/// Outcome of a completed analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationResult {
    Dc(OperatingPoint),
    Ac(AcResult),
    Transient(TransientResult),
    PowerFlow(PowerFlowResult),
    Fault(FaultReport),
    Sweep(SweepResult),
}

impl SimulationResult {
    pub fn as_dc(&self) -> Option<&OperatingPoint> {
        match self {
            SimulationResult::Dc(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_ac(&self) -> Option<&AcResult> {
        match self {
            SimulationResult::Ac(ac) => Some(ac),
            _ => None,
        }
    }

    pub fn as_transient(&self) -> Option<&TransientResult> {
        match self {
            SimulationResult::Transient(tr) => Some(tr),
            _ => None,
        }
    }

    pub fn as_power_flow(&self) -> Option<&PowerFlowResult> {
        match self {
            SimulationResult::PowerFlow(pf) => Some(pf),
            _ => None,
        }
    }

    pub fn as_fault(&self) -> Option<&FaultReport> {
        match self {
            SimulationResult::Fault(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_sweep(&self) -> Option<&SweepResult> {
        match self {
            SimulationResult::Sweep(sweep) => Some(sweep),
            _ => None,
        }
    }
}

/// Check a configuration against a snapshot without running anything.
///
/// Covers configuration values, snapshot kind, circuit topology, the slack
/// bus of a load flow and the sequence networks of a fault study.
pub fn validate(snapshot: &Snapshot, config: &AnalysisConfig) -> Result<()> {
    config.validate()?;
    let name = config.name();
    match config {
        AnalysisConfig::Dc(_) | AnalysisConfig::Ac(_) | AnalysisConfig::Transient(_) => {
            validate_circuit(snapshot.circuit(name)?)
        }
        AnalysisConfig::PowerFlow(_) => snapshot.network(name)?.validate(),
        AnalysisConfig::Fault(c) => FaultAnalyzer::new(c.clone()).check(snapshot.network(name)?),
        AnalysisConfig::Sweep(c) => sweep::validate(snapshot, c),
    }
}

/// Run one analysis to completion on the calling thread.
///
/// `control` is consulted at the analysis' suspension points; pass
/// `&RunControl::new()` for an uncontrolled run.
pub fn run(snapshot: &Snapshot, config: &AnalysisConfig, control: &RunControl) -> Result<SimulationResult> {
    if control.is_stop_requested() {
        return Err(SimError::Cancelled);
    }
    let name = config.name();
    match config {
        AnalysisConfig::Dc(c) => {
            let op = DcSolver::new(c.clone()).solve(snapshot.circuit(name)?)?;
            Ok(SimulationResult::Dc(op))
        }
        AnalysisConfig::Ac(c) => AcSolver::new(c.clone())
            .solve_controlled(snapshot.circuit(name)?, control)
            .map(SimulationResult::Ac),
        AnalysisConfig::Transient(c) => TransientSolver::new(c.clone())
            .run(snapshot.circuit(name)?, control)
            .map(SimulationResult::Transient),
        AnalysisConfig::PowerFlow(c) => PowerFlowSolver::new(c.clone())
            .solve(snapshot.network(name)?)
            .map(SimulationResult::PowerFlow),
        AnalysisConfig::Fault(c) => FaultAnalyzer::new(c.clone())
            .analyze(snapshot.network(name)?)
            .map(SimulationResult::Fault),
        AnalysisConfig::Sweep(c) => sweep::run(snapshot, c, control).map(SimulationResult::Sweep),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::components::Waveform;
    use crate::power::{Bus, BusKind, FaultType, Line};

    fn divider() -> Circuit {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(10.0)).unwrap();
        b.add_resistor("R1", "in", "out", 1000.0).unwrap();
        b.add_resistor("R2", "out", "0", 1000.0).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_run_dc() {
        let snapshot = Snapshot::from(divider());
        let result = run(&snapshot, &AnalysisConfig::Dc(DcConfig::new()), &RunControl::new()).unwrap();
        let op = result.as_dc().unwrap();
        assert!((op.node_voltage("out").unwrap() - 5.0).abs() < 1e-9);
        assert!(result.as_ac().is_none());
    }

    #[test]
    fn test_snapshot_kind_mismatch() {
        let snapshot = Snapshot::from(divider());
        let config = AnalysisConfig::PowerFlow(PowerFlowConfig::new());
        assert!(matches!(
            validate(&snapshot, &config),
            Err(SimError::InvalidAnalysis { .. })
        ));
        assert!(matches!(
            run(&snapshot, &config, &RunControl::new()),
            Err(SimError::InvalidAnalysis { .. })
        ));
    }

    #[test]
    fn test_validate_reports_missing_slack() {
        let mut net = PowerNetwork::default();
        let a = net.add_bus(Bus::new("A", BusKind::Pv, 138.0)).unwrap();
        let b = net.add_bus(Bus::new("B", BusKind::Pq, 138.0)).unwrap();
        net.add_line(Line::new("L1", a, b, 0.01, 0.1, 0.0)).unwrap();
        let config = AnalysisConfig::PowerFlow(PowerFlowConfig::new());
        assert_eq!(validate(&net.into(), &config), Err(SimError::MissingSlackBus));
    }

    #[test]
    fn test_validate_reports_undefined_sequence_network() {
        let mut net = PowerNetwork::default();
        net.add_bus(Bus::new("A", BusKind::Slack, 138.0)).unwrap();
        // No machine anywhere: the positive-sequence island has no source
        let config = AnalysisConfig::Fault(FaultConfig::new("A", FaultType::ThreePhase));
        assert!(matches!(
            validate(&net.into(), &config),
            Err(SimError::UndefinedSequenceNetwork { .. })
        ));
    }

    #[test]
    fn test_stopped_control_cancels_before_start() {
        let control = RunControl::new();
        control.request_stop();
        let snapshot = Snapshot::from(divider());
        assert_eq!(
            run(&snapshot, &AnalysisConfig::Dc(DcConfig::new()), &control),
            Err(SimError::Cancelled)
        );
    }
}
