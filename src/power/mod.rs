//! Balanced power-system studies on a bus network.
//!
//! - [`network`] - buses, branches, machines and the bus admittance matrix
//! - [`flow`] - Newton-Raphson / Gauss-Seidel load flow
//! - [`fault`] - symmetrical-component short-circuit analysis

pub mod fault;
pub mod flow;
pub mod network;

pub use fault::{
    BusFaultVoltage, FaultAnalyzer, FaultConfig, FaultReport, FaultType, Prefault, RelayCurve, RelaySettings,
    Sequence, SequenceNetwork,
};
pub use flow::{BranchFlow, BusSolution, PowerFlowConfig, PowerFlowMethod, PowerFlowResult, PowerFlowSolver};
pub use network::{
    BranchModel, Bus, BusId, BusKind, Generator, Line, PowerNetwork, Shunt, Transformer, WindingConnection,
    DEFAULT_BASE_MVA,
};
