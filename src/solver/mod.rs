//! MNA (Modified Nodal Analysis) solvers.
//!
//! This module provides the numerical engine for circuit simulation.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and branch currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D is usually 0 (for ideal voltage sources)
//! - v is the vector of node voltages
//! - j is the vector of voltage source currents
//! - i is the sum of current sources into each node
//! - e is the vector of voltage source values
//!
//! The same assembly serves three analyses: the DC operating point
//! ([`DcSolver`]), small-signal frequency response ([`AcSolver`]) and
//! adaptive time-domain integration ([`TransientSolver`]).

pub mod ac;
pub mod dc;
mod mna;
mod newton;
mod sparse;
pub mod transient;

pub use ac::{AcConfig, AcPoint, AcResult, AcSolver, AcSweep};
pub use dc::{DcConfig, DcSolver, OperatingPoint};
pub use mna::{MnaBuilder, MnaSystem};
pub use newton::{NewtonConfig, NewtonOutcome, NewtonRaphson};
pub use sparse::{LuFactors, Scalar, SparseLuSolver, SparseMatrix};
pub use transient::{HistoryState, TransientConfig, TransientResult, TransientSolver, TransientState};

/// Absolute convergence tolerance for Newton-Raphson iteration (volts or amps).
pub const DEFAULT_ABSTOL: f64 = 1e-9;

/// Relative convergence tolerance for Newton-Raphson iteration.
pub const DEFAULT_RELTOL: f64 = 1e-6;

/// Maximum Newton-Raphson iterations per solve.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Minimum conductance placed across every junction.
pub const GMIN: f64 = 1e-12;

/// Pivots smaller than this fraction of the largest matrix entry are singular.
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-13;
