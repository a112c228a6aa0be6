//! # Voltaic Core
//!
//! A circuit and power-system simulation engine.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) over arbitrary, possibly cyclic, networks
//! - DC operating point, AC small-signal and adaptive transient analysis
//! - Linear components (R, C, L), independent and controlled sources, diodes and BJTs
//! - Balanced load flow (Newton-Raphson with Gauss-Seidel fallback)
//! - Symmetrical-component fault analysis with relay trip times
//! - Parametric and Monte Carlo sweeps across a worker pool
//! - Background runs that can be paused, resumed and stopped
//!
//! ## Architecture
//!
//! - [`circuit`] - Circuit graph representation and validation
//! - [`components`] - Component models and their stamps
//! - [`solver`] - MNA assembly, sparse LU and the DC / AC / transient solvers
//! - [`power`] - Bus networks, load flow and fault analysis
//! - [`analysis`] - Analysis configurations, results and the synchronous entry point
//! - [`session`] - Runs on background threads with pause/resume/stop and progress
//! - [`sweep`] - Parameter variation fan-out
//!
//! ## Usage
//!
//! ```no_run
//! use voltaic_core::analysis::{self, AnalysisConfig};
//! use voltaic_core::circuit::CircuitBuilder;
//! use voltaic_core::components::Waveform;
//! use voltaic_core::session::RunControl;
//! use voltaic_core::solver::DcConfig;
//!
//! let mut b = CircuitBuilder::new();
//! b.add_voltage_source("V1", "in", "0", Waveform::Dc(10.0))?;
//! b.add_resistor("R1", "in", "out", 1e3)?;
//! b.add_resistor("R2", "out", "0", 1e3)?;
//! let snapshot = b.build()?.into();
//!
//! let result = analysis::run(&snapshot, &AnalysisConfig::Dc(DcConfig::new()), &RunControl::new())?;
//! println!("{:?}", result.as_dc().and_then(|op| op.node_voltage("out")));
//! # Ok::<(), voltaic_core::SimError>(())
//! ```
//!
//! ## Circuit Simulation Method
//!
//! Every analysis assembles `A x = z` from per-component stamps, with node
//! voltages first and auxiliary branch currents after them:
//!
//! 1. Nonlinear devices are linearized at the current guess and the system is
//!    iterated with damped Newton-Raphson until two consecutive updates agree
//! 2. Reactive elements (C, L) are discretized with the trapezoidal rule; the
//!    step size is chosen from a step-doubling error estimate
//! 3. AC analysis linearizes around the DC operating point and solves one
//!    complex system per frequency

pub mod analysis;
pub mod circuit;
pub mod components;
pub mod error;
pub mod power;
pub mod session;
pub mod solver;
pub mod sweep;

// Re-export main types for convenience
pub use analysis::{AnalysisConfig, SimulationResult, Snapshot};
pub use circuit::{Circuit, CircuitBuilder};
pub use error::{Result, SimError};
pub use power::PowerNetwork;
pub use session::{RunControl, RunHandle, RunStatus, Session};

/// Thermal voltage at room temperature (approximately 26mV)
pub const THERMAL_VOLTAGE: f64 = 0.0258;
