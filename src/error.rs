//! Error types for the Voltaic simulation engine.
//!
//! This module provides a unified error type [`SimError`] that covers
//! all error conditions that can occur during circuit construction,
//! topology validation, and the numerical analyses.

use thiserror::Error;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all Voltaic operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Construction Errors ============
    /// Component parameter outside its physically valid range
    #[error("Invalid parameter '{param}' for component '{component}': {message}")]
    InvalidParameter {
        component: String,
        param: String,
        message: String,
    },

    /// Node not found in circuit
    #[error("Node '{node}' not found in circuit")]
    NodeNotFound { node: String },

    /// Component referenced by name does not exist
    #[error("Component '{name}' not found")]
    UnknownComponent { name: String },

    /// Duplicate component name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    // ============ Topology Errors ============
    /// Floating node (not connected to ground by a DC path)
    #[error("Floating node '{node}' detected - no DC path to ground")]
    FloatingNode { node: String },

    /// Invalid circuit or network topology
    #[error("Invalid topology: {message}")]
    InvalidTopology { message: String },

    /// Power-flow network without a slack bus
    #[error("Power-flow network has no slack bus")]
    MissingSlackBus,

    /// Fault analysis lacks the impedance data a sequence network needs
    #[error("Undefined {sequence} sequence network: {message}")]
    UndefinedSequenceNetwork { sequence: String, message: String },

    /// Analysis configuration is inconsistent
    #[error("Invalid analysis configuration: {message}")]
    InvalidAnalysis { message: String },

    // ============ Numerical Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix at row {row} - circuit may have a voltage-source loop or floating node")]
    SingularMatrix { row: usize },

    /// Newton-Raphson (or Gauss-Seidel) iteration did not converge
    #[error("Iteration did not converge after {iterations} iterations (residual: {residual:.2e})")]
    NonConvergence { iterations: usize, residual: f64 },

    /// Adaptive stepping shrank the step below the configured minimum
    #[error("Time step {step:.3e}s fell below the minimum at t = {time:.6e}s")]
    StepSizeUnderflow { time: f64, step: f64 },

    // ============ Run Control Errors ============
    /// Control operation issued in a state that does not allow it
    #[error("Cannot {operation} while run is {state}")]
    InvalidState { operation: String, state: String },

    /// Run was stopped before it completed
    #[error("Run was cancelled")]
    Cancelled,
}

impl SimError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        component: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            component: component.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create a non-convergence error
    pub fn non_convergence(iterations: usize, residual: f64) -> Self {
        Self::NonConvergence {
            iterations,
            residual,
        }
    }

    /// Create an undefined sequence network error
    pub fn undefined_sequence(sequence: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UndefinedSequenceNetwork {
            sequence: sequence.into(),
            message: message.into(),
        }
    }

    /// Create an invalid analysis configuration error
    pub fn invalid_analysis(message: impl Into<String>) -> Self {
        Self::InvalidAnalysis {
            message: message.into(),
        }
    }

    /// Create an invalid topology error
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// True for errors raised by the numerical kernels mid-iteration.
    ///
    /// These end only the affected run or sweep point; everything else is
    /// raised before any iterative work starts.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix { .. } | Self::NonConvergence { .. } | Self::StepSizeUnderflow { .. }
        )
    }
}
