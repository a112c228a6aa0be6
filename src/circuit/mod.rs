//! Circuit graph representation and validation.
//!
//! The [`Circuit`] struct holds all components, nodes, and their connections
//! in a form suitable for simulation. Circuits are assembled with a
//! [`CircuitBuilder`], which validates the topology before handing out the
//! immutable snapshot.

mod graph;
mod types;
mod validate;

pub use graph::{Circuit, CircuitBuilder, GROUND_NAMES};
pub use types::*;
pub use validate::{floating_nodes, validate_circuit};
