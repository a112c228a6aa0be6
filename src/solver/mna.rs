//! MNA system assembly.
//!
//! Components emit [`Stamp`]s in [`VarIndex`] coordinates; the builder maps
//! them onto matrix rows and columns (node voltages first, ground excluded,
//! then branch currents) and drops every entry that touches ground.

use num_complex::Complex64;

use super::sparse::{Scalar, SparseMatrix};
use crate::circuit::{Circuit, VarIndex};
use crate::components::{AcContext, EvalContext, Stamp};

/// MNA matrix system Ax = z.
#[derive(Debug, Clone, PartialEq)]
pub struct MnaSystem<T> {
    /// System matrix A
    pub matrix: SparseMatrix<T>,
    /// Source vector z
    pub rhs: Vec<T>,
}

impl<T: Scalar> MnaSystem<T> {
    /// Create an all-zero system of the given dimension.
    pub fn new(size: usize) -> Self {
        Self {
            matrix: SparseMatrix::new(size),
            rhs: vec![T::zero(); size],
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.rhs.len()
    }

    /// Add a component stamp, dropping ground rows and columns.
    pub fn add_stamp(&mut self, stamp: &Stamp<T>, num_nodes: usize) {
        for &(row, col, value) in &stamp.matrix {
            if let (Some(r), Some(c)) = (row.to_index(num_nodes), col.to_index(num_nodes)) {
                self.matrix.add(r, c, value);
            }
        }
        for &(row, value) in &stamp.rhs {
            if let Some(r) = row.to_index(num_nodes) {
                self.rhs[r] += value;
            }
        }
    }

    /// Residual `A x - z`.
    pub fn residual(&self, x: &[T]) -> Vec<T> {
        self.matrix
            .mul_vec(x)
            .into_iter()
            .zip(&self.rhs)
            .map(|(ax, &z)| ax - z)
            .collect()
    }
}

/// Assembles MNA systems for one circuit.
///
/// The builder only reads the circuit. Components are visited in id order
/// and matrix rows are ordered, so a given topology always yields the same
/// sparsity pattern.
#[derive(Debug, Clone, Copy)]
pub struct MnaBuilder<'a> {
    circuit: &'a Circuit,
}

impl<'a> MnaBuilder<'a> {
    /// Create a builder for the given circuit.
    pub fn new(circuit: &'a Circuit) -> Self {
        Self { circuit }
    }

    /// Size of the assembled system.
    pub fn size(&self) -> usize {
        self.circuit.matrix_size()
    }

    /// Row of a variable, `None` for ground.
    pub fn index(&self, var: VarIndex) -> Option<usize> {
        var.to_index(self.circuit.num_nodes)
    }

    /// Assemble the real system at a DC or transient evaluation point.
    pub fn assemble(&self, ctx: &EvalContext<'_>) -> MnaSystem<f64> {
        let mut system = MnaSystem::new(self.size());
        for component in &self.circuit.components {
            system.add_stamp(&component.stamp(ctx), self.circuit.num_nodes);
        }
        system
    }

    /// Assemble the complex small-signal system at one frequency.
    pub fn assemble_ac(&self, ctx: &AcContext<'_>) -> MnaSystem<Complex64> {
        let mut system = MnaSystem::new(self.size());
        for component in &self.circuit.components {
            system.add_stamp(&component.ac_stamp(ctx), self.circuit.num_nodes);
        }
        system
    }
}
