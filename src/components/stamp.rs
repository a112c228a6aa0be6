//! Component stamps and the evaluation point they are produced at.
//!
//! A [`Stamp`] is a component's local contribution to the MNA system,
//! expressed with [`VarIndex`] coordinates. Entries that touch ground are
//! kept here and dropped by the assembler, so components never need to
//! know the global matrix layout.

use num_complex::Complex64;

use crate::circuit::{BranchId, NodeId, VarIndex};
use crate::solver::Scalar;

/// Local matrix and right-hand-side contribution of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp<T> {
    /// Matrix entries `(row, col, value)`
    pub matrix: Vec<(VarIndex, VarIndex, T)>,
    /// Right-hand-side entries `(row, value)`
    pub rhs: Vec<(VarIndex, T)>,
}

impl<T: Scalar> Default for Stamp<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Stamp<T> {
    /// Create an empty stamp.
    pub fn new() -> Self {
        Self {
            matrix: Vec::new(),
            rhs: Vec::new(),
        }
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: impl Into<VarIndex>, col: impl Into<VarIndex>, value: T) {
        self.matrix.push((row.into(), col.into(), value));
    }

    /// Add to source vector element.
    pub fn add_source(&mut self, row: impl Into<VarIndex>, value: T) {
        self.rhs.push((row.into(), value));
    }

    /// Stamp an admittance between two nodes.
    /// For an admittance G between nodes n1 and n2:
    ///   A[n1,n1] += G
    ///   A[n2,n2] += G
    ///   A[n1,n2] -= G
    ///   A[n2,n1] -= G
    pub fn conductance(&mut self, n1: NodeId, n2: NodeId, g: T) {
        self.add(n1, n1, g);
        self.add(n2, n2, g);
        self.add(n1, n2, -g);
        self.add(n2, n1, -g);
    }

    /// Stamp a current source between two nodes.
    /// Current flows through the element from n+ to n-.
    pub fn current_source(&mut self, n_pos: NodeId, n_neg: NodeId, current: T) {
        // Current enters n- and leaves n+
        self.add_source(n_pos, -current);
        self.add_source(n_neg, current);
    }

    /// Stamp the incidence of a branch current variable.
    ///
    /// The branch current flows through the element from n+ to n- and the
    /// branch row reads `V[n+] - V[n-]`.
    pub fn branch_incidence(&mut self, n_pos: NodeId, n_neg: NodeId, br: BranchId) {
        let one = T::one();
        self.add(n_pos, br, one);
        self.add(br, n_pos, one);
        self.add(n_neg, br, -one);
        self.add(br, n_neg, -one);
    }

    /// Stamp a voltage source between two nodes with its branch current.
    /// V[n+] - V[n-] = E
    pub fn voltage_source(&mut self, n_pos: NodeId, n_neg: NodeId, br: BranchId, voltage: T) {
        self.branch_incidence(n_pos, n_neg, br);
        self.add_source(br, voltage);
    }

    /// Stamp a VCCS (Voltage-Controlled Current Source).
    /// I(out+ -> out-) = gm * (V[ctrl+] - V[ctrl-])
    pub fn vccs(&mut self, out_pos: NodeId, out_neg: NodeId, ctrl_pos: NodeId, ctrl_neg: NodeId, gm: T) {
        self.add(out_pos, ctrl_pos, gm);
        self.add(out_pos, ctrl_neg, -gm);
        self.add(out_neg, ctrl_pos, -gm);
        self.add(out_neg, ctrl_neg, gm);
    }

    /// Append another stamp.
    pub fn extend(&mut self, other: Stamp<T>) {
        self.matrix.extend(other.matrix);
        self.rhs.extend(other.rhs);
    }
}

impl Stamp<f64> {
    /// Stamp a nonlinear device linearized at `v0`.
    ///
    /// `currents[k]` is the current flowing into the device at `terminals[k]`
    /// and `jacobian[k][j]` its derivative with respect to the voltage of
    /// `terminals[j]`. The companion form is `I = I0 + J (v - v0)`.
    pub fn linearized(&mut self, terminals: &[NodeId], v0: &[f64], currents: &[f64], jacobian: &[Vec<f64>]) {
        for (k, &row) in terminals.iter().enumerate() {
            let mut i_eq = currents[k];
            for (j, &col) in terminals.iter().enumerate() {
                let g = jacobian[k][j];
                if g != 0.0 {
                    self.add(row, col, g);
                    i_eq -= g * v0[j];
                }
            }
            self.add_source(row, -i_eq);
        }
    }
}

/// Per-component reactive state carried between accepted time points.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReactiveState {
    /// Voltage across the element (n+ - n-)
    pub voltage: f64,
    /// Current through the element from n+ to n-
    pub current: f64,
}

/// How reactive elements are treated at an evaluation point.
#[derive(Debug, Clone, Copy)]
pub enum ReactiveMode<'a> {
    /// DC: capacitors open, inductors shorted
    Dc,
    /// Trapezoidal companion models for a step of `step` seconds
    Trapezoidal {
        step: f64,
        history: &'a [ReactiveState],
    },
}

/// Evaluation point for real-valued (DC and transient) stamps.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Present Newton guess (node voltages then branch currents)
    pub solution: &'a [f64],
    /// Number of circuit nodes including ground
    pub num_nodes: usize,
    /// Simulation time used for independent source waveforms
    pub time: f64,
    /// Scale applied to independent sources (source stepping)
    pub source_scale: f64,
    /// Reactive element treatment
    pub reactive: ReactiveMode<'a>,
}

impl<'a> EvalContext<'a> {
    /// DC evaluation at time zero with full sources.
    pub fn dc(solution: &'a [f64], num_nodes: usize) -> Self {
        Self {
            solution,
            num_nodes,
            time: 0.0,
            source_scale: 1.0,
            reactive: ReactiveMode::Dc,
        }
    }

    /// The same evaluation point at another solution vector.
    pub fn with_solution<'b>(&self, solution: &'b [f64]) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            solution,
            num_nodes: self.num_nodes,
            time: self.time,
            source_scale: self.source_scale,
            reactive: self.reactive,
        }
    }

    /// Voltage of a node in the present guess.
    pub fn voltage(&self, node: NodeId) -> f64 {
        node_voltage(self.solution, self.num_nodes, node)
    }

    /// Branch current in the present guess.
    pub fn current(&self, branch: BranchId) -> f64 {
        self.solution[(self.num_nodes - 1) + branch.0]
    }
}

/// Evaluation point for small-signal (AC) stamps.
#[derive(Debug, Clone, Copy)]
pub struct AcContext<'a> {
    /// DC operating point solution vector
    pub operating_point: &'a [f64],
    /// Number of circuit nodes including ground
    pub num_nodes: usize,
    /// Angular frequency in rad/s
    pub omega: f64,
}

impl AcContext<'_> {
    /// Operating-point voltage of a node.
    pub fn voltage(&self, node: NodeId) -> f64 {
        node_voltage(self.operating_point, self.num_nodes, node)
    }

    /// The j*omega factor.
    pub fn jw(&self) -> Complex64 {
        Complex64::new(0.0, self.omega)
    }
}

/// Read a node voltage from a solution vector (ground is 0).
pub fn node_voltage(solution: &[f64], num_nodes: usize, node: NodeId) -> f64 {
    match VarIndex::Voltage(node).to_index(num_nodes) {
        Some(i) => solution[i],
        None => 0.0,
    }
}
