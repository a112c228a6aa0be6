//! Newton-Raphson iteration for nonlinear components.
//!
//! Each iteration re-stamps every component at the present guess, solves
//! the linearized system, and damps the update by the most restrictive
//! junction limit among the nonlinear devices.

use crate::circuit::Circuit;
use crate::components::EvalContext;
use crate::error::{Result, SimError};

use super::mna::MnaBuilder;
use super::sparse::SparseLuSolver;
use super::{DEFAULT_ABSTOL, DEFAULT_MAX_ITERATIONS, DEFAULT_RELTOL};

/// Convergence policy shared by the DC and transient solvers.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonConfig {
    /// Maximum iterations before `NonConvergence`
    pub max_iterations: usize,
    /// Absolute tolerance on every unknown
    pub abstol: f64,
    /// Relative tolerance on every unknown
    pub reltol: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            abstol: DEFAULT_ABSTOL,
            reltol: DEFAULT_RELTOL,
        }
    }
}

impl NewtonConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum Newton-Raphson iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the absolute tolerance.
    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Reject a zero iteration cap and non-positive tolerances.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(SimError::invalid_analysis("Newton iteration cap must be at least 1"));
        }
        if !(self.abstol.is_finite() && self.reltol.is_finite()) || self.abstol <= 0.0 || self.reltol < 0.0 {
            return Err(SimError::invalid_analysis("Newton tolerances must be positive"));
        }
        Ok(())
    }

    /// True when `|new - old| <= abstol + reltol * max(|new|, |old|)` everywhere.
    pub fn converged(&self, old: &[f64], new: &[f64]) -> bool {
        old.iter()
            .zip(new)
            .all(|(&o, &n)| (n - o).abs() <= self.abstol + self.reltol * n.abs().max(o.abs()))
    }
}

/// Result of a converged Newton solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonOutcome {
    /// Solution vector (node voltages then branch currents)
    pub solution: Vec<f64>,
    /// Iterations used (1 for a direct linear solve)
    pub iterations: usize,
}

/// Newton-Raphson solver for nonlinear circuits.
///
/// Owns its sparse LU solver, so a linear circuit re-solved with an
/// unchanged matrix reuses the previous factorization.
#[derive(Debug, Clone, Default)]
pub struct NewtonRaphson {
    pub config: NewtonConfig,
    lu: SparseLuSolver<f64>,
}

impl NewtonRaphson {
    /// Create a new Newton-Raphson solver.
    pub fn new(config: NewtonConfig) -> Self {
        Self {
            config,
            lu: SparseLuSolver::new(),
        }
    }

    /// Linear solver statistics: (factorizations, solves).
    pub fn lu_stats(&self) -> (usize, usize) {
        (self.lu.factorizations(), self.lu.solves())
    }

    /// Solve the circuit at the evaluation point `point` starting from `guess`.
    ///
    /// Only the time, source scale and reactive mode of `point` are used;
    /// the solution it carries is replaced by each iterate.
    pub fn solve(&mut self, circuit: &Circuit, point: &EvalContext<'_>, guess: Vec<f64>) -> Result<NewtonOutcome> {
        let builder = MnaBuilder::new(circuit);
        let mut x = guess;
        if x.len() != builder.size() {
            x = vec![0.0; builder.size()];
        }

        if !circuit.is_nonlinear() {
            // Purely linear circuit - solve directly
            let system = builder.assemble(&point.with_solution(&x));
            let solution = self.lu.factor_and_solve(&system.matrix, &system.rhs)?;
            return Ok(NewtonOutcome {
                solution,
                iterations: 1,
            });
        }

        let mut previous_converged = false;
        let mut last_delta = f64::INFINITY;

        for iter in 0..self.config.max_iterations {
            let _span = tracing::trace_span!("newton_iter", iter).entered();

            let system = builder.assemble(&point.with_solution(&x));
            let mut x_new = self.lu.factor_and_solve(&system.matrix, &system.rhs)?;

            if x_new.iter().any(|v| !v.is_finite()) {
                return Err(SimError::non_convergence(iter + 1, f64::INFINITY));
            }

            // Junction limiting: damp the whole step by the tightest device limit
            let fraction = {
                let old_ctx = point.with_solution(&x);
                let new_ctx = point.with_solution(&x_new);
                circuit
                    .components
                    .iter()
                    .map(|c| c.step_fraction(&old_ctx, &new_ctx))
                    .fold(1.0, f64::min)
            };
            let limited = fraction < 1.0;
            if limited {
                for (n, &o) in x_new.iter_mut().zip(&x) {
                    *n = o + fraction * (*n - o);
                }
            }

            last_delta = x_new
                .iter()
                .zip(&x)
                .map(|(n, o)| (n - o).abs())
                .fold(0.0, f64::max);
            let converged = !limited && self.config.converged(&x, &x_new);
            x = x_new;

            if converged && previous_converged {
                tracing::debug!(iterations = iter + 1, "Newton converged");
                return Ok(NewtonOutcome {
                    solution: x,
                    iterations: iter + 1,
                });
            }
            previous_converged = converged;
        }

        tracing::debug!(
            max_iterations = self.config.max_iterations,
            residual = last_delta,
            "Newton did not converge"
        );
        Err(SimError::non_convergence(self.config.max_iterations, last_delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::components::{DiodeParams, Waveform};

    #[test]
    fn test_linear_circuit_single_iteration() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "a", "0", Waveform::Dc(5.0)).unwrap();
        b.add_resistor("R1", "a", "0", 100.0).unwrap();
        let circuit = b.build().unwrap();

        let mut newton = NewtonRaphson::default();
        let point = EvalContext::dc(&[], circuit.num_nodes);
        let out = newton.solve(&circuit, &point, Vec::new()).unwrap();
        assert_eq!(out.iterations, 1);
        assert_eq!(newton.lu_stats(), (1, 1));
        assert!((out.solution[0] - 5.0).abs() < 1e-12);
        // Branch current flows into the source's + terminal
        assert!((out.solution[1] + 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_diode_converges_with_limiting() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(5.0)).unwrap();
        b.add_resistor("R1", "in", "a", 1000.0).unwrap();
        b.add_diode("D1", "a", "0", DiodeParams::default()).unwrap();
        let circuit = b.build().unwrap();

        let mut newton = NewtonRaphson::default();
        let point = EvalContext::dc(&[], circuit.num_nodes);
        let out = newton.solve(&circuit, &point, Vec::new()).unwrap();
        assert!(out.iterations > 2);
        let v_d = out.solution[1];
        assert!(v_d > 0.6 && v_d < 0.75, "diode drop {v_d}");
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(5.0)).unwrap();
        b.add_resistor("R1", "in", "a", 1000.0).unwrap();
        b.add_diode("D1", "a", "0", DiodeParams::default()).unwrap();
        let circuit = b.build().unwrap();

        let mut newton = NewtonRaphson::new(NewtonConfig::new().with_max_iterations(2));
        let point = EvalContext::dc(&[], circuit.num_nodes);
        assert!(matches!(
            newton.solve(&circuit, &point, Vec::new()),
            Err(SimError::NonConvergence { iterations: 2, .. })
        ));
    }
}
