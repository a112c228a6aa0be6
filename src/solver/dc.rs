//! DC operating-point analysis.
//!
//! Capacitors are open and inductors shorted. Nonlinear circuits are solved
//! by Newton-Raphson from a zero (or caller-supplied) guess; when that fails
//! the solve is retried once with source stepping, ramping every independent
//! source from 10% to 100% and warm-starting each step from the last.

use crate::circuit::{BranchId, Circuit, NodeId, GROUND_NAMES};
use crate::components::{EvalContext, ReactiveMode};
use crate::error::{Result, SimError};

use super::newton::{NewtonConfig, NewtonOutcome, NewtonRaphson};

/// Number of source-stepping increments between 0 and full scale.
pub const SOURCE_STEPS: usize = 10;

/// Configuration for the DC solver.
#[derive(Debug, Clone, PartialEq)]
pub struct DcConfig {
    /// Newton-Raphson convergence policy
    pub newton: NewtonConfig,
    /// Retry failed solves with source stepping
    pub source_stepping: bool,
    /// Warm-start guess (full solution vector); zero when absent
    pub initial_guess: Option<Vec<f64>>,
}

impl Default for DcConfig {
    fn default() -> Self {
        Self {
            newton: NewtonConfig::default(),
            source_stepping: true,
            initial_guess: None,
        }
    }
}

impl DcConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Newton-Raphson policy.
    pub fn with_newton(mut self, newton: NewtonConfig) -> Self {
        self.newton = newton;
        self
    }

    /// Enable or disable the source-stepping fallback.
    pub fn with_source_stepping(mut self, enabled: bool) -> Self {
        self.source_stepping = enabled;
        self
    }

    /// Warm-start from a previous solution vector.
    pub fn with_initial_guess(mut self, guess: Vec<f64>) -> Self {
        self.initial_guess = Some(guess);
        self
    }

    /// Check the Newton settings.
    pub fn validate(&self) -> Result<()> {
        self.newton.validate()
    }
}

/// A solved DC operating point.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingPoint {
    /// Node voltages indexed by `NodeId` (ground included as 0.0)
    pub voltages: Vec<f64>,
    /// Auxiliary branch currents indexed by `BranchId`
    pub branch_currents: Vec<f64>,
    /// Node names indexed by `NodeId`
    pub node_names: Vec<String>,
    /// Per-component `(name, current, absorbed power)`
    pub components: Vec<(String, f64, f64)>,
    /// Newton iterations used (summed over source steps)
    pub iterations: usize,
    /// Raw MNA solution vector
    pub solution: Vec<f64>,
}

impl OperatingPoint {
    /// Build the report for a solution vector.
    pub fn from_solution(circuit: &Circuit, ctx: &EvalContext<'_>, iterations: usize) -> Self {
        let solution = ctx.solution.to_vec();
        let mut voltages = vec![0.0; circuit.num_nodes];
        voltages[1..].copy_from_slice(&solution[..circuit.num_nodes - 1]);
        let branch_currents = solution[circuit.num_nodes - 1..].to_vec();
        let components = circuit
            .components
            .iter()
            .map(|c| (c.name().to_string(), c.current(ctx), c.power(ctx)))
            .collect();
        Self {
            voltages,
            branch_currents,
            node_names: circuit.node_names.clone(),
            components,
            iterations,
            solution,
        }
    }

    /// Voltage of a node.
    pub fn voltage(&self, node: NodeId) -> f64 {
        self.voltages[node.0]
    }

    /// Voltage of a node looked up by name.
    pub fn node_voltage(&self, name: &str) -> Option<f64> {
        if GROUND_NAMES.iter().any(|g| g.eq_ignore_ascii_case(name)) {
            return Some(0.0);
        }
        self.node_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.voltages[i])
    }

    /// Current of an auxiliary branch variable.
    pub fn branch_current(&self, branch: BranchId) -> f64 {
        self.branch_currents[branch.0]
    }

    /// Current through a component from its first to its second terminal
    /// (collector current for a BJT).
    pub fn component_current(&self, name: &str) -> Option<f64> {
        self.components.iter().find(|c| c.0 == name).map(|c| c.1)
    }

    /// Power absorbed by a component; negative for a source delivering power.
    pub fn component_power(&self, name: &str) -> Option<f64> {
        self.components.iter().find(|c| c.0 == name).map(|c| c.2)
    }

    /// Net absorbed power over all components (zero up to rounding).
    pub fn power_balance(&self) -> f64 {
        self.components.iter().map(|c| c.2).sum()
    }
}

/// DC operating-point solver.
#[derive(Debug, Clone, Default)]
pub struct DcSolver {
    pub config: DcConfig,
    newton: NewtonRaphson,
}

impl DcSolver {
    /// Create a new DC solver.
    pub fn new(config: DcConfig) -> Self {
        let newton = NewtonRaphson::new(config.newton.clone());
        Self { config, newton }
    }

    /// Solve the operating point with sources at their t = 0 values.
    pub fn solve(&mut self, circuit: &Circuit) -> Result<OperatingPoint> {
        self.solve_at(circuit, 0.0)
    }

    /// Solve the operating point with sources evaluated at `time`.
    pub fn solve_at(&mut self, circuit: &Circuit, time: f64) -> Result<OperatingPoint> {
        let _span = tracing::info_span!("dc_analysis", size = circuit.matrix_size()).entered();
        let outcome = self.solve_vector(circuit, time)?;
        let ctx = EvalContext::dc(&outcome.solution, circuit.num_nodes);
        let ctx = EvalContext { time, ..ctx };
        Ok(OperatingPoint::from_solution(circuit, &ctx, outcome.iterations))
    }

    /// Solve and return the raw solution vector.
    pub fn solve_vector(&mut self, circuit: &Circuit, time: f64) -> Result<NewtonOutcome> {
        let guess = self.config.initial_guess.clone().unwrap_or_default();
        let point = point(circuit, time, 1.0);

        let first = match self.newton.solve(circuit, &point, guess) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        if !self.config.source_stepping || !circuit.is_nonlinear() || !matches!(first, SimError::NonConvergence { .. })
        {
            return Err(first);
        }

        tracing::info!(?first, "Direct Newton failed, trying source stepping");
        let mut guess = Vec::new();
        let mut iterations = 0;
        for step in 1..=SOURCE_STEPS {
            let scale = step as f64 / SOURCE_STEPS as f64;
            let outcome = self.newton.solve(circuit, &point_scaled(&point, scale), guess)?;
            tracing::debug!(scale, iterations = outcome.iterations, "source step converged");
            iterations += outcome.iterations;
            guess = outcome.solution;
        }
        Ok(NewtonOutcome {
            solution: guess,
            iterations,
        })
    }
}

fn point(circuit: &Circuit, time: f64, source_scale: f64) -> EvalContext<'static> {
    EvalContext {
        solution: &[],
        num_nodes: circuit.num_nodes,
        time,
        source_scale,
        reactive: ReactiveMode::Dc,
    }
}

fn point_scaled<'a>(point: &EvalContext<'a>, source_scale: f64) -> EvalContext<'a> {
    EvalContext { source_scale, ..*point }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::components::{BjtParams, BjtType, DiodeParams, Waveform};
    use approx::assert_relative_eq;

    #[test]
    fn test_divider_operating_point() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(12.0)).unwrap();
        b.add_resistor("R1", "in", "out", 2000.0).unwrap();
        b.add_resistor("R2", "out", "0", 1000.0).unwrap();
        let circuit = b.build().unwrap();

        let op = DcSolver::default().solve(&circuit).unwrap();
        assert_relative_eq!(op.node_voltage("out").unwrap(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(op.component_current("R1").unwrap(), 4e-3, epsilon = 1e-12);
        assert_relative_eq!(op.component_power("R2").unwrap(), 16e-3, epsilon = 1e-12);
        // The source delivers what the resistors absorb
        assert_relative_eq!(op.component_power("V1").unwrap(), -48e-3, epsilon = 1e-12);
        assert!(op.power_balance().abs() < 1e-12);
        assert_eq!(op.node_voltage("gnd"), Some(0.0));
    }

    #[test]
    fn test_inductor_is_short_at_dc() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(1.0)).unwrap();
        b.add_resistor("R1", "in", "a", 10.0).unwrap();
        b.add_inductor("L1", "a", "0", 1e-3).unwrap();
        let circuit = b.build().unwrap();
        let op = DcSolver::default().solve(&circuit).unwrap();
        assert!(op.node_voltage("a").unwrap().abs() < 1e-12);
        assert_relative_eq!(op.component_current("L1").unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_npn_common_emitter_bias() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("VCC", "vcc", "0", Waveform::Dc(10.0)).unwrap();
        b.add_resistor("RB", "vcc", "b", 1e6).unwrap();
        b.add_resistor("RC", "vcc", "c", 2e3).unwrap();
        b.add_bjt("Q1", ["c", "b", "0"], BjtType::Npn, BjtParams::default())
            .unwrap();
        let circuit = b.build().unwrap();

        let op = DcSolver::default().solve(&circuit).unwrap();
        let vb = op.node_voltage("b").unwrap();
        let vc = op.node_voltage("c").unwrap();
        assert!(vb > 0.5 && vb < 0.75, "vbe = {vb}");
        // Ib ~ 9.3uA, Ic ~ 1mA: collector sits a couple of volts below VCC
        assert!(vc > 5.0 && vc < 9.0, "vc = {vc}");
        assert!(op.power_balance().abs() < 1e-9);
    }

    #[test]
    fn test_iteration_cap_without_fallback_fails() {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(20.0)).unwrap();
        b.add_resistor("R1", "in", "a", 100.0).unwrap();
        b.add_diode("D1", "a", "0", DiodeParams::default()).unwrap();
        let circuit = b.build().unwrap();

        let strict = DcConfig::new()
            .with_newton(NewtonConfig::new().with_max_iterations(3))
            .with_source_stepping(false);
        assert!(matches!(
            DcSolver::new(strict).solve(&circuit),
            Err(SimError::NonConvergence { .. })
        ));

        let op = DcSolver::default().solve(&circuit).unwrap();
        let vd = op.node_voltage("a").unwrap();
        assert!(vd > 0.7 && vd < 0.9);
    }
}
