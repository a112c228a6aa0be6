//! Adaptive transient analysis.
//!
//! Reactive elements are replaced by trapezoidal companion models and the
//! resulting (possibly nonlinear) system is solved by Newton-Raphson at
//! each time point. The step size is controlled by step doubling: a full
//! step of `h` is compared against two half steps, and the difference
//! estimates the local truncation error.
//!
//! The solver is an explicit state machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Stepping <-> Paused
//!                                     |
//!                     Completed / Failed / Cancelled
//! ```
//!
//! Control requests are only honored between accepted steps.

use std::fmt;

use crate::circuit::{BranchId, Circuit, NodeId, VarIndex, GROUND_NAMES};
use crate::components::{EvalContext, ReactiveMode, ReactiveState};
use crate::error::{Result, SimError};
use crate::session::{PartialResult, RunControl};

use super::dc::{DcConfig, DcSolver};
use super::newton::{NewtonConfig, NewtonRaphson};

/// Default local truncation error tolerances.
pub const DEFAULT_LTE_ABSTOL: f64 = 1e-6;
pub const DEFAULT_LTE_RELTOL: f64 = 1e-3;

/// Growth and shrink limits for the step controller.
const MAX_GROWTH: f64 = 2.0;
const MIN_SHRINK: f64 = 0.25;
const SAFETY: f64 = 0.9;

/// Transient analysis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientConfig {
    /// Start time (s)
    pub start: f64,
    /// Stop time (s)
    pub stop: f64,
    /// First step attempted (s)
    pub initial_step: f64,
    /// Steps below this fail with `StepSizeUnderflow`
    pub min_step: f64,
    /// Upper step bound; `None` uses (stop - start) / 50
    pub max_step: Option<f64>,
    /// Absolute LTE tolerance
    pub abstol: f64,
    /// Relative LTE tolerance
    pub reltol: f64,
    /// Newton policy for every time point
    pub newton: NewtonConfig,
    /// Start from an all-zero state instead of the DC operating point
    pub use_initial_conditions: bool,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 1e-3,
            initial_step: 1e-9,
            min_step: 1e-15,
            max_step: None,
            abstol: DEFAULT_LTE_ABSTOL,
            reltol: DEFAULT_LTE_RELTOL,
            newton: NewtonConfig::default(),
            use_initial_conditions: false,
        }
    }
}

impl TransientConfig {
    /// Create a configuration running from 0 to `stop`.
    pub fn new(stop: f64) -> Self {
        Self {
            stop,
            ..Default::default()
        }
    }

    /// Set the simulated interval.
    pub fn with_interval(mut self, start: f64, stop: f64) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    /// Set the initial step.
    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    /// Set the step bounds.
    pub fn with_step_bounds(mut self, min_step: f64, max_step: f64) -> Self {
        self.min_step = min_step;
        self.max_step = Some(max_step);
        self
    }

    /// Set the LTE tolerances.
    pub fn with_tolerances(mut self, abstol: f64, reltol: f64) -> Self {
        self.abstol = abstol;
        self.reltol = reltol;
        self
    }

    /// Set the Newton-Raphson policy.
    pub fn with_newton(mut self, newton: NewtonConfig) -> Self {
        self.newton = newton;
        self
    }

    /// Skip the operating point and start from zero state.
    pub fn with_initial_conditions(mut self, enabled: bool) -> Self {
        self.use_initial_conditions = enabled;
        self
    }

    /// Effective maximum step.
    pub fn max_step(&self) -> f64 {
        self.max_step.unwrap_or((self.stop - self.start) / 50.0)
    }

    /// Reject inconsistent timing parameters.
    pub fn validate(&self) -> Result<()> {
        let finite = [self.start, self.stop, self.initial_step, self.min_step, self.max_step()]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(SimError::invalid_analysis("transient times must be finite"));
        }
        if self.start < 0.0 || self.stop <= self.start {
            return Err(SimError::invalid_analysis("transient stop time must exceed start time"));
        }
        if self.min_step <= 0.0 || self.initial_step < self.min_step || self.max_step() < self.min_step {
            return Err(SimError::invalid_analysis(
                "transient steps must satisfy 0 < min_step <= initial_step, max_step",
            ));
        }
        if self.abstol <= 0.0 || self.reltol < 0.0 {
            return Err(SimError::invalid_analysis("transient tolerances must be positive"));
        }
        self.newton.validate()
    }
}

/// Lifecycle of a transient run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientState {
    Uninitialized,
    Initializing,
    Stepping,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransientState {
    /// True once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Stepping => "stepping",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Last accepted time point.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryState {
    /// Time of the accepted point
    pub time: f64,
    /// Solution vector at `time`
    pub solution: Vec<f64>,
    /// Reactive state indexed by `ComponentId` (default for non-reactive)
    pub reactive: Vec<ReactiveState>,
}

/// Accepted waveform samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientResult {
    /// Accepted time points, strictly increasing
    pub times: Vec<f64>,
    /// Solution vector at each time point
    pub solutions: Vec<Vec<f64>>,
    /// Node names indexed by `NodeId`
    pub node_names: Vec<String>,
    /// Number of nodes including ground
    pub num_nodes: usize,
    /// Steps accepted
    pub accepted_steps: usize,
    /// Steps rejected by the LTE test or Newton failure
    pub rejected_steps: usize,
}

impl TransientResult {
    fn new(circuit: &Circuit) -> Self {
        Self {
            times: Vec::new(),
            solutions: Vec::new(),
            node_names: circuit.node_names.clone(),
            num_nodes: circuit.num_nodes,
            accepted_steps: 0,
            rejected_steps: 0,
        }
    }

    fn push(&mut self, history: &HistoryState) {
        self.times.push(history.time);
        self.solutions.push(history.solution.clone());
    }

    /// Number of stored time points.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True when no point has been stored.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    fn series(&self, var: VarIndex) -> Vec<f64> {
        match var.to_index(self.num_nodes) {
            Some(i) => self.solutions.iter().map(|x| x[i]).collect(),
            None => vec![0.0; self.times.len()],
        }
    }

    /// Voltage waveform of a node.
    pub fn voltage(&self, node: NodeId) -> Vec<f64> {
        self.series(VarIndex::Voltage(node))
    }

    /// Voltage waveform of a node looked up by name.
    pub fn node_voltage(&self, name: &str) -> Option<Vec<f64>> {
        if GROUND_NAMES.iter().any(|g| g.eq_ignore_ascii_case(name)) {
            return Some(self.voltage(NodeId::GROUND));
        }
        let index = self.node_names.iter().position(|n| n == name)?;
        Some(self.voltage(NodeId(index)))
    }

    /// Current waveform of an auxiliary branch.
    pub fn branch_current(&self, branch: BranchId) -> Vec<f64> {
        self.series(VarIndex::Current(branch))
    }

    /// Node voltage at time `t`, linearly interpolated between accepted points.
    pub fn sample(&self, node: NodeId, t: f64) -> Option<f64> {
        let first = *self.times.first()?;
        let last = *self.times.last()?;
        if t < first || t > last {
            return None;
        }
        let v = |k: usize| match VarIndex::Voltage(node).to_index(self.num_nodes) {
            Some(i) => self.solutions[k][i],
            None => 0.0,
        };
        let k = self.times.partition_point(|&tk| tk < t);
        if k == 0 {
            return Some(v(0));
        }
        let (t0, t1) = (self.times[k - 1], self.times[k]);
        let w = (t - t0) / (t1 - t0);
        Some(v(k - 1) + w * (v(k) - v(k - 1)))
    }
}

/// Adaptive trapezoidal transient solver.
#[derive(Debug, Clone)]
pub struct TransientSolver {
    pub config: TransientConfig,
    state: TransientState,
    history: Option<HistoryState>,
    result: Option<TransientResult>,
    breakpoints: Vec<f64>,
    next_breakpoint: usize,
    step: f64,
    newton: NewtonRaphson,
}

impl TransientSolver {
    /// Create a solver in the `Uninitialized` state.
    pub fn new(config: TransientConfig) -> Self {
        let newton = NewtonRaphson::new(config.newton.clone());
        Self {
            step: config.initial_step,
            config,
            state: TransientState::Uninitialized,
            history: None,
            result: None,
            breakpoints: Vec::new(),
            next_breakpoint: 0,
            newton,
        }
    }

    /// Present state.
    pub fn state(&self) -> TransientState {
        self.state
    }

    /// Last accepted time point.
    pub fn history(&self) -> Option<&HistoryState> {
        self.history.as_ref()
    }

    /// Samples accepted so far.
    pub fn result(&self) -> Option<&TransientResult> {
        self.result.as_ref()
    }

    /// Fraction of the interval covered.
    pub fn fraction_complete(&self) -> f64 {
        match (&self.history, self.state) {
            (_, TransientState::Completed) => 1.0,
            (Some(h), _) => ((h.time - self.config.start) / (self.config.stop - self.config.start)).clamp(0.0, 1.0),
            (None, _) => 0.0,
        }
    }

    fn invalid_state(&self, operation: &str) -> SimError {
        SimError::InvalidState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }

    /// Build the initial history from the operating point (or zero state).
    pub fn initialize(&mut self, circuit: &Circuit) -> Result<()> {
        if self.state != TransientState::Uninitialized {
            return Err(self.invalid_state("initialize"));
        }
        self.config.validate()?;
        self.state = TransientState::Initializing;

        match self.initial_history(circuit) {
            Ok(history) => {
                let mut result = TransientResult::new(circuit);
                result.push(&history);
                self.result = Some(result);
                self.history = Some(history);
            }
            Err(err) => {
                self.state = TransientState::Failed;
                return Err(err);
            }
        }

        let start = self.config.start;
        self.breakpoints = circuit.breakpoints(self.config.stop);
        self.breakpoints.retain(|&t| t > start);
        self.next_breakpoint = 0;
        self.step = self.config.initial_step.min(self.config.max_step());
        self.state = TransientState::Stepping;
        Ok(())
    }

    fn initial_history(&mut self, circuit: &Circuit) -> Result<HistoryState> {
        let start = self.config.start;
        if self.config.use_initial_conditions {
            return Ok(HistoryState {
                time: start,
                solution: vec![0.0; circuit.matrix_size()],
                reactive: vec![ReactiveState::default(); circuit.components.len()],
            });
        }
        let dc = DcConfig::new().with_newton(self.config.newton.clone());
        let outcome = DcSolver::new(dc).solve_vector(circuit, start)?;
        let ctx = EvalContext {
            time: start,
            ..EvalContext::dc(&outcome.solution, circuit.num_nodes)
        };
        let reactive = circuit
            .components
            .iter()
            .map(|c| c.reactive_state(&ctx).unwrap_or_default())
            .collect();
        Ok(HistoryState {
            time: start,
            solution: outcome.solution,
            reactive,
        })
    }

    /// Solve one trapezoidal step of `h` from `history`.
    fn advance(newton: &mut NewtonRaphson, circuit: &Circuit, history: &HistoryState, h: f64) -> Result<HistoryState> {
        let time = history.time + h;
        let point = EvalContext {
            solution: &[],
            num_nodes: circuit.num_nodes,
            time,
            source_scale: 1.0,
            reactive: ReactiveMode::Trapezoidal {
                step: h,
                history: &history.reactive,
            },
        };
        let outcome = newton.solve(circuit, &point, history.solution.clone())?;
        let ctx = point.with_solution(&outcome.solution);
        let reactive = circuit
            .components
            .iter()
            .map(|c| c.reactive_state(&ctx).unwrap_or_default())
            .collect();
        Ok(HistoryState {
            time,
            solution: outcome.solution,
            reactive,
        })
    }

    /// Worst ratio of estimated LTE to its tolerance.
    fn error_ratio(&self, full: &[f64], half: &[f64]) -> f64 {
        full.iter()
            .zip(half)
            .map(|(&f, &h)| {
                let err = (h - f).abs() / 3.0;
                err / (self.config.abstol + self.config.reltol * h.abs().max(f.abs()))
            })
            .fold(0.0, f64::max)
    }

    /// Step to take from `time`, clipped to the next breakpoint and the stop time.
    fn clipped_step(&mut self, time: f64) -> f64 {
        let landing = 0.5 * self.config.min_step;
        while self.next_breakpoint < self.breakpoints.len() && self.breakpoints[self.next_breakpoint] <= time + landing {
            self.next_breakpoint += 1;
        }
        let mut h = self.step.min(self.config.max_step());
        if let Some(&bp) = self.breakpoints.get(self.next_breakpoint) {
            h = h.min(bp - time);
        }
        h.min(self.config.stop - time)
    }

    /// Advance by one accepted step, retrying rejected attempts internally.
    pub fn step(&mut self, circuit: &Circuit) -> Result<TransientState> {
        if self.state != TransientState::Stepping {
            return Err(self.invalid_state("step"));
        }
        match self.try_step(circuit) {
            Ok(state) => Ok(state),
            Err(err) => {
                self.state = TransientState::Failed;
                tracing::warn!(%err, "transient analysis failed");
                Err(err)
            }
        }
    }

    fn try_step(&mut self, circuit: &Circuit) -> Result<TransientState> {
        let history = self
            .history
            .take()
            .ok_or_else(|| SimError::invalid_analysis("transient solver has no history"))?;

        loop {
            if self.step < self.config.min_step {
                return Err(SimError::StepSizeUnderflow {
                    time: history.time,
                    step: self.step,
                });
            }
            let h = self.clipped_step(history.time);

            let attempt = Self::advance(&mut self.newton, circuit, &history, h).and_then(|full| {
                let mid = Self::advance(&mut self.newton, circuit, &history, 0.5 * h)?;
                let half = Self::advance(&mut self.newton, circuit, &mid, 0.5 * h)?;
                Ok((full, half))
            });

            let (full, half) = match attempt {
                Ok(pair) => pair,
                Err(SimError::NonConvergence { .. }) => {
                    tracing::debug!(time = history.time, step = h, "Newton failed, cutting step");
                    self.rejected(MIN_SHRINK * h);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let ratio = self.error_ratio(&full.solution, &half.solution);
            let scale = if ratio > 0.0 {
                SAFETY * ratio.powf(-1.0 / 3.0)
            } else {
                MAX_GROWTH
            };

            if ratio > 1.0 {
                tracing::debug!(time = history.time, step = h, ratio, "step rejected by LTE");
                self.rejected(h * scale.max(MIN_SHRINK));
                continue;
            }

            let proposed = h * scale.min(MAX_GROWTH);
            // A step clipped onto a breakpoint does not shrink the controller's step
            let next = if h < self.step { self.step.max(proposed) } else { proposed };
            self.step = next.clamp(self.config.min_step, self.config.max_step());
            if let Some(result) = self.result.as_mut() {
                result.push(&half);
                result.accepted_steps += 1;
            }
            let done = self.config.stop - half.time <= 0.5 * self.config.min_step;
            self.history = Some(half);
            if done {
                self.state = TransientState::Completed;
            }
            return Ok(self.state);
        }
    }

    fn rejected(&mut self, next: f64) {
        self.step = next;
        if let Some(result) = self.result.as_mut() {
            result.rejected_steps += 1;
        }
    }

    /// Suspend stepping; history is preserved.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != TransientState::Stepping {
            return Err(self.invalid_state("pause"));
        }
        self.state = TransientState::Paused;
        Ok(())
    }

    /// Continue a paused run.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != TransientState::Paused {
            return Err(self.invalid_state("resume"));
        }
        self.state = TransientState::Stepping;
        Ok(())
    }

    /// Abandon the run and discard its state. Stopping a finished run is a no-op.
    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransientState::Cancelled;
        self.history = None;
        self.result = None;
    }

    /// Take the finished waveforms.
    pub fn take_result(&mut self) -> Result<TransientResult> {
        if self.state != TransientState::Completed {
            return Err(self.invalid_state("take result"));
        }
        self.result
            .take()
            .ok_or_else(|| SimError::invalid_analysis("transient result already taken"))
    }

    /// Run from start to stop with no external control.
    pub fn solve(&mut self, circuit: &Circuit) -> Result<TransientResult> {
        self.run(circuit, &RunControl::new())
    }

    /// Run to completion, honoring pause and stop requests between steps.
    pub fn run(&mut self, circuit: &Circuit, control: &RunControl) -> Result<TransientResult> {
        let _span = tracing::info_span!("transient_analysis", stop = self.config.stop).entered();
        if self.state == TransientState::Uninitialized {
            self.initialize(circuit)?;
        }

        while !self.state.is_terminal() {
            if control.is_stop_requested() {
                self.stop();
                return Err(SimError::Cancelled);
            }
            if control.is_pause_requested() {
                self.pause()?;
                control.wait_while_paused();
                // Stop may have been requested while paused
                if control.is_stop_requested() {
                    self.stop();
                    return Err(SimError::Cancelled);
                }
                self.resume()?;
            }

            self.step(circuit)?;
            if let Some(history) = &self.history {
                control.report(
                    self.fraction_complete(),
                    Some(PartialResult::TransientSample {
                        time: history.time,
                        solution: history.solution.clone(),
                    }),
                );
            }
        }

        let result = self.take_result()?;
        tracing::info!(
            points = result.len(),
            rejected = result.rejected_steps,
            "transient analysis complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::components::Waveform;
    use approx::assert_relative_eq;

    fn rc_step() -> Circuit {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source(
            "V1",
            "in",
            "0",
            Waveform::Step {
                initial: 0.0,
                target: 1.0,
                delay: 0.0,
                rise: 1e-9,
            },
        )
        .unwrap();
        b.add_resistor("R1", "in", "out", 1000.0).unwrap();
        b.add_capacitor("C1", "out", "0", 1e-6).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_rc_charging_at_tau() {
        let circuit = rc_step();
        let mut solver = TransientSolver::new(TransientConfig::new(5e-3));
        let result = solver.solve(&circuit).unwrap();
        let out = circuit.node("out").unwrap();

        let v_tau = result.sample(out, 1e-3).unwrap();
        assert_relative_eq!(v_tau, 1.0 - (-1.0f64).exp(), epsilon = 5e-3);
        let v_end = *result.voltage(out).last().unwrap();
        assert_relative_eq!(v_end, 1.0 - (-5.0f64).exp(), epsilon = 5e-3);
        assert_relative_eq!(*result.times.last().unwrap(), 5e-3);
        assert!(result.times.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(solver.state(), TransientState::Completed);
    }

    #[test]
    fn test_lands_on_breakpoints() {
        let circuit = rc_step();
        let result = TransientSolver::new(TransientConfig::new(1e-3)).solve(&circuit).unwrap();
        assert!(result.times.iter().any(|&t| (t - 1e-9).abs() < 1e-18));
    }

    #[test]
    fn test_rl_current_rise() {
        // i(t) = V/R (1 - exp(-tR/L)), tau = 1ms
        let mut b = CircuitBuilder::new();
        b.add_voltage_source(
            "V1",
            "in",
            "0",
            Waveform::Step {
                initial: 0.0,
                target: 10.0,
                delay: 0.0,
                rise: 1e-9,
            },
        )
        .unwrap();
        b.add_resistor("R1", "in", "a", 10.0).unwrap();
        b.add_inductor("L1", "a", "0", 10e-3).unwrap();
        let circuit = b.build().unwrap();
        let branch = circuit.component("L1").unwrap().branch().unwrap();

        let result = TransientSolver::new(TransientConfig::new(3e-3)).solve(&circuit).unwrap();
        let current = result.branch_current(branch);
        let k = result.times.partition_point(|&t| t < 1e-3);
        let expected = 1.0 - (-result.times[k] / 1e-3).exp();
        assert_relative_eq!(current[k], expected, epsilon = 5e-3);
    }

    #[test]
    fn test_lc_oscillation_period() {
        // Capacitor precharged through the DC operating point, then the
        // source steps away; the tank rings at 1/(2 pi sqrt(LC)).
        let mut b = CircuitBuilder::new();
        b.add_current_source(
            "I1",
            "0",
            "a",
            Waveform::Step {
                initial: 1e-3,
                target: 0.0,
                delay: 0.0,
                rise: 1e-9,
            },
            None,
        )
        .unwrap();
        b.add_inductor("L1", "a", "0", 1e-3).unwrap();
        b.add_capacitor("C1", "a", "0", 1e-6).unwrap();
        let circuit = b.build().unwrap();

        let period = 2.0 * std::f64::consts::PI * (1e-3f64 * 1e-6).sqrt();
        let config = TransientConfig::new(2.0 * period).with_step_bounds(1e-15, period / 100.0);
        let result = TransientSolver::new(config).solve(&circuit).unwrap();
        let a = circuit.node("a").unwrap();
        // Inductor current 1mA at t=0 swings the capacitor to sqrt(L/C) * 1mA
        let peak = result.voltage(a).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert_relative_eq!(peak, (1e-3f64 / 1e-6).sqrt() * 1e-3, max_relative = 0.02);
    }

    #[test]
    fn test_state_transitions() {
        let circuit = rc_step();
        let mut solver = TransientSolver::new(TransientConfig::new(1e-3));
        assert_eq!(solver.state(), TransientState::Uninitialized);
        assert!(matches!(solver.pause(), Err(SimError::InvalidState { .. })));

        solver.initialize(&circuit).unwrap();
        assert_eq!(solver.state(), TransientState::Stepping);
        solver.step(&circuit).unwrap();
        let time = solver.history().unwrap().time;

        solver.pause().unwrap();
        assert!(matches!(solver.step(&circuit), Err(SimError::InvalidState { .. })));
        assert_eq!(solver.history().unwrap().time, time);
        solver.resume().unwrap();
        solver.step(&circuit).unwrap();
        assert!(solver.history().unwrap().time > time);

        solver.stop();
        assert_eq!(solver.state(), TransientState::Cancelled);
        assert!(solver.history().is_none());
        solver.stop();
        assert!(matches!(solver.resume(), Err(SimError::InvalidState { .. })));
    }

    #[test]
    fn test_underflow_fails() {
        let circuit = rc_step();
        let config = TransientConfig::new(1e-3)
            .with_tolerances(1e-30, 0.0)
            .with_initial_step(1e-6)
            .with_step_bounds(1e-7, 1e-4);
        let mut solver = TransientSolver::new(config);
        assert!(matches!(
            solver.solve(&circuit),
            Err(SimError::StepSizeUnderflow { .. })
        ));
        assert_eq!(solver.state(), TransientState::Failed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransientConfig::new(1e-3).with_interval(1e-3, 1e-4);
        assert!(matches!(config.validate(), Err(SimError::InvalidAnalysis { .. })));
    }
}
