//! Balanced load flow.
//!
//! Newton-Raphson in polar form solves for the angle of every non-slack bus
//! and the magnitude of every PQ bus. The Jacobian is assembled sparsely
//! from the Ybus pattern and factored by the same sparse LU used for
//! circuits. Gauss-Seidel with acceleration is available on its own and as
//! the fallback when Newton fails to converge.

use num_complex::Complex64;

use crate::error::{Result, SimError};
use crate::solver::{SparseLuSolver, SparseMatrix};

use super::network::{BusId, BusKind, PowerNetwork};

/// Default mismatch tolerance (pu).
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Default Gauss-Seidel acceleration factor.
pub const DEFAULT_ACCELERATION: f64 = 1.6;

/// Load-flow iteration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerFlowMethod {
    NewtonRaphson,
    GaussSeidel,
    /// Newton-Raphson, falling back to Gauss-Seidel on non-convergence
    Auto,
}

/// Load-flow parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerFlowConfig {
    pub method: PowerFlowMethod,
    /// Largest acceptable |dP| or |dQ| (pu)
    pub tolerance: f64,
    /// Newton-Raphson iteration cap
    pub max_iterations: usize,
    /// Gauss-Seidel sweep cap
    pub gs_max_iterations: usize,
    /// Gauss-Seidel acceleration factor
    pub acceleration: f64,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            method: PowerFlowMethod::Auto,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: 30,
            gs_max_iterations: 2000,
            acceleration: DEFAULT_ACCELERATION,
        }
    }
}

impl PowerFlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: PowerFlowMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(SimError::invalid_analysis("power-flow tolerance must be positive"));
        }
        if self.max_iterations == 0 || self.gs_max_iterations == 0 {
            return Err(SimError::invalid_analysis("power-flow iteration caps must be non-zero"));
        }
        if self.acceleration.is_nan() || self.acceleration <= 0.0 || self.acceleration >= 2.0 {
            return Err(SimError::invalid_analysis("Gauss-Seidel acceleration must lie in (0, 2)"));
        }
        Ok(())
    }
}

/// Solved state of one bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusSolution {
    pub id: BusId,
    pub name: String,
    pub kind: BusKind,
    /// Voltage magnitude (pu)
    pub voltage: f64,
    /// Voltage angle (degrees)
    pub angle_deg: f64,
    /// Net active injection (MW)
    pub p_mw: f64,
    /// Net reactive injection (MVAr)
    pub q_mvar: f64,
}

impl BusSolution {
    /// Voltage phasor (pu).
    pub fn phasor(&self) -> Complex64 {
        Complex64::from_polar(self.voltage, self.angle_deg.to_radians())
    }
}

/// Power flowing into a branch at each end.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchFlow {
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub loss_mw: f64,
    pub loss_mvar: f64,
}

/// Converged load flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerFlowResult {
    /// Scheme that produced the solution
    pub method: PowerFlowMethod,
    pub iterations: usize,
    /// Largest remaining mismatch (pu)
    pub max_mismatch: f64,
    pub buses: Vec<BusSolution>,
    pub branches: Vec<BranchFlow>,
    pub total_loss_mw: f64,
    pub total_loss_mvar: f64,
}

impl PowerFlowResult {
    /// Solution of a bus looked up by name.
    pub fn bus(&self, name: &str) -> Option<&BusSolution> {
        self.buses.iter().find(|b| b.name == name)
    }

    /// Flow of a line or transformer looked up by name.
    pub fn branch(&self, name: &str) -> Option<&BranchFlow> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// Bus voltage phasors indexed by `BusId`.
    pub fn voltages(&self) -> Vec<Complex64> {
        self.buses.iter().map(BusSolution::phasor).collect()
    }
}

/// Ybus held as rows of `(column, admittance)`.
struct Admittance {
    rows: Vec<Vec<(usize, Complex64)>>,
}

impl Admittance {
    fn new(matrix: &SparseMatrix<Complex64>) -> Self {
        Self {
            rows: (0..matrix.size()).map(|r| matrix.row(r).collect()).collect(),
        }
    }

    fn diagonal(&self, i: usize) -> Complex64 {
        self.rows[i]
            .iter()
            .find(|(j, _)| *j == i)
            .map_or(Complex64::new(0.0, 0.0), |&(_, y)| y)
    }

    /// Complex injection `S_i = V_i conj(sum_j Y_ij V_j)` at every bus.
    fn injections(&self, v: &[Complex64]) -> Vec<Complex64> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let current: Complex64 = row.iter().map(|&(j, y)| y * v[j]).sum();
                v[i] * current.conj()
            })
            .collect()
    }
}

struct Problem {
    ybus: Admittance,
    kinds: Vec<BusKind>,
    scheduled: Vec<Complex64>,
    initial: Vec<Complex64>,
}

impl Problem {
    fn new(network: &PowerNetwork) -> Self {
        let kinds: Vec<BusKind> = network.buses.iter().map(|b| b.kind).collect();
        let initial = network
            .buses
            .iter()
            .map(|b| match b.kind {
                BusKind::Pq => Complex64::new(1.0, 0.0),
                BusKind::Slack | BusKind::Pv => Complex64::new(b.voltage_setpoint, 0.0),
            })
            .collect();
        Self {
            ybus: Admittance::new(&network.admittance_matrix()),
            kinds,
            scheduled: network
                .buses
                .iter()
                .map(|b| b.scheduled_injection(network.base_mva))
                .collect(),
            initial,
        }
    }

    fn max_mismatch(&self, v: &[Complex64]) -> f64 {
        let s = self.ybus.injections(v);
        self.kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| match kind {
                BusKind::Slack => 0.0,
                BusKind::Pv => (self.scheduled[i].re - s[i].re).abs(),
                BusKind::Pq => (self.scheduled[i].re - s[i].re)
                    .abs()
                    .max((self.scheduled[i].im - s[i].im).abs()),
            })
            .fold(0.0, f64::max)
    }
}

struct Solved {
    voltages: Vec<Complex64>,
    iterations: usize,
    max_mismatch: f64,
}

/// Load-flow solver.
#[derive(Debug, Clone, Default)]
pub struct PowerFlowSolver {
    pub config: PowerFlowConfig,
}

impl PowerFlowSolver {
    pub fn new(config: PowerFlowConfig) -> Self {
        Self { config }
    }

    /// Solve the load flow of `network`.
    pub fn solve(&self, network: &PowerNetwork) -> Result<PowerFlowResult> {
        let _span = tracing::info_span!("power_flow", buses = network.num_buses()).entered();
        self.config.validate()?;
        network.validate()?;
        let problem = Problem::new(network);

        let (method, solved) = match self.config.method {
            PowerFlowMethod::NewtonRaphson => (PowerFlowMethod::NewtonRaphson, self.newton_raphson(&problem)?),
            PowerFlowMethod::GaussSeidel => (PowerFlowMethod::GaussSeidel, self.gauss_seidel(&problem)?),
            PowerFlowMethod::Auto => match self.newton_raphson(&problem) {
                Ok(solved) => (PowerFlowMethod::NewtonRaphson, solved),
                Err(err @ SimError::NonConvergence { .. }) => {
                    tracing::info!(?err, "Newton-Raphson load flow failed, falling back to Gauss-Seidel");
                    (PowerFlowMethod::GaussSeidel, self.gauss_seidel(&problem)?)
                }
                Err(err) => return Err(err),
            },
        };

        tracing::debug!(?method, iterations = solved.iterations, "load flow converged");
        Ok(build_result(network, &problem, method, solved))
    }

    fn newton_raphson(&self, problem: &Problem) -> Result<Solved> {
        let n = problem.kinds.len();
        let mut vm: Vec<f64> = problem.initial.iter().map(|v| v.norm()).collect();
        let mut va: Vec<f64> = problem.initial.iter().map(|v| v.arg()).collect();

        // Column of each unknown: angles of non-slack buses, then magnitudes of PQ buses
        let mut theta_col = vec![None; n];
        let mut vm_col = vec![None; n];
        let mut next = 0;
        for (i, kind) in problem.kinds.iter().enumerate() {
            if *kind != BusKind::Slack {
                theta_col[i] = Some(next);
                next += 1;
            }
        }
        for (i, kind) in problem.kinds.iter().enumerate() {
            if *kind == BusKind::Pq {
                vm_col[i] = Some(next);
                next += 1;
            }
        }
        let size = next;
        let mut lu = SparseLuSolver::new();
        let phasors = |vm: &[f64], va: &[f64]| -> Vec<Complex64> {
            vm.iter().zip(va).map(|(&m, &a)| Complex64::from_polar(m, a)).collect()
        };

        let mut max_mismatch = f64::INFINITY;
        for iter in 0..=self.config.max_iterations {
            let v = phasors(&vm, &va);
            let s = problem.ybus.injections(&v);

            let mut mismatch = vec![0.0; size];
            for i in 0..n {
                if let Some(r) = theta_col[i] {
                    mismatch[r] = problem.scheduled[i].re - s[i].re;
                }
                if let Some(r) = vm_col[i] {
                    mismatch[r] = problem.scheduled[i].im - s[i].im;
                }
            }
            max_mismatch = mismatch.iter().fold(0.0, |m, d| m.max(d.abs()));
            if !max_mismatch.is_finite() {
                break;
            }
            if max_mismatch < self.config.tolerance {
                return Ok(Solved {
                    voltages: v,
                    iterations: iter,
                    max_mismatch,
                });
            }
            if iter == self.config.max_iterations {
                break;
            }

            let mut jacobian = SparseMatrix::new(size);
            for i in 0..n {
                let (p_i, q_i) = (s[i].re, s[i].im);
                for &(j, y) in &problem.ybus.rows[i] {
                    let (g, b) = (y.re, y.im);
                    let (dp_dth, dp_dv, dq_dth, dq_dv) = if i == j {
                        (
                            -q_i - b * vm[i] * vm[i],
                            p_i / vm[i] + g * vm[i],
                            p_i - g * vm[i] * vm[i],
                            q_i / vm[i] - b * vm[i],
                        )
                    } else {
                        let (sin, cos) = (va[i] - va[j]).sin_cos();
                        (
                            vm[i] * vm[j] * (g * sin - b * cos),
                            vm[i] * (g * cos + b * sin),
                            -vm[i] * vm[j] * (g * cos + b * sin),
                            vm[i] * (g * sin - b * cos),
                        )
                    };
                    if let Some(r) = theta_col[i] {
                        if let Some(c) = theta_col[j] {
                            jacobian.add(r, c, dp_dth);
                        }
                        if let Some(c) = vm_col[j] {
                            jacobian.add(r, c, dp_dv);
                        }
                    }
                    if let Some(r) = vm_col[i] {
                        if let Some(c) = theta_col[j] {
                            jacobian.add(r, c, dq_dth);
                        }
                        if let Some(c) = vm_col[j] {
                            jacobian.add(r, c, dq_dv);
                        }
                    }
                }
            }

            let delta = lu.factor_and_solve(&jacobian, &mismatch)?;
            for i in 0..n {
                if let Some(c) = theta_col[i] {
                    va[i] += delta[c];
                }
                if let Some(c) = vm_col[i] {
                    vm[i] += delta[c];
                }
            }
            tracing::trace!(iter, max_mismatch, "Newton-Raphson load-flow iteration");
        }

        Err(SimError::non_convergence(self.config.max_iterations, max_mismatch))
    }

    fn gauss_seidel(&self, problem: &Problem) -> Result<Solved> {
        let mut v = problem.initial.clone();
        let alpha = self.config.acceleration;
        let mut max_mismatch = problem.max_mismatch(&v);

        for iter in 0..self.config.gs_max_iterations {
            if max_mismatch < self.config.tolerance {
                return Ok(Solved {
                    voltages: v,
                    iterations: iter,
                    max_mismatch,
                });
            }
            for (i, kind) in problem.kinds.iter().enumerate() {
                if *kind == BusKind::Slack {
                    continue;
                }
                let y_ii = problem.ybus.diagonal(i);
                if y_ii.norm() == 0.0 {
                    return Err(SimError::SingularMatrix { row: i });
                }
                let others: Complex64 = problem.ybus.rows[i]
                    .iter()
                    .filter(|(j, _)| *j != i)
                    .map(|&(j, y)| y * v[j])
                    .sum();
                let mut s = problem.scheduled[i];
                if *kind == BusKind::Pv {
                    s.im = (v[i] * (y_ii * v[i] + others).conj()).im;
                }
                let updated = ((s / v[i]).conj() - others) / y_ii;
                let accelerated = v[i] + alpha * (updated - v[i]);
                v[i] = match kind {
                    BusKind::Pv => accelerated / accelerated.norm() * problem.initial[i].norm(),
                    _ => accelerated,
                };
            }
            max_mismatch = problem.max_mismatch(&v);
            if !max_mismatch.is_finite() {
                break;
            }
        }
        if max_mismatch < self.config.tolerance {
            return Ok(Solved {
                voltages: v,
                iterations: self.config.gs_max_iterations,
                max_mismatch,
            });
        }
        Err(SimError::non_convergence(self.config.gs_max_iterations, max_mismatch))
    }
}

fn build_result(network: &PowerNetwork, problem: &Problem, method: PowerFlowMethod, solved: Solved) -> PowerFlowResult {
    let base = network.base_mva;
    let v = &solved.voltages;
    let s = problem.ybus.injections(v);

    let buses = network
        .buses
        .iter()
        .enumerate()
        .map(|(i, bus)| BusSolution {
            id: BusId(i),
            name: bus.name.clone(),
            kind: bus.kind,
            voltage: v[i].norm(),
            angle_deg: v[i].arg().to_degrees(),
            p_mw: s[i].re * base,
            q_mvar: s[i].im * base,
        })
        .collect();

    let branches: Vec<BranchFlow> = network
        .branch_models()
        .into_iter()
        .map(|m| {
            let (vf, vt) = (v[m.from.0], v[m.to.0]);
            let s_from = vf * (m.y_ff * vf + m.y_ft * vt).conj() * base;
            let s_to = vt * (m.y_tf * vf + m.y_tt * vt).conj() * base;
            let loss = s_from + s_to;
            BranchFlow {
                name: m.name,
                from: m.from,
                to: m.to,
                p_from_mw: s_from.re,
                q_from_mvar: s_from.im,
                p_to_mw: s_to.re,
                q_to_mvar: s_to.im,
                loss_mw: loss.re,
                loss_mvar: loss.im,
            }
        })
        .collect();

    PowerFlowResult {
        method,
        iterations: solved.iterations,
        max_mismatch: solved.max_mismatch,
        total_loss_mw: branches.iter().map(|b| b.loss_mw).sum(),
        total_loss_mvar: branches.iter().map(|b| b.loss_mvar).sum(),
        buses,
        branches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::network::{Bus, Line, Transformer};
    use approx::assert_relative_eq;

    /// Slack feeding a 50 MW unity power factor load over a lossless line.
    fn radial() -> PowerNetwork {
        let mut net = PowerNetwork::default();
        let a = net.add_bus(Bus::new("A", BusKind::Slack, 138.0)).unwrap();
        let b = net.add_bus(Bus::new("B", BusKind::Pq, 138.0).with_load(50.0, 0.0)).unwrap();
        net.add_line(Line::new("L1", a, b, 0.0, 0.1, 0.0)).unwrap();
        net
    }

    #[test]
    fn test_two_bus_analytic() {
        let result = PowerFlowSolver::default().solve(&radial()).unwrap();
        // P = V sin(d) / X and Q = 0 give sin(2d) = 2 P X
        let delta = 0.5 * (2.0f64 * 0.5 * 0.1).asin();
        let b = result.bus("B").unwrap();
        assert_relative_eq!(b.voltage, delta.cos(), epsilon = 1e-8);
        assert_relative_eq!(b.angle_deg, -delta.to_degrees(), epsilon = 1e-6);
        assert_relative_eq!(result.bus("A").unwrap().p_mw, 50.0, epsilon = 1e-5);
        assert_relative_eq!(result.total_loss_mw, 0.0, epsilon = 1e-6);

        // Reactive loss I^2 X
        let current = 0.5 / b.voltage;
        assert_relative_eq!(result.total_loss_mvar, current * current * 0.1 * 100.0, epsilon = 1e-5);
        assert_eq!(result.method, PowerFlowMethod::NewtonRaphson);
    }

    fn three_bus() -> PowerNetwork {
        let mut net = PowerNetwork::default();
        let a = net.add_bus(Bus::new("A", BusKind::Slack, 138.0).with_voltage(1.02)).unwrap();
        let b = net
            .add_bus(Bus::new("B", BusKind::Pv, 138.0).with_generation(40.0, 0.0).with_voltage(1.01))
            .unwrap();
        let c = net.add_bus(Bus::new("C", BusKind::Pq, 13.8).with_load(80.0, 30.0)).unwrap();
        net.add_line(Line::new("AB", a, b, 0.02, 0.06, 0.03)).unwrap();
        net.add_line(Line::new("BC", b, c, 0.01, 0.05, 0.02)).unwrap();
        net.add_transformer(Transformer::new("TAC", a, c, 0.005, 0.08).with_tap(0.98)).unwrap();
        net
    }

    #[test]
    fn test_gauss_seidel_agrees_with_newton() {
        let net = three_bus();
        let nr = PowerFlowSolver::new(PowerFlowConfig::new().with_method(PowerFlowMethod::NewtonRaphson))
            .solve(&net)
            .unwrap();
        let gs = PowerFlowSolver::new(
            PowerFlowConfig::new()
                .with_method(PowerFlowMethod::GaussSeidel)
                .with_tolerance(1e-9),
        )
        .solve(&net)
        .unwrap();
        for (a, b) in nr.buses.iter().zip(&gs.buses) {
            assert_relative_eq!(a.voltage, b.voltage, epsilon = 1e-6);
            assert_relative_eq!(a.angle_deg, b.angle_deg, epsilon = 1e-4);
        }
        // PV bus holds its setpoint
        assert_relative_eq!(nr.bus("B").unwrap().voltage, 1.01, epsilon = 1e-10);
        assert_relative_eq!(nr.bus("B").unwrap().p_mw, 40.0, epsilon = 1e-5);
    }

    #[test]
    fn test_losses_balance_injections() {
        let result = PowerFlowSolver::default().solve(&three_bus()).unwrap();
        let injected: f64 = result.buses.iter().map(|b| b.p_mw).sum();
        assert_relative_eq!(injected, result.total_loss_mw, epsilon = 1e-5);
        assert!(result.total_loss_mw > 0.0);
        let ab = result.branch("AB").unwrap();
        assert_relative_eq!(ab.p_from_mw + ab.p_to_mw, ab.loss_mw, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_slack_reported_before_iterating() {
        let mut net = PowerNetwork::default();
        net.add_bus(Bus::new("A", BusKind::Pq, 11.0)).unwrap();
        assert_eq!(PowerFlowSolver::default().solve(&net), Err(SimError::MissingSlackBus));
    }

    #[test]
    fn test_iteration_cap_falls_back_to_gauss_seidel() {
        let config = PowerFlowConfig::new().with_max_iterations(1);
        let result = PowerFlowSolver::new(config).solve(&radial()).unwrap();
        assert_eq!(result.method, PowerFlowMethod::GaussSeidel);

        let strict = PowerFlowConfig::new()
            .with_method(PowerFlowMethod::NewtonRaphson)
            .with_max_iterations(1);
        assert!(matches!(
            PowerFlowSolver::new(strict).solve(&radial()),
            Err(SimError::NonConvergence { .. })
        ));
    }
}
