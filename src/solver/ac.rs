//! AC small-signal frequency-domain analysis.
//!
//! Nonlinear devices are linearized at the DC operating point, independent
//! sources contribute their AC phasor (zero when none is given), and the
//! complex MNA system is solved once per frequency. A singular system at one
//! frequency is recorded for that point and the sweep carries on.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::circuit::{BranchId, Circuit, NodeId, VarIndex};
use crate::components::AcContext;
use crate::error::{Result, SimError};
use crate::session::{PartialResult, RunControl};

use super::dc::{DcConfig, DcSolver, OperatingPoint};
use super::mna::MnaBuilder;
use super::sparse::SparseLuSolver;

/// AC sweep type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSweep {
    /// Linear frequency spacing, `points` in total.
    Linear,
    /// Logarithmic spacing, `points` per decade.
    Decade,
    /// Logarithmic spacing, `points` per octave.
    Octave,
}

/// AC analysis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AcConfig {
    /// Start frequency (Hz)
    pub start: f64,
    /// Stop frequency (Hz)
    pub stop: f64,
    /// Number of points (total for Linear, per decade/octave for log sweeps)
    pub points: usize,
    /// Sweep type
    pub sweep: AcSweep,
    /// Operating-point solve used for linearization
    pub dc: DcConfig,
}

impl Default for AcConfig {
    fn default() -> Self {
        Self {
            start: 1.0,
            stop: 1e6,
            points: 10,
            sweep: AcSweep::Decade,
            dc: DcConfig::default(),
        }
    }
}

impl AcConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep type and range.
    pub fn with_sweep(mut self, sweep: AcSweep, start: f64, stop: f64, points: usize) -> Self {
        self.sweep = sweep;
        self.start = start;
        self.stop = stop;
        self.points = points;
        self
    }

    /// Set the operating-point configuration.
    pub fn with_dc(mut self, dc: DcConfig) -> Self {
        self.dc = dc;
        self
    }

    /// Reject empty or reversed ranges.
    pub fn validate(&self) -> Result<()> {
        self.dc.validate()?;
        if self.points == 0 {
            return Err(SimError::invalid_analysis("AC sweep needs at least one point"));
        }
        if !(self.start.is_finite() && self.stop.is_finite()) || self.stop < self.start {
            return Err(SimError::invalid_analysis("AC stop frequency must not be below start"));
        }
        match self.sweep {
            AcSweep::Linear if self.start < 0.0 => {
                Err(SimError::invalid_analysis("AC frequencies must not be negative"))
            }
            AcSweep::Decade | AcSweep::Octave if self.start <= 0.0 => Err(SimError::invalid_analysis(
                "logarithmic AC sweeps need a positive start frequency",
            )),
            _ => Ok(()),
        }
    }

    /// Generate the frequency points of the sweep.
    pub fn frequencies(&self) -> Vec<f64> {
        let log_sweep = |base: f64| {
            let span = (self.stop / self.start).ln() / base.ln();
            // ln(1000) / ln(10) lands just below 3, so nudge before truncating
            let total = (self.points as f64 * span + 1e-9).floor() as usize + 1;
            (0..total)
                .map(|i| self.start * base.powf(i as f64 / self.points as f64))
                .filter(|&f| f <= self.stop * (1.0 + 1e-9))
                .collect()
        };
        match self.sweep {
            AcSweep::Linear => {
                if self.points <= 1 {
                    return vec![self.start];
                }
                let step = (self.stop - self.start) / (self.points as f64 - 1.0);
                (0..self.points).map(|i| self.start + step * i as f64).collect()
            }
            AcSweep::Decade => log_sweep(10.0),
            AcSweep::Octave => log_sweep(2.0),
        }
    }
}

/// A single frequency point in AC analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AcPoint {
    /// Frequency (Hz)
    pub frequency: f64,
    /// Complex solution vector (node voltages + branch currents), or the
    /// error that stopped this point
    pub solution: std::result::Result<Vec<Complex64>, SimError>,
}

/// Result of AC analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AcResult {
    /// All computed frequency points in sweep order
    pub points: Vec<AcPoint>,
    /// Operating point the devices were linearized at
    pub operating_point: OperatingPoint,
    /// Number of nodes including ground
    pub num_nodes: usize,
}

impl AcResult {
    fn series(&self, var: VarIndex) -> Vec<(f64, Option<Complex64>)> {
        let index = var.to_index(self.num_nodes);
        self.points
            .iter()
            .map(|p| {
                let value = match (&p.solution, index) {
                    (Ok(x), Some(i)) => Some(x[i]),
                    (Ok(_), None) => Some(Complex64::new(0.0, 0.0)),
                    (Err(_), _) => None,
                };
                (p.frequency, value)
            })
            .collect()
    }

    /// Look up a node by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.operating_point
            .node_names
            .iter()
            .position(|n| n == name)
            .map(NodeId)
    }

    /// Complex voltage at a node across all frequencies (`None` where the
    /// point failed).
    pub fn voltage(&self, node: NodeId) -> Vec<(f64, Option<Complex64>)> {
        self.series(VarIndex::Voltage(node))
    }

    /// Complex branch current across all frequencies.
    pub fn branch_current(&self, branch: BranchId) -> Vec<(f64, Option<Complex64>)> {
        self.series(VarIndex::Current(branch))
    }

    /// Voltage magnitude at a node.
    pub fn magnitude(&self, node: NodeId) -> Vec<(f64, Option<f64>)> {
        self.voltage(node)
            .into_iter()
            .map(|(f, v)| (f, v.map(|v| v.norm())))
            .collect()
    }

    /// Voltage magnitude in dB at a node.
    pub fn magnitude_db(&self, node: NodeId) -> Vec<(f64, Option<f64>)> {
        self.magnitude(node)
            .into_iter()
            .map(|(f, m)| (f, m.map(|m| 20.0 * m.log10())))
            .collect()
    }

    /// Voltage phase in degrees at a node.
    pub fn phase_deg(&self, node: NodeId) -> Vec<(f64, Option<f64>)> {
        self.voltage(node)
            .into_iter()
            .map(|(f, v)| (f, v.map(|v| v.arg().to_degrees())))
            .collect()
    }

    /// Get all frequency values.
    pub fn frequencies(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency).collect()
    }

    /// Points that failed, with their errors.
    pub fn failures(&self) -> Vec<(f64, &SimError)> {
        self.points
            .iter()
            .filter_map(|p| p.solution.as_ref().err().map(|e| (p.frequency, e)))
            .collect()
    }
}

/// AC small-signal solver.
#[derive(Debug, Clone, Default)]
pub struct AcSolver {
    pub config: AcConfig,
    lu: SparseLuSolver<Complex64>,
}

impl AcSolver {
    /// Create a new AC solver.
    pub fn new(config: AcConfig) -> Self {
        Self {
            config,
            lu: SparseLuSolver::new(),
        }
    }

    /// Run the sweep to completion.
    pub fn solve(&mut self, circuit: &Circuit) -> Result<AcResult> {
        self.solve_controlled(circuit, &RunControl::new())
    }

    /// Run the sweep, honoring pause/stop requests between frequency points.
    pub fn solve_controlled(&mut self, circuit: &Circuit, control: &RunControl) -> Result<AcResult> {
        self.config.validate()?;
        let operating_point = DcSolver::new(self.config.dc.clone()).solve(circuit)?;
        self.sweep(circuit, operating_point, control)
    }

    /// Sweep around an already solved operating point.
    pub fn sweep(
        &mut self,
        circuit: &Circuit,
        operating_point: OperatingPoint,
        control: &RunControl,
    ) -> Result<AcResult> {
        let frequencies = self.config.frequencies();
        let _span = tracing::info_span!("ac_analysis", n_points = frequencies.len()).entered();
        let builder = MnaBuilder::new(circuit);
        let total = frequencies.len();
        let mut points = Vec::with_capacity(total);

        for (k, &frequency) in frequencies.iter().enumerate() {
            let ctx = AcContext {
                operating_point: &operating_point.solution,
                num_nodes: circuit.num_nodes,
                omega: 2.0 * PI * frequency,
            };
            let system = builder.assemble_ac(&ctx);
            let solution = self.lu.factor_and_solve(&system.matrix, &system.rhs);
            if let Err(ref err) = solution {
                tracing::warn!(frequency, %err, "AC point failed");
            }
            points.push(AcPoint { frequency, solution });
            control.checkpoint((k + 1) as f64 / total as f64, Some(PartialResult::AcPoint { frequency }))?;
        }

        Ok(AcResult {
            points,
            operating_point,
            num_nodes: circuit.num_nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::components::AcSpec;
    use approx::assert_relative_eq;

    #[test]
    fn test_decade_frequencies() {
        let config = AcConfig::new().with_sweep(AcSweep::Decade, 10.0, 1000.0, 10);
        let f = config.frequencies();
        assert_eq!(f.len(), 21);
        assert_relative_eq!(f[0], 10.0);
        assert_relative_eq!(f[10], 100.0, max_relative = 1e-12);
        assert_relative_eq!(f[20], 1000.0, max_relative = 1e-12);
    }

    #[test]
    fn test_decade_sweep_keeps_stop_frequency() {
        let f = AcConfig::new().with_sweep(AcSweep::Decade, 1.0, 1000.0, 10).frequencies();
        assert_eq!(f.len(), 31);
        assert_relative_eq!(f[30], 1000.0, max_relative = 1e-12);

        let f = AcConfig::new().frequencies();
        assert_relative_eq!(*f.last().unwrap(), 1e6, max_relative = 1e-12);

        let f = AcConfig::new().with_sweep(AcSweep::Decade, 1.0, 1000.0, 1).frequencies();
        assert_eq!(f.len(), 4);
    }

    #[test]
    fn test_linear_and_octave_frequencies() {
        let lin = AcConfig::new().with_sweep(AcSweep::Linear, 0.0, 100.0, 5).frequencies();
        assert_eq!(lin, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
        let oct = AcConfig::new().with_sweep(AcSweep::Octave, 100.0, 800.0, 1).frequencies();
        assert_eq!(oct.len(), 4);
    }

    #[test]
    fn test_invalid_sweep_rejected() {
        let bad = AcConfig::new().with_sweep(AcSweep::Decade, 0.0, 100.0, 10);
        assert!(matches!(bad.validate(), Err(SimError::InvalidAnalysis { .. })));
        let reversed = AcConfig::new().with_sweep(AcSweep::Linear, 10.0, 1.0, 10);
        assert!(reversed.validate().is_err());
    }

    #[test]
    fn test_rl_highpass() {
        // V -- R -- out -- L -- gnd: |H| = wL / sqrt(R^2 + (wL)^2)
        let mut b = CircuitBuilder::new();
        b.add_ac_voltage_source("V1", "in", "0", 0.0, AcSpec::unit()).unwrap();
        b.add_resistor("R1", "in", "out", 100.0).unwrap();
        b.add_inductor("L1", "out", "0", 10e-3).unwrap();
        let circuit = b.build().unwrap();

        let mut solver = AcSolver::new(AcConfig::new().with_sweep(AcSweep::Linear, 1591.55, 1591.55, 1));
        let result = solver.solve(&circuit).unwrap();
        let out = result.find_node("out").unwrap();
        let (_, mag) = result.magnitude(out)[0];
        // wL = R at this frequency
        assert_relative_eq!(mag.unwrap(), 1.0 / 2f64.sqrt(), max_relative = 1e-4);
        let (_, phase) = result.phase_deg(out)[0];
        assert_relative_eq!(phase.unwrap(), 45.0, epsilon = 0.01);
    }
}
