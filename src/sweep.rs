//! Parametric sweeps and Monte Carlo runs.
//!
//! Every point substitutes its parameter values into its own copy of the
//! snapshot and runs the base analysis independently on the rayon pool.
//! Points are collected in run-id order whatever order they finish in, and
//! each point keeps its own `Result` so one failure does not end the sweep.
//!
//! Monte Carlo samples come from a stateless hash generator: the value of
//! parameter `j` in run `i` depends only on `(seed, i, j)`, so results do not
//! depend on how the pool schedules the runs.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::analysis::{self, AnalysisConfig, SimulationResult, Snapshot};
use crate::error::{Result, SimError};
use crate::session::{PartialResult, RunControl};

/// Default relative standard deviation of a Monte Carlo tolerance.
pub const DEFAULT_SIGMA: f64 = 0.05;

/// SplitMix64 finalizer.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Uniform sample in [0, 1) for parameter `param` of run `run`.
#[inline]
pub fn uniform(seed: u64, run: u32, param: u32) -> f64 {
    let key = seed ^ (run as u64).wrapping_mul(0x517cc1b727220a95) ^ (param as u64).wrapping_mul(0x5851f42d4c957f2d);
    (splitmix64(key) >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Standard normal sample (Box-Muller over two uniform draws).
#[inline]
pub fn gaussian(seed: u64, run: u32, param: u32) -> f64 {
    let u1 = uniform(seed, run, param.wrapping_mul(2)).max(1e-10);
    let u2 = uniform(seed, run, param.wrapping_mul(2).wrapping_add(1));
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Gaussian spread of one parameter around its nominal value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tolerance {
    /// Component or network element name
    pub element: String,
    pub param: String,
    pub nominal: f64,
    /// Standard deviation as a fraction of nominal
    pub sigma: f64,
}

impl Tolerance {
    pub fn new(element: impl Into<String>, param: impl Into<String>, nominal: f64) -> Self {
        Self {
            element: element.into(),
            param: param.into(),
            nominal,
            sigma: DEFAULT_SIGMA,
        }
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }
}

/// How the sweep points are generated.
#[derive(Debug, Clone, PartialEq)]
pub enum Variation {
    /// One parameter stepped through explicit values
    Parametric {
        element: String,
        param: String,
        values: Vec<f64>,
    },
    /// `runs` samples of independent Gaussian tolerances
    MonteCarlo {
        runs: usize,
        seed: u64,
        tolerances: Vec<Tolerance>,
    },
}

impl Variation {
    pub fn parametric(element: impl Into<String>, param: impl Into<String>, values: Vec<f64>) -> Self {
        Variation::Parametric {
            element: element.into(),
            param: param.into(),
            values,
        }
    }

    /// `points` evenly spaced values from `start` to `stop` inclusive.
    pub fn linear(element: impl Into<String>, param: impl Into<String>, start: f64, stop: f64, points: usize) -> Self {
        let values = match points {
            0 => Vec::new(),
            1 => vec![start],
            n => (0..n).map(|k| start + (stop - start) * k as f64 / (n - 1) as f64).collect(),
        };
        Self::parametric(element, param, values)
    }

    pub fn monte_carlo(runs: usize, seed: u64, tolerances: Vec<Tolerance>) -> Self {
        Variation::MonteCarlo { runs, seed, tolerances }
    }

    /// Number of sweep points.
    pub fn len(&self) -> usize {
        match self {
            Variation::Parametric { values, .. } => values.len(),
            Variation::MonteCarlo { runs, .. } => *runs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameter values of run `run`.
    pub fn point(&self, run: usize) -> Vec<ParameterValue> {
        match self {
            Variation::Parametric { element, param, values } => values
                .get(run)
                .map(|&value| ParameterValue {
                    element: element.clone(),
                    param: param.clone(),
                    value,
                })
                .into_iter()
                .collect(),
            Variation::MonteCarlo { seed, tolerances, .. } => tolerances
                .iter()
                .enumerate()
                .map(|(j, t)| ParameterValue {
                    element: t.element.clone(),
                    param: t.param.clone(),
                    value: t.nominal * (1.0 + t.sigma * gaussian(*seed, run as u32, j as u32)),
                })
                .collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Variation::Parametric { values, .. } => {
                if values.is_empty() {
                    return Err(SimError::invalid_analysis("parametric sweep has no values"));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(SimError::invalid_analysis("sweep values must be finite"));
                }
            }
            Variation::MonteCarlo { runs, tolerances, .. } => {
                if *runs == 0 || tolerances.is_empty() {
                    return Err(SimError::invalid_analysis(
                        "Monte Carlo needs at least one run and one tolerance",
                    ));
                }
                if tolerances
                    .iter()
                    .any(|t| !(t.nominal.is_finite() && t.sigma.is_finite()) || t.sigma < 0.0)
                {
                    return Err(SimError::invalid_analysis(
                        "tolerances need a finite nominal and a non-negative sigma",
                    ));
                }
            }
        }
        Ok(())
    }

    /// A representative point used to check that every varied parameter exists.
    fn probe(&self) -> Vec<ParameterValue> {
        match self {
            Variation::Parametric { .. } => self.point(0),
            Variation::MonteCarlo { tolerances, .. } => tolerances
                .iter()
                .map(|t| ParameterValue {
                    element: t.element.clone(),
                    param: t.param.clone(),
                    value: t.nominal,
                })
                .collect(),
        }
    }
}

/// One substituted parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterValue {
    pub element: String,
    pub param: String,
    pub value: f64,
}

/// A base analysis repeated over a set of parameter variations.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub base: Box<AnalysisConfig>,
    pub variation: Variation,
}

impl SweepConfig {
    pub fn new(base: AnalysisConfig, variation: Variation) -> Self {
        Self {
            base: Box::new(base),
            variation,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(*self.base, AnalysisConfig::Sweep(_)) {
            return Err(SimError::invalid_analysis("sweeps cannot be nested"));
        }
        self.base.validate()?;
        self.variation.validate()
    }
}

/// Outcome of one sweep point.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub run_id: usize,
    pub parameters: Vec<ParameterValue>,
    pub result: Result<SimulationResult>,
}

/// Summary statistics of a scalar over the successful points.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepStatistics {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl SweepStatistics {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count,
        })
    }
}

/// All sweep points, ordered by run id.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub points: Vec<SweepPoint>,
}

impl SweepResult {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points that completed, with their results.
    pub fn successes(&self) -> impl Iterator<Item = (&SweepPoint, &SimulationResult)> {
        self.points.iter().filter_map(|p| p.result.as_ref().ok().map(|r| (p, r)))
    }

    /// Points that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&SweepPoint, &SimError)> {
        self.points.iter().filter_map(|p| p.result.as_ref().err().map(|e| (p, e)))
    }

    /// Statistics of `metric` over the successful points that yield a value.
    pub fn statistics<F>(&self, metric: F) -> Option<SweepStatistics>
    where
        F: Fn(&SimulationResult) -> Option<f64>,
    {
        let samples: Vec<f64> = self.successes().filter_map(|(_, r)| metric(r)).collect();
        SweepStatistics::from_samples(&samples)
    }
}

/// Check the base analysis against the snapshot and every varied parameter.
pub fn validate(snapshot: &Snapshot, config: &SweepConfig) -> Result<()> {
    config.validate()?;
    analysis::validate(snapshot, &config.base)?;
    apply(snapshot, &config.variation.probe()).map(|_| ())
}

fn apply(snapshot: &Snapshot, parameters: &[ParameterValue]) -> Result<Snapshot> {
    parameters.iter().try_fold(snapshot.clone(), |snap, p| {
        snap.with_parameter(&p.element, &p.param, p.value)
    })
}

/// Run every sweep point on the rayon pool.
///
/// Pause requests hold back points that have not started yet; a stop
/// request cancels the whole sweep once the in-flight points finish.
pub fn run(snapshot: &Snapshot, config: &SweepConfig, control: &RunControl) -> Result<SweepResult> {
    config.validate()?;
    let total = config.variation.len();
    let _span = tracing::info_span!("sweep", points = total, analysis = config.base.name()).entered();
    let completed = AtomicUsize::new(0);

    let points: Vec<SweepPoint> = (0..total)
        .into_par_iter()
        .map(|run_id| {
            let parameters = config.variation.point(run_id);
            control.wait_while_paused();
            let result = if control.is_stop_requested() {
                Err(SimError::Cancelled)
            } else {
                apply(snapshot, &parameters)
                    .and_then(|snap| analysis::run(&snap, &config.base, &RunControl::new()))
            };
            if let Err(err) = &result {
                tracing::debug!(run_id, %err, "sweep point failed");
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            control.report(
                done as f64 / total as f64,
                Some(PartialResult::SweepPoints { completed: done, total }),
            );
            SweepPoint {
                run_id,
                parameters,
                result,
            }
        })
        .collect();

    if control.is_stop_requested() {
        return Err(SimError::Cancelled);
    }
    let failed = points.iter().filter(|p| p.result.is_err()).count();
    tracing::info!(points = total, failed, "sweep complete");
    Ok(SweepResult { points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Circuit, CircuitBuilder};
    use crate::components::Waveform;
    use crate::solver::DcConfig;
    use approx::assert_relative_eq;

    fn divider() -> Circuit {
        let mut b = CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(10.0)).unwrap();
        b.add_resistor("R1", "in", "out", 1000.0).unwrap();
        b.add_resistor("R2", "out", "0", 1000.0).unwrap();
        b.build().unwrap()
    }

    fn out_voltage(result: &SimulationResult) -> Option<f64> {
        result.as_dc().and_then(|op| op.node_voltage("out"))
    }

    #[test]
    fn test_rng_is_reproducible() {
        assert_eq!(uniform(7, 3, 1), uniform(7, 3, 1));
        assert_ne!(uniform(7, 3, 1), uniform(7, 3, 2));
        let samples: Vec<f64> = (0..2000).map(|i| gaussian(42, i, 0)).collect();
        let stats = SweepStatistics::from_samples(&samples).unwrap();
        assert!(stats.mean.abs() < 0.1);
        assert!((stats.std_dev - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_linear_values() {
        let v = Variation::linear("R2", "resistance", 1000.0, 3000.0, 3);
        assert_eq!(v.len(), 3);
        assert_eq!(v.point(2)[0].value, 3000.0);
    }

    #[test]
    fn test_parametric_sweep_is_ordered() {
        let values: Vec<f64> = (1..=16).map(|k| 250.0 * k as f64).collect();
        let config = SweepConfig::new(
            AnalysisConfig::Dc(DcConfig::new()),
            Variation::parametric("R2", "resistance", values.clone()),
        );
        let snapshot = Snapshot::from(divider());
        let result = run(&snapshot, &config, &RunControl::new()).unwrap();
        assert_eq!(result.len(), values.len());
        for (k, point) in result.points.iter().enumerate() {
            assert_eq!(point.run_id, k);
            let r2 = values[k];
            let v = out_voltage(point.result.as_ref().unwrap()).unwrap();
            assert_relative_eq!(v, 10.0 * r2 / (1000.0 + r2), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_monte_carlo_is_reproducible() {
        let variation = Variation::monte_carlo(
            32,
            1234,
            vec![
                Tolerance::new("R1", "resistance", 1000.0).with_sigma(0.01),
                Tolerance::new("R2", "resistance", 1000.0).with_sigma(0.01),
            ],
        );
        let config = SweepConfig::new(AnalysisConfig::Dc(DcConfig::new()), variation);
        let snapshot = Snapshot::from(divider());
        let first = run(&snapshot, &config, &RunControl::new()).unwrap();
        let second = run(&snapshot, &config, &RunControl::new()).unwrap();
        assert_eq!(first, second);

        let stats = first.statistics(out_voltage).unwrap();
        assert_eq!(stats.count, 32);
        assert!((stats.mean - 5.0).abs() < 0.05);
        assert!(stats.std_dev > 0.0);
    }

    #[test]
    fn test_failing_point_is_recorded() {
        let config = SweepConfig::new(
            AnalysisConfig::Dc(DcConfig::new()),
            Variation::parametric("R2", "resistance", vec![1000.0, -5.0, 2000.0]),
        );
        let result = run(&Snapshot::from(divider()), &config, &RunControl::new()).unwrap();
        assert_eq!(result.successes().count(), 2);
        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.run_id, 1);
        assert!(matches!(failures[0].1, SimError::InvalidParameter { .. }));
    }

    #[test]
    fn test_unknown_component_rejected_up_front() {
        let config = SweepConfig::new(
            AnalysisConfig::Dc(DcConfig::new()),
            Variation::parametric("R9", "resistance", vec![1.0]),
        );
        assert!(matches!(
            validate(&Snapshot::from(divider()), &config),
            Err(SimError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn test_nested_sweep_rejected() {
        let inner = SweepConfig::new(
            AnalysisConfig::Dc(DcConfig::new()),
            Variation::parametric("R2", "resistance", vec![1.0]),
        );
        let outer = SweepConfig::new(AnalysisConfig::Sweep(inner), Variation::parametric("R1", "r", vec![1.0]));
        assert!(matches!(outer.validate(), Err(SimError::InvalidAnalysis { .. })));
    }

    #[test]
    fn test_stop_cancels_sweep() {
        let control = RunControl::new();
        control.request_stop();
        let config = SweepConfig::new(
            AnalysisConfig::Dc(DcConfig::new()),
            Variation::parametric("R2", "resistance", vec![1000.0, 2000.0]),
        );
        assert_eq!(
            run(&Snapshot::from(divider()), &config, &control),
            Err(SimError::Cancelled)
        );
    }
}
