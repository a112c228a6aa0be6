//! Independent voltage and current sources and their time waveforms.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::stamp::{AcContext, EvalContext, Stamp};
use super::{require_finite, Component};
use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::error::{Result, SimError};

/// Time-domain value of an independent source.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Constant value
    Dc(f64),
    /// Linear ramp from `initial` to `target` over `[delay, delay + rise]`
    Step {
        initial: f64,
        target: f64,
        delay: f64,
        rise: f64,
    },
    /// Periodic trapezoidal pulse
    Pulse {
        initial: f64,
        pulsed: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        period: f64,
    },
    /// Damped sinusoid starting after `delay`
    Sine {
        offset: f64,
        amplitude: f64,
        frequency: f64,
        delay: f64,
        damping: f64,
        phase_deg: f64,
    },
    /// Piecewise-linear `(time, value)` points, held constant past the ends
    Pwl(Vec<(f64, f64)>),
}

impl Waveform {
    /// Check waveform timing parameters.
    pub fn validate(&self, component: &str) -> Result<()> {
        let bad = |param: &str, message: &str| Err(SimError::invalid_parameter(component, param, message));
        match self {
            Waveform::Dc(v) => require_finite(component, "value", *v).map(|_| ()),
            Waveform::Step { delay, rise, .. } => {
                if *delay < 0.0 {
                    return bad("delay", "must not be negative");
                }
                if *rise <= 0.0 {
                    return bad("rise", "must be positive");
                }
                Ok(())
            }
            Waveform::Pulse {
                delay,
                rise,
                fall,
                width,
                period,
                ..
            } => {
                if *delay < 0.0 || *width < 0.0 {
                    return bad("width", "delay and width must not be negative");
                }
                if *rise <= 0.0 || *fall <= 0.0 {
                    return bad("rise", "rise and fall times must be positive");
                }
                if *period < rise + width + fall {
                    return bad("period", "must cover rise, width and fall");
                }
                Ok(())
            }
            Waveform::Sine { frequency, delay, .. } => {
                if *frequency <= 0.0 {
                    return bad("frequency", "must be positive");
                }
                if *delay < 0.0 {
                    return bad("delay", "must not be negative");
                }
                Ok(())
            }
            Waveform::Pwl(points) => {
                if points.is_empty() {
                    return bad("points", "needs at least one point");
                }
                if points.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return bad("points", "times must be strictly increasing");
                }
                Ok(())
            }
        }
    }

    /// Value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        match self {
            Waveform::Dc(v) => *v,
            Waveform::Step {
                initial,
                target,
                delay,
                rise,
            } => {
                if t <= *delay {
                    *initial
                } else if t >= delay + rise {
                    *target
                } else {
                    initial + (target - initial) * (t - delay) / rise
                }
            }
            Waveform::Pulse {
                initial,
                pulsed,
                delay,
                rise,
                fall,
                width,
                period,
            } => {
                if t <= *delay {
                    return *initial;
                }
                let tau = (t - delay) % period;
                if tau < *rise {
                    initial + (pulsed - initial) * tau / rise
                } else if tau < rise + width {
                    *pulsed
                } else if tau < rise + width + fall {
                    pulsed + (initial - pulsed) * (tau - rise - width) / fall
                } else {
                    *initial
                }
            }
            Waveform::Sine {
                offset,
                amplitude,
                frequency,
                delay,
                damping,
                phase_deg,
            } => {
                let phase = phase_deg.to_radians();
                if t <= *delay {
                    offset + amplitude * phase.sin()
                } else {
                    let tau = t - delay;
                    offset + amplitude * (-damping * tau).exp() * (2.0 * PI * frequency * tau + phase).sin()
                }
            }
            Waveform::Pwl(points) => {
                let first = points[0];
                if t <= first.0 {
                    return first.1;
                }
                for w in points.windows(2) {
                    let (t0, v0) = w[0];
                    let (t1, v1) = w[1];
                    if t <= t1 {
                        return v0 + (v1 - v0) * (t - t0) / (t1 - t0);
                    }
                }
                points[points.len() - 1].1
            }
        }
    }

    /// Times in `(0, stop]` where the waveform has a slope discontinuity.
    pub fn breakpoints(&self, stop: f64) -> Vec<f64> {
        let mut points = match self {
            Waveform::Dc(_) => Vec::new(),
            Waveform::Step { delay, rise, .. } => vec![*delay, delay + rise],
            Waveform::Pulse {
                delay,
                rise,
                fall,
                width,
                period,
                ..
            } => {
                let mut points = Vec::new();
                let mut start = *delay;
                while start <= stop {
                    points.extend([start, start + rise, start + rise + width, start + rise + width + fall]);
                    start += period;
                }
                points
            }
            Waveform::Sine { delay, .. } => vec![*delay],
            Waveform::Pwl(points) => points.iter().map(|p| p.0).collect(),
        };
        points.retain(|&t| t > 0.0 && t <= stop);
        points
    }
}

/// Small-signal excitation of a source in AC analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcSpec {
    pub magnitude: f64,
    pub phase_deg: f64,
}

impl AcSpec {
    /// Unit-magnitude, zero-phase excitation.
    pub fn unit() -> Self {
        Self {
            magnitude: 1.0,
            phase_deg: 0.0,
        }
    }

    /// The excitation as a phasor.
    pub fn phasor(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase_deg.to_radians())
    }
}

/// A voltage source component.
///
/// Voltage sources require an extra row/column in the MNA matrix for the
/// branch current. The source enforces: V+ - V- = V_source
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub waveform: Waveform,
    pub ac: Option<AcSpec>,
    pub branch: BranchId,
}

impl VoltageSource {
    /// Create a new voltage source.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        waveform: Waveform,
        ac: Option<AcSpec>,
        branch: BranchId,
    ) -> Result<Self> {
        waveform.validate(&name)?;
        Ok(Self {
            id,
            name,
            nodes,
            waveform,
            ac,
            branch,
        })
    }

    /// Source voltage at the evaluation point (scaled for source stepping).
    pub fn voltage(&self, ctx: &EvalContext<'_>) -> f64 {
        ctx.source_scale * self.waveform.value(ctx.time)
    }

    /// Stamp at a DC or transient evaluation point.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let mut stamp = Stamp::new();
        stamp.voltage_source(self.nodes[0], self.nodes[1], self.branch, self.voltage(ctx));
        stamp
    }

    /// Stamp with the AC phasor as the source value.
    pub fn ac_stamp(&self, _ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let mut stamp = Stamp::new();
        let value = self.ac.map(|ac| ac.phasor()).unwrap_or_default();
        stamp.voltage_source(self.nodes[0], self.nodes[1], self.branch, value);
        stamp
    }
}

/// A current source component.
///
/// Current sources add directly to the RHS vector of the MNA equations.
/// Current flows through the source from n+ to n-.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub waveform: Waveform,
    pub ac: Option<AcSpec>,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        waveform: Waveform,
        ac: Option<AcSpec>,
    ) -> Result<Self> {
        waveform.validate(&name)?;
        Ok(Self {
            id,
            name,
            nodes,
            waveform,
            ac,
        })
    }

    /// Source current at the evaluation point.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        ctx.source_scale * self.waveform.value(ctx.time)
    }

    /// Stamp at a DC or transient evaluation point.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let mut stamp = Stamp::new();
        stamp.current_source(self.nodes[0], self.nodes[1], self.current(ctx));
        stamp
    }

    /// Stamp with the AC phasor as the source value.
    pub fn ac_stamp(&self, _ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let mut stamp = Stamp::new();
        let value = self.ac.map(|ac| ac.phasor()).unwrap_or_default();
        stamp.current_source(self.nodes[0], self.nodes[1], value);
        stamp
    }
}

impl From<VoltageSource> for Component {
    fn from(v: VoltageSource) -> Self {
        Component::VoltageSource(v)
    }
}

impl From<CurrentSource> for Component {
    fn from(i: CurrentSource) -> Self {
        Component::CurrentSource(i)
    }
}
