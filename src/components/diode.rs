//! Diode model.
//!
//! Uses the Shockley diode equation with a small conductance in parallel:
//!   I = Is * (exp(V / (n * Vt)) - 1) + Gmin * V
//!
//! For Newton-Raphson iteration, we linearize around the current operating point:
//!   I ≈ I0 + G_d * (V - V0)
//!
//! where G_d = dI/dV = Is/(n*Vt) * exp(V0/(n*Vt)) + Gmin

use num_complex::Complex64;

use super::stamp::{AcContext, EvalContext, Stamp};
use super::{require_positive, Component};
use crate::circuit::{ComponentId, NodeId};
use crate::error::Result;
use crate::solver::GMIN;
use crate::THERMAL_VOLTAGE;

/// Exponent argument beyond which the junction current is extended linearly.
const EXP_ARG_LIMIT: f64 = 40.0;

/// Parameters for a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeParams {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self { is: 1e-14, n: 1.0 }
    }
}

impl DiodeParams {
    /// Create parameters for a germanium diode (lower forward voltage).
    pub fn germanium() -> Self {
        Self { is: 1e-9, n: 1.5 }
    }

    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    /// Critical voltage used by junction limiting.
    pub fn v_crit(&self) -> f64 {
        let n_vt = self.n_vt();
        n_vt * (n_vt / (std::f64::consts::SQRT_2 * self.is)).ln()
    }
}

/// Exponential junction current and its derivative, extended linearly past
/// `EXP_ARG_LIMIT` thermal voltages to keep the values finite.
pub(crate) fn junction(is: f64, n_vt: f64, v: f64) -> (f64, f64) {
    let v_max = EXP_ARG_LIMIT * n_vt;
    if v > v_max {
        let e = EXP_ARG_LIMIT.exp();
        let g = is / n_vt * e;
        (is * (e - 1.0) + g * (v - v_max), g)
    } else {
        let e = (v / n_vt).exp();
        (is * (e - 1.0), is / n_vt * e)
    }
}

/// SPICE-style junction voltage limiting.
///
/// Keeps the exponential from overshooting when Newton proposes a large
/// forward step: beyond `v_crit` the step is compressed logarithmically.
pub(crate) fn pnjlim(v_new: f64, v_old: f64, n_vt: f64, v_crit: f64) -> f64 {
    if v_new > v_crit && (v_new - v_old).abs() > 2.0 * n_vt {
        if v_old > 0.0 {
            let arg = 1.0 + (v_new - v_old) / n_vt;
            if arg > 0.0 {
                v_old + n_vt * arg.ln()
            } else {
                v_crit
            }
        } else {
            n_vt * (v_new / n_vt).ln()
        }
    } else {
        v_new
    }
}

/// Fraction of a proposed step that the limited junction voltage allows.
pub(crate) fn step_fraction(v_old: f64, v_new: f64, v_limited: f64) -> f64 {
    let delta = v_new - v_old;
    if delta.abs() < f64::EPSILON || v_limited == v_new {
        1.0
    } else {
        ((v_limited - v_old) / delta).clamp(1e-6, 1.0)
    }
}

/// A diode component.
#[derive(Debug, Clone, PartialEq)]
pub struct Diode {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [anode, cathode]
    pub params: DiodeParams,
}

impl Diode {
    /// Create a new diode.
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 2], params: DiodeParams) -> Result<Self> {
        require_positive(&name, "is", params.is)?;
        require_positive(&name, "n", params.n)?;
        Ok(Self {
            id,
            name,
            nodes,
            params,
        })
    }

    /// Calculate the diode current at a given voltage.
    pub fn current(&self, v: f64) -> f64 {
        junction(self.params.is, self.params.n_vt(), v).0 + GMIN * v
    }

    /// Calculate the conductance (dI/dV) at a given voltage.
    pub fn conductance(&self, v: f64) -> f64 {
        junction(self.params.is, self.params.n_vt(), v).1 + GMIN
    }

    /// Get the linearized model parameters at the current operating point.
    /// Returns (conductance G, equivalent current source I_eq)
    /// such that I = G * V + I_eq
    pub fn linearize(&self, v_op: f64) -> (f64, f64) {
        let g = self.conductance(v_op);
        let i = self.current(v_op);
        (g, i - g * v_op)
    }

    /// Junction voltage in a solution vector.
    pub fn voltage(&self, ctx: &EvalContext<'_>) -> f64 {
        ctx.voltage(self.nodes[0]) - ctx.voltage(self.nodes[1])
    }

    /// Linearized stamp at the present Newton guess.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let (g, i_eq) = self.linearize(self.voltage(ctx));
        let mut stamp = Stamp::new();
        stamp.conductance(self.nodes[0], self.nodes[1], g);
        stamp.current_source(self.nodes[0], self.nodes[1], i_eq);
        stamp
    }

    /// Small-signal conductance at the operating point.
    pub fn ac_stamp(&self, ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let v = ctx.voltage(self.nodes[0]) - ctx.voltage(self.nodes[1]);
        let mut stamp = Stamp::new();
        stamp.conductance(self.nodes[0], self.nodes[1], Complex64::new(self.conductance(v), 0.0));
        stamp
    }

    /// Limit voltage step for Newton-Raphson convergence.
    pub fn limit_voltage_step(&self, v_old: f64, v_new: f64) -> f64 {
        pnjlim(v_new, v_old, self.params.n_vt(), self.params.v_crit())
    }

    /// Fraction of the Newton step from `old` to `new` this diode accepts.
    pub fn step_fraction(&self, old: &EvalContext<'_>, new: &EvalContext<'_>) -> f64 {
        let v_old = self.voltage(old);
        let v_new = self.voltage(new);
        step_fraction(v_old, v_new, self.limit_voltage_step(v_old, v_new))
    }
}

impl From<Diode> for Component {
    fn from(d: Diode) -> Self {
        Component::Diode(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diode() -> Diode {
        Diode::new(
            ComponentId(0),
            "D1".to_string(),
            [NodeId(1), NodeId(0)],
            DiodeParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_diode_forward_bias() {
        let d = diode();

        // At 0V, current should be approximately 0
        assert!(d.current(0.0).abs() < 1e-10);

        // At forward bias, current should increase exponentially
        let i_small = d.current(0.3);
        let i_large = d.current(0.6);
        assert!(i_large > i_small * 100.0);
    }

    #[test]
    fn test_diode_reverse_bias() {
        let d = diode();

        // In reverse bias, current should approach -Is (plus the tiny Gmin leak)
        let i_rev = d.current(-1.0);
        assert!(i_rev < 0.0);
        assert!(i_rev > -2.0 * d.params.is - 2.0 * GMIN);
    }

    #[test]
    fn test_current_stays_finite() {
        let d = diode();
        let i = d.current(100.0);
        assert!(i.is_finite());
        assert!(d.conductance(100.0).is_finite());
    }

    #[test]
    fn test_limiting_compresses_large_forward_steps() {
        let d = diode();
        let limited = d.limit_voltage_step(0.0, 5.0);
        assert!(limited > 0.0 && limited < 1.0);
        // Small steps pass through unchanged
        assert_eq!(d.limit_voltage_step(0.60, 0.61), 0.61);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let bad = Diode::new(
            ComponentId(0),
            "D1".to_string(),
            [NodeId(1), NodeId(0)],
            DiodeParams { is: -1.0, n: 1.0 },
        );
        assert!(bad.is_err());
    }
}
