//! BJT (Bipolar Junction Transistor) model.
//!
//! Ebers-Moll transport model for NPN and PNP transistors, with a
//! first-order Early effect on the transport current:
//!
//! ```text
//! It = (If - Ir) * (1 - Vbc/Va)
//! Ic = It - Ir/BR
//! Ib = If/BF + Ir/BR
//! ```
//!
//! where If, Ir are the base-emitter and base-collector junction currents.
//! Gmin is placed in parallel with both junctions.

use num_complex::Complex64;

use super::diode::{junction, pnjlim, step_fraction};
use super::stamp::{AcContext, EvalContext, Stamp};
use super::{require_positive, Component};
use crate::circuit::{ComponentId, NodeId};
use crate::error::{Result, SimError};
use crate::solver::GMIN;
use crate::THERMAL_VOLTAGE;

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtType {
    Npn,
    Pnp,
}

impl BjtType {
    fn polarity(self) -> f64 {
        match self {
            BjtType::Npn => 1.0,
            BjtType::Pnp => -1.0,
        }
    }
}

/// Parameters for a BJT model.
#[derive(Debug, Clone, PartialEq)]
pub struct BjtParams {
    /// Forward current gain (β_F)
    pub beta_f: f64,
    /// Reverse current gain (β_R)
    pub beta_r: f64,
    /// Transport saturation current
    pub is: f64,
    /// Ideality factor
    pub n: f64,
    /// Early voltage (for output resistance), 0 = infinite
    pub va: f64,
}

impl Default for BjtParams {
    fn default() -> Self {
        Self {
            beta_f: 100.0,
            beta_r: 1.0,
            is: 1e-14,
            n: 1.0,
            va: 100.0,
        }
    }
}

impl BjtParams {
    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    fn v_crit(&self) -> f64 {
        let n_vt = self.n_vt();
        n_vt * (n_vt / (std::f64::consts::SQRT_2 * self.is)).ln()
    }
}

/// Terminal currents and partial derivatives at one bias point.
///
/// Currents flow into the device. Derivatives are with respect to the
/// junction voltages Vbe and Vbc as seen by the terminals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BjtEval {
    pub ic: f64,
    pub ib: f64,
    pub dic_dvbe: f64,
    pub dic_dvbc: f64,
    pub dib_dvbe: f64,
    pub dib_dvbc: f64,
}

impl BjtEval {
    /// Emitter current into the device.
    pub fn ie(&self) -> f64 {
        -(self.ic + self.ib)
    }

    /// Terminal currents `[c, b, e]` and their Jacobian with respect to
    /// terminal voltages `[Vc, Vb, Ve]`.
    fn terminal_jacobian(&self) -> ([f64; 3], Vec<Vec<f64>>) {
        // Vbe = Vb - Ve, Vbc = Vb - Vc
        let row = |d_vbe: f64, d_vbc: f64| vec![-d_vbc, d_vbe + d_vbc, -d_vbe];
        let c = row(self.dic_dvbe, self.dic_dvbc);
        let b = row(self.dib_dvbe, self.dib_dvbc);
        let e: Vec<f64> = c.iter().zip(&b).map(|(x, y)| -(x + y)).collect();
        ([self.ic, self.ib, self.ie()], vec![c, b, e])
    }
}

/// A BJT component.
#[derive(Debug, Clone, PartialEq)]
pub struct Bjt {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 3], // [collector, base, emitter]
    pub bjt_type: BjtType,
    pub params: BjtParams,
}

impl Bjt {
    /// Create a new BJT.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 3],
        bjt_type: BjtType,
        params: BjtParams,
    ) -> Result<Self> {
        require_positive(&name, "bf", params.beta_f)?;
        require_positive(&name, "br", params.beta_r)?;
        require_positive(&name, "is", params.is)?;
        require_positive(&name, "n", params.n)?;
        if !(params.va >= 0.0) {
            return Err(SimError::invalid_parameter(&name, "va", "must be zero (disabled) or positive"));
        }
        Ok(Self {
            id,
            name,
            nodes,
            bjt_type,
            params,
        })
    }

    /// Get the collector node.
    pub fn collector(&self) -> NodeId {
        self.nodes[0]
    }

    /// Get the base node.
    pub fn base(&self) -> NodeId {
        self.nodes[1]
    }

    /// Get the emitter node.
    pub fn emitter(&self) -> NodeId {
        self.nodes[2]
    }

    /// Junction voltages (Vbe, Vbc) in a solution vector.
    pub fn junction_voltages(&self, ctx: &EvalContext<'_>) -> (f64, f64) {
        let v_b = ctx.voltage(self.base());
        (v_b - ctx.voltage(self.emitter()), v_b - ctx.voltage(self.collector()))
    }

    /// Evaluate terminal currents and derivatives at (Vbe, Vbc).
    pub fn evaluate(&self, v_be: f64, v_bc: f64) -> BjtEval {
        let p = self.bjt_type.polarity();
        let n_vt = self.params.n_vt();
        let (vbe, vbc) = (p * v_be, p * v_bc);

        let (i_f, g_f) = junction(self.params.is, n_vt, vbe);
        let (i_r, g_r) = junction(self.params.is, n_vt, vbc);

        let (early, d_early) = if self.params.va > 0.0 {
            (1.0 - vbc / self.params.va, -1.0 / self.params.va)
        } else {
            (1.0, 0.0)
        };

        let bf = self.params.beta_f;
        let br = self.params.beta_r;
        let i_t = (i_f - i_r) * early;

        let ic = i_t - i_r / br - GMIN * vbc;
        let ib = i_f / bf + i_r / br + GMIN * (vbe + vbc);

        // The polarity flips both the voltages and the currents, so the
        // derivatives keep their sign.
        BjtEval {
            ic: p * ic,
            ib: p * ib,
            dic_dvbe: g_f * early,
            dic_dvbc: -g_r * early + (i_f - i_r) * d_early - g_r / br - GMIN,
            dib_dvbe: g_f / bf + GMIN,
            dib_dvbc: g_r / br + GMIN,
        }
    }

    /// Linearized stamp at the present Newton guess.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let v0 = [
            ctx.voltage(self.collector()),
            ctx.voltage(self.base()),
            ctx.voltage(self.emitter()),
        ];
        let eval = self.evaluate(v0[1] - v0[2], v0[1] - v0[0]);
        let (currents, jacobian) = eval.terminal_jacobian();
        let mut stamp = Stamp::new();
        stamp.linearized(&self.nodes, &v0, &currents, &jacobian);
        stamp
    }

    /// Small-signal hybrid-pi admittances at the operating point.
    pub fn ac_stamp(&self, ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let v_b = ctx.voltage(self.base());
        let eval = self.evaluate(v_b - ctx.voltage(self.emitter()), v_b - ctx.voltage(self.collector()));
        let (_, jacobian) = eval.terminal_jacobian();
        let mut stamp = Stamp::new();
        for (k, &row) in self.nodes.iter().enumerate() {
            for (j, &col) in self.nodes.iter().enumerate() {
                if jacobian[k][j] != 0.0 {
                    stamp.add(row, col, Complex64::new(jacobian[k][j], 0.0));
                }
            }
        }
        stamp
    }

    /// Terminal currents `[Ic, Ib, Ie]` into the device.
    pub fn terminal_currents(&self, ctx: &EvalContext<'_>) -> [f64; 3] {
        let (v_be, v_bc) = self.junction_voltages(ctx);
        let eval = self.evaluate(v_be, v_bc);
        [eval.ic, eval.ib, eval.ie()]
    }

    /// Fraction of the Newton step from `old` to `new` both junctions accept.
    pub fn step_fraction(&self, old: &EvalContext<'_>, new: &EvalContext<'_>) -> f64 {
        let p = self.bjt_type.polarity();
        let n_vt = self.params.n_vt();
        let v_crit = self.params.v_crit();
        let (be_old, bc_old) = self.junction_voltages(old);
        let (be_new, bc_new) = self.junction_voltages(new);
        let limit = |v_old: f64, v_new: f64| {
            let (o, n) = (p * v_old, p * v_new);
            step_fraction(o, n, pnjlim(n, o, n_vt, v_crit))
        };
        limit(be_old, be_new).min(limit(bc_old, bc_new))
    }
}

impl From<Bjt> for Component {
    fn from(q: Bjt) -> Self {
        Component::Bjt(q)
    }
}
