//! Component models for circuit simulation.
//!
//! This module provides models for all supported circuit components:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source, Current Source (with time waveforms)
//! - Controlled sources: VCVS, VCCS, CCCS, CCVS
//! - Nonlinear: Diode, BJT
//!
//! Each component produces a [`Stamp`] for the evaluation point it is given:
//! a linearized real stamp for DC and transient Newton iterations, and a
//! complex small-signal stamp for AC analysis.

mod bjt;
mod controlled;
mod diode;
mod linear;
mod sources;
mod stamp;

pub use bjt::{Bjt, BjtEval, BjtParams, BjtType};
pub use controlled::{Cccs, Ccvs, Vccs, Vcvs};
pub use diode::{Diode, DiodeParams};
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{AcSpec, CurrentSource, VoltageSource, Waveform};
pub use stamp::{node_voltage, AcContext, EvalContext, ReactiveMode, ReactiveState, Stamp};

use num_complex::Complex64;

use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::error::{Result, SimError};

/// Check that a parameter is finite and strictly positive.
pub(crate) fn require_positive(component: &str, param: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimError::invalid_parameter(
            component,
            param,
            format!("must be a positive finite number, got {value}"),
        ))
    }
}

/// Check that a parameter is finite.
pub(crate) fn require_finite(component: &str, param: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SimError::invalid_parameter(
            component,
            param,
            format!("must be finite, got {value}"),
        ))
    }
}

/// A circuit component.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    Vcvs(Vcvs),
    Vccs(Vccs),
    Cccs(Cccs),
    Ccvs(Ccvs),
    Diode(Diode),
    Bjt(Bjt),
}

impl Component {
    /// Get the component ID.
    pub fn id(&self) -> ComponentId {
        match self {
            Component::Resistor(r) => r.id,
            Component::Capacitor(c) => c.id,
            Component::Inductor(l) => l.id,
            Component::VoltageSource(v) => v.id,
            Component::CurrentSource(i) => i.id,
            Component::Vcvs(e) => e.id,
            Component::Vccs(g) => g.id,
            Component::Cccs(f) => f.id,
            Component::Ccvs(h) => h.id,
            Component::Diode(d) => d.id,
            Component::Bjt(q) => q.id,
        }
    }

    /// Get the component name.
    pub fn name(&self) -> &str {
        match self {
            Component::Resistor(r) => &r.name,
            Component::Capacitor(c) => &c.name,
            Component::Inductor(l) => &l.name,
            Component::VoltageSource(v) => &v.name,
            Component::CurrentSource(i) => &i.name,
            Component::Vcvs(e) => &e.name,
            Component::Vccs(g) => &g.name,
            Component::Cccs(f) => &f.name,
            Component::Ccvs(h) => &h.name,
            Component::Diode(d) => &d.name,
            Component::Bjt(q) => &q.name,
        }
    }

    /// Terminal nodes in their fixed per-kind order.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Component::Resistor(r) => &r.nodes,
            Component::Capacitor(c) => &c.nodes,
            Component::Inductor(l) => &l.nodes,
            Component::VoltageSource(v) => &v.nodes,
            Component::CurrentSource(i) => &i.nodes,
            Component::Vcvs(e) => &e.nodes,
            Component::Vccs(g) => &g.nodes,
            Component::Cccs(f) => &f.nodes,
            Component::Ccvs(h) => &h.nodes,
            Component::Diode(d) => &d.nodes,
            Component::Bjt(q) => &q.nodes,
        }
    }

    /// Auxiliary branch-current variable owned by this component, if any.
    pub fn branch(&self) -> Option<BranchId> {
        match self {
            Component::Inductor(l) => Some(l.branch),
            Component::VoltageSource(v) => Some(v.branch),
            Component::Vcvs(e) => Some(e.branch),
            Component::Ccvs(h) => Some(h.branch),
            _ => None,
        }
    }

    /// Check if this component is nonlinear (requires Newton-Raphson iteration).
    pub fn is_nonlinear(&self) -> bool {
        matches!(self, Component::Diode(_) | Component::Bjt(_))
    }

    /// Check if this component stores energy (needs transient history).
    pub fn is_reactive(&self) -> bool {
        matches!(self, Component::Capacitor(_) | Component::Inductor(_))
    }

    /// Node pairs joined by a DC-conducting path through this component.
    pub fn dc_paths(&self) -> Vec<(NodeId, NodeId)> {
        match self {
            Component::Resistor(r) => vec![(r.nodes[0], r.nodes[1])],
            Component::Inductor(l) => vec![(l.nodes[0], l.nodes[1])],
            Component::VoltageSource(v) => vec![(v.nodes[0], v.nodes[1])],
            Component::Vcvs(e) => vec![(e.nodes[0], e.nodes[1])],
            Component::Ccvs(h) => vec![(h.nodes[0], h.nodes[1])],
            Component::Diode(d) => vec![(d.nodes[0], d.nodes[1])],
            Component::Bjt(q) => vec![(q.collector(), q.base()), (q.base(), q.emitter())],
            Component::Capacitor(_) | Component::CurrentSource(_) | Component::Vccs(_) | Component::Cccs(_) => {
                Vec::new()
            }
        }
    }

    /// Real stamp at a DC or transient evaluation point.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        match self {
            Component::Resistor(r) => linear_stamp(|s| r.stamp_into(s)),
            Component::Capacitor(c) => c.stamp(ctx),
            Component::Inductor(l) => l.stamp(ctx),
            Component::VoltageSource(v) => v.stamp(ctx),
            Component::CurrentSource(i) => i.stamp(ctx),
            Component::Vcvs(e) => linear_stamp(|s| e.stamp_into(s)),
            Component::Vccs(g) => linear_stamp(|s| g.stamp_into(s)),
            Component::Cccs(f) => linear_stamp(|s| f.stamp_into(s)),
            Component::Ccvs(h) => linear_stamp(|s| h.stamp_into(s)),
            Component::Diode(d) => d.stamp(ctx),
            Component::Bjt(q) => q.stamp(ctx),
        }
    }

    /// Complex small-signal stamp at angular frequency `ctx.omega`.
    pub fn ac_stamp(&self, ctx: &AcContext<'_>) -> Stamp<Complex64> {
        match self {
            Component::Resistor(r) => linear_stamp(|s| r.stamp_into(s)),
            Component::Capacitor(c) => c.ac_stamp(ctx),
            Component::Inductor(l) => l.ac_stamp(ctx),
            Component::VoltageSource(v) => v.ac_stamp(ctx),
            Component::CurrentSource(i) => i.ac_stamp(ctx),
            Component::Vcvs(e) => linear_stamp(|s| e.stamp_into(s)),
            Component::Vccs(g) => linear_stamp(|s| g.stamp_into(s)),
            Component::Cccs(f) => linear_stamp(|s| f.stamp_into(s)),
            Component::Ccvs(h) => linear_stamp(|s| h.stamp_into(s)),
            Component::Diode(d) => d.ac_stamp(ctx),
            Component::Bjt(q) => q.ac_stamp(ctx),
        }
    }

    /// Current flowing into the component at each terminal.
    pub fn terminal_currents(&self, ctx: &EvalContext<'_>) -> Vec<(NodeId, f64)> {
        let pair = |nodes: &[NodeId], i: f64| vec![(nodes[0], i), (nodes[1], -i)];
        match self {
            Component::Resistor(r) => pair(&r.nodes, r.current(ctx)),
            Component::Capacitor(c) => pair(&c.nodes, c.current(ctx)),
            Component::Inductor(l) => pair(&l.nodes, ctx.current(l.branch)),
            Component::VoltageSource(v) => pair(&v.nodes, ctx.current(v.branch)),
            Component::CurrentSource(i) => pair(&i.nodes, i.current(ctx)),
            Component::Vcvs(e) => pair(&e.nodes, ctx.current(e.branch)),
            Component::Vccs(g) => pair(&g.nodes, g.current(ctx)),
            Component::Cccs(f) => pair(&f.nodes, f.current(ctx)),
            Component::Ccvs(h) => pair(&h.nodes, ctx.current(h.branch)),
            Component::Diode(d) => pair(&d.nodes, d.current(d.voltage(ctx))),
            Component::Bjt(q) => {
                let [ic, ib, ie] = q.terminal_currents(ctx);
                vec![(q.collector(), ic), (q.base(), ib), (q.emitter(), ie)]
            }
        }
    }

    /// Current through the component from its first to its second terminal.
    ///
    /// For a BJT this is the collector current.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        self.terminal_currents(ctx).first().map(|&(_, i)| i).unwrap_or(0.0)
    }

    /// Power absorbed by the component (negative when it delivers power).
    pub fn power(&self, ctx: &EvalContext<'_>) -> f64 {
        self.terminal_currents(ctx)
            .iter()
            .map(|&(node, i)| ctx.voltage(node) * i)
            .sum()
    }

    /// Reactive state at an accepted solution point.
    ///
    /// Returns `None` for components without energy storage.
    pub fn reactive_state(&self, ctx: &EvalContext<'_>) -> Option<ReactiveState> {
        let across = |nodes: &[NodeId]| ctx.voltage(nodes[0]) - ctx.voltage(nodes[1]);
        match self {
            Component::Capacitor(c) => {
                let v = across(&c.nodes);
                Some(match ctx.reactive {
                    ReactiveMode::Dc => ReactiveState {
                        voltage: v,
                        current: 0.0,
                    },
                    ReactiveMode::Trapezoidal { step, history } => c.update_state(history[c.id.0], v, step),
                })
            }
            Component::Inductor(l) => Some(l.update_state(across(&l.nodes), ctx.current(l.branch))),
            _ => None,
        }
    }

    /// Fraction of the Newton step from `old` to `new` the device accepts
    /// after junction limiting (1.0 for linear components).
    pub fn step_fraction(&self, old: &EvalContext<'_>, new: &EvalContext<'_>) -> f64 {
        match self {
            Component::Diode(d) => d.step_fraction(old, new),
            Component::Bjt(q) => q.step_fraction(old, new),
            _ => 1.0,
        }
    }

    /// Waveform breakpoints in `(0, stop]`.
    pub fn breakpoints(&self, stop: f64) -> Vec<f64> {
        match self {
            Component::VoltageSource(v) => v.waveform.breakpoints(stop),
            Component::CurrentSource(i) => i.waveform.breakpoints(stop),
            _ => Vec::new(),
        }
    }

    /// Copy of this component with one parameter substituted.
    ///
    /// The value is validated the same way the constructor validates it.
    pub fn with_parameter(&self, param: &str, value: f64) -> Result<Component> {
        let unknown = || {
            Err(SimError::invalid_parameter(
                self.name(),
                param,
                "no such parameter for this component",
            ))
        };
        let p = param.to_ascii_lowercase();
        let name = self.name().to_string();
        let updated: Component = match (self, p.as_str()) {
            (Component::Resistor(r), "r" | "resistance") => {
                Resistor::new(r.id, name, r.nodes, value)?.into()
            }
            (Component::Capacitor(c), "c" | "capacitance") => {
                Capacitor::new(c.id, name, c.nodes, value)?.into()
            }
            (Component::Inductor(l), "l" | "inductance") => {
                Inductor::new(l.id, name, l.nodes, value, l.branch)?.into()
            }
            (Component::VoltageSource(v), "dc" | "value") => {
                VoltageSource::new(v.id, name, v.nodes, Waveform::Dc(value), v.ac, v.branch)?.into()
            }
            (Component::CurrentSource(i), "dc" | "value") => {
                CurrentSource::new(i.id, name, i.nodes, Waveform::Dc(value), i.ac)?.into()
            }
            (Component::Vcvs(e), "gain") => Vcvs::new(e.id, name, e.nodes, value, e.branch)?.into(),
            (Component::Vccs(g), "gm" | "transconductance") => Vccs::new(g.id, name, g.nodes, value)?.into(),
            (Component::Cccs(f), "gain") => {
                Cccs::new(f.id, name, f.nodes, f.control.clone(), f.control_branch, value)?.into()
            }
            (Component::Ccvs(h), "rm" | "transresistance") => Ccvs::new(
                h.id,
                name,
                h.nodes,
                h.control.clone(),
                h.control_branch,
                value,
                h.branch,
            )?
            .into(),
            (Component::Diode(d), "is" | "n") => {
                let mut params = d.params.clone();
                if p == "is" {
                    params.is = value;
                } else {
                    params.n = value;
                }
                Diode::new(d.id, name, d.nodes, params)?.into()
            }
            (Component::Bjt(q), "bf" | "br" | "is" | "n" | "va") => {
                let mut params = q.params.clone();
                match p.as_str() {
                    "bf" => params.beta_f = value,
                    "br" => params.beta_r = value,
                    "is" => params.is = value,
                    "n" => params.n = value,
                    _ => params.va = value,
                }
                Bjt::new(q.id, name, q.nodes, q.bjt_type, params)?.into()
            }
            _ => return unknown(),
        };
        Ok(updated)
    }
}

fn linear_stamp<T: crate::solver::Scalar>(f: impl FnOnce(&mut Stamp<T>)) -> Stamp<T> {
    let mut stamp = Stamp::new();
    f(&mut stamp);
    stamp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resistor() -> Component {
        Resistor::new(ComponentId(0), "R1".to_string(), [NodeId(1), NodeId(0)], 1000.0)
            .unwrap()
            .into()
    }

    #[test]
    fn test_with_parameter_revalidates() {
        let r = resistor();
        let r2 = r.with_parameter("resistance", 2000.0).unwrap();
        match r2 {
            Component::Resistor(ref inner) => assert_eq!(inner.resistance, 2000.0),
            _ => panic!("kind changed"),
        }
        assert!(matches!(
            r.with_parameter("resistance", -5.0),
            Err(SimError::InvalidParameter { .. })
        ));
        assert!(matches!(
            r.with_parameter("gain", 1.0),
            Err(SimError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_dc_paths() {
        let c: Component = Capacitor::new(ComponentId(1), "C1".to_string(), [NodeId(1), NodeId(2)], 1e-6)
            .unwrap()
            .into();
        assert!(c.dc_paths().is_empty());
        assert_eq!(resistor().dc_paths(), vec![(NodeId(1), NodeId(0))]);
    }

    #[test]
    fn test_power_of_resistor() {
        let r = resistor();
        let x = [2.0];
        let ctx = EvalContext::dc(&x, 2);
        // P = V^2 / R
        assert!((r.power(&ctx) - 0.004).abs() < 1e-12);
        assert!((r.current(&ctx) - 0.002).abs() < 1e-12);
    }
}
