//! Linear passive components: Resistor, Capacitor, Inductor.

use num_complex::Complex64;

use super::stamp::{AcContext, EvalContext, ReactiveMode, ReactiveState, Stamp};
use super::{require_positive, Component};
use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::error::Result;
use crate::solver::Scalar;

/// A resistor component.
#[derive(Debug, Clone, PartialEq)]
pub struct Resistor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub resistance: f64,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 2], resistance: f64) -> Result<Self> {
        require_positive(&name, "resistance", resistance)?;
        Ok(Self {
            id,
            name,
            nodes,
            resistance,
        })
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }

    /// Stamp into a real or complex system; a resistor looks the same in both.
    pub fn stamp_into<T: Scalar>(&self, stamp: &mut Stamp<T>) {
        stamp.conductance(self.nodes[0], self.nodes[1], T::from_real(self.conductance()));
    }

    /// Current from n+ to n- at the evaluation point.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        (ctx.voltage(self.nodes[0]) - ctx.voltage(self.nodes[1])) * self.conductance()
    }
}

/// A capacitor component.
///
/// In discrete-time simulation, a capacitor is modeled using a companion model.
/// Using the trapezoidal rule:
///   i(n) = (2C/h) * v(n) - i_eq
///
/// where i_eq = (2C/h) * v(n-1) + i(n-1)
///
/// This gives an equivalent conductance G_eq = 2C/h and an equivalent
/// current source I_eq = -i_eq.
#[derive(Debug, Clone, PartialEq)]
pub struct Capacitor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub capacitance: f64,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 2], capacitance: f64) -> Result<Self> {
        require_positive(&name, "capacitance", capacitance)?;
        Ok(Self {
            id,
            name,
            nodes,
            capacitance,
        })
    }

    /// Get the equivalent conductance for the trapezoidal companion model.
    pub fn conductance(&self, h: f64) -> f64 {
        2.0 * self.capacitance / h
    }

    /// Get the equivalent current source value for the companion model.
    ///
    /// The companion current source represents the "history" term and
    /// is SUBTRACTED from the element current.
    pub fn current_source(&self, h: f64, prev: ReactiveState) -> f64 {
        -(self.conductance(h) * prev.voltage + prev.current)
    }

    /// Stamp at a DC or transient evaluation point.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let mut stamp = Stamp::new();
        // Open circuit at DC
        if let ReactiveMode::Trapezoidal { step, history } = ctx.reactive {
            let prev = history[self.id.0];
            stamp.conductance(self.nodes[0], self.nodes[1], self.conductance(step));
            stamp.current_source(self.nodes[0], self.nodes[1], self.current_source(step, prev));
        }
        stamp
    }

    /// Admittance jwC.
    pub fn ac_stamp(&self, ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let mut stamp = Stamp::new();
        stamp.conductance(self.nodes[0], self.nodes[1], ctx.jw() * self.capacitance);
        stamp
    }

    /// Current from n+ to n- at the evaluation point.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        match ctx.reactive {
            ReactiveMode::Dc => 0.0,
            ReactiveMode::Trapezoidal { step, history } => {
                let v = ctx.voltage(self.nodes[0]) - ctx.voltage(self.nodes[1]);
                self.conductance(step) * v + self.current_source(step, history[self.id.0])
            }
        }
    }

    /// State after an accepted step ending at voltage `v_new`.
    pub fn update_state(&self, prev: ReactiveState, v_new: f64, h: f64) -> ReactiveState {
        // i_new = (2C/h) * (v_new - v_prev) - i_prev
        let g = self.conductance(h);
        ReactiveState {
            voltage: v_new,
            current: g * (v_new - prev.voltage) - prev.current,
        }
    }
}

/// An inductor component.
///
/// Using the trapezoidal rule:
///   v(n) = (2L/h) * i(n) - ((2L/h) * i(n-1) + v(n-1))
///
/// This requires an additional branch current variable in the MNA matrix.
/// At DC the inductor is a short: its branch row reads V+ - V- = 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Inductor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub inductance: f64,
    pub branch: BranchId,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        inductance: f64,
        branch: BranchId,
    ) -> Result<Self> {
        require_positive(&name, "inductance", inductance)?;
        Ok(Self {
            id,
            name,
            nodes,
            inductance,
            branch,
        })
    }

    /// Get the equivalent resistance for the trapezoidal companion model.
    pub fn resistance(&self, h: f64) -> f64 {
        2.0 * self.inductance / h
    }

    /// Get the equivalent voltage source value for the companion model.
    pub fn voltage_source(&self, h: f64, prev: ReactiveState) -> f64 {
        -(self.resistance(h) * prev.current + prev.voltage)
    }

    /// Stamp at a DC or transient evaluation point.
    pub fn stamp(&self, ctx: &EvalContext<'_>) -> Stamp<f64> {
        let mut stamp = Stamp::new();
        stamp.branch_incidence(self.nodes[0], self.nodes[1], self.branch);
        if let ReactiveMode::Trapezoidal { step, history } = ctx.reactive {
            let prev = history[self.id.0];
            stamp.add(self.branch, self.branch, -self.resistance(step));
            stamp.add_source(self.branch, self.voltage_source(step, prev));
        }
        stamp
    }

    /// Branch impedance jwL.
    pub fn ac_stamp(&self, ctx: &AcContext<'_>) -> Stamp<Complex64> {
        let mut stamp = Stamp::new();
        stamp.branch_incidence(self.nodes[0], self.nodes[1], self.branch);
        stamp.add(self.branch, self.branch, -(ctx.jw() * self.inductance));
        stamp
    }

    /// State after an accepted step.
    pub fn update_state(&self, v_new: f64, i_new: f64) -> ReactiveState {
        ReactiveState {
            voltage: v_new,
            current: i_new,
        }
    }
}

impl From<Resistor> for Component {
    fn from(r: Resistor) -> Self {
        Component::Resistor(r)
    }
}

impl From<Capacitor> for Component {
    fn from(c: Capacitor) -> Self {
        Component::Capacitor(c)
    }
}

impl From<Inductor> for Component {
    fn from(l: Inductor) -> Self {
        Component::Inductor(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_resistor_conductance() {
        let r = Resistor::new(ComponentId(0), "R1".to_string(), [NodeId(1), NodeId(0)], 1000.0).unwrap();
        assert!((r.conductance() - 0.001).abs() < 1e-10);
    }

    #[test]
    fn test_non_positive_values_rejected() {
        let r = Resistor::new(ComponentId(0), "R1".to_string(), [NodeId(1), NodeId(0)], 0.0);
        assert!(matches!(r, Err(SimError::InvalidParameter { .. })));
        let c = Capacitor::new(ComponentId(0), "C1".to_string(), [NodeId(1), NodeId(0)], -1e-6);
        assert!(matches!(c, Err(SimError::InvalidParameter { .. })));
        let l = Inductor::new(ComponentId(0), "L1".to_string(), [NodeId(1), NodeId(0)], f64::NAN, BranchId(0));
        assert!(matches!(l, Err(SimError::InvalidParameter { .. })));
    }

    #[test]
    fn test_capacitor_companion_model() {
        let c = Capacitor::new(
            ComponentId(0),
            "C1".to_string(),
            [NodeId(1), NodeId(0)],
            1e-6, // 1uF
        )
        .unwrap();
        let h = 1.0 / 48000.0;
        let g = c.conductance(h);

        // G_eq = 2C/h = 2 * 1e-6 / (1/48000) = 96 mS
        assert!((g - 0.096).abs() < 1e-6);

        // Initial current source should be 0
        let rest = ReactiveState::default();
        assert!((c.current_source(h, rest)).abs() < 1e-10);

        // Update state with 1V across cap
        let next = c.update_state(rest, 1.0, h);
        assert!((next.voltage - 1.0).abs() < 1e-10);
        assert!((next.current - 0.096).abs() < 1e-9);
    }

    #[test]
    fn test_capacitor_open_at_dc() {
        let c = Capacitor::new(ComponentId(0), "C1".to_string(), [NodeId(1), NodeId(0)], 1e-6).unwrap();
        let x = [5.0];
        let ctx = EvalContext::dc(&x, 2);
        assert!(c.stamp(&ctx).matrix.is_empty());
        assert_eq!(c.current(&ctx), 0.0);
    }
}
