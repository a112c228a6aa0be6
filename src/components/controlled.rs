//! Linear controlled sources: VCVS, VCCS, CCCS, CCVS.
//!
//! Current-controlled sources sense the branch current of an independent
//! voltage source, resolved to its [`BranchId`] when the circuit is built.

use super::stamp::{EvalContext, Stamp};
use super::{require_finite, Component};
use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::error::Result;
use crate::solver::Scalar;

/// Voltage-controlled voltage source.
/// V[out+] - V[out-] = gain * (V[ctrl+] - V[ctrl-])
#[derive(Debug, Clone, PartialEq)]
pub struct Vcvs {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 4], // [out+, out-, ctrl+, ctrl-]
    pub gain: f64,
    pub branch: BranchId,
}

impl Vcvs {
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 4], gain: f64, branch: BranchId) -> Result<Self> {
        require_finite(&name, "gain", gain)?;
        Ok(Self {
            id,
            name,
            nodes,
            gain,
            branch,
        })
    }

    pub fn stamp_into<T: Scalar>(&self, stamp: &mut Stamp<T>) {
        let [op, on, cp, cn] = self.nodes;
        // Output voltage constraint
        stamp.branch_incidence(op, on, self.branch);
        // Control voltage contribution
        let gain = T::from_real(self.gain);
        stamp.add(self.branch, cp, -gain);
        stamp.add(self.branch, cn, gain);
    }
}

/// Voltage-controlled current source.
/// I(out+ -> out-) = gm * (V[ctrl+] - V[ctrl-])
#[derive(Debug, Clone, PartialEq)]
pub struct Vccs {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 4], // [out+, out-, ctrl+, ctrl-]
    pub transconductance: f64,
}

impl Vccs {
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 4], transconductance: f64) -> Result<Self> {
        require_finite(&name, "transconductance", transconductance)?;
        Ok(Self {
            id,
            name,
            nodes,
            transconductance,
        })
    }

    pub fn stamp_into<T: Scalar>(&self, stamp: &mut Stamp<T>) {
        let [op, on, cp, cn] = self.nodes;
        stamp.vccs(op, on, cp, cn, T::from_real(self.transconductance));
    }

    /// Output current at the evaluation point.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        self.transconductance * (ctx.voltage(self.nodes[2]) - ctx.voltage(self.nodes[3]))
    }
}

/// Current-controlled current source.
/// I(out+ -> out-) = gain * I(control)
#[derive(Debug, Clone, PartialEq)]
pub struct Cccs {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [out+, out-]
    pub control: String,
    pub control_branch: BranchId,
    pub gain: f64,
}

impl Cccs {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        control: String,
        control_branch: BranchId,
        gain: f64,
    ) -> Result<Self> {
        require_finite(&name, "gain", gain)?;
        Ok(Self {
            id,
            name,
            nodes,
            control,
            control_branch,
            gain,
        })
    }

    pub fn stamp_into<T: Scalar>(&self, stamp: &mut Stamp<T>) {
        let gain = T::from_real(self.gain);
        stamp.add(self.nodes[0], self.control_branch, gain);
        stamp.add(self.nodes[1], self.control_branch, -gain);
    }

    /// Output current at the evaluation point.
    pub fn current(&self, ctx: &EvalContext<'_>) -> f64 {
        self.gain * ctx.current(self.control_branch)
    }
}

/// Current-controlled voltage source.
/// V[out+] - V[out-] = transresistance * I(control)
#[derive(Debug, Clone, PartialEq)]
pub struct Ccvs {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [out+, out-]
    pub control: String,
    pub control_branch: BranchId,
    pub transresistance: f64,
    pub branch: BranchId,
}

impl Ccvs {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        control: String,
        control_branch: BranchId,
        transresistance: f64,
        branch: BranchId,
    ) -> Result<Self> {
        require_finite(&name, "transresistance", transresistance)?;
        Ok(Self {
            id,
            name,
            nodes,
            control,
            control_branch,
            transresistance,
            branch,
        })
    }

    pub fn stamp_into<T: Scalar>(&self, stamp: &mut Stamp<T>) {
        stamp.branch_incidence(self.nodes[0], self.nodes[1], self.branch);
        stamp.add(self.branch, self.control_branch, -T::from_real(self.transresistance));
    }
}

impl From<Vcvs> for Component {
    fn from(e: Vcvs) -> Self {
        Component::Vcvs(e)
    }
}

impl From<Vccs> for Component {
    fn from(g: Vccs) -> Self {
        Component::Vccs(g)
    }
}

impl From<Cccs> for Component {
    fn from(f: Cccs) -> Self {
        Component::Cccs(f)
    }
}

impl From<Ccvs> for Component {
    fn from(h: Ccvs) -> Self {
        Component::Ccvs(h)
    }
}
