//! Core types for circuit representation.

use std::fmt;

/// A unique identifier for a node in the circuit.
/// Node 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

/// A unique identifier for a component in the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Index for extra variables in the MNA matrix (e.g., voltage source currents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub usize);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Variable index in the MNA solution vector.
/// Can be either a node voltage or a branch current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarIndex {
    /// Node voltage variable
    Voltage(NodeId),
    /// Branch current variable (for voltage sources, inductors)
    Current(BranchId),
}

impl VarIndex {
    /// Get the raw index into the solution vector, or `None` for ground.
    /// Node voltages come first (excluding ground), then branch currents.
    pub fn to_index(&self, num_nodes: usize) -> Option<usize> {
        match self {
            // Node 0 (ground) is not in the matrix, so subtract 1
            VarIndex::Voltage(NodeId(0)) => None,
            VarIndex::Voltage(NodeId(n)) => Some(n - 1),
            // Branch currents come after node voltages
            VarIndex::Current(BranchId(b)) => Some((num_nodes - 1) + b),
        }
    }
}

impl From<NodeId> for VarIndex {
    fn from(node: NodeId) -> Self {
        VarIndex::Voltage(node)
    }
}

impl From<BranchId> for VarIndex {
    fn from(branch: BranchId) -> Self {
        VarIndex::Current(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_index_layout() {
        // 3 nodes including ground -> 2 voltage rows, branches start at 2
        assert_eq!(VarIndex::Voltage(NodeId::GROUND).to_index(3), None);
        assert_eq!(VarIndex::Voltage(NodeId(1)).to_index(3), Some(0));
        assert_eq!(VarIndex::Voltage(NodeId(2)).to_index(3), Some(1));
        assert_eq!(VarIndex::Current(BranchId(0)).to_index(3), Some(2));
        assert_eq!(VarIndex::Current(BranchId(3)).to_index(3), Some(5));
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::GROUND.to_string(), "GND");
        assert_eq!(NodeId(4).to_string(), "N4");
        assert_eq!(BranchId(1).to_string(), "I1");
    }
}
