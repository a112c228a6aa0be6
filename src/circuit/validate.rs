//! Circuit validation.

use std::collections::HashSet;

use crate::error::{Result, SimError};

use super::{Circuit, NodeId};

/// Validate a circuit for simulation.
///
/// Checks:
/// - The circuit has at least one component
/// - Component names are unique
/// - Every terminal references an existing node
/// - Every node has a DC path to ground
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.components.is_empty() {
        return Err(SimError::invalid_topology("circuit has no components"));
    }

    let mut names = HashSet::new();
    for component in &circuit.components {
        if !names.insert(component.name()) {
            return Err(SimError::DuplicateComponent {
                name: component.name().to_string(),
            });
        }
        if let Some(node) = component.nodes().iter().find(|n| n.0 >= circuit.num_nodes) {
            return Err(SimError::NodeNotFound { node: node.to_string() });
        }
    }

    if let Some(node) = floating_nodes(circuit).first() {
        return Err(SimError::FloatingNode {
            node: circuit.node_name(*node).to_string(),
        });
    }

    Ok(())
}

/// Nodes with no DC-conducting path to ground, in node order.
///
/// Capacitors, current sources and the outputs of controlled current
/// sources do not conduct at DC.
pub fn floating_nodes(circuit: &Circuit) -> Vec<NodeId> {
    let mut sets = DisjointSet::new(circuit.num_nodes);
    for component in &circuit.components {
        for (a, b) in component.dc_paths() {
            sets.union(a.0, b.0);
        }
    }
    let ground = sets.find(NodeId::GROUND.0);
    (1..circuit.num_nodes)
        .filter(|&n| sets.find(n) != ground)
        .map(NodeId)
        .collect()
}

/// Union-find over node indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
