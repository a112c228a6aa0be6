//! Circuit graph structure.

use std::collections::HashMap;

use super::types::{BranchId, ComponentId, NodeId};
use super::validate::validate_circuit;
use crate::components::{
    AcSpec, Bjt, BjtParams, BjtType, Capacitor, Cccs, Ccvs, Component, CurrentSource, Diode, DiodeParams, Inductor,
    Resistor, Vccs, Vcvs, VoltageSource, Waveform,
};
use crate::error::{Result, SimError};

/// Node names that always refer to ground (compared case-insensitively).
pub const GROUND_NAMES: [&str; 2] = ["0", "gnd"];

/// A complete circuit ready for simulation.
///
/// A `Circuit` is an immutable snapshot: analyses only read it, and
/// parameter substitution returns a new circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Circuit {
    /// All components in the circuit, indexed by `ComponentId`
    pub components: Vec<Component>,

    /// Mapping from node names to node IDs
    pub node_map: HashMap<String, NodeId>,

    /// Reverse mapping from node IDs to names (for error messages)
    pub node_names: Vec<String>,

    /// Number of nodes (including ground)
    pub num_nodes: usize,

    /// Number of branch current variables (voltage sources, inductors, VCVS, CCVS)
    pub num_branches: usize,

    /// Components incident to each node
    pub adjacency: Vec<Vec<ComponentId>>,
}

impl Circuit {
    /// Get the total size of the MNA solution vector.
    pub fn matrix_size(&self) -> usize {
        // Nodes (excluding ground) + branch currents
        (self.num_nodes - 1) + self.num_branches
    }

    /// Find a node ID by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        if is_ground_name(name) {
            return Some(NodeId::GROUND);
        }
        self.node_map.get(name).copied()
    }

    /// Find a node ID by name, failing with `NodeNotFound`.
    pub fn node(&self, name: &str) -> Result<NodeId> {
        self.find_node(name).ok_or_else(|| SimError::NodeNotFound { node: name.to_string() })
    }

    /// Get the name of a node.
    pub fn node_name(&self, node: NodeId) -> &str {
        &self.node_names[node.0]
    }

    /// Find a component by name.
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Find a component by name, failing with `UnknownComponent`.
    pub fn component(&self, name: &str) -> Result<&Component> {
        self.find_component(name)
            .ok_or_else(|| SimError::UnknownComponent { name: name.to_string() })
    }

    /// Components attached to a node.
    pub fn incident(&self, node: NodeId) -> &[ComponentId] {
        &self.adjacency[node.0]
    }

    /// True if any component needs Newton-Raphson iteration.
    pub fn is_nonlinear(&self) -> bool {
        self.components.iter().any(|c| c.is_nonlinear())
    }

    /// Sorted, de-duplicated source breakpoints in `(0, stop]`.
    pub fn breakpoints(&self, stop: f64) -> Vec<f64> {
        let mut points: Vec<f64> = self.components.iter().flat_map(|c| c.breakpoints(stop)).collect();
        points.sort_by(f64::total_cmp);
        points.dedup_by(|a, b| (*a - *b).abs() <= 1e-15 * b.abs().max(1.0));
        points
    }

    /// New snapshot with one component parameter substituted.
    pub fn with_parameter(&self, component: &str, param: &str, value: f64) -> Result<Circuit> {
        let index = self
            .components
            .iter()
            .position(|c| c.name() == component)
            .ok_or_else(|| SimError::UnknownComponent {
                name: component.to_string(),
            })?;
        let mut circuit = self.clone();
        circuit.components[index] = self.components[index].with_parameter(param, value)?;
        Ok(circuit)
    }
}

fn is_ground_name(name: &str) -> bool {
    GROUND_NAMES.iter().any(|g| g.eq_ignore_ascii_case(name))
}

impl Default for CircuitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental construction of a [`Circuit`].
///
/// Nodes are created on first reference. Current-controlled sources must
/// name a voltage source that was added before them.
#[derive(Debug)]
pub struct CircuitBuilder {
    node_map: HashMap<String, NodeId>,
    node_names: Vec<String>,
    ground_aliases: Vec<String>,
    components: Vec<Component>,
    component_names: HashMap<String, ComponentId>,
    num_branches: usize,
}

impl CircuitBuilder {
    /// Create an empty builder containing only the ground node.
    pub fn new() -> Self {
        Self {
            node_map: HashMap::new(),
            node_names: vec!["0".to_string()],
            ground_aliases: Vec::new(),
            components: Vec::new(),
            component_names: HashMap::new(),
            num_branches: 0,
        }
    }

    /// Flag an extra node name as ground.
    pub fn ground_alias(mut self, name: &str) -> Self {
        self.ground_aliases.push(name.to_string());
        self
    }

    /// Resolve a node name, creating the node if needed.
    pub fn node(&mut self, name: &str) -> NodeId {
        if is_ground_name(name) || self.ground_aliases.iter().any(|a| a == name) {
            return NodeId::GROUND;
        }
        if let Some(&id) = self.node_map.get(name) {
            return id;
        }
        let id = NodeId(self.node_names.len());
        self.node_map.insert(name.to_string(), id);
        self.node_names.push(name.to_string());
        id
    }

    fn next_id(&self, name: &str) -> Result<ComponentId> {
        if self.component_names.contains_key(name) {
            return Err(SimError::DuplicateComponent { name: name.to_string() });
        }
        Ok(ComponentId(self.components.len()))
    }

    fn next_branch(&mut self) -> BranchId {
        let branch = BranchId(self.num_branches);
        self.num_branches += 1;
        branch
    }

    fn push(&mut self, component: impl Into<Component>) -> ComponentId {
        let component = component.into();
        let id = component.id();
        self.component_names.insert(component.name().to_string(), id);
        self.components.push(component);
        id
    }

    /// Forget nodes created after `mark` when a component fails to build.
    fn rollback_on_err<T>(&mut self, mark: usize, built: Result<T>) -> Result<T> {
        if built.is_err() {
            for name in self.node_names.drain(mark..) {
                self.node_map.remove(&name);
            }
        }
        built
    }

    fn control_branch(&self, control: &str) -> Result<BranchId> {
        match self
            .component_names
            .get(control)
            .map(|id| &self.components[id.0])
        {
            Some(Component::VoltageSource(v)) => Ok(v.branch),
            _ => Err(SimError::UnknownComponent {
                name: control.to_string(),
            }),
        }
    }

    /// Add a resistor between `n1` and `n2`.
    pub fn add_resistor(&mut self, name: &str, n1: &str, n2: &str, resistance: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n1), self.node(n2)];
        let r = self.rollback_on_err(mark, Resistor::new(id, name.to_string(), nodes, resistance))?;
        Ok(self.push(r))
    }

    /// Add a capacitor between `n1` and `n2`.
    pub fn add_capacitor(&mut self, name: &str, n1: &str, n2: &str, capacitance: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n1), self.node(n2)];
        let c = self.rollback_on_err(mark, Capacitor::new(id, name.to_string(), nodes, capacitance))?;
        Ok(self.push(c))
    }

    /// Add an inductor between `n1` and `n2`.
    pub fn add_inductor(&mut self, name: &str, n1: &str, n2: &str, inductance: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n1), self.node(n2)];
        let branch = BranchId(self.num_branches);
        let l = self.rollback_on_err(mark, Inductor::new(id, name.to_string(), nodes, inductance, branch))?;
        self.next_branch();
        Ok(self.push(l))
    }

    /// Add an independent voltage source, V(n_pos) - V(n_neg) = waveform(t).
    pub fn add_voltage_source(
        &mut self,
        name: &str,
        n_pos: &str,
        n_neg: &str,
        waveform: Waveform,
    ) -> Result<ComponentId> {
        self.add_source_with_ac(name, n_pos, n_neg, waveform, None)
    }

    /// Add a voltage source with a DC value and an AC excitation.
    pub fn add_ac_voltage_source(
        &mut self,
        name: &str,
        n_pos: &str,
        n_neg: &str,
        dc: f64,
        ac: AcSpec,
    ) -> Result<ComponentId> {
        self.add_source_with_ac(name, n_pos, n_neg, Waveform::Dc(dc), Some(ac))
    }

    fn add_source_with_ac(
        &mut self,
        name: &str,
        n_pos: &str,
        n_neg: &str,
        waveform: Waveform,
        ac: Option<AcSpec>,
    ) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n_pos), self.node(n_neg)];
        let branch = BranchId(self.num_branches);
        let v = self.rollback_on_err(mark, VoltageSource::new(id, name.to_string(), nodes, waveform, ac, branch))?;
        self.next_branch();
        Ok(self.push(v))
    }

    /// Add an independent current source; current flows through it from
    /// `n_pos` to `n_neg`.
    pub fn add_current_source(
        &mut self,
        name: &str,
        n_pos: &str,
        n_neg: &str,
        waveform: Waveform,
        ac: Option<AcSpec>,
    ) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n_pos), self.node(n_neg)];
        let i = self.rollback_on_err(mark, CurrentSource::new(id, name.to_string(), nodes, waveform, ac))?;
        Ok(self.push(i))
    }

    /// Add a voltage-controlled voltage source.
    pub fn add_vcvs(&mut self, name: &str, nodes: [&str; 4], gain: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = nodes.map(|n| self.node(n));
        let branch = BranchId(self.num_branches);
        let e = self.rollback_on_err(mark, Vcvs::new(id, name.to_string(), nodes, gain, branch))?;
        self.next_branch();
        Ok(self.push(e))
    }

    /// Add a voltage-controlled current source.
    pub fn add_vccs(&mut self, name: &str, nodes: [&str; 4], transconductance: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = nodes.map(|n| self.node(n));
        let g = self.rollback_on_err(mark, Vccs::new(id, name.to_string(), nodes, transconductance))?;
        Ok(self.push(g))
    }

    /// Add a current-controlled current source sensing voltage source `control`.
    pub fn add_cccs(&mut self, name: &str, n_pos: &str, n_neg: &str, control: &str, gain: f64) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let control_branch = self.control_branch(control)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n_pos), self.node(n_neg)];
        let f = self.rollback_on_err(mark, Cccs::new(id, name.to_string(), nodes, control.to_string(), control_branch, gain))?;
        Ok(self.push(f))
    }

    /// Add a current-controlled voltage source sensing voltage source `control`.
    pub fn add_ccvs(
        &mut self,
        name: &str,
        n_pos: &str,
        n_neg: &str,
        control: &str,
        transresistance: f64,
    ) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let control_branch = self.control_branch(control)?;
        let mark = self.node_names.len();
        let nodes = [self.node(n_pos), self.node(n_neg)];
        let branch = BranchId(self.num_branches);
        let h = self.rollback_on_err(mark, Ccvs::new(
            id,
            name.to_string(),
            nodes,
            control.to_string(),
            control_branch,
            transresistance,
            branch,
        ))?;
        self.next_branch();
        Ok(self.push(h))
    }

    /// Add a diode from `anode` to `cathode`.
    pub fn add_diode(&mut self, name: &str, anode: &str, cathode: &str, params: DiodeParams) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = [self.node(anode), self.node(cathode)];
        let d = self.rollback_on_err(mark, Diode::new(id, name.to_string(), nodes, params))?;
        Ok(self.push(d))
    }

    /// Add a BJT with terminals `[collector, base, emitter]`.
    pub fn add_bjt(
        &mut self,
        name: &str,
        terminals: [&str; 3],
        bjt_type: BjtType,
        params: BjtParams,
    ) -> Result<ComponentId> {
        let id = self.next_id(name)?;
        let mark = self.node_names.len();
        let nodes = terminals.map(|n| self.node(n));
        let q = self.rollback_on_err(mark, Bjt::new(id, name.to_string(), nodes, bjt_type, params))?;
        Ok(self.push(q))
    }

    /// Finish construction and validate the topology.
    pub fn build(self) -> Result<Circuit> {
        let num_nodes = self.node_names.len();
        let mut adjacency = vec![Vec::new(); num_nodes];
        for component in &self.components {
            let mut nodes = component.nodes().to_vec();
            nodes.sort();
            nodes.dedup();
            for node in nodes {
                adjacency[node.0].push(component.id());
            }
        }

        let circuit = Circuit {
            components: self.components,
            node_map: self.node_map,
            node_names: self.node_names,
            num_nodes,
            num_branches: self.num_branches,
            adjacency,
        };
        validate_circuit(&circuit)?;
        Ok(circuit)
    }
}
