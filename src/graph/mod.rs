//! Graph topology store.
//!
//! Holds the nodes, edges and clocks announced by a trace, indexed by id
//! (dense lookup through [`SegmentedVec`]) and nodes additionally by their
//! `name{instance}` key.

pub mod edge;
pub mod node;

use std::collections::HashMap;

use crate::error::GraphError;
use crate::segvec::SegmentedVec;
use crate::types::{ClockId, Cycle, EdgeId, NodeId};

pub use edge::DbEdge;
pub use node::{node_key, slotted_name, DbClock, DbNode, NodeSlot};

/// Nodes, edges and clocks of one trace.
#[derive(Clone, Debug, Default)]
pub struct DbGraph {
    nodes: SegmentedVec<Option<DbNode>>,
    node_keys: HashMap<String, NodeId>,
    edges: SegmentedVec<Option<DbEdge>>,
    edge_lookup: HashMap<(NodeId, NodeId), Vec<EdgeId>>,
    clocks: HashMap<ClockId, DbClock>,
    node_count: usize,
    edge_count: usize,
}

impl DbGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- mutation ----

    /// Adds a node. Fails if the id or the `name{instance}` key already exists.
    pub fn add_node(&mut self, id: NodeId, name: &str, parent: NodeId, instance: u16) -> Result<(), GraphError> {
        if self.node(id).is_some() {
            return Err(GraphError::DuplicateNode(id));
        }
        let key = node_key(name, instance);
        if self.node_keys.contains_key(&key) {
            return Err(GraphError::DuplicateNodeName(key));
        }
        self.nodes.set(id as usize, Some(DbNode::new(id, name, parent, instance)));
        self.node_keys.insert(key, id);
        self.node_count += 1;
        Ok(())
    }

    /// Adds an edge. Fails if the id already exists.
    ///
    /// Endpoints are not required to be declared yet.
    pub fn add_edge(
        &mut self,
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        bandwidth: u32,
        latency: u32,
        name: &str,
    ) -> Result<(), GraphError> {
        if self.edge(id).is_some() {
            return Err(GraphError::DuplicateEdge(id));
        }
        let edge = DbEdge::new(id, src, dst, name)
            .with_bandwidth(bandwidth)
            .with_latency(latency);
        self.edges.set(id as usize, Some(edge));
        self.edge_lookup.entry((src, dst)).or_default().push(id);
        self.edge_count += 1;
        Ok(())
    }

    /// Fixes the per-dimension slot capacities of a node.
    pub fn set_node_layout(&mut self, id: NodeId, capacities: &[u32]) -> Result<(), GraphError> {
        if capacities.is_empty() || capacities.iter().any(|&c| c == 0) {
            return Err(GraphError::InvalidLayout {
                node: id,
                reason: format!("capacities {:?} must be non-empty and positive", capacities),
            });
        }
        let node = self.node_mut(id)?;
        node.layout = capacities.to_vec();
        Ok(())
    }

    /// Sets the input bandwidth of a node.
    pub fn set_input_bandwidth(&mut self, id: NodeId, bandwidth: u32) -> Result<(), GraphError> {
        self.node_mut(id)?.input_bandwidth = bandwidth;
        Ok(())
    }

    /// Sets the output bandwidth of a node.
    pub fn set_output_bandwidth(&mut self, id: NodeId, bandwidth: u32) -> Result<(), GraphError> {
        self.node_mut(id)?.output_bandwidth = bandwidth;
        Ok(())
    }

    /// Records the occupancy high-water mark of a node.
    pub fn set_high_water_mark(&mut self, id: NodeId, mark: u64) -> Result<(), GraphError> {
        self.node_mut(id)?.high_water_mark = mark;
        Ok(())
    }

    /// Declares a clock domain.
    pub fn add_clock(&mut self, clock: DbClock) -> Result<(), GraphError> {
        if self.clocks.contains_key(&clock.id) {
            return Err(GraphError::DuplicateClock(clock.id));
        }
        self.clocks.insert(clock.id, clock);
        Ok(())
    }

    /// Assigns a clock domain to a node.
    pub fn set_node_clock(&mut self, id: NodeId, clock: ClockId) -> Result<(), GraphError> {
        if !self.clocks.contains_key(&clock) {
            return Err(GraphError::UnknownClock(clock));
        }
        self.node_mut(id)?.clock = Some(clock);
        Ok(())
    }

    /// Advances the cycle and phase of a clock domain.
    pub fn advance_clock(&mut self, clock: ClockId, cycle: Cycle, phase: u8) -> Result<(), GraphError> {
        let entry = self.clocks.get_mut(&clock).ok_or(GraphError::UnknownClock(clock))?;
        entry.cycle = cycle;
        entry.phase = phase;
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut DbNode, GraphError> {
        self.nodes
            .get_mut(id as usize)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::UnknownNode(id))
    }

    // ---- queries ----

    /// Looks up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&DbNode> {
        self.nodes.get(id as usize).and_then(|n| n.as_ref())
    }

    /// Looks up a node by name and instance.
    pub fn node_by_name(&self, name: &str, instance: u16) -> Option<&DbNode> {
        self.node_by_key(&node_key(name, instance))
    }

    /// Looks up a node by its `name{instance}` key.
    pub fn node_by_key(&self, key: &str) -> Option<&DbNode> {
        self.node_keys.get(key).and_then(|&id| self.node(id))
    }

    /// Looks up an edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&DbEdge> {
        self.edges.get(id as usize).and_then(|e| e.as_ref())
    }

    /// Returns all edges from `src` to `dst`.
    pub fn edges_between(&self, src: NodeId, dst: NodeId) -> Vec<&DbEdge> {
        self.edge_lookup
            .get(&(src, dst))
            .map(|ids| ids.iter().filter_map(|&id| self.edge(id)).collect())
            .unwrap_or_default()
    }

    /// Looks up a clock by id.
    pub fn clock(&self, id: ClockId) -> Option<&DbClock> {
        self.clocks.get(&id)
    }

    /// Returns the total slot capacity of a node.
    pub fn capacity(&self, id: NodeId) -> Option<u64> {
        self.node(id).map(DbNode::capacity)
    }

    /// Returns the input bandwidth of a node.
    pub fn input_bandwidth(&self, id: NodeId) -> Option<u32> {
        self.node(id).map(|n| n.input_bandwidth)
    }

    /// Returns the output bandwidth of a node.
    pub fn output_bandwidth(&self, id: NodeId) -> Option<u32> {
        self.node(id).map(|n| n.output_bandwidth)
    }

    /// Returns the bandwidth of an edge.
    pub fn edge_bandwidth(&self, id: EdgeId) -> Option<u32> {
        self.edge(id).map(|e| e.bandwidth)
    }

    /// Returns the latency of an edge.
    pub fn edge_latency(&self, id: EdgeId) -> Option<u32> {
        self.edge(id).map(|e| e.latency)
    }

    /// Returns the canonical name of a node slot, validating it against the layout.
    pub fn slotted_node_name(&self, id: NodeId, slot: &[u32]) -> Result<String, GraphError> {
        let node = self.node(id).ok_or(GraphError::UnknownNode(id))?;
        if !node.contains_slot(slot) {
            return Err(GraphError::SlotOutOfRange {
                node: id,
                slot: slot.to_vec(),
            });
        }
        Ok(node.slotted_name(slot))
    }

    /// Returns the children of a node.
    pub fn children(&self, parent: NodeId) -> Vec<&DbNode> {
        self.nodes()
            .filter(|n| n.parent == parent && n.id != parent)
            .collect()
    }

    /// Iterates over all nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &DbNode> {
        self.nodes.iter().filter_map(|(_, n)| n.as_ref())
    }

    /// Iterates over all edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &DbEdge> {
        self.edges.iter().filter_map(|(_, e)| e.as_ref())
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the number of edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Returns the number of clocks.
    pub fn clock_count(&self) -> usize {
        self.clocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbGraph {
        let mut g = DbGraph::new();
        g.add_node(1, "fetch", 0, 0).unwrap();
        g.add_node(2, "decode", 0, 0).unwrap();
        g.add_node(3, "decode", 0, 1).unwrap();
        g.add_edge(10, 1, 2, 4, 1, "f2d").unwrap();
        g.add_edge(11, 1, 3, 2, 2, "f2d").unwrap();
        g
    }

    // ========== Node Tests ==========

    #[test]
    fn test_add_and_lookup_nodes() {
        let g = sample();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.node(1).map(|n| n.name.as_str()), Some("fetch"));
        assert_eq!(g.node_by_name("decode", 1).map(|n| n.id), Some(3));
        assert_eq!(g.node_by_key("decode{0}").map(|n| n.id), Some(2));
        assert!(g.node(4).is_none());
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let mut g = sample();
        assert_eq!(g.add_node(1, "other", 0, 0), Err(GraphError::DuplicateNode(1)));
        assert_eq!(
            g.add_node(9, "decode", 0, 1),
            Err(GraphError::DuplicateNodeName("decode{1}".to_string()))
        );
        assert!(g.add_node(9, "decode", 0, 2).is_ok());
    }

    #[test]
    fn test_layout_and_capacity() {
        let mut g = sample();
        g.set_node_layout(2, &[4, 2]).unwrap();
        assert_eq!(g.capacity(2), Some(8));
        assert!(g.set_node_layout(2, &[]).is_err());
        assert!(g.set_node_layout(2, &[0]).is_err());
        assert_eq!(g.set_node_layout(42, &[1]), Err(GraphError::UnknownNode(42)));
    }

    #[test]
    fn test_slotted_node_name() {
        let mut g = sample();
        g.set_node_layout(2, &[4, 2]).unwrap();
        assert_eq!(g.slotted_node_name(2, &[3, 1]).unwrap(), "decode{0}[3,1]");
        assert_eq!(g.slotted_node_name(2, &[]).unwrap(), "decode{0}");
        assert!(g.slotted_node_name(2, &[4, 0]).is_err());
        assert!(g.slotted_node_name(1, &[0]).is_err());
    }

    #[test]
    fn test_bandwidths() {
        let mut g = sample();
        g.set_input_bandwidth(2, 4).unwrap();
        g.set_output_bandwidth(2, 3).unwrap();
        assert_eq!(g.input_bandwidth(2), Some(4));
        assert_eq!(g.output_bandwidth(2), Some(3));
        assert_eq!(g.input_bandwidth(77), None);
    }

    // ========== Edge Tests ==========

    #[test]
    fn test_edges() {
        let mut g = sample();
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.edge_bandwidth(10), Some(4));
        assert_eq!(g.edge_latency(11), Some(2));
        assert_eq!(g.edges_between(1, 2).len(), 1);
        assert!(g.edges_between(2, 1).is_empty());
        assert_eq!(
            g.add_edge(10, 1, 2, 1, 1, "dup"),
            Err(GraphError::DuplicateEdge(10))
        );
        // Endpoints may be announced later.
        assert!(g.add_edge(12, 40, 41, 1, 1, "late").is_ok());
    }

    // ========== Clock Tests ==========

    #[test]
    fn test_clocks() {
        let mut g = sample();
        assert_eq!(g.set_node_clock(1, 0), Err(GraphError::UnknownClock(0)));
        g.add_clock(DbClock::new(0, 2_000, 0, 2, "core")).unwrap();
        assert!(g.add_clock(DbClock::new(0, 1, 0, 1, "dup")).is_err());
        g.set_node_clock(1, 0).unwrap();
        assert_eq!(g.node(1).unwrap().clock, Some(0));
        g.advance_clock(0, 55, 1).unwrap();
        assert_eq!(g.clock(0).map(|c| (c.cycle, c.phase)), Some((55, 1)));
    }

    #[test]
    fn test_children() {
        let mut g = DbGraph::new();
        g.add_node(1, "core", 0, 0).unwrap();
        g.add_node(2, "alu", 1, 0).unwrap();
        g.add_node(3, "alu", 1, 1).unwrap();
        let kids: Vec<_> = g.children(1).iter().map(|n| n.id).collect();
        assert_eq!(kids, vec![2, 3]);
    }
}
