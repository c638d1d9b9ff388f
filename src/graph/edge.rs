//! Edge definitions.
//!
//! Edges are directed connections between two nodes. Items travel across an
//! edge through `bandwidth` parallel lanes and arrive `latency` cycles later.
//!
//! # Example
//!
//! ```
//! use dralkit::graph::DbEdge;
//!
//! let edge = DbEdge::new(2, 1, 3, "ring").with_bandwidth(2).with_latency(1);
//! assert!(edge.connects(1, 3));
//! assert_eq!(edge.arrival_cycle(100), 101);
//! assert!(edge.lane_in_range(1));
//! assert!(!edge.lane_in_range(2));
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Cycle, EdgeId, NodeId};

/// Static description of a topology edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbEdge {
    /// Edge identifier
    pub id: EdgeId,
    /// Source node
    pub src: NodeId,
    /// Destination node
    pub dst: NodeId,
    /// Parallel lanes (items per cycle)
    pub bandwidth: u32,
    /// Transit time in cycles
    pub latency: u32,
    /// Edge name
    pub name: String,
}

impl DbEdge {
    /// Creates an edge with bandwidth 1 and latency 1.
    pub fn new(id: EdgeId, src: NodeId, dst: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            src,
            dst,
            bandwidth: 1,
            latency: 1,
            name: name.into(),
        }
    }

    /// Sets the bandwidth of this edge.
    pub fn with_bandwidth(mut self, bandwidth: u32) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Sets the latency of this edge.
    pub fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }

    /// Cycle at which an item moved at `cycle` reaches the destination.
    #[inline]
    pub fn arrival_cycle(&self, cycle: Cycle) -> Cycle {
        cycle + self.latency as Cycle
    }

    /// Checks if this edge connects the given node pair.
    #[inline]
    pub fn connects(&self, src: NodeId, dst: NodeId) -> bool {
        self.src == src && self.dst == dst
    }

    /// Returns true if this is a self-loop.
    #[inline]
    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }

    /// Returns true if `lane` is a valid position on this edge.
    #[inline]
    pub fn lane_in_range(&self, lane: u32) -> bool {
        lane < self.bandwidth
    }

    /// Returns the canonical slotted name of one lane, e.g. `ring(2)@0`.
    pub fn slotted_name(&self, lane: u32) -> String {
        format!("{}({})@{}", self.name, self.id, lane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_builder() {
        let edge = DbEdge::new(7, 1, 2, "fetch2decode")
            .with_bandwidth(4)
            .with_latency(3);
        assert_eq!(edge.bandwidth, 4);
        assert_eq!(edge.latency, 3);
        assert_eq!(edge.arrival_cycle(10), 13);
        assert_eq!(edge.slotted_name(3), "fetch2decode(7)@3");
    }

    #[test]
    fn test_edge_helpers() {
        let edge = DbEdge::new(1, 1, 2, "e");
        assert!(edge.connects(1, 2));
        assert!(!edge.connects(2, 1));
        assert!(!edge.is_self_loop());
        assert!(DbEdge::new(2, 5, 5, "loop").is_self_loop());
    }

    #[test]
    fn test_edge_serialization() {
        let edge = DbEdge::new(3, 1, 2, "e").with_bandwidth(8);
        let json = serde_json::to_string(&edge).unwrap();
        let restored: DbEdge = serde_json::from_str(&json).unwrap();
        assert_eq!(edge, restored);
    }
}
