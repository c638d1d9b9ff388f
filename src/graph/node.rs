//! Node and clock descriptions.
//!
//! A node is a vertex of the simulated pipeline graph (a pipeline stage, a
//! cache, a queue...). Nodes may declare a multi-dimensional layout of
//! occupancy slots; a [`NodeSlot`] addresses one of them.

use serde::{Deserialize, Serialize};

use crate::types::{ClockId, Cycle, NodeId};

/// A coordinate tuple addressing one slot (or a prefix of dimensions) of a node.
pub type NodeSlot = Vec<u32>;

/// Static description of a topology node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Node name; not unique on its own
    pub name: String,
    /// Parent node id (0 for top-level nodes)
    pub parent: NodeId,
    /// Disambiguates nodes sharing a name
    pub instance: u16,
    /// Slot count per dimension; empty until a layout is set
    pub layout: Vec<u32>,
    /// Items accepted per cycle
    pub input_bandwidth: u32,
    /// Items emitted per cycle
    pub output_bandwidth: u32,
    /// Clock domain, if declared
    pub clock: Option<ClockId>,
    /// Highest occupancy announced by the producer
    pub high_water_mark: u64,
}

impl DbNode {
    /// Creates a new node without layout.
    pub fn new(id: NodeId, name: impl Into<String>, parent: NodeId, instance: u16) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            instance,
            layout: Vec::new(),
            input_bandwidth: 0,
            output_bandwidth: 0,
            clock: None,
            high_water_mark: 0,
        }
    }

    /// Sets the layout of this node description.
    pub fn with_layout(mut self, layout: Vec<u32>) -> Self {
        self.layout = layout;
        self
    }

    /// Returns the lookup key `name{instance}`.
    pub fn key(&self) -> String {
        node_key(&self.name, self.instance)
    }

    /// Returns the number of layout dimensions.
    pub fn dims(&self) -> usize {
        self.layout.len()
    }

    /// Returns the total slot count (product of all dimensions).
    pub fn capacity(&self) -> u64 {
        self.layout.iter().map(|&c| c as u64).product()
    }

    /// Returns true if `slot` addresses a slot or a dimension prefix of this node.
    pub fn contains_slot(&self, slot: &[u32]) -> bool {
        slot.len() <= self.layout.len() && slot.iter().zip(&self.layout).all(|(p, c)| p < c)
    }

    /// Linearizes a full slot coordinate, row-major.
    ///
    /// Returns `None` unless `slot` has exactly one coordinate per dimension
    /// and every coordinate is in range.
    pub fn slot_index(&self, slot: &[u32]) -> Option<u64> {
        if slot.len() != self.layout.len() || !self.contains_slot(slot) {
            return None;
        }
        Some(
            slot.iter()
                .zip(&self.layout)
                .fold(0u64, |acc, (&p, &c)| acc * c as u64 + p as u64),
        )
    }

    /// Inverse of [`DbNode::slot_index`].
    pub fn slot_at(&self, mut index: u64) -> Option<NodeSlot> {
        if self.layout.is_empty() || index >= self.capacity() {
            return None;
        }
        let mut slot = vec![0u32; self.layout.len()];
        for (dim, &cap) in self.layout.iter().enumerate().rev() {
            slot[dim] = (index % cap as u64) as u32;
            index /= cap as u64;
        }
        Some(slot)
    }

    /// Returns the canonical slotted name, e.g. `L1{0}[1,2]`.
    pub fn slotted_name(&self, slot: &[u32]) -> String {
        slotted_name(&self.name, self.instance, slot)
    }
}

/// Formats the lookup key of a node.
pub fn node_key(name: &str, instance: u16) -> String {
    format!("{}{{{}}}", name, instance)
}

/// Formats the canonical name of a node slot.
///
/// An empty slot yields the bare node key.
pub fn slotted_name(name: &str, instance: u16, slot: &[u32]) -> String {
    let mut key = node_key(name, instance);
    if !slot.is_empty() {
        let coords: Vec<String> = slot.iter().map(|p| p.to_string()).collect();
        key.push('[');
        key.push_str(&coords.join(","));
        key.push(']');
    }
    key
}

/// A clock domain declared by the producer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbClock {
    /// Clock identifier
    pub id: ClockId,
    /// Frequency in the producer's units
    pub frequency: u64,
    /// Skew relative to the base clock
    pub skew: u16,
    /// Phase divisions per cycle
    pub divisions: u16,
    /// Clock name
    pub name: String,
    /// Latest cycle announced for this clock
    pub cycle: Cycle,
    /// Latest phase announced for this clock
    pub phase: u8,
}

impl DbClock {
    /// Creates a clock at cycle 0.
    pub fn new(id: ClockId, frequency: u64, skew: u16, divisions: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            frequency,
            skew,
            divisions,
            name: name.into(),
            cycle: 0,
            phase: 0,
        }
    }
}
