//! DRAL event vocabulary and the listener interface.
//!
//! Every wire generation decodes into the same [`DralEvent`] set. Consumers
//! either pull events from the decoder directly or implement
//! [`DralListener`] and let the decoder push them, one callback per event.

use serde::{Deserialize, Serialize};

use crate::types::{ClockId, Cycle, EdgeId, ItemId, NodeId, StrId, TagId, TagValue};

/// A decoded trace event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DralEvent {
    /// Stream preamble; carries the major protocol version.
    Version(u16),
    /// Advances the global cycle.
    Cycle(Cycle),
    /// Advances the cycle of one clock domain.
    CycleWithClock {
        clock_id: ClockId,
        cycle: Cycle,
        phase: u8,
    },
    /// Declares a clock domain.
    NewClock {
        id: ClockId,
        frequency: u64,
        skew: u16,
        divisions: u16,
        name: String,
    },
    /// Assigns a clock domain to a node.
    SetNodeClock { node_id: NodeId, clock_id: ClockId },
    /// Declares a topology node.
    NewNode {
        id: NodeId,
        name: String,
        parent_id: NodeId,
        instance: u16,
    },
    /// Declares a topology edge.
    NewEdge {
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        bandwidth: u32,
        latency: u32,
        name: String,
    },
    /// Fixes the slot capacities of a node, one entry per dimension.
    SetNodeLayout { node_id: NodeId, capacities: Vec<u32> },
    /// Items a node accepts per cycle.
    SetNodeInputBandwidth { node_id: NodeId, bandwidth: u32 },
    /// Items a node emits per cycle.
    SetNodeOutputBandwidth { node_id: NodeId, bandwidth: u32 },
    /// Highest occupancy the producer observed on a node.
    SetHighWaterMark { node_id: NodeId, mark: u64 },
    /// Creates an item.
    NewItem(ItemId),
    /// Logically destroys an item.
    DeleteItem(ItemId),
    /// Sets a tag on an item.
    SetItemTag {
        item_id: ItemId,
        tag: String,
        value: TagValue,
    },
    /// Moves items across an edge; each entry is `(item, lane)`.
    MoveItems {
        edge_id: EdgeId,
        items: Vec<(ItemId, u32)>,
    },
    /// An item enters a node slot.
    EnterNode {
        node_id: NodeId,
        item_id: ItemId,
        position: Vec<u32>,
    },
    /// An item leaves a node slot.
    ExitNode {
        node_id: NodeId,
        item_id: ItemId,
        position: Vec<u32>,
    },
    /// Sets a tag on a node, optionally on one slot.
    SetNodeTag {
        node_id: NodeId,
        tag: String,
        value: TagValue,
        slot: Vec<u32>,
    },
    /// Sets a cycle-global tag.
    SetCycleTag { tag: String, value: TagValue },
    /// A text comment.
    Comment { magic: u32, text: String },
    /// A binary comment.
    CommentBin { magic: u32, bytes: Vec<u8> },
    /// Human-readable description of a tag.
    SetTagDescription { tag: String, text: String },
    /// First appearance of a tag name.
    NewTag { id: TagId, name: String },
    /// First appearance of a string value.
    NewStringValue { id: StrId, text: String },
    /// Error reported in-band.
    Error(String),
    /// End of the simulated run.
    EndSimulation,
}

impl DralEvent {
    /// Returns a stable name for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DralEvent::Version(_) => "Version",
            DralEvent::Cycle(_) => "Cycle",
            DralEvent::CycleWithClock { .. } => "CycleWithClock",
            DralEvent::NewClock { .. } => "NewClock",
            DralEvent::SetNodeClock { .. } => "SetNodeClock",
            DralEvent::NewNode { .. } => "NewNode",
            DralEvent::NewEdge { .. } => "NewEdge",
            DralEvent::SetNodeLayout { .. } => "SetNodeLayout",
            DralEvent::SetNodeInputBandwidth { .. } => "SetNodeInputBandwidth",
            DralEvent::SetNodeOutputBandwidth { .. } => "SetNodeOutputBandwidth",
            DralEvent::SetHighWaterMark { .. } => "SetHighWaterMark",
            DralEvent::NewItem(_) => "NewItem",
            DralEvent::DeleteItem(_) => "DeleteItem",
            DralEvent::SetItemTag { .. } => "SetItemTag",
            DralEvent::MoveItems { .. } => "MoveItems",
            DralEvent::EnterNode { .. } => "EnterNode",
            DralEvent::ExitNode { .. } => "ExitNode",
            DralEvent::SetNodeTag { .. } => "SetNodeTag",
            DralEvent::SetCycleTag { .. } => "SetCycleTag",
            DralEvent::Comment { .. } => "Comment",
            DralEvent::CommentBin { .. } => "CommentBin",
            DralEvent::SetTagDescription { .. } => "SetTagDescription",
            DralEvent::NewTag { .. } => "NewTag",
            DralEvent::NewStringValue { .. } => "NewStringValue",
            DralEvent::Error(_) => "Error",
            DralEvent::EndSimulation => "EndSimulation",
        }
    }

    /// Returns true for events that only define symbols or frame the stream.
    ///
    /// Encoders regenerate these on their own, so they are skipped when two
    /// decoded streams are compared.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            DralEvent::Version(_)
                | DralEvent::NewTag { .. }
                | DralEvent::NewStringValue { .. }
                | DralEvent::Error(_)
        )
    }

    /// Returns the tag name referenced by this event, if any.
    pub fn tag_name(&self) -> Option<&str> {
        match self {
            DralEvent::SetItemTag { tag, .. }
            | DralEvent::SetNodeTag { tag, .. }
            | DralEvent::SetCycleTag { tag, .. }
            | DralEvent::SetTagDescription { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Returns the tag value carried by this event, if any.
    pub fn tag_value(&self) -> Option<&TagValue> {
        match self {
            DralEvent::SetItemTag { value, .. }
            | DralEvent::SetNodeTag { value, .. }
            | DralEvent::SetCycleTag { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Receiver of decoded events.
///
/// Every callback has an empty default so implementors only override what
/// they consume. Callbacks run synchronously on the decoding thread, in wire
/// order, at most once per wire event.
pub trait DralListener {
    fn version(&mut self, _version: u16) {}

    fn cycle(&mut self, _cycle: Cycle) {}

    fn cycle_with_clock(&mut self, _clock_id: ClockId, _cycle: Cycle, _phase: u8) {}

    fn new_clock(&mut self, _id: ClockId, _frequency: u64, _skew: u16, _divisions: u16, _name: &str) {}

    fn set_node_clock(&mut self, _node_id: NodeId, _clock_id: ClockId) {}

    fn new_node(&mut self, _id: NodeId, _name: &str, _parent_id: NodeId, _instance: u16) {}

    fn new_edge(&mut self, _id: EdgeId, _src: NodeId, _dst: NodeId, _bandwidth: u32, _latency: u32, _name: &str) {}

    fn set_node_layout(&mut self, _node_id: NodeId, _capacities: &[u32]) {}

    fn set_node_input_bandwidth(&mut self, _node_id: NodeId, _bandwidth: u32) {}

    fn set_node_output_bandwidth(&mut self, _node_id: NodeId, _bandwidth: u32) {}

    fn set_high_water_mark(&mut self, _node_id: NodeId, _mark: u64) {}

    fn new_item(&mut self, _item_id: ItemId) {}

    fn delete_item(&mut self, _item_id: ItemId) {}

    fn set_item_tag(&mut self, _item_id: ItemId, _tag: &str, _value: &TagValue) {}

    fn move_items(&mut self, _edge_id: EdgeId, _items: &[(ItemId, u32)]) {}

    fn enter_node(&mut self, _node_id: NodeId, _item_id: ItemId, _position: &[u32]) {}

    fn exit_node(&mut self, _node_id: NodeId, _item_id: ItemId, _position: &[u32]) {}

    fn set_node_tag(&mut self, _node_id: NodeId, _tag: &str, _value: &TagValue, _slot: &[u32]) {}

    fn set_cycle_tag(&mut self, _tag: &str, _value: &TagValue) {}

    fn comment(&mut self, _magic: u32, _text: &str) {}

    fn comment_bin(&mut self, _magic: u32, _bytes: &[u8]) {}

    fn set_tag_description(&mut self, _tag: &str, _text: &str) {}

    fn new_tag(&mut self, _id: TagId, _name: &str) {}

    fn new_string_value(&mut self, _id: StrId, _text: &str) {}

    /// A fatal problem; decoding stops after this call.
    fn error(&mut self, _message: &str) {}

    /// A recoverable problem; decoding may continue.
    fn non_critical_error(&mut self, _message: &str) {}

    /// The stream is over, cleanly or not.
    fn end_simulation(&mut self) {}
}

/// Delivers one event to the matching listener callback.
pub fn dispatch(listener: &mut (impl DralListener + ?Sized), event: &DralEvent) {
    match event {
        DralEvent::Version(v) => listener.version(*v),
        DralEvent::Cycle(c) => listener.cycle(*c),
        DralEvent::CycleWithClock { clock_id, cycle, phase } => listener.cycle_with_clock(*clock_id, *cycle, *phase),
        DralEvent::NewClock {
            id,
            frequency,
            skew,
            divisions,
            name,
        } => listener.new_clock(*id, *frequency, *skew, *divisions, name),
        DralEvent::SetNodeClock { node_id, clock_id } => listener.set_node_clock(*node_id, *clock_id),
        DralEvent::NewNode {
            id,
            name,
            parent_id,
            instance,
        } => listener.new_node(*id, name, *parent_id, *instance),
        DralEvent::NewEdge {
            id,
            src,
            dst,
            bandwidth,
            latency,
            name,
        } => listener.new_edge(*id, *src, *dst, *bandwidth, *latency, name),
        DralEvent::SetNodeLayout { node_id, capacities } => listener.set_node_layout(*node_id, capacities),
        DralEvent::SetNodeInputBandwidth { node_id, bandwidth } => listener.set_node_input_bandwidth(*node_id, *bandwidth),
        DralEvent::SetNodeOutputBandwidth { node_id, bandwidth } => {
            listener.set_node_output_bandwidth(*node_id, *bandwidth)
        }
        DralEvent::SetHighWaterMark { node_id, mark } => listener.set_high_water_mark(*node_id, *mark),
        DralEvent::NewItem(id) => listener.new_item(*id),
        DralEvent::DeleteItem(id) => listener.delete_item(*id),
        DralEvent::SetItemTag { item_id, tag, value } => listener.set_item_tag(*item_id, tag, value),
        DralEvent::MoveItems { edge_id, items } => listener.move_items(*edge_id, items),
        DralEvent::EnterNode {
            node_id,
            item_id,
            position,
        } => listener.enter_node(*node_id, *item_id, position),
        DralEvent::ExitNode {
            node_id,
            item_id,
            position,
        } => listener.exit_node(*node_id, *item_id, position),
        DralEvent::SetNodeTag {
            node_id,
            tag,
            value,
            slot,
        } => listener.set_node_tag(*node_id, tag, value, slot),
        DralEvent::SetCycleTag { tag, value } => listener.set_cycle_tag(tag, value),
        DralEvent::Comment { magic, text } => listener.comment(*magic, text),
        DralEvent::CommentBin { magic, bytes } => listener.comment_bin(*magic, bytes),
        DralEvent::SetTagDescription { tag, text } => listener.set_tag_description(tag, text),
        DralEvent::NewTag { id, name } => listener.new_tag(*id, name),
        DralEvent::NewStringValue { id, text } => listener.new_string_value(*id, text),
        DralEvent::Error(message) => listener.error(message),
        DralEvent::EndSimulation => listener.end_simulation(),
    }
}

/// A listener that records everything it receives.
///
/// Handy for tests and for tools that want a decoded trace in memory.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    /// Events in delivery order
    pub events: Vec<DralEvent>,
    /// Fatal errors reported through [`DralListener::error`]
    pub errors: Vec<String>,
    /// Messages reported through [`DralListener::non_critical_error`]
    pub warnings: Vec<String>,
    /// Number of `end_simulation` callbacks
    pub ended: usize,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events without definition events.
    pub fn payload(&self) -> Vec<DralEvent> {
        self.events.iter().filter(|e| !e.is_definition()).cloned().collect()
    }
}

impl DralListener for EventLog {
    fn version(&mut self, version: u16) {
        self.events.push(DralEvent::Version(version));
    }

    fn cycle(&mut self, cycle: Cycle) {
        self.events.push(DralEvent::Cycle(cycle));
    }

    fn cycle_with_clock(&mut self, clock_id: ClockId, cycle: Cycle, phase: u8) {
        self.events.push(DralEvent::CycleWithClock { clock_id, cycle, phase });
    }

    fn new_clock(&mut self, id: ClockId, frequency: u64, skew: u16, divisions: u16, name: &str) {
        self.events.push(DralEvent::NewClock {
            id,
            frequency,
            skew,
            divisions,
            name: name.to_string(),
        });
    }

    fn set_node_clock(&mut self, node_id: NodeId, clock_id: ClockId) {
        self.events.push(DralEvent::SetNodeClock { node_id, clock_id });
    }

    fn new_node(&mut self, id: NodeId, name: &str, parent_id: NodeId, instance: u16) {
        self.events.push(DralEvent::NewNode {
            id,
            name: name.to_string(),
            parent_id,
            instance,
        });
    }

    fn new_edge(&mut self, id: EdgeId, src: NodeId, dst: NodeId, bandwidth: u32, latency: u32, name: &str) {
        self.events.push(DralEvent::NewEdge {
            id,
            src,
            dst,
            bandwidth,
            latency,
            name: name.to_string(),
        });
    }

    fn set_node_layout(&mut self, node_id: NodeId, capacities: &[u32]) {
        self.events.push(DralEvent::SetNodeLayout {
            node_id,
            capacities: capacities.to_vec(),
        });
    }

    fn set_node_input_bandwidth(&mut self, node_id: NodeId, bandwidth: u32) {
        self.events.push(DralEvent::SetNodeInputBandwidth { node_id, bandwidth });
    }

    fn set_node_output_bandwidth(&mut self, node_id: NodeId, bandwidth: u32) {
        self.events.push(DralEvent::SetNodeOutputBandwidth { node_id, bandwidth });
    }

    fn set_high_water_mark(&mut self, node_id: NodeId, mark: u64) {
        self.events.push(DralEvent::SetHighWaterMark { node_id, mark });
    }

    fn new_item(&mut self, item_id: ItemId) {
        self.events.push(DralEvent::NewItem(item_id));
    }

    fn delete_item(&mut self, item_id: ItemId) {
        self.events.push(DralEvent::DeleteItem(item_id));
    }

    fn set_item_tag(&mut self, item_id: ItemId, tag: &str, value: &TagValue) {
        self.events.push(DralEvent::SetItemTag {
            item_id,
            tag: tag.to_string(),
            value: value.clone(),
        });
    }

    fn move_items(&mut self, edge_id: EdgeId, items: &[(ItemId, u32)]) {
        self.events.push(DralEvent::MoveItems {
            edge_id,
            items: items.to_vec(),
        });
    }

    fn enter_node(&mut self, node_id: NodeId, item_id: ItemId, position: &[u32]) {
        self.events.push(DralEvent::EnterNode {
            node_id,
            item_id,
            position: position.to_vec(),
        });
    }

    fn exit_node(&mut self, node_id: NodeId, item_id: ItemId, position: &[u32]) {
        self.events.push(DralEvent::ExitNode {
            node_id,
            item_id,
            position: position.to_vec(),
        });
    }

    fn set_node_tag(&mut self, node_id: NodeId, tag: &str, value: &TagValue, slot: &[u32]) {
        self.events.push(DralEvent::SetNodeTag {
            node_id,
            tag: tag.to_string(),
            value: value.clone(),
            slot: slot.to_vec(),
        });
    }

    fn set_cycle_tag(&mut self, tag: &str, value: &TagValue) {
        self.events.push(DralEvent::SetCycleTag {
            tag: tag.to_string(),
            value: value.clone(),
        });
    }

    fn comment(&mut self, magic: u32, text: &str) {
        self.events.push(DralEvent::Comment {
            magic,
            text: text.to_string(),
        });
    }

    fn comment_bin(&mut self, magic: u32, bytes: &[u8]) {
        self.events.push(DralEvent::CommentBin {
            magic,
            bytes: bytes.to_vec(),
        });
    }

    fn set_tag_description(&mut self, tag: &str, text: &str) {
        self.events.push(DralEvent::SetTagDescription {
            tag: tag.to_string(),
            text: text.to_string(),
        });
    }

    fn new_tag(&mut self, id: TagId, name: &str) {
        self.events.push(DralEvent::NewTag {
            id,
            name: name.to_string(),
        });
    }

    fn new_string_value(&mut self, id: StrId, text: &str) {
        self.events.push(DralEvent::NewStringValue {
            id,
            text: text.to_string(),
        });
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn non_critical_error(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn end_simulation(&mut self) {
        self.ended += 1;
        self.events.push(DralEvent::EndSimulation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_roundtrip_through_log() {
        let events = vec![
            DralEvent::Cycle(3),
            DralEvent::NewItem(9),
            DralEvent::SetItemTag {
                item_id: 9,
                tag: "opcode".to_string(),
                value: TagValue::from("add"),
            },
            DralEvent::MoveItems {
                edge_id: 1,
                items: vec![(9, 0), (10, 1)],
            },
            DralEvent::SetNodeTag {
                node_id: 2,
                tag: "occ".to_string(),
                value: TagValue::Set(vec![1, 2]),
                slot: vec![0, 1],
            },
            DralEvent::EndSimulation,
        ];
        let mut log = EventLog::new();
        for e in &events {
            dispatch(&mut log, e);
        }
        assert_eq!(log.events, events);
        assert_eq!(log.ended, 1);
    }

    #[test]
    fn test_error_callbacks_are_separated() {
        let mut log = EventLog::new();
        dispatch(&mut log, &DralEvent::Error("boom".to_string()));
        log.non_critical_error("minor");
        assert!(log.events.is_empty());
        assert_eq!(log.errors, vec!["boom".to_string()]);
        assert_eq!(log.warnings, vec!["minor".to_string()]);
    }

    #[test]
    fn test_definition_filter() {
        let mut log = EventLog::new();
        log.version(3);
        log.new_tag(0, "age");
        log.set_cycle_tag("age", &TagValue::Integer(1));
        assert_eq!(log.payload().len(), 1);
        assert_eq!(log.payload()[0].tag_name(), Some("age"));
        assert_eq!(log.payload()[0].tag_value(), Some(&TagValue::Integer(1)));
    }

    #[test]
    fn test_default_listener_ignores_everything() {
        struct Nothing;
        impl DralListener for Nothing {}
        let mut n = Nothing;
        dispatch(&mut n, &DralEvent::Cycle(1));
        assert_eq!(DralEvent::Cycle(1).kind(), "Cycle");
    }
}
