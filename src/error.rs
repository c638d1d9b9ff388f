//! Error types shared across the codec and the tag store.
//!
//! Stream-level failures ([`DralError`]) are escalated to the listener by the
//! decoder. Store-level failures ([`DbError`] and friends) are returned to the
//! immediate caller and never abort an ingestion session.

use thiserror::Error;

use crate::types::{ClockId, Cycle, EdgeId, ItemId, NodeId, TagId, TagValueType, TrackId};

/// Errors raised while reading or writing a DRAL byte stream.
#[derive(Error, Debug)]
pub enum DralError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream after {consumed} bytes")]
    UnexpectedEof { consumed: u64 },

    #[error("bad magic number {0:02x?}")]
    BadMagic(Vec<u8>),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown opcode {opcode} for protocol version {version}")]
    UnknownOpcode { opcode: u8, version: u8 },

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("event {event} cannot be encoded in {version}: {reason}")]
    UnsupportedEvent {
        event: &'static str,
        version: &'static str,
        reason: String,
    },

    #[error("string of {len} bytes exceeds the {max} byte limit")]
    StringTooLong { len: usize, max: usize },

    #[error("reference to undefined tag id {0}")]
    UnknownTagId(u16),

    #[error("reference to undefined string id {0}")]
    UnknownStringId(u32),

    #[error("ASCII trace line {line}: {message}")]
    Ascii { line: usize, message: String },
}

impl DralError {
    /// Returns true if the stream ended cleanly in the middle of a record.
    ///
    /// Events decoded before a truncation form a valid partial trace.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DralError::UnexpectedEof { .. })
    }
}

/// Result type for codec operations.
pub type DralResult<T> = Result<T, DralError>;

/// Errors raised by the graph topology store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("node name {0} already exists")]
    DuplicateNodeName(String),

    #[error("edge {0} already exists")]
    DuplicateEdge(EdgeId),

    #[error("clock {0} already exists")]
    DuplicateClock(ClockId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),

    #[error("unknown clock {0}")]
    UnknownClock(ClockId),

    #[error("invalid layout for node {node}: {reason}")]
    InvalidLayout { node: NodeId, reason: String },

    #[error("slot {slot:?} is outside the layout of node {node}")]
    SlotOutOfRange { node: NodeId, slot: Vec<u32> },
}

/// Errors raised by the value dictionary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    #[error("dictionary full: every key is in use at cycle {0}")]
    Full(Cycle),
}

/// Errors raised by tag vectors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagVecError {
    #[error("write at cycle {cycle} precedes the last write at cycle {last}")]
    OutOfOrder { cycle: Cycle, last: Cycle },

    #[error("window starting at cycle {0} is compressed and read-only")]
    Compressed(Cycle),

    #[error("item id {0} does not fit 31 bits")]
    ItemTooLarge(ItemId),

    #[error("encoding stores item ids, not dictionary values")]
    WrongEncoding,
}

/// Errors raised by the temporal tag store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    #[error("item {0} has been purged")]
    ItemPurged(ItemId),

    #[error("item {0} already exists")]
    DuplicateItem(ItemId),

    #[error("tag {tag} not set on item {item} at cycle {cycle}")]
    TagNotSet { item: ItemId, tag: TagId, cycle: Cycle },

    #[error("unknown tag {0}")]
    UnknownTag(String),

    #[error("tag {tag} is declared {expected}, got {found}")]
    TagTypeMismatch {
        tag: String,
        expected: TagValueType,
        found: TagValueType,
    },

    #[error("item {item} created out of order after item {last}")]
    ItemOutOfOrder { item: ItemId, last: ItemId },

    #[error("immutable tag {tag} already set on item {item}")]
    ImmutableTagRewrite { item: ItemId, tag: TagId },

    #[error("unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("item {item} cycle {cycle} precedes its creation at cycle {created}")]
    CycleBeforeCreation {
        item: ItemId,
        cycle: Cycle,
        created: Cycle,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Dictionary(#[from] DictError),

    #[error(transparent)]
    TagVec(#[from] TagVecError),
}

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_classification() {
        assert!(DralError::UnexpectedEof { consumed: 10 }.is_truncation());
        assert!(!DralError::BadMagic(vec![1, 2]).is_truncation());
        assert!(!DralError::UnsupportedVersion(9).is_truncation());
    }

    #[test]
    fn test_error_messages() {
        let err = DralError::UnknownOpcode { opcode: 63, version: 2 };
        assert_eq!(err.to_string(), "unknown opcode 63 for protocol version 2");

        let err = DbError::from(GraphError::DuplicateNode(4));
        assert_eq!(err.to_string(), "node 4 already exists");
    }
}
