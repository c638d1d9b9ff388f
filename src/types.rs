//! Core type definitions for the DRAL toolkit.
//!
//! This module defines the identifier aliases and value types shared by the
//! codec and the temporal tag store.

use serde::{Deserialize, Serialize};

/// Simulation cycle counter.
///
/// Every temporal fact in the store is stamped with the cycle that was
/// active when the fact was recorded. Cycles never decrease within a trace.
pub type Cycle = u64;

/// Identifier of a simulated item (e.g. an instruction).
///
/// Item ids are assigned by the producer in increasing order.
pub type ItemId = u32;

/// Identifier of a topology node.
pub type NodeId = u16;

/// Identifier of a topology edge.
pub type EdgeId = u16;

/// Identifier of a clock domain.
pub type ClockId = u16;

/// Identifier of a tag, assigned the first time its name is seen.
pub type TagId = u16;

/// Index of a string in an interning table.
pub type StrId = u32;

/// Identifier of a client-opened track.
pub type TrackId = u32;

/// Compact key handed out by a value dictionary.
pub type DictKey = u32;

/// The value carried by a tag assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagValue {
    /// A plain 64-bit unsigned integer.
    Integer(u64),
    /// A string value.
    Str(String),
    /// An ordered set of integers ("set of values").
    Set(Vec<u64>),
}

impl TagValue {
    /// Returns the value type of this value.
    pub fn value_type(&self) -> TagValueType {
        match self {
            TagValue::Integer(_) => TagValueType::Integer,
            TagValue::Str(_) => TagValueType::Str,
            TagValue::Set(_) => TagValueType::Set,
        }
    }

    /// Returns the integer if this is an integer value.
    pub fn as_integer(&self) -> Option<u64> {
        match self {
            TagValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the set elements if this is a set value.
    pub fn as_set(&self) -> Option<&[u64]> {
        match self {
            TagValue::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Str(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Str(s)
    }
}

impl From<Vec<u64>> for TagValue {
    fn from(v: Vec<u64>) -> Self {
        TagValue::Set(v)
    }
}

/// The declared type of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagValueType {
    Integer,
    Str,
    Set,
}

impl std::fmt::Display for TagValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValueType::Integer => write!(f, "integer"),
            TagValueType::Str => write!(f, "string"),
            TagValueType::Set => write!(f, "set"),
        }
    }
}
