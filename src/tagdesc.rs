//! Tag descriptors.
//!
//! Tag ids are assigned the first time a name is seen and are shared by
//! every item, node, edge and cycle track of a session. Each descriptor
//! records the value type (fixed by the first assignment), mutability,
//! display base and an optional human-readable description.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::types::{TagId, TagValue, TagValueType};

/// Reserved tag under which item-carrying tracks store item ids.
pub const ITEMID_TAG_NAME: &str = "__ITEMID";

/// Id of [`ITEMID_TAG_NAME`]; it is always registered first.
pub const ITEMID_TAG: TagId = 0;

/// Description of one tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDesc {
    pub id: TagId,
    pub name: String,
    /// Fixed by the first value assigned; `None` until then
    pub value_type: Option<TagValueType>,
    pub mutable: bool,
    /// Display base: 2, 8, 10 or 16
    pub base: u8,
    pub description: Option<String>,
}

/// Registry of every tag known to a session.
#[derive(Clone, Debug)]
pub struct TagDescriptors {
    descs: Vec<TagDesc>,
    ids: HashMap<String, TagId>,
    immutable: HashSet<String>,
    bases: HashMap<String, u8>,
}

impl Default for TagDescriptors {
    fn default() -> Self {
        Self::new()
    }
}

impl TagDescriptors {
    /// Creates a registry where every tag is mutable and printed in decimal.
    pub fn new() -> Self {
        Self::with_policy(HashSet::new(), HashMap::new())
    }

    /// Creates a registry applying the mutability and base policy of `config`.
    pub fn from_config(config: &DbConfig) -> Self {
        Self::with_policy(
            config.immutable_tags.iter().cloned().collect(),
            config.tag_bases.clone(),
        )
    }

    fn with_policy(immutable: HashSet<String>, bases: HashMap<String, u8>) -> Self {
        let mut descs = Self {
            descs: Vec::new(),
            ids: HashMap::new(),
            immutable,
            bases,
        };
        let id = descs.register(ITEMID_TAG_NAME);
        debug_assert_eq!(id, ITEMID_TAG);
        descs.descs[ITEMID_TAG as usize].value_type = Some(TagValueType::Integer);
        descs
    }

    /// Returns the id of `name`, registering it on first sight.
    pub fn register(&mut self, name: &str) -> TagId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.descs.len() as TagId;
        self.descs.push(TagDesc {
            id,
            name: name.to_string(),
            value_type: None,
            mutable: !self.immutable.contains(name),
            base: self.bases.get(name).copied().unwrap_or(10),
            description: None,
        });
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Registers `name` and checks `value_type` against its declared type.
    ///
    /// The first call for a tag fixes its type.
    pub fn observe(&mut self, name: &str, value_type: TagValueType) -> DbResult<TagId> {
        let id = self.register(name);
        let desc = &mut self.descs[id as usize];
        match desc.value_type {
            None => desc.value_type = Some(value_type),
            Some(expected) if expected != value_type => {
                return Err(DbError::TagTypeMismatch {
                    tag: name.to_string(),
                    expected,
                    found: value_type,
                })
            }
            Some(_) => {}
        }
        Ok(id)
    }

    /// Returns the id of a known tag.
    pub fn id_of(&self, name: &str) -> Option<TagId> {
        self.ids.get(name).copied()
    }

    /// Returns the id of a known tag or `UnknownTag`.
    pub fn require(&self, name: &str) -> DbResult<TagId> {
        self.id_of(name).ok_or_else(|| DbError::UnknownTag(name.to_string()))
    }

    /// Returns the descriptor of a tag.
    pub fn get(&self, id: TagId) -> Option<&TagDesc> {
        self.descs.get(id as usize)
    }

    /// Returns the name of a tag.
    pub fn name(&self, id: TagId) -> Option<&str> {
        self.get(id).map(|d| d.name.as_str())
    }

    /// Returns true if the tag may change over an item's life.
    pub fn is_mutable(&self, id: TagId) -> bool {
        self.get(id).map(|d| d.mutable).unwrap_or(true)
    }

    /// Attaches a description, registering the tag if needed.
    pub fn set_description(&mut self, name: &str, text: &str) -> TagId {
        let id = self.register(name);
        self.descs[id as usize].description = Some(text.to_string());
        id
    }

    /// Returns the description of a tag, if one was announced.
    pub fn description(&self, id: TagId) -> Option<&str> {
        self.get(id).and_then(|d| d.description.as_deref())
    }

    /// Formats a value using the display base of its tag.
    pub fn format_value(&self, id: TagId, value: &TagValue) -> String {
        let base = self.get(id).map(|d| d.base).unwrap_or(10);
        match value {
            TagValue::Integer(v) => format_integer(*v, base),
            TagValue::Str(s) => s.clone(),
            TagValue::Set(set) => {
                let items: Vec<String> = set.iter().map(|&v| format_integer(v, base)).collect();
                format!("{{{}}}", items.join(", "))
            }
        }
    }

    /// Returns the number of registered tags, the reserved one included.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Always false: the reserved item-id tag is registered at creation.
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Iterates over every descriptor in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TagDesc> {
        self.descs.iter()
    }
}

/// Formats an integer in base 2, 8, 10 or 16.
pub fn format_integer(value: u64, base: u8) -> String {
    match base {
        2 => format!("0b{:b}", value),
        8 => format!("0o{:o}", value),
        16 => format!("0x{:x}", value),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfigBuilder;

    #[test]
    fn test_reserved_tag_first() {
        let descs = TagDescriptors::new();
        assert_eq!(descs.id_of(ITEMID_TAG_NAME), Some(ITEMID_TAG));
        assert_eq!(descs.len(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut descs = TagDescriptors::new();
        let a = descs.register("age");
        let b = descs.register("opcode");
        assert_ne!(a, b);
        assert_eq!(descs.register("age"), a);
        assert_eq!(descs.name(b), Some("opcode"));
    }

    #[test]
    fn test_type_fixed_by_first_use() {
        let mut descs = TagDescriptors::new();
        descs.observe("pc", TagValueType::Integer).unwrap();
        let err = descs.observe("pc", TagValueType::Str).unwrap_err();
        assert_eq!(
            err,
            DbError::TagTypeMismatch {
                tag: "pc".to_string(),
                expected: TagValueType::Integer,
                found: TagValueType::Str,
            }
        );
        assert!(descs.observe("pc", TagValueType::Integer).is_ok());
    }

    #[test]
    fn test_policy_from_config() {
        let config = DbConfigBuilder::new()
            .immutable_tag("opcode")
            .tag_base("pc", 16)
            .build()
            .unwrap();
        let mut descs = TagDescriptors::from_config(&config);
        let op = descs.register("opcode");
        let pc = descs.register("pc");
        assert!(!descs.is_mutable(op));
        assert!(descs.is_mutable(pc));
        assert_eq!(descs.format_value(pc, &TagValue::Integer(255)), "0xff");
        assert_eq!(descs.format_value(op, &TagValue::Set(vec![1, 2])), "{1, 2}");
    }

    #[test]
    fn test_descriptions() {
        let mut descs = TagDescriptors::new();
        let id = descs.set_description("lat", "load latency in cycles");
        assert_eq!(descs.description(id), Some("load latency in cycles"));
        assert_eq!(descs.require("missing"), Err(DbError::UnknownTag("missing".to_string())));
    }

    #[test]
    fn test_format_integer_bases() {
        assert_eq!(format_integer(5, 2), "0b101");
        assert_eq!(format_integer(8, 8), "0o10");
        assert_eq!(format_integer(42, 10), "42");
    }
}
