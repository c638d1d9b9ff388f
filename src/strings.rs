//! String interning.
//!
//! Two variants live here:
//!
//! - [`InternTable`]: a permanent, append-only bijection between values and
//!   dense integer ids ([`StrTable`] for strings, [`SetTable`] for
//!   set-of-values payloads).
//! - [`LruStrMap`]: a bounded mapping that recycles the id of its least
//!   recently used entry when full. Ids are only valid until the entry is
//!   evicted, so callers must watch the `is_new` flag and re-announce
//!   definitions when it is set.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::StrId;

/// Permanent append-only interning table.
#[derive(Clone, Debug)]
pub struct InternTable<T> {
    values: Vec<T>,
    ids: HashMap<T, StrId>,
}

/// Interning table for string values and names.
pub type StrTable = InternTable<String>;

/// Interning table for set-of-values payloads.
pub type SetTable = InternTable<Vec<u64>>;

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            ids: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> InternTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `value`, assigning the next id on first sight.
    ///
    /// The boolean is true when the id was assigned by this call.
    pub fn intern_new<Q>(&mut self, value: &Q) -> (StrId, bool)
    where
        T: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        if let Some(&id) = self.ids.get(value) {
            return (id, false);
        }
        let id = self.values.len() as StrId;
        let owned = value.to_owned();
        self.values.push(owned.clone());
        self.ids.insert(owned, id);
        (id, true)
    }

    /// Returns the id of `value`, assigning the next id on first sight.
    pub fn intern<Q>(&mut self, value: &Q) -> StrId
    where
        T: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        self.intern_new(value).0
    }

    /// Returns the id of `value` without inserting it.
    pub fn get_id<Q>(&self, value: &Q) -> Option<StrId>
    where
        T: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.ids.get(value).copied()
    }

    /// Returns the value stored under `id`.
    pub fn lookup(&self, id: StrId) -> Option<&T> {
        self.values.get(id as usize)
    }

    /// Returns the number of interned values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(id, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (StrId, &T)> {
        self.values.iter().enumerate().map(|(i, v)| (i as StrId, v))
    }
}

/// Outcome of inserting into an [`LruStrMap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interned {
    /// Id currently bound to the string
    pub id: StrId,
    /// True if the id was (re)bound by this insertion
    pub is_new: bool,
    /// The string that lost its id to make room, if any
    pub evicted: Option<String>,
}

const NIL: usize = usize::MAX;

#[derive(Clone, Debug)]
struct LruSlot {
    value: String,
    prev: usize,
    next: usize,
}

/// Bounded string-to-id mapping with least-recently-used eviction.
///
/// Slots double as ids. Recency is an intrusive doubly linked list threaded
/// through the slot arena by index.
#[derive(Clone, Debug)]
pub struct LruStrMap {
    capacity: usize,
    slots: Vec<LruSlot>,
    ids: HashMap<String, usize>,
    head: usize,
    tail: usize,
    evictions: u64,
}

impl LruStrMap {
    /// Creates a mapping holding at most `capacity` strings.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Vec::new(),
            ids: HashMap::new(),
            head: NIL,
            tail: NIL,
            evictions: 0,
        }
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the number of evictions performed so far.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    /// Looks up a string, marking it most recently used.
    pub fn get(&mut self, value: &str) -> Option<StrId> {
        let slot = *self.ids.get(value)?;
        self.touch(slot);
        Some(slot as StrId)
    }

    /// Returns the string currently bound to `id`.
    pub fn resolve(&self, id: StrId) -> Option<&str> {
        self.slots.get(id as usize).map(|s| s.value.as_str())
    }

    /// Inserts a string, evicting the least recently used entry when full.
    pub fn insert(&mut self, value: &str) -> Interned {
        if let Some(id) = self.get(value) {
            return Interned {
                id,
                is_new: false,
                evicted: None,
            };
        }

        if self.slots.len() < self.capacity {
            let slot = self.slots.len();
            self.slots.push(LruSlot {
                value: value.to_string(),
                prev: NIL,
                next: NIL,
            });
            self.push_front(slot);
            self.ids.insert(value.to_string(), slot);
            return Interned {
                id: slot as StrId,
                is_new: true,
                evicted: None,
            };
        }

        let victim = self.tail;
        self.unlink(victim);
        let old = std::mem::replace(&mut self.slots[victim].value, value.to_string());
        self.ids.remove(&old);
        self.ids.insert(value.to_string(), victim);
        self.push_front(victim);
        self.evictions += 1;
        tracing::trace!(evicted = %old, id = victim, "recycled interned id");

        Interned {
            id: victim as StrId,
            is_new: true,
            evicted: Some(old),
        }
    }
}
