//! Value dictionary.
//!
//! Maps raw 64-bit values to compact keys so that tag vectors and the item
//! heap can store a few bits per fact instead of a full word. The same raw
//! value always maps to the same key while it stays bound; once the key space
//! is exhausted keys are recycled round-robin, and every key remembers the
//! cycle at which each binding started so that historic facts still resolve
//! to the value they were written with.
//!
//! # Example
//!
//! ```
//! use dralkit::dict::ValueDictionary;
//!
//! let mut dict = ValueDictionary::new(20);
//! let k = dict.insert(0xdead_beef, 10).unwrap();
//! assert_eq!(dict.insert(0xdead_beef, 500).unwrap(), k);
//! assert_eq!(dict.lookup(k, 10), Some(0xdead_beef));
//! assert_eq!(dict.lookup(k, 9), None);
//! ```

use std::collections::HashMap;

use crate::error::DictError;
use crate::types::{Cycle, DictKey};

#[derive(Clone, Debug)]
struct KeySlot {
    /// Bindings ordered by start cycle
    history: Vec<(Cycle, u64)>,
    /// Latest cycle at which this key was handed out
    last_used: Cycle,
}

/// Deduplicating value → key dictionary with temporal bindings.
#[derive(Clone, Debug)]
pub struct ValueDictionary {
    bits: u8,
    capacity: usize,
    live: HashMap<u64, DictKey>,
    slots: Vec<KeySlot>,
    /// Keys holding more than one binding
    stale: Vec<DictKey>,
    cursor: usize,
    recycled: u64,
}

impl ValueDictionary {
    /// Creates a dictionary handing out keys of `bits` bits.
    pub fn new(bits: u8) -> Self {
        let bits = bits.clamp(1, 31);
        Self {
            bits,
            capacity: 1usize << bits,
            live: HashMap::new(),
            slots: Vec::new(),
            stale: Vec::new(),
            cursor: 0,
            recycled: 0,
        }
    }

    /// Returns the key width in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns the number of distinct keys available.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of values currently bound to a key.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no value has been inserted.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns how many times a key has been rebound to a new value.
    pub fn recycled(&self) -> u64 {
        self.recycled
    }

    /// Returns the key for `value`, binding a new key at `cycle` if needed.
    pub fn insert(&mut self, value: u64, cycle: Cycle) -> Result<DictKey, DictError> {
        if let Some(&key) = self.live.get(&value) {
            let slot = &mut self.slots[key as usize];
            slot.last_used = slot.last_used.max(cycle);
            return Ok(key);
        }

        if self.slots.len() < self.capacity {
            let key = self.slots.len() as DictKey;
            self.slots.push(KeySlot {
                history: vec![(cycle, value)],
                last_used: cycle,
            });
            self.live.insert(value, key);
            return Ok(key);
        }

        // A key handed out at this cycle may still back a fact written at
        // this cycle, so it cannot be rebound yet.
        for step in 0..self.capacity {
            let key = (self.cursor + step) % self.capacity;
            let slot = &mut self.slots[key];
            if slot.last_used >= cycle {
                continue;
            }
            if let Some(&(_, old)) = slot.history.last() {
                self.live.remove(&old);
            }
            slot.history.push((cycle, value));
            slot.last_used = cycle;
            if slot.history.len() == 2 {
                self.stale.push(key as DictKey);
            }
            self.live.insert(value, key as DictKey);
            self.cursor = (key + 1) % self.capacity;
            self.recycled += 1;
            return Ok(key as DictKey);
        }

        tracing::warn!(cycle, capacity = self.capacity, "value dictionary exhausted");
        Err(DictError::Full(cycle))
    }

    /// Returns the key currently bound to `value`, if any.
    pub fn key_of(&self, value: u64) -> Option<DictKey> {
        self.live.get(&value).copied()
    }

    /// Returns the value bound to `key` at or before `cycle`.
    pub fn lookup(&self, key: DictKey, cycle: Cycle) -> Option<u64> {
        let history = &self.slots.get(key as usize)?.history;
        let idx = history.partition_point(|&(start, _)| start <= cycle);
        if idx == 0 {
            None
        } else {
            Some(history[idx - 1].1)
        }
    }

    /// Forgets bindings that no fact written at or after `horizon` can
    /// resolve to.
    ///
    /// Each key keeps the binding in force at `horizon` and every later one.
    /// Returns the number of bindings dropped.
    pub fn trim_before(&mut self, horizon: Cycle) -> usize {
        let mut dropped = 0;
        let slots = &mut self.slots;
        self.stale.retain(|&key| {
            let history = &mut slots[key as usize].history;
            let idx = history.partition_point(|&(start, _)| start <= horizon);
            if idx > 1 {
                history.drain(..idx - 1);
                dropped += idx - 1;
            }
            history.len() > 1
        });
        if dropped > 0 {
            tracing::trace!(horizon, dropped, "trimmed dictionary bindings");
        }
        dropped
    }

    /// Returns the number of bindings remembered across all keys.
    pub fn binding_count(&self) -> usize {
        self.slots.iter().map(|s| s.history.len()).sum()
    }

    /// Returns the value most recently bound to `key`.
    pub fn latest(&self, key: DictKey) -> Option<u64> {
        self.slots.get(key as usize)?.history.last().map(|&(_, v)| v)
    }
}
