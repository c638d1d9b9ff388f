//! Item tag heap.
//!
//! Every item owns a linked sequence of chunks in a shared arena. A chunk
//! holds up to [`CHUNK_FACTS`] packed facts, each a single `u64`:
//!
//! ```text
//!  bit  0..16  tag id
//!      16..36  value dictionary key
//!      36      mutable
//!      37      set of values
//!      38      string
//!      39..64  cycle offset from the chunk base
//! ```
//!
//! Raw values go through a 20-bit [`ValueDictionary`]; strings and sets are
//! stored as their intern-table ids, so the heap never owns payload text.
//! Chunks are addressed by `u32` index and recycled through a free list
//! when an item is purged.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::dict::ValueDictionary;
use crate::error::{DbError, DbResult};
use crate::segvec::SegmentedVec;
use crate::types::{Cycle, DictKey, ItemId, TagId, TagValueType};

/// Facts per chunk.
pub const CHUNK_FACTS: usize = 4;

/// Key width of the heap's own value dictionary.
pub const HEAP_DICT_BITS: u8 = 20;

/// Largest cycle offset a fact can carry.
pub const MAX_OFFSET: u64 = (1 << 25) - 1;

const NO_CHUNK: u32 = u32::MAX;

const TAG_MASK: u64 = 0xffff;
const KEY_SHIFT: u32 = 16;
const KEY_MASK: u64 = (1 << 20) - 1;
const MUTABLE_BIT: u64 = 1 << 36;
const SOV_BIT: u64 = 1 << 37;
const STRING_BIT: u64 = 1 << 38;
const OFFSET_SHIFT: u32 = 39;

/// Unpacked view of one fact word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedFact {
    pub tag: TagId,
    pub key: DictKey,
    pub mutable: bool,
    pub kind: TagValueType,
    pub offset: u32,
}

/// Packs a fact into its 64-bit word.
pub fn pack_fact(fact: &PackedFact) -> u64 {
    let mut word = fact.tag as u64 & TAG_MASK;
    word |= (fact.key as u64 & KEY_MASK) << KEY_SHIFT;
    if fact.mutable {
        word |= MUTABLE_BIT;
    }
    match fact.kind {
        TagValueType::Set => word |= SOV_BIT,
        TagValueType::Str => word |= STRING_BIT,
        TagValueType::Integer => {}
    }
    word | ((fact.offset as u64 & MAX_OFFSET) << OFFSET_SHIFT)
}

/// Unpacks a fact word.
pub fn unpack_fact(word: u64) -> PackedFact {
    let kind = if word & SOV_BIT != 0 {
        TagValueType::Set
    } else if word & STRING_BIT != 0 {
        TagValueType::Str
    } else {
        TagValueType::Integer
    };
    PackedFact {
        tag: (word & TAG_MASK) as TagId,
        key: ((word >> KEY_SHIFT) & KEY_MASK) as DictKey,
        mutable: word & MUTABLE_BIT != 0,
        kind,
        offset: (word >> OFFSET_SHIFT) as u32,
    }
}

/// A tag fact resolved back to its raw value.
///
/// `value` is the integer itself, or the intern-table id of a string or set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagFact {
    pub tag: TagId,
    pub value: u64,
    pub kind: TagValueType,
    pub mutable: bool,
    pub cycle: Cycle,
}

#[derive(Clone, Debug)]
struct Chunk {
    base_cycle: Cycle,
    next: u32,
    len: u8,
    facts: [u64; CHUNK_FACTS],
}

impl Chunk {
    fn new(base_cycle: Cycle) -> Self {
        Self {
            base_cycle,
            next: NO_CHUNK,
            len: 0,
            facts: [0; CHUNK_FACTS],
        }
    }

    fn accepts(&self, cycle: Cycle) -> bool {
        (self.len as usize) < CHUNK_FACTS
            && cycle >= self.base_cycle
            && cycle - self.base_cycle <= MAX_OFFSET
    }
}

#[derive(Clone, Debug)]
struct ItemEntry {
    id: ItemId,
    created: Cycle,
    head: u32,
    tail: u32,
    deleted: Option<Cycle>,
    purged: bool,
}

impl Default for ItemEntry {
    fn default() -> Self {
        Self {
            id: 0,
            created: 0,
            head: NO_CHUNK,
            tail: NO_CHUNK,
            deleted: None,
            purged: false,
        }
    }
}

/// Bounded id → slot map evicted in insertion order.
#[derive(Clone, Debug)]
struct RecencyCache {
    capacity: usize,
    slots: HashMap<ItemId, usize>,
    order: VecDeque<ItemId>,
}

impl RecencyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, id: ItemId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    fn insert(&mut self, id: ItemId, slot: usize) {
        if self.slots.insert(id, slot).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.slots.remove(&old);
            }
        }
    }

    fn remove(&mut self, id: ItemId) {
        if self.slots.remove(&id).is_some() {
            self.order.retain(|&other| other != id);
        }
    }
}

/// Per-item temporal tag store.
#[derive(Clone, Debug)]
pub struct ItemTagHeap {
    items: SegmentedVec<ItemEntry>,
    chunks: Vec<Chunk>,
    free_chunks: Vec<u32>,
    cache: RecencyCache,
    dict: ValueDictionary,
    backpropagate: bool,
    max_age: Option<Cycle>,
    purge_cursor: usize,
    last_purged: Option<ItemId>,
    facts: u64,
    purged: u64,
}

impl ItemTagHeap {
    /// Creates a heap with an item cache of `cache_size` entries.
    pub fn new(cache_size: usize) -> Self {
        Self {
            items: SegmentedVec::new(),
            chunks: Vec::new(),
            free_chunks: Vec::new(),
            cache: RecencyCache::new(cache_size),
            dict: ValueDictionary::new(HEAP_DICT_BITS),
            backpropagate: false,
            max_age: None,
            purge_cursor: 0,
            last_purged: None,
            facts: 0,
            purged: 0,
        }
    }

    /// Makes mutable-tag lookups before the first write return that write.
    pub fn set_backpropagate(&mut self, enable: bool) {
        self.backpropagate = enable;
    }

    /// Sets the age after which [`purge`](Self::purge) evicts items.
    pub fn set_max_age(&mut self, age: Option<Cycle>) {
        self.max_age = age;
    }

    /// Registers a new item created at `cycle`.
    ///
    /// Item ids must arrive in increasing order.
    pub fn new_item(&mut self, id: ItemId, cycle: Cycle) -> DbResult<()> {
        let count = self.items.len();
        if count > 0 {
            let last = self.items.get(count - 1).map(|e| e.id).unwrap_or(0);
            if id == last {
                return Err(DbError::DuplicateItem(id));
            }
            if id < last {
                if self.find_slot(id).is_some() {
                    return Err(DbError::DuplicateItem(id));
                }
                return Err(DbError::ItemOutOfOrder { item: id, last });
            }
        }
        let slot = self.items.push(ItemEntry {
            id,
            created: cycle,
            ..ItemEntry::default()
        });
        self.cache.insert(id, slot);
        Ok(())
    }

    /// Marks an item deleted at `cycle`. Its facts stay queryable.
    pub fn delete_item(&mut self, id: ItemId, cycle: Cycle) -> DbResult<()> {
        let slot = self.live_slot(id)?;
        if let Some(entry) = self.items.get_mut(slot) {
            entry.deleted.get_or_insert(cycle);
        }
        Ok(())
    }

    /// Appends a fact.
    ///
    /// `value` is the raw integer or the intern id of a string or set.
    /// Rewriting an immutable tag with the same value is a no-op.
    pub fn set_tag(
        &mut self,
        id: ItemId,
        tag: TagId,
        value: u64,
        kind: TagValueType,
        mutable: bool,
        cycle: Cycle,
    ) -> DbResult<()> {
        let slot = self.live_slot(id)?;
        let (created, head) = match self.items.get(slot) {
            Some(entry) => (entry.created, entry.head),
            None => return Err(DbError::UnknownItem(id)),
        };
        if cycle < created {
            return Err(DbError::CycleBeforeCreation {
                item: id,
                cycle,
                created,
            });
        }
        if !mutable {
            if let Some(existing) = self.facts_from(head).find(|f| f.tag == tag) {
                if existing.value == value && existing.kind == kind {
                    return Ok(());
                }
                return Err(DbError::ImmutableTagRewrite { item: id, tag });
            }
        }

        let key = self.dict.insert(value, cycle)?;
        self.append(slot, cycle, |base| {
            pack_fact(&PackedFact {
                tag,
                key,
                mutable,
                kind,
                offset: (cycle - base) as u32,
            })
        });
        self.cache.insert(id, slot);
        self.facts += 1;
        Ok(())
    }

    /// Returns the value of `tag` on item `id` as seen at `cycle`.
    ///
    /// Mutable tags resolve to the latest fact at or before `cycle`; with
    /// backpropagation enabled an earlier query resolves to the first fact.
    /// Immutable tags resolve to their single value at any cycle.
    pub fn get_tag(&self, id: ItemId, tag: TagId, cycle: Cycle) -> DbResult<TagFact> {
        let slot = self.live_slot(id)?;
        let head = self.items.get(slot).map(|e| e.head).unwrap_or(NO_CHUNK);

        let mut best: Option<TagFact> = None;
        let mut first: Option<TagFact> = None;
        for fact in self.facts_from(head).filter(|f| f.tag == tag) {
            if !fact.mutable {
                return Ok(fact);
            }
            if first.map_or(true, |f| fact.cycle < f.cycle) {
                first = Some(fact);
            }
            if fact.cycle <= cycle && best.map_or(true, |b| fact.cycle >= b.cycle) {
                best = Some(fact);
            }
        }

        match best {
            Some(fact) => Ok(fact),
            None if self.backpropagate => first.ok_or(DbError::TagNotSet {
                item: id,
                tag,
                cycle,
            }),
            None => Err(DbError::TagNotSet {
                item: id,
                tag,
                cycle,
            }),
        }
    }

    /// Returns every fact of an item in write order.
    pub fn facts(&self, id: ItemId) -> DbResult<Vec<TagFact>> {
        let slot = self.live_slot(id)?;
        let head = self.items.get(slot).map(|e| e.head).unwrap_or(NO_CHUNK);
        Ok(self.facts_from(head).collect())
    }

    /// Returns the creation cycle of an item.
    pub fn created(&self, id: ItemId) -> DbResult<Cycle> {
        let slot = self.live_slot(id)?;
        self.items
            .get(slot)
            .map(|e| e.created)
            .ok_or(DbError::UnknownItem(id))
    }

    /// Returns the deletion cycle of an item, if it was deleted.
    pub fn deleted(&self, id: ItemId) -> DbResult<Option<Cycle>> {
        let slot = self.live_slot(id)?;
        Ok(self.items.get(slot).and_then(|e| e.deleted))
    }

    /// Returns true if the item exists and has not been purged.
    pub fn contains(&self, id: ItemId) -> bool {
        self.live_slot(id).is_ok()
    }

    /// Evicts every item created more than the configured age before `now`.
    ///
    /// Returns the number of items purged by this pass.
    pub fn purge(&mut self, now: Cycle) -> u64 {
        let Some(age) = self.max_age else {
            return 0;
        };
        let Some(limit) = now.checked_sub(age) else {
            return 0;
        };

        let mut purged = 0;
        while self.purge_cursor < self.items.len() {
            let slot = self.purge_cursor;
            let (id, created, head) = match self.items.get(slot) {
                Some(e) => (e.id, e.created, e.head),
                None => break,
            };
            if created >= limit {
                break;
            }
            self.free_chain(head);
            if let Some(entry) = self.items.get_mut(slot) {
                entry.purged = true;
                entry.head = NO_CHUNK;
                entry.tail = NO_CHUNK;
            }
            self.cache.remove(id);
            self.last_purged = Some(id);
            self.purge_cursor += 1;
            purged += 1;
        }

        if purged > 0 {
            self.purged += purged;
            // Every surviving fact is at or after `limit`. The newest slot
            // stays resident so id ordering can still be checked against it.
            let bindings = self.dict.trim_before(limit);
            let keep_from = self.purge_cursor.min(self.items.len().saturating_sub(1));
            let segments = self.items.release_before(keep_from);
            debug!(
                purged,
                now,
                free_chunks = self.free_chunks.len(),
                bindings,
                segments,
                "purged items"
            );
        }
        purged
    }

    /// Returns a cursor positioned on the first fact of the first live item.
    pub fn cursor(&self) -> HeapCursor<'_> {
        let mut cursor = HeapCursor {
            heap: self,
            slot: self.purge_cursor,
            chunk: NO_CHUNK,
            index: 0,
        };
        cursor.enter_slot();
        cursor
    }

    /// Returns the number of items ever created.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the number of items purged so far.
    pub fn purged_count(&self) -> u64 {
        self.purged
    }

    /// Returns the number of facts written.
    pub fn fact_count(&self) -> u64 {
        self.facts
    }

    /// Returns the number of chunks currently in use.
    pub fn chunks_in_use(&self) -> usize {
        self.chunks.len() - self.free_chunks.len()
    }

    /// Returns the number of item-slot segments still resident.
    pub fn resident_segments(&self) -> usize {
        self.items.allocated_segments()
    }

    /// Returns how many dictionary keys have been rebound.
    pub fn dictionary_recycled(&self) -> u64 {
        self.dict.recycled()
    }

    fn live_slot(&self, id: ItemId) -> DbResult<usize> {
        let Some(slot) = self.find_slot(id) else {
            return Err(match self.last_purged {
                Some(last) if id <= last => DbError::ItemPurged(id),
                _ => DbError::UnknownItem(id),
            });
        };
        match self.items.get(slot) {
            Some(entry) if entry.purged => Err(DbError::ItemPurged(id)),
            Some(_) => Ok(slot),
            None => Err(DbError::UnknownItem(id)),
        }
    }

    fn find_slot(&self, id: ItemId) -> Option<usize> {
        if let Some(slot) = self.cache.get(id) {
            return Some(slot);
        }
        let (mut lo, mut hi) = (self.purge_cursor, self.items.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_id = self.items.get(mid)?.id;
            match mid_id.cmp(&id) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    fn append(&mut self, slot: usize, cycle: Cycle, pack: impl FnOnce(Cycle) -> u64) {
        let (head, tail) = match self.items.get(slot) {
            Some(e) => (e.head, e.tail),
            None => return,
        };

        let target = match self.chunks.get(tail as usize) {
            Some(chunk) if tail != NO_CHUNK && chunk.accepts(cycle) => tail,
            _ => {
                let fresh = self.alloc_chunk(cycle);
                if let Some(prev) = self.chunks.get_mut(tail as usize) {
                    prev.next = fresh;
                }
                if let Some(entry) = self.items.get_mut(slot) {
                    if head == NO_CHUNK {
                        entry.head = fresh;
                    }
                    entry.tail = fresh;
                }
                fresh
            }
        };

        let chunk = &mut self.chunks[target as usize];
        chunk.facts[chunk.len as usize] = pack(chunk.base_cycle);
        chunk.len += 1;
    }

    fn alloc_chunk(&mut self, base_cycle: Cycle) -> u32 {
        match self.free_chunks.pop() {
            Some(index) => {
                self.chunks[index as usize] = Chunk::new(base_cycle);
                index
            }
            None => {
                self.chunks.push(Chunk::new(base_cycle));
                (self.chunks.len() - 1) as u32
            }
        }
    }

    fn free_chain(&mut self, mut index: u32) {
        while index != NO_CHUNK {
            let next = match self.chunks.get(index as usize) {
                Some(chunk) => chunk.next,
                None => break,
            };
            self.free_chunks.push(index);
            index = next;
        }
    }

    fn facts_from(&self, head: u32) -> impl Iterator<Item = TagFact> + '_ {
        let mut index = head;
        let mut pos = 0usize;
        std::iter::from_fn(move || loop {
            let chunk = self.chunks.get(index as usize)?;
            if index == NO_CHUNK {
                return None;
            }
            if pos < chunk.len as usize {
                let fact = self.resolve(chunk, pos);
                pos += 1;
                return Some(fact);
            }
            index = chunk.next;
            pos = 0;
        })
    }

    fn resolve(&self, chunk: &Chunk, pos: usize) -> TagFact {
        let packed = unpack_fact(chunk.facts[pos]);
        let cycle = chunk.base_cycle + packed.offset as u64;
        let value = self
            .dict
            .lookup(packed.key, cycle)
            .or_else(|| self.dict.latest(packed.key))
            .unwrap_or(0);
        TagFact {
            tag: packed.tag,
            value,
            kind: packed.kind,
            mutable: packed.mutable,
            cycle,
        }
    }
}

/// Forward scan over every fact of every live item.
pub struct HeapCursor<'a> {
    heap: &'a ItemTagHeap,
    slot: usize,
    chunk: u32,
    index: usize,
}

impl<'a> HeapCursor<'a> {
    /// Returns the item under the cursor, or `None` past the end.
    pub fn item(&self) -> Option<ItemId> {
        self.heap.items.get(self.slot).map(|e| e.id)
    }

    /// Returns the fact under the cursor, or `None` if the item has no more.
    pub fn fact(&self) -> Option<TagFact> {
        let chunk = self.heap.chunks.get(self.chunk as usize)?;
        if self.chunk == NO_CHUNK || self.index >= chunk.len as usize {
            return None;
        }
        Some(self.heap.resolve(chunk, self.index))
    }

    /// Moves to the next fact of the current item.
    pub fn skip_to_next_tag(&mut self) -> bool {
        let Some(chunk) = self.heap.chunks.get(self.chunk as usize) else {
            return false;
        };
        if self.chunk == NO_CHUNK {
            return false;
        }
        if self.index + 1 < chunk.len as usize {
            self.index += 1;
            return true;
        }
        if chunk.next == NO_CHUNK {
            self.index = chunk.len as usize;
            return false;
        }
        self.chunk = chunk.next;
        self.index = 0;
        true
    }

    /// Moves to the first fact of the next live item.
    pub fn skip_to_next_item(&mut self) -> bool {
        if self.slot >= self.heap.items.len() {
            return false;
        }
        self.slot += 1;
        self.enter_slot();
        self.slot < self.heap.items.len()
    }

    fn enter_slot(&mut self) {
        while let Some(entry) = self.heap.items.get(self.slot) {
            if !entry.purged {
                self.chunk = entry.head;
                self.index = 0;
                return;
            }
            self.slot += 1;
        }
        self.chunk = NO_CHUNK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGE: TagId = 1;
    const NAME: TagId = 2;
    const OPCODE: TagId = 3;

    fn heap_with_item() -> ItemTagHeap {
        let mut heap = ItemTagHeap::new(16);
        heap.new_item(7, 10).unwrap();
        heap
    }

    // ========== Packing Tests ==========

    #[test]
    fn test_pack_unpack() {
        let fact = PackedFact {
            tag: 0xbeef,
            key: 0xf_ffff,
            mutable: true,
            kind: TagValueType::Set,
            offset: MAX_OFFSET as u32,
        };
        assert_eq!(unpack_fact(pack_fact(&fact)), fact);

        let plain = PackedFact {
            tag: 3,
            key: 9,
            mutable: false,
            kind: TagValueType::Str,
            offset: 0,
        };
        let word = pack_fact(&plain);
        assert_eq!(word & STRING_BIT, STRING_BIT);
        assert_eq!(word & MUTABLE_BIT, 0);
        assert_eq!(unpack_fact(word), plain);
    }

    // ========== Item Lifecycle Tests ==========

    #[test]
    fn test_item_order_enforced() {
        let mut heap = heap_with_item();
        assert_eq!(heap.new_item(7, 11), Err(DbError::DuplicateItem(7)));
        heap.new_item(9, 11).unwrap();
        assert_eq!(
            heap.new_item(8, 12),
            Err(DbError::ItemOutOfOrder { item: 8, last: 9 })
        );
        assert_eq!(heap.item_count(), 2);
    }

    #[test]
    fn test_unknown_item() {
        let heap = heap_with_item();
        assert_eq!(heap.get_tag(3, AGE, 10), Err(DbError::UnknownItem(3)));
        assert!(!heap.contains(3));
    }

    #[test]
    fn test_delete_keeps_facts() {
        let mut heap = heap_with_item();
        heap.set_tag(7, AGE, 5, TagValueType::Integer, true, 10).unwrap();
        heap.delete_item(7, 20).unwrap();
        assert_eq!(heap.deleted(7).unwrap(), Some(20));
        assert_eq!(heap.get_tag(7, AGE, 30).unwrap().value, 5);
    }

    // ========== Lookup Tests ==========

    #[test]
    fn test_mutable_lookup_at_or_before() {
        let mut heap = heap_with_item();
        heap.set_tag(7, AGE, 1, TagValueType::Integer, true, 10).unwrap();
        heap.set_tag(7, AGE, 2, TagValueType::Integer, true, 20).unwrap();
        heap.set_tag(7, AGE, 3, TagValueType::Integer, true, 30).unwrap();

        assert_eq!(heap.get_tag(7, AGE, 10).unwrap().value, 1);
        assert_eq!(heap.get_tag(7, AGE, 20).unwrap().value, 2);
        assert_eq!(heap.get_tag(7, AGE, 29).unwrap().value, 2);
        assert_eq!(heap.get_tag(7, AGE, 1000).unwrap().value, 3);
        assert_eq!(
            heap.get_tag(7, AGE, 9),
            Err(DbError::TagNotSet {
                item: 7,
                tag: AGE,
                cycle: 9
            })
        );
    }

    #[test]
    fn test_backpropagate() {
        let mut heap = ItemTagHeap::new(16);
        heap.set_backpropagate(true);
        heap.new_item(1, 0).unwrap();
        heap.set_tag(1, AGE, 42, TagValueType::Integer, true, 50).unwrap();
        assert_eq!(heap.get_tag(1, AGE, 5).unwrap().value, 42);
        assert!(heap.get_tag(1, NAME, 5).is_err());
    }

    #[test]
    fn test_immutable_single_value() {
        let mut heap = heap_with_item();
        heap.set_tag(7, OPCODE, 99, TagValueType::Integer, false, 15).unwrap();
        assert_eq!(heap.get_tag(7, OPCODE, 0).unwrap().value, 99);
        heap.set_tag(7, OPCODE, 99, TagValueType::Integer, false, 16).unwrap();
        assert_eq!(
            heap.set_tag(7, OPCODE, 100, TagValueType::Integer, false, 17),
            Err(DbError::ImmutableTagRewrite { item: 7, tag: OPCODE })
        );
        assert_eq!(heap.fact_count(), 1);
    }

    #[test]
    fn test_cycle_before_creation() {
        let mut heap = heap_with_item();
        assert_eq!(
            heap.set_tag(7, AGE, 1, TagValueType::Integer, true, 9),
            Err(DbError::CycleBeforeCreation {
                item: 7,
                cycle: 9,
                created: 10
            })
        );
    }

    #[test]
    fn test_chunk_spill_and_large_offsets() {
        let mut heap = heap_with_item();
        for i in 0..10u64 {
            heap.set_tag(7, AGE, i, TagValueType::Integer, true, 10 + i).unwrap();
        }
        let far = 10 + MAX_OFFSET + 100;
        heap.set_tag(7, AGE, 777, TagValueType::Integer, true, far).unwrap();

        assert_eq!(heap.chunks_in_use(), 4);
        assert_eq!(heap.get_tag(7, AGE, 15).unwrap().value, 5);
        assert_eq!(heap.get_tag(7, AGE, far).unwrap().value, 777);
        assert_eq!(heap.facts(7).unwrap().len(), 11);
    }

    #[test]
    fn test_kind_survives_packing() {
        let mut heap = heap_with_item();
        heap.set_tag(7, NAME, 3, TagValueType::Str, true, 10).unwrap();
        let fact = heap.get_tag(7, NAME, 10).unwrap();
        assert_eq!(fact.kind, TagValueType::Str);
        assert_eq!(fact.value, 3);
    }

    // ========== Scan Tests ==========

    #[test]
    fn test_cursor_walks_everything() {
        let mut heap = ItemTagHeap::new(2);
        for id in 1..=3u32 {
            heap.new_item(id, 0).unwrap();
            for c in 0..(id as u64 * 3) {
                heap.set_tag(id, AGE, c, TagValueType::Integer, true, c).unwrap();
            }
        }

        let mut cursor = heap.cursor();
        let mut seen = Vec::new();
        loop {
            let item = cursor.item().unwrap();
            let mut n = 0;
            if cursor.fact().is_some() {
                n += 1;
                while cursor.skip_to_next_tag() {
                    n += 1;
                }
            }
            seen.push((item, n));
            if !cursor.skip_to_next_item() {
                break;
            }
        }
        assert_eq!(seen, vec![(1, 3), (2, 6), (3, 9)]);
        assert!(cursor.item().is_none());
    }

    #[test]
    fn test_cursor_on_empty_heap() {
        let heap = ItemTagHeap::new(4);
        let mut cursor = heap.cursor();
        assert!(cursor.item().is_none());
        assert!(cursor.fact().is_none());
        assert!(!cursor.skip_to_next_item());
    }

    // ========== Purge Tests ==========

    #[test]
    fn test_purge_by_age() {
        let mut heap = ItemTagHeap::new(4);
        heap.set_max_age(Some(100));
        for id in 0..5u32 {
            let created = id as u64 * 50;
            heap.new_item(id, created).unwrap();
            heap.set_tag(id, AGE, id as u64, TagValueType::Integer, true, created).unwrap();
        }

        assert_eq!(heap.purge(220), 3);
        assert_eq!(heap.get_tag(0, AGE, 0), Err(DbError::ItemPurged(0)));
        assert_eq!(heap.get_tag(3, AGE, 150).unwrap().value, 3);
        assert_eq!(heap.purged_count(), 3);
        assert_eq!(heap.cursor().item(), Some(3));

        // Freed chunks are reused
        heap.new_item(5, 250).unwrap();
        heap.set_tag(5, AGE, 1, TagValueType::Integer, true, 250).unwrap();
        assert_eq!(heap.chunks_in_use(), 3);
    }

    #[test]
    fn test_purge_releases_slot_segments() {
        let mut heap = ItemTagHeap::new(16);
        heap.set_max_age(Some(1_000));
        for id in 1..=10_000u32 {
            let created = id as u64;
            heap.new_item(id, created).unwrap();
            heap.set_tag(id, AGE, created * 3, TagValueType::Integer, true, created).unwrap();
        }
        let before = heap.resident_segments();
        assert!(before >= 3);

        assert_eq!(heap.purge(10_000), 8_999);
        assert!(heap.resident_segments() < before);

        assert_eq!(heap.get_tag(1, AGE, 1), Err(DbError::ItemPurged(1)));
        assert_eq!(heap.get_tag(8_999, AGE, 9_000), Err(DbError::ItemPurged(8_999)));
        assert_eq!(heap.get_tag(9_500, AGE, 9_500).unwrap().value, 28_500);
        assert_eq!(heap.cursor().item(), Some(9_000));

        assert_eq!(heap.new_item(42, 10_001), Err(DbError::ItemOutOfOrder { item: 42, last: 10_000 }));
        heap.new_item(10_001, 10_001).unwrap();
        assert!(heap.contains(10_001));
        assert_eq!(heap.get_tag(20_000, AGE, 0), Err(DbError::UnknownItem(20_000)));
    }

    #[test]
    fn test_purge_disabled() {
        let mut heap = heap_with_item();
        assert_eq!(heap.purge(1_000_000), 0);
        assert!(heap.contains(7));
    }
}
