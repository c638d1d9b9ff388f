//! Tag vectors.
//!
//! A [`TagVec`] stores the history of one tag on one track within a single
//! window of `1 << window_bits` cycles. Live vectors accept writes in cycle
//! order; [`TagVec::compress`] repacks them into a read-only dense form.
//! [`TagHistory`] strings windows together and routes writes and queries to
//! the right one.
//!
//! | encoding | entry | match |
//! |---|---|---|
//! | `Dictionary` | `key \| offset << key_bits` (u32) | at or before |
//! | `DictionaryNf` | same as `Dictionary` | exact |
//! | `ItemIdx` | `item \| offset << 31` (u64) | exact |
//! | `Dense` | `Dictionary` entries, exact-size | inherited |
//! | `DenseShort` | palette of ≤ 16 keys, `slot \| offset << 4` (u16) | inherited |
//! | `ItemDense` | `ItemIdx` entries, exact-size | exact |
//! | `ItemDenseShort` | `item \| offset << (32 - window_bits)` (u32) | exact |

use serde::{Deserialize, Serialize};

use crate::error::TagVecError;
use crate::types::{Cycle, ItemId};

/// Largest item id an item vector can hold.
pub const MAX_VEC_ITEM: u64 = (1 << 31) - 1;

const ITEM_SHIFT: u32 = 31;
const PALETTE_MAX: usize = 16;
const SHORT_WINDOW_BITS: u8 = 12;

/// Bit split shared by every vector of a track heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VecLayout {
    pub key_bits: u8,
    pub window_bits: u8,
}

impl VecLayout {
    /// Creates a layout; `key_bits + window_bits` must not exceed 32.
    pub fn new(key_bits: u8, window_bits: u8) -> Self {
        debug_assert!(key_bits as u32 + window_bits as u32 <= 32);
        Self {
            key_bits,
            window_bits,
        }
    }

    /// Returns the number of cycles covered by one window.
    #[inline]
    pub fn window(&self) -> Cycle {
        1 << self.window_bits
    }

    /// Returns the first cycle of the window containing `cycle`.
    #[inline]
    pub fn window_base(&self, cycle: Cycle) -> Cycle {
        cycle & !(self.window() - 1)
    }

    #[inline]
    fn key_mask(&self) -> u32 {
        ((1u64 << self.key_bits) - 1) as u32
    }

    #[inline]
    fn short_item_bits(&self) -> u32 {
        32 - self.window_bits as u32
    }
}

/// How a history answers queries between writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VecKind {
    /// Dictionary keys, latest value at or before the query cycle
    Forward,
    /// Dictionary keys, exact cycle only
    Exact,
    /// Raw item ids, exact cycle only
    Item,
}

/// One window of tag history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagVec {
    Dictionary {
        base: Cycle,
        entries: Vec<u32>,
    },
    DictionaryNf {
        base: Cycle,
        entries: Vec<u32>,
    },
    ItemIdx {
        base: Cycle,
        entries: Vec<u64>,
    },
    Dense {
        base: Cycle,
        entries: Box<[u32]>,
        forward: bool,
    },
    DenseShort {
        base: Cycle,
        palette: Box<[u32]>,
        entries: Box<[u16]>,
        forward: bool,
    },
    ItemDense {
        base: Cycle,
        entries: Box<[u64]>,
    },
    ItemDenseShort {
        base: Cycle,
        entries: Box<[u32]>,
    },
}

impl TagVec {
    /// Creates an empty live vector for `kind` starting at `base`.
    pub fn open(kind: VecKind, base: Cycle) -> Self {
        match kind {
            VecKind::Forward => TagVec::Dictionary {
                base,
                entries: Vec::new(),
            },
            VecKind::Exact => TagVec::DictionaryNf {
                base,
                entries: Vec::new(),
            },
            VecKind::Item => TagVec::ItemIdx {
                base,
                entries: Vec::new(),
            },
        }
    }

    /// Returns a display name of the encoding.
    pub fn encoding(&self) -> &'static str {
        match self {
            TagVec::Dictionary { .. } => "dictionary",
            TagVec::DictionaryNf { .. } => "dictionary-nf",
            TagVec::ItemIdx { .. } => "item-idx",
            TagVec::Dense { .. } => "dense",
            TagVec::DenseShort { .. } => "dense-short",
            TagVec::ItemDense { .. } => "item-dense",
            TagVec::ItemDenseShort { .. } => "item-dense-short",
        }
    }

    /// Returns the first cycle of the window.
    pub fn base(&self) -> Cycle {
        match self {
            TagVec::Dictionary { base, .. }
            | TagVec::DictionaryNf { base, .. }
            | TagVec::ItemIdx { base, .. }
            | TagVec::Dense { base, .. }
            | TagVec::DenseShort { base, .. }
            | TagVec::ItemDense { base, .. }
            | TagVec::ItemDenseShort { base, .. } => *base,
        }
    }

    /// Returns true once the vector has been finalized.
    pub fn is_compressed(&self) -> bool {
        !matches!(
            self,
            TagVec::Dictionary { .. } | TagVec::DictionaryNf { .. } | TagVec::ItemIdx { .. }
        )
    }

    /// Returns true if queries between writes resolve to the previous write.
    pub fn is_forward(&self) -> bool {
        match self {
            TagVec::Dictionary { .. } => true,
            TagVec::Dense { forward, .. } | TagVec::DenseShort { forward, .. } => *forward,
            _ => false,
        }
    }

    /// Returns the number of writes stored.
    pub fn len(&self) -> usize {
        match self {
            TagVec::Dictionary { entries, .. } | TagVec::DictionaryNf { entries, .. } => {
                entries.len()
            }
            TagVec::ItemIdx { entries, .. } => entries.len(),
            TagVec::Dense { entries, .. } | TagVec::ItemDenseShort { entries, .. } => {
                entries.len()
            }
            TagVec::DenseShort { entries, .. } => entries.len(),
            TagVec::ItemDense { entries, .. } => entries.len(),
        }
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cycle of the last write.
    pub fn last_cycle(&self, layout: &VecLayout) -> Option<Cycle> {
        let n = self.len();
        if n == 0 {
            return None;
        }
        self.entry(layout, n - 1).map(|(cycle, _)| cycle)
    }

    /// Records dictionary key `key` at `cycle` on a dictionary vector.
    ///
    /// A second write at the same cycle replaces the first.
    pub fn add_key(&mut self, layout: &VecLayout, cycle: Cycle, key: u32) -> Result<(), TagVecError> {
        let last = self.last_cycle(layout);
        match self {
            TagVec::Dictionary { base, entries } | TagVec::DictionaryNf { base, entries } => {
                let offset = Self::offset_of(layout, *base, cycle, last)?;
                let entry = (key & layout.key_mask()) | (offset << layout.key_bits);
                Self::push_or_replace(entries, entry, last == Some(cycle));
                Ok(())
            }
            TagVec::ItemIdx { .. } => Err(TagVecError::WrongEncoding),
            _ => Err(TagVecError::Compressed(self.base())),
        }
    }

    /// Records item `item` at `cycle` on an item vector.
    pub fn add_item(&mut self, layout: &VecLayout, cycle: Cycle, item: ItemId) -> Result<(), TagVecError> {
        let last = self.last_cycle(layout);
        match self {
            TagVec::ItemIdx { base, entries } => {
                if item as u64 > MAX_VEC_ITEM {
                    return Err(TagVecError::ItemTooLarge(item));
                }
                let offset = Self::offset_of(layout, *base, cycle, last)? as u64;
                let entry = item as u64 | (offset << ITEM_SHIFT);
                Self::push_or_replace(entries, entry, last == Some(cycle));
                Ok(())
            }
            TagVec::Dictionary { .. } | TagVec::DictionaryNf { .. } => {
                Err(TagVecError::WrongEncoding)
            }
            _ => Err(TagVecError::Compressed(self.base())),
        }
    }

    /// Returns `(write cycle, key or item)` answering a query at `cycle`.
    pub fn get(&self, layout: &VecLayout, cycle: Cycle) -> Option<(Cycle, u64)> {
        let base = self.base();
        if cycle < base || self.is_empty() {
            return None;
        }
        let limit = base.saturating_add(layout.window() - 1);
        let clamped = cycle.min(limit);
        let idx = self.partition(layout, clamped);

        if self.is_forward() {
            if idx == 0 {
                return None;
            }
            return self.entry(layout, idx - 1);
        }
        if idx == 0 || cycle > limit {
            return None;
        }
        self.entry(layout, idx - 1)
            .filter(|&(written, _)| written == cycle)
    }

    /// Finalizes the vector into its dense form. Returns false if it was
    /// already compressed.
    pub fn compress(&mut self, layout: &VecLayout) -> bool {
        let compressed = match self {
            TagVec::Dictionary { base, entries } => {
                Self::compress_keys(layout, *base, entries, true)
            }
            TagVec::DictionaryNf { base, entries } => {
                Self::compress_keys(layout, *base, entries, false)
            }
            TagVec::ItemIdx { base, entries } => {
                let item_bits = layout.short_item_bits();
                let fits = item_bits < 32
                    && entries
                        .iter()
                        .all(|&e| (e & MAX_VEC_ITEM) < (1u64 << item_bits));
                if fits {
                    let packed: Vec<u32> = entries
                        .iter()
                        .map(|&e| {
                            let item = (e & MAX_VEC_ITEM) as u32;
                            let offset = (e >> ITEM_SHIFT) as u32;
                            item | (offset << item_bits)
                        })
                        .collect();
                    TagVec::ItemDenseShort {
                        base: *base,
                        entries: packed.into_boxed_slice(),
                    }
                } else {
                    TagVec::ItemDense {
                        base: *base,
                        entries: std::mem::take(entries).into_boxed_slice(),
                    }
                }
            }
            _ => return false,
        };
        *self = compressed;
        true
    }

    fn compress_keys(layout: &VecLayout, base: Cycle, entries: &mut Vec<u32>, forward: bool) -> TagVec {
        let mut palette: Vec<u32> = Vec::new();
        let mut short = layout.window_bits <= SHORT_WINDOW_BITS;
        if short {
            for &e in entries.iter() {
                let key = e & layout.key_mask();
                if !palette.contains(&key) {
                    if palette.len() == PALETTE_MAX {
                        short = false;
                        break;
                    }
                    palette.push(key);
                }
            }
        }

        if short {
            let packed: Vec<u16> = entries
                .iter()
                .map(|&e| {
                    let key = e & layout.key_mask();
                    let offset = e >> layout.key_bits;
                    let slot = palette.iter().position(|&k| k == key).unwrap_or(0) as u16;
                    slot | ((offset as u16) << 4)
                })
                .collect();
            TagVec::DenseShort {
                base,
                palette: palette.into_boxed_slice(),
                entries: packed.into_boxed_slice(),
                forward,
            }
        } else {
            TagVec::Dense {
                base,
                entries: std::mem::take(entries).into_boxed_slice(),
                forward,
            }
        }
    }

    fn offset_of(layout: &VecLayout, base: Cycle, cycle: Cycle, last: Option<Cycle>) -> Result<u32, TagVecError> {
        if let Some(last) = last {
            if cycle < last {
                return Err(TagVecError::OutOfOrder { cycle, last });
            }
        }
        if cycle < base || cycle - base >= layout.window() {
            return Err(TagVecError::OutOfOrder { cycle, last: base });
        }
        Ok((cycle - base) as u32)
    }

    fn push_or_replace<T>(entries: &mut Vec<T>, entry: T, replace: bool) {
        match entries.last_mut() {
            Some(slot) if replace => *slot = entry,
            _ => entries.push(entry),
        }
    }

    /// First index whose write cycle is greater than `cycle`.
    fn partition(&self, layout: &VecLayout, cycle: Cycle) -> usize {
        let target = cycle - self.base();
        let key_bits = layout.key_bits as u32;
        let short_bits = layout.short_item_bits();
        match self {
            TagVec::Dictionary { entries, .. } | TagVec::DictionaryNf { entries, .. } => {
                entries.partition_point(|&e| ((e >> key_bits) as u64) <= target)
            }
            TagVec::Dense { entries, .. } => {
                entries.partition_point(|&e| ((e >> key_bits) as u64) <= target)
            }
            TagVec::DenseShort { entries, .. } => {
                entries.partition_point(|&e| ((e >> 4) as u64) <= target)
            }
            TagVec::ItemIdx { entries, .. } => {
                entries.partition_point(|&e| (e >> ITEM_SHIFT) <= target)
            }
            TagVec::ItemDense { entries, .. } => {
                entries.partition_point(|&e| (e >> ITEM_SHIFT) <= target)
            }
            TagVec::ItemDenseShort { entries, .. } => {
                entries.partition_point(|&e| ((e >> short_bits) as u64) <= target)
            }
        }
    }

    /// Decodes entry `idx` into `(cycle, key or item)`.
    fn entry(&self, layout: &VecLayout, idx: usize) -> Option<(Cycle, u64)> {
        let base = self.base();
        let key_bits = layout.key_bits as u32;
        let mask = layout.key_mask();
        let (offset, raw) = match self {
            TagVec::Dictionary { entries, .. } | TagVec::DictionaryNf { entries, .. } => {
                let e = *entries.get(idx)?;
                ((e >> key_bits) as u64, (e & mask) as u64)
            }
            TagVec::Dense { entries, .. } => {
                let e = *entries.get(idx)?;
                ((e >> key_bits) as u64, (e & mask) as u64)
            }
            TagVec::DenseShort {
                palette, entries, ..
            } => {
                let e = *entries.get(idx)?;
                let key = *palette.get((e & 0xf) as usize)?;
                ((e >> 4) as u64, key as u64)
            }
            TagVec::ItemIdx { entries, .. } => {
                let e = *entries.get(idx)?;
                (e >> ITEM_SHIFT, e & MAX_VEC_ITEM)
            }
            TagVec::ItemDense { entries, .. } => {
                let e = *entries.get(idx)?;
                (e >> ITEM_SHIFT, e & MAX_VEC_ITEM)
            }
            TagVec::ItemDenseShort { entries, .. } => {
                let bits = layout.short_item_bits();
                let e = *entries.get(idx)?;
                ((e >> bits) as u64, (e & ((1u32 << bits) - 1)) as u64)
            }
        };
        Some((base + offset, raw))
    }
}

/// The windowed history of one tag on one track.
#[derive(Clone, Debug)]
pub struct TagHistory {
    kind: VecKind,
    windows: Vec<TagVec>,
}

impl TagHistory {
    /// Creates an empty history.
    pub fn new(kind: VecKind) -> Self {
        Self {
            kind,
            windows: Vec::new(),
        }
    }

    /// Returns the access pattern of this history.
    pub fn kind(&self) -> VecKind {
        self.kind
    }

    /// Returns the windows in cycle order.
    pub fn windows(&self) -> &[TagVec] {
        &self.windows
    }

    /// Returns the total number of writes.
    pub fn len(&self) -> usize {
        self.windows.iter().map(TagVec::len).sum()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(TagVec::is_empty)
    }

    /// Records a dictionary key (or an item id for [`VecKind::Item`]).
    pub fn add(&mut self, layout: &VecLayout, cycle: Cycle, raw: u64) -> Result<(), TagVecError> {
        let kind = self.kind;
        let window = self.window_for(layout, cycle)?;
        match kind {
            VecKind::Item => {
                let item = ItemId::try_from(raw).map_err(|_| TagVecError::ItemTooLarge(ItemId::MAX))?;
                window.add_item(layout, cycle, item)
            }
            _ => window.add_key(layout, cycle, raw as u32),
        }
    }

    /// Returns `(write cycle, key or item)` answering a query at `cycle`.
    ///
    /// Forward histories fall back to the last write of an earlier window.
    pub fn get(&self, layout: &VecLayout, cycle: Cycle) -> Option<(Cycle, u64)> {
        let idx = self.windows.partition_point(|w| w.base() <= cycle);
        if idx == 0 {
            return None;
        }
        if let Some(hit) = self.windows[idx - 1].get(layout, cycle) {
            return Some(hit);
        }
        if self.kind != VecKind::Forward {
            return None;
        }
        self.windows[..idx - 1]
            .iter()
            .rev()
            .find_map(|w| w.get(layout, Cycle::MAX))
    }

    /// Compresses every window that ends at or before `cycle`.
    ///
    /// Returns how many windows were compressed.
    pub fn compress_before(&mut self, layout: &VecLayout, cycle: Cycle) -> usize {
        let window = layout.window();
        self.windows
            .iter_mut()
            .take_while(|w| w.base().saturating_add(window) <= cycle)
            .filter_map(|w| w.compress(layout).then_some(()))
            .count()
    }

    /// Compresses every window.
    pub fn compress_all(&mut self, layout: &VecLayout) -> usize {
        self.windows
            .iter_mut()
            .filter_map(|w| w.compress(layout).then_some(()))
            .count()
    }

    fn window_for(&mut self, layout: &VecLayout, cycle: Cycle) -> Result<&mut TagVec, TagVecError> {
        let base = layout.window_base(cycle);
        let open_new = match self.windows.last() {
            None => true,
            Some(last) if last.base() == base => false,
            Some(last) if last.base() < base => true,
            Some(last) => {
                return Err(TagVecError::OutOfOrder {
                    cycle,
                    last: last.last_cycle(layout).unwrap_or(last.base()),
                })
            }
        };
        if open_new {
            self.windows.push(TagVec::open(self.kind, base));
        }
        let last = self.windows.len() - 1;
        Ok(&mut self.windows[last])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> VecLayout {
        VecLayout::new(20, 12)
    }

    // ========== Live Vector Tests ==========

    #[test]
    fn test_forward_lookup() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Forward, 0);
        v.add_key(&l, 10, 1).unwrap();
        v.add_key(&l, 20, 2).unwrap();

        assert_eq!(v.get(&l, 9), None);
        assert_eq!(v.get(&l, 10), Some((10, 1)));
        assert_eq!(v.get(&l, 15), Some((10, 1)));
        assert_eq!(v.get(&l, 4000), Some((20, 2)));
    }

    #[test]
    fn test_exact_lookup() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Exact, 0);
        v.add_key(&l, 10, 1).unwrap();
        assert_eq!(v.get(&l, 10), Some((10, 1)));
        assert_eq!(v.get(&l, 11), None);

        let mut items = TagVec::open(VecKind::Item, 4096);
        items.add_item(&l, 4100, 7).unwrap();
        assert_eq!(items.get(&l, 4100), Some((4100, 7)));
        assert_eq!(items.get(&l, 4101), None);
    }

    #[test]
    fn test_same_cycle_replaces() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Forward, 0);
        v.add_key(&l, 5, 1).unwrap();
        v.add_key(&l, 5, 2).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.get(&l, 5), Some((5, 2)));
    }

    #[test]
    fn test_write_errors() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Forward, 0);
        v.add_key(&l, 50, 1).unwrap();
        assert_eq!(
            v.add_key(&l, 40, 1),
            Err(TagVecError::OutOfOrder { cycle: 40, last: 50 })
        );
        assert_eq!(v.add_item(&l, 60, 1), Err(TagVecError::WrongEncoding));

        let mut items = TagVec::open(VecKind::Item, 0);
        assert_eq!(
            items.add_item(&l, 1, u32::MAX),
            Err(TagVecError::ItemTooLarge(u32::MAX))
        );

        v.compress(&l);
        assert_eq!(v.add_key(&l, 60, 1), Err(TagVecError::Compressed(0)));
    }

    // ========== Compression Tests ==========

    #[test]
    fn test_compress_short_palette() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Forward, 0);
        for c in 0..40u64 {
            v.add_key(&l, c * 10, (c % 3) as u32 + 100).unwrap();
        }
        let before: Vec<_> = (0..400).map(|c| v.get(&l, c)).collect();
        assert!(v.compress(&l));
        assert_eq!(v.encoding(), "dense-short");
        assert!(v.is_forward());
        let after: Vec<_> = (0..400).map(|c| v.get(&l, c)).collect();
        assert_eq!(before, after);
        assert!(!v.compress(&l));
    }

    #[test]
    fn test_compress_wide_palette() {
        let l = layout();
        let mut v = TagVec::open(VecKind::Exact, 0);
        for c in 0..20u64 {
            v.add_key(&l, c, c as u32).unwrap();
        }
        v.compress(&l);
        assert_eq!(v.encoding(), "dense");
        assert_eq!(v.get(&l, 19), Some((19, 19)));
        assert_eq!(v.get(&l, 20), None);
    }

    #[test]
    fn test_compress_items() {
        let l = layout();
        let mut small = TagVec::open(VecKind::Item, 0);
        small.add_item(&l, 3, 1000).unwrap();
        small.compress(&l);
        assert_eq!(small.encoding(), "item-dense-short");
        assert_eq!(small.get(&l, 3), Some((3, 1000)));

        let mut large = TagVec::open(VecKind::Item, 0);
        large.add_item(&l, 3, 1 << 30).unwrap();
        large.compress(&l);
        assert_eq!(large.encoding(), "item-dense");
        assert_eq!(large.get(&l, 3), Some((3, 1 << 30)));
    }

    // ========== History Tests ==========

    #[test]
    fn test_history_crosses_windows() {
        let l = VecLayout::new(20, 4);
        let mut h = TagHistory::new(VecKind::Forward);
        h.add(&l, 3, 1).unwrap();
        h.add(&l, 40, 2).unwrap();
        assert_eq!(h.windows().len(), 2);

        assert_eq!(h.get(&l, 20), Some((3, 1)));
        assert_eq!(h.get(&l, 33), Some((3, 1)));
        assert_eq!(h.get(&l, 41), Some((40, 2)));
        assert_eq!(h.get(&l, 2), None);
    }

    #[test]
    fn test_history_exact_does_not_fall_back() {
        let l = VecLayout::new(20, 4);
        let mut h = TagHistory::new(VecKind::Item);
        h.add(&l, 3, 9).unwrap();
        h.add(&l, 40, 10).unwrap();
        assert_eq!(h.get(&l, 3), Some((3, 9)));
        assert_eq!(h.get(&l, 35), None);
    }

    #[test]
    fn test_history_rejects_older_window() {
        let l = VecLayout::new(20, 4);
        let mut h = TagHistory::new(VecKind::Forward);
        h.add(&l, 40, 1).unwrap();
        assert_eq!(
            h.add(&l, 5, 1),
            Err(TagVecError::OutOfOrder { cycle: 5, last: 40 })
        );
    }

    #[test]
    fn test_compress_before() {
        let l = VecLayout::new(20, 4);
        let mut h = TagHistory::new(VecKind::Forward);
        for c in [1u64, 17, 33, 49] {
            h.add(&l, c, c).unwrap();
        }
        assert_eq!(h.compress_before(&l, 40), 2);
        assert!(h.windows()[1].is_compressed());
        assert!(!h.windows()[2].is_compressed());
        assert_eq!(h.get(&l, 20), Some((17, 17)));
        assert_eq!(h.compress_all(&l), 2);
    }
}
