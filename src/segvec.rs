//! Segmented growable array.
//!
//! [`SegmentedVec`] is randomly indexable like a `Vec`, but storage is
//! allocated in fixed-size segments on first write. Writing index 10^8 only
//! materializes the segment that contains it, so sparse high ids (item ids,
//! node ids) never force a huge contiguous allocation.

/// Default log2 of the segment length.
pub const DEFAULT_SEGMENT_BITS: u32 = 12;

/// A randomly indexable container allocated in fixed-size segments.
#[derive(Clone, Debug)]
pub struct SegmentedVec<T> {
    segments: Vec<Option<Box<[T]>>>,
    segment_bits: u32,
    len: usize,
}

impl<T: Default + Clone> Default for SegmentedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Clone> SegmentedVec<T> {
    /// Creates an empty container with the default segment size.
    pub fn new() -> Self {
        Self::with_segment_bits(DEFAULT_SEGMENT_BITS)
    }

    /// Creates an empty container with segments of `1 << bits` elements.
    pub fn with_segment_bits(bits: u32) -> Self {
        Self {
            segments: Vec::new(),
            segment_bits: bits.clamp(1, 24),
            len: 0,
        }
    }

    /// Returns the number of elements per segment.
    pub fn segment_len(&self) -> usize {
        1 << self.segment_bits
    }

    /// Returns one past the highest index ever written.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of materialized segments.
    pub fn allocated_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    #[inline]
    fn split(&self, index: usize) -> (usize, usize) {
        (index >> self.segment_bits, index & (self.segment_len() - 1))
    }

    /// Returns the element at `index`, or `None` if its segment was never written.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let (seg, off) = self.split(index);
        self.segments.get(seg)?.as_ref().map(|s| &s[off])
    }

    /// Returns a mutable reference, or `None` if the segment was never written.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let (seg, off) = self.split(index);
        self.segments.get_mut(seg)?.as_mut().map(|s| &mut s[off])
    }

    /// Returns a mutable reference, materializing the segment if needed.
    pub fn get_or_default(&mut self, index: usize) -> &mut T {
        let (seg, off) = self.split(index);
        let seg_len = self.segment_len();
        if seg >= self.segments.len() {
            self.segments.resize_with(seg + 1, || None);
        }
        if index >= self.len {
            self.len = index + 1;
        }
        let segment = self.segments[seg].get_or_insert_with(|| vec![T::default(); seg_len].into_boxed_slice());
        &mut segment[off]
    }

    /// Stores `value` at `index`.
    pub fn set(&mut self, index: usize, value: T) {
        *self.get_or_default(index) = value;
    }

    /// Appends `value` after the highest written index.
    pub fn push(&mut self, value: T) -> usize {
        let index = self.len;
        self.set(index, value);
        index
    }

    /// Drops every segment lying entirely below `index`.
    ///
    /// Released elements read as `None`, like never-written ones; `len` is
    /// unchanged. Returns the number of segments dropped.
    pub fn release_before(&mut self, index: usize) -> usize {
        let whole = index.min(self.len) >> self.segment_bits;
        self.segments
            .iter_mut()
            .take(whole)
            .filter_map(Option::take)
            .count()
    }

    /// Drops every segment.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    /// Iterates over `(index, element)` for every materialized element.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        let seg_len = self.segment_len();
        let len = self.len;
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
            .flat_map(move |(i, s)| {
                s.iter()
                    .enumerate()
                    .map(move |(off, v)| (i * seg_len + off, v))
            })
            .take_while(move |(index, _)| *index < len)
    }
}
