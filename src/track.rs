//! Track heap.
//!
//! A track is a subscription to one projection of the trace: items entering
//! or leaving a node slot, items crossing an edge lane, the tags of a node
//! (or one of its slots) or the cycle-global tags. Tracks are deduplicated
//! by their canonical name, so opening the same projection twice returns the
//! same [`TrackId`].
//!
//! A track may also be subscribed before the node, slot or edge it follows
//! has been defined, so that a client can set up its tracks and then ingest
//! a whole trace. Such a deferred track records writes from the start and
//! receives its canonical name once the topology catches up.
//!
//! Each track keeps one [`TagHistory`] per tag it has seen. Item-carrying
//! tracks store item ids under [`ITEMID_TAG`]; tag tracks store keys of the
//! heap-wide [`ValueDictionary`].

use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dict::ValueDictionary;
use crate::error::{DbError, DbResult, GraphError};
use crate::graph::{DbGraph, NodeSlot};
use crate::tagdesc::ITEMID_TAG;
use crate::tagvec::{TagHistory, VecKind, VecLayout};
use crate::types::{Cycle, DictKey, EdgeId, ItemId, NodeId, TagId, TrackId};

/// The projection a track follows. An empty slot means the whole node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    EnterNode { node: NodeId, slot: NodeSlot },
    ExitNode { node: NodeId, slot: NodeSlot },
    NodeTags { node: NodeId, slot: NodeSlot },
    MoveItem { edge: EdgeId, position: u32 },
    CycleTags,
}

impl TrackKind {
    /// Returns the canonical name, validating node slots and edges.
    pub fn canonical_name(&self, graph: &DbGraph) -> DbResult<String> {
        let name = match self {
            TrackKind::EnterNode { node, slot } => {
                format!("enter:{}", graph.slotted_node_name(*node, slot)?)
            }
            TrackKind::ExitNode { node, slot } => {
                format!("exit:{}", graph.slotted_node_name(*node, slot)?)
            }
            TrackKind::NodeTags { node, slot } => {
                format!("node:{}", graph.slotted_node_name(*node, slot)?)
            }
            TrackKind::MoveItem { edge, position } => {
                graph.edge(*edge).ok_or(GraphError::UnknownEdge(*edge))?;
                format!("move:{}@{}", edge, position)
            }
            TrackKind::CycleTags => "cycle".to_string(),
        };
        Ok(name)
    }

    /// Returns the history kind used for regular (non item-id) tags.
    fn tag_kind(&self) -> VecKind {
        match self {
            TrackKind::CycleTags => VecKind::Exact,
            _ => VecKind::Forward,
        }
    }
}

/// Outcome of a track query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackLookup<V> {
    /// A value is recorded for the queried cycle
    Value(V),
    /// A write is expected but has not arrived yet
    Pending,
    /// Nothing is recorded
    Absent,
}

impl<V> TrackLookup<V> {
    /// Maps the contained value.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> TrackLookup<U> {
        match self {
            TrackLookup::Value(v) => TrackLookup::Value(f(v)),
            TrackLookup::Pending => TrackLookup::Pending,
            TrackLookup::Absent => TrackLookup::Absent,
        }
    }

    /// Returns the value, if any.
    pub fn value(self) -> Option<V> {
        match self {
            TrackLookup::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TrackLookup::Pending)
    }
}

/// One subscription and its recorded history.
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    kind: TrackKind,
    name: String,
    tags: HashMap<TagId, TagHistory>,
    /// Items that entered the slot of an exit track and have not left it
    pending: HashMap<ItemId, Cycle>,
}

impl Track {
    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> &TrackKind {
        &self.kind
    }

    /// Returns the canonical name, empty while the track is deferred.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns false while the track waits for its topology.
    pub fn is_bound(&self) -> bool {
        !self.name.is_empty()
    }

    /// Returns the history of one tag.
    pub fn history(&self, tag: TagId) -> Option<&TagHistory> {
        self.tags.get(&tag)
    }

    /// Iterates over the tags this track has recorded.
    pub fn tags(&self) -> impl Iterator<Item = TagId> + '_ {
        self.tags.keys().copied()
    }

    fn write(&mut self, layout: &VecLayout, tag: TagId, kind: VecKind, cycle: Cycle, raw: u64) -> DbResult<()> {
        self.tags
            .entry(tag)
            .or_insert_with(|| TagHistory::new(kind))
            .add(layout, cycle, raw)?;
        Ok(())
    }

    fn compress_before(&mut self, layout: &VecLayout, cycle: Cycle) -> usize {
        self.tags
            .values_mut()
            .map(|h| h.compress_before(layout, cycle))
            .sum()
    }

    fn compress_all(&mut self, layout: &VecLayout) -> usize {
        self.tags.values_mut().map(|h| h.compress_all(layout)).sum()
    }
}

/// Store of every open track.
#[derive(Clone, Debug)]
pub struct TrackHeap {
    layout: VecLayout,
    dict: ValueDictionary,
    tracks: Vec<Track>,
    routes: HashMap<TrackKind, TrackId>,
    names: HashMap<String, TrackId>,
    deferred: Vec<TrackId>,
    auto_compress: bool,
    /// Latest cycle the heap has seen
    now: Cycle,
    compressed_until: Cycle,
    compressions: u64,
    writes: u64,
}

impl TrackHeap {
    /// Creates a heap with `key_bits` dictionary keys and windows of
    /// `1 << window_bits` cycles.
    pub fn new(key_bits: u8, window_bits: u8, auto_compress: bool) -> Self {
        Self {
            layout: VecLayout::new(key_bits, window_bits),
            dict: ValueDictionary::new(key_bits),
            tracks: Vec::new(),
            routes: HashMap::new(),
            names: HashMap::new(),
            deferred: Vec::new(),
            auto_compress,
            now: 0,
            compressed_until: 0,
            compressions: 0,
            writes: 0,
        }
    }

    /// Returns the vector layout shared by every track.
    pub fn layout(&self) -> VecLayout {
        self.layout
    }

    /// Opens (or returns the existing) track for `kind`.
    pub fn open(&mut self, graph: &DbGraph, kind: TrackKind) -> DbResult<TrackId> {
        if let Some(&id) = self.routes.get(&kind) {
            return Ok(id);
        }
        let name = kind.canonical_name(graph)?;
        let id = self.push_track(kind, name.clone());
        debug!(track = id, name = %name, "opened track");
        self.names.insert(name, id);
        Ok(id)
    }

    /// Opens the track for `kind`, deferring it if the graph does not define
    /// its node, slot or edge yet.
    ///
    /// A deferred track records writes right away; [`TrackHeap::bind_deferred`]
    /// names it once the topology is complete.
    pub fn subscribe(&mut self, graph: &DbGraph, kind: TrackKind) -> DbResult<TrackId> {
        match self.open(graph, kind.clone()) {
            Err(DbError::Graph(reason)) => {
                let id = self.push_track(kind, String::new());
                debug!(track = id, %reason, "deferred track");
                self.deferred.push(id);
                Ok(id)
            }
            opened => opened,
        }
    }

    /// Names every deferred track whose topology the graph now defines.
    ///
    /// Returns the number of tracks bound.
    pub fn bind_deferred(&mut self, graph: &DbGraph) -> usize {
        if self.deferred.is_empty() {
            return 0;
        }
        let mut bound = 0;
        for id in std::mem::take(&mut self.deferred) {
            let Some(track) = self.tracks.get_mut(id as usize) else {
                continue;
            };
            match track.kind.canonical_name(graph) {
                Ok(name) => {
                    debug!(track = id, name = %name, "bound deferred track");
                    self.names.insert(name.clone(), id);
                    track.name = name;
                    bound += 1;
                }
                Err(_) => self.deferred.push(id),
            }
        }
        bound
    }

    /// Returns the number of tracks still waiting for their topology.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn push_track(&mut self, kind: TrackKind, name: String) -> TrackId {
        let id = self.tracks.len() as TrackId;
        self.routes.insert(kind.clone(), id);
        self.tracks.push(Track {
            id,
            kind,
            name,
            tags: HashMap::new(),
            pending: HashMap::new(),
        });
        id
    }

    pub fn track_enter_node(&mut self, graph: &DbGraph, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.open(
            graph,
            TrackKind::EnterNode {
                node,
                slot: slot.to_vec(),
            },
        )
    }

    pub fn track_exit_node(&mut self, graph: &DbGraph, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.open(
            graph,
            TrackKind::ExitNode {
                node,
                slot: slot.to_vec(),
            },
        )
    }

    pub fn track_node_tags(&mut self, graph: &DbGraph, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.open(
            graph,
            TrackKind::NodeTags {
                node,
                slot: slot.to_vec(),
            },
        )
    }

    pub fn track_move_item(&mut self, graph: &DbGraph, edge: EdgeId, position: u32) -> DbResult<TrackId> {
        self.open(graph, TrackKind::MoveItem { edge, position })
    }

    pub fn track_cycle_tags(&mut self, graph: &DbGraph) -> DbResult<TrackId> {
        self.open(graph, TrackKind::CycleTags)
    }

    /// Returns a track by id.
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id as usize)
    }

    /// Returns the id of a track by canonical name.
    pub fn find(&self, name: &str) -> Option<TrackId> {
        self.names.get(name).copied()
    }

    /// Records an item entering a node slot.
    ///
    /// Exit tracks of the same slot start expecting the item.
    pub fn record_enter(&mut self, node: NodeId, slot: &[u32], item: ItemId, cycle: Cycle) -> DbResult<()> {
        self.now = self.now.max(cycle);
        for id in self.slot_routes(node, slot, |node, slot| TrackKind::EnterNode { node, slot }) {
            self.write_item(id, item, cycle)?;
        }
        for id in self.slot_routes(node, slot, |node, slot| TrackKind::ExitNode { node, slot }) {
            self.tracks[id as usize].pending.insert(item, cycle);
        }
        Ok(())
    }

    /// Records an item leaving a node slot.
    pub fn record_exit(&mut self, node: NodeId, slot: &[u32], item: ItemId, cycle: Cycle) -> DbResult<()> {
        for id in self.slot_routes(node, slot, |node, slot| TrackKind::ExitNode { node, slot }) {
            self.tracks[id as usize].pending.remove(&item);
            self.write_item(id, item, cycle)?;
        }
        Ok(())
    }

    /// Records items crossing an edge, one lane each.
    pub fn record_move(&mut self, edge: EdgeId, items: &[(ItemId, u32)], cycle: Cycle) -> DbResult<()> {
        for &(item, position) in items {
            if let Some(&id) = self.routes.get(&TrackKind::MoveItem { edge, position }) {
                self.write_item(id, item, cycle)?;
            }
        }
        Ok(())
    }

    /// Records a node (or node slot) tag value.
    pub fn record_node_tag(&mut self, node: NodeId, slot: &[u32], tag: TagId, raw: u64, cycle: Cycle) -> DbResult<()> {
        let kind = TrackKind::NodeTags {
            node,
            slot: slot.to_vec(),
        };
        match self.routes.get(&kind) {
            Some(&id) => self.write_value(id, tag, raw, cycle),
            None => Ok(()),
        }
    }

    /// Records a cycle-global tag value.
    pub fn record_cycle_tag(&mut self, tag: TagId, raw: u64, cycle: Cycle) -> DbResult<()> {
        match self.routes.get(&TrackKind::CycleTags) {
            Some(&id) => self.write_value(id, tag, raw, cycle),
            None => Ok(()),
        }
    }

    /// Returns the raw value of `tag` on a track as seen at `cycle`.
    ///
    /// Item-carrying tracks answer with an item id; tag tracks answer with
    /// the raw value the dictionary held when it was written.
    pub fn get(&self, id: TrackId, tag: TagId, cycle: Cycle) -> DbResult<TrackLookup<u64>> {
        let track = self.track(id).ok_or(DbError::UnknownTrack(id))?;

        if let Some(history) = track.tags.get(&tag) {
            if let Some((written, raw)) = history.get(&self.layout, cycle) {
                let value = match history.kind() {
                    VecKind::Item => Some(raw),
                    _ => self.dict.lookup(raw as DictKey, written),
                };
                if let Some(value) = value {
                    return Ok(TrackLookup::Value(value));
                }
            }
        }

        // Writes only land at the current cycle or later, so a past cycle
        // with no value is settled even while an item is still inside.
        if tag == ITEMID_TAG
            && cycle >= self.now
            && track.pending.values().any(|&since| since <= cycle)
        {
            return Ok(TrackLookup::Pending);
        }
        Ok(TrackLookup::Absent)
    }

    /// Returns the number of writes an exit track is still waiting for.
    pub fn pending_writes(&self, id: TrackId) -> DbResult<usize> {
        self.track(id)
            .map(|t| t.pending.len())
            .ok_or(DbError::UnknownTrack(id))
    }

    /// Advances the heap clock, compressing windows the trace has left.
    ///
    /// Returns the number of windows compressed.
    pub fn on_cycle(&mut self, cycle: Cycle) -> usize {
        self.now = self.now.max(cycle);
        if !self.auto_compress {
            return 0;
        }
        let base = self.layout.window_base(cycle);
        if base <= self.compressed_until {
            return 0;
        }
        self.compressed_until = base;
        let layout = self.layout;
        let count: usize = self
            .tracks
            .iter_mut()
            .map(|t| t.compress_before(&layout, base))
            .sum();
        if count > 0 {
            trace!(cycle, windows = count, "compressed closed windows");
        }
        self.compressions += count as u64;
        count
    }

    /// Compresses every window of every track.
    #[cfg(feature = "parallel")]
    pub fn compress_all(&mut self) -> usize {
        let layout = self.layout;
        let count: usize = self
            .tracks
            .par_iter_mut()
            .map(|t| t.compress_all(&layout))
            .sum();
        self.finish_compress(count)
    }

    /// Compresses every window of every track.
    #[cfg(not(feature = "parallel"))]
    pub fn compress_all(&mut self) -> usize {
        let layout = self.layout;
        let count: usize = self
            .tracks
            .iter_mut()
            .map(|t| t.compress_all(&layout))
            .sum();
        self.finish_compress(count)
    }

    /// Returns the number of open tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Returns the number of windows compressed so far.
    pub fn compressions(&self) -> u64 {
        self.compressions
    }

    /// Returns the number of values recorded.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Iterates over every track.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    fn finish_compress(&mut self, count: usize) -> usize {
        self.compressions += count as u64;
        debug!(windows = count, tracks = self.tracks.len(), "compressed all tracks");
        count
    }

    /// Tracks subscribed to `slot` and to the whole node.
    fn slot_routes(
        &self,
        node: NodeId,
        slot: &[u32],
        make: impl Fn(NodeId, NodeSlot) -> TrackKind,
    ) -> Vec<TrackId> {
        let mut ids = Vec::with_capacity(2);
        if let Some(&id) = self.routes.get(&make(node, slot.to_vec())) {
            ids.push(id);
        }
        if !slot.is_empty() {
            if let Some(&id) = self.routes.get(&make(node, Vec::new())) {
                ids.push(id);
            }
        }
        ids
    }

    fn write_item(&mut self, id: TrackId, item: ItemId, cycle: Cycle) -> DbResult<()> {
        self.now = self.now.max(cycle);
        let layout = self.layout;
        let track = self
            .tracks
            .get_mut(id as usize)
            .ok_or(DbError::UnknownTrack(id))?;
        track.write(&layout, ITEMID_TAG, VecKind::Item, cycle, item as u64)?;
        self.writes += 1;
        Ok(())
    }

    fn write_value(&mut self, id: TrackId, tag: TagId, raw: u64, cycle: Cycle) -> DbResult<()> {
        let key = self.dict.insert(raw, cycle)?;
        let layout = self.layout;
        let track = self
            .tracks
            .get_mut(id as usize)
            .ok_or(DbError::UnknownTrack(id))?;
        let kind = track.kind.tag_kind();
        track.write(&layout, tag, kind, cycle, key as u64)?;
        self.writes += 1;
        Ok(())
    }
}
