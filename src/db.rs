//! Tag store session.
//!
//! [`DralDb`] owns every store of one trace: the graph topology, tag
//! descriptors, intern tables, the item tag heap and the track heap. It
//! implements [`DralListener`], so a decoder can feed it directly:
//!
//! ```
//! use dralkit::codec::{DralDecoder, DralEncoder, WireVersion};
//! use dralkit::config::DbConfig;
//! use dralkit::db::DralDb;
//! use dralkit::event::DralEvent;
//! use dralkit::io::ByteSink;
//! use dralkit::types::TagValue;
//!
//! let mut enc = DralEncoder::new(ByteSink::new(Vec::new(), false, 4096), WireVersion::V2).unwrap();
//! for event in [
//!     DralEvent::Cycle(10),
//!     DralEvent::NewItem(7),
//!     DralEvent::SetItemTag { item_id: 7, tag: "age".into(), value: TagValue::Integer(5) },
//! ] {
//!     enc.encode(&event).unwrap();
//! }
//! let bytes = enc.finish().unwrap();
//!
//! let mut db = DralDb::new(DbConfig::default());
//! db.ingest(&mut DralDecoder::from_reader(std::io::Cursor::new(bytes), false));
//! assert_eq!(db.get_item_tag(7, "age", 10).unwrap(), TagValue::Integer(5));
//! assert!(db.get_item_tag(7, "age", 9).is_err());
//! ```
//!
//! Logical errors (duplicate ids, type mismatches, unknown items) never stop
//! ingestion: they are logged, counted in [`IngestStats`] and the offending
//! event is dropped.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::codec::DralDecoder;
use crate::config::DbConfig;
use crate::error::{DbError, DbResult, DralResult, GraphError};
use crate::event::{DralEvent, DralListener};
use crate::graph::{DbClock, DbGraph};
use crate::item_heap::{ItemTagHeap, TagFact};
use crate::stats::{IngestStats, Timer};
use crate::strings::{SetTable, StrTable};
use crate::tagdesc::{TagDescriptors, ITEMID_TAG};
use crate::track::{TrackHeap, TrackKind, TrackLookup};
use crate::types::{
    ClockId, Cycle, EdgeId, ItemId, NodeId, StrId, TagId, TagValue, TagValueType, TrackId,
};

/// A session shared between an ingesting thread and readers.
pub type SharedDb = Arc<RwLock<DralDb>>;

/// A resolved item tag fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFact {
    pub tag: String,
    pub cycle: Cycle,
    pub value: TagValue,
}

/// The tag store of one trace.
pub struct DralDb {
    config: DbConfig,
    graph: DbGraph,
    tags: TagDescriptors,
    strings: StrTable,
    sets: SetTable,
    items: ItemTagHeap,
    tracks: TrackHeap,
    cycle: Cycle,
    last_purge: Cycle,
    stats: IngestStats,
    comments: Vec<(u32, String)>,
    binary_comments: Vec<(u32, Vec<u8>)>,
    ended: bool,
}

impl DralDb {
    /// Creates an empty session.
    pub fn new(config: DbConfig) -> Self {
        let mut items = ItemTagHeap::new(config.item_cache_size);
        items.set_backpropagate(config.backpropagate);
        items.set_max_age(config.max_item_age);
        let tracks = TrackHeap::new(
            config.dictionary_bits,
            config.track_window_bits,
            config.auto_compress,
        );
        Self {
            tags: TagDescriptors::from_config(&config),
            graph: DbGraph::new(),
            strings: StrTable::new(),
            sets: SetTable::new(),
            items,
            tracks,
            cycle: 0,
            last_purge: 0,
            stats: IngestStats::new(),
            comments: Vec::new(),
            binary_comments: Vec::new(),
            ended: false,
            config,
        }
    }

    /// Opens and ingests a trace file.
    ///
    /// Only failures to open the file are returned; decode errors are
    /// recorded in [`stats`](Self::stats).
    pub fn load<P: AsRef<Path>>(path: P, config: DbConfig) -> DralResult<Self> {
        let path = path.as_ref();
        let mut decoder = DralDecoder::open_with_buffer(path, config.io_buffer_size)?;
        let mut db = Self::new(config);
        db.stats.metadata.source = Some(path.display().to_string());
        info!(path = %path.display(), "loading trace");
        db.ingest(&mut decoder);
        Ok(db)
    }

    /// Drains `decoder` into the store and returns the session statistics.
    pub fn ingest(&mut self, decoder: &mut DralDecoder) -> IngestStats {
        let timer = Timer::start();
        let delivered = decoder.run(self);

        self.stats.metadata.version = decoder.version().map(|v| v.name().to_string());
        self.stats.metadata.bytes_read = decoder.bytes_consumed();
        self.refresh_store_stats();
        self.stats.compute_timing(timer.elapsed_ms());
        info!(
            events = delivered,
            items = self.stats.store.items_created,
            errors = self.stats.events.errors,
            non_critical = self.stats.events.non_critical_errors,
            wall_ms = self.stats.timing.total_wall_time_ms,
            "trace ingested"
        );
        self.stats.clone()
    }

    /// Wraps the session for shared access.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(RwLock::new(self))
    }

    /// Applies one event and returns the store-level outcome.
    pub fn apply(&mut self, event: &DralEvent) -> DbResult<()> {
        self.stats.record_event(event.kind());
        match event {
            DralEvent::Version(v) => {
                debug!(version = v, "trace version");
                Ok(())
            }
            DralEvent::Cycle(c) => {
                self.on_cycle(*c);
                Ok(())
            }
            DralEvent::CycleWithClock { clock_id, cycle, phase } => self.on_clock(*clock_id, *cycle, *phase),
            DralEvent::NewClock {
                id,
                frequency,
                skew,
                divisions,
                name,
            } => self.on_new_clock(*id, *frequency, *skew, *divisions, name),
            DralEvent::SetNodeClock { node_id, clock_id } => Ok(self.graph.set_node_clock(*node_id, *clock_id)?),
            DralEvent::NewNode {
                id,
                name,
                parent_id,
                instance,
            } => {
                self.graph.add_node(*id, name, *parent_id, *instance)?;
                self.topology_changed();
                Ok(())
            }
            DralEvent::NewEdge {
                id,
                src,
                dst,
                bandwidth,
                latency,
                name,
            } => {
                self.graph.add_edge(*id, *src, *dst, *bandwidth, *latency, name)?;
                self.topology_changed();
                Ok(())
            }
            DralEvent::SetNodeLayout { node_id, capacities } => {
                self.graph.set_node_layout(*node_id, capacities)?;
                self.topology_changed();
                Ok(())
            }
            DralEvent::SetNodeInputBandwidth { node_id, bandwidth } => {
                Ok(self.graph.set_input_bandwidth(*node_id, *bandwidth)?)
            }
            DralEvent::SetNodeOutputBandwidth { node_id, bandwidth } => {
                Ok(self.graph.set_output_bandwidth(*node_id, *bandwidth)?)
            }
            DralEvent::SetHighWaterMark { node_id, mark } => Ok(self.graph.set_high_water_mark(*node_id, *mark)?),
            DralEvent::NewItem(id) => self.on_new_item(*id),
            DralEvent::DeleteItem(id) => self.on_delete_item(*id),
            DralEvent::SetItemTag { item_id, tag, value } => self.on_item_tag(*item_id, tag, value),
            DralEvent::MoveItems { edge_id, items } => self.on_move(*edge_id, items),
            DralEvent::EnterNode {
                node_id,
                item_id,
                position,
            } => self.on_enter(*node_id, *item_id, position),
            DralEvent::ExitNode {
                node_id,
                item_id,
                position,
            } => self.on_exit(*node_id, *item_id, position),
            DralEvent::SetNodeTag {
                node_id,
                tag,
                value,
                slot,
            } => self.on_node_tag(*node_id, tag, value, slot),
            DralEvent::SetCycleTag { tag, value } => self.on_cycle_tag(tag, value),
            DralEvent::Comment { magic, text } => {
                self.comments.push((*magic, text.clone()));
                Ok(())
            }
            DralEvent::CommentBin { magic, bytes } => {
                self.binary_comments.push((*magic, bytes.clone()));
                Ok(())
            }
            DralEvent::SetTagDescription { tag, text } => {
                self.tags.set_description(tag, text);
                Ok(())
            }
            DralEvent::NewTag { .. } | DralEvent::NewStringValue { .. } => Ok(()),
            DralEvent::Error(message) => {
                self.stats.record_error(message);
                Ok(())
            }
            DralEvent::EndSimulation => {
                self.on_end();
                Ok(())
            }
        }
    }

    // ---- queries ----

    /// Returns the value of an item tag as seen at `cycle`.
    pub fn get_item_tag(&self, item: ItemId, tag: &str, cycle: Cycle) -> DbResult<TagValue> {
        let id = self.tags.require(tag)?;
        let fact = self.items.get_tag(item, id, cycle)?;
        self.fact_value(&fact)
    }

    /// Returns every fact of an item, resolved, in write order.
    pub fn item_facts(&self, item: ItemId) -> DbResult<Vec<ItemFact>> {
        self.items
            .facts(item)?
            .iter()
            .map(|fact| {
                Ok(ItemFact {
                    tag: self.tags.name(fact.tag).unwrap_or_default().to_string(),
                    cycle: fact.cycle,
                    value: self.fact_value(fact)?,
                })
            })
            .collect()
    }

    pub fn track_enter_node(&mut self, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.tracks.track_enter_node(&self.graph, node, slot)
    }

    pub fn track_exit_node(&mut self, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.tracks.track_exit_node(&self.graph, node, slot)
    }

    pub fn track_node_tags(&mut self, node: NodeId, slot: &[u32]) -> DbResult<TrackId> {
        self.tracks.track_node_tags(&self.graph, node, slot)
    }

    pub fn track_move_item(&mut self, edge: EdgeId, position: u32) -> DbResult<TrackId> {
        self.tracks.track_move_item(&self.graph, edge, position)
    }

    pub fn track_cycle_tags(&mut self) -> DbResult<TrackId> {
        self.tracks.track_cycle_tags(&self.graph)
    }

    /// Opens a track that may follow a node, slot or edge the trace has not
    /// defined yet.
    ///
    /// Unlike the `track_*` calls this accepts unknown topology: the track
    /// records from the first matching event and takes its canonical name
    /// when the definition arrives. Subscribe first, then [`ingest`] to
    /// follow a whole trace.
    ///
    /// [`ingest`]: DralDb::ingest
    pub fn subscribe(&mut self, kind: TrackKind) -> DbResult<TrackId> {
        self.tracks.subscribe(&self.graph, kind)
    }

    /// Returns the value of `tag` on a track as seen at `cycle`.
    pub fn track_value(&self, track: TrackId, tag: &str, cycle: Cycle) -> DbResult<TrackLookup<TagValue>> {
        let id = self.tags.require(tag)?;
        match self.tracks.get(track, id, cycle)? {
            TrackLookup::Value(raw) => Ok(TrackLookup::Value(self.raw_value(id, raw)?)),
            TrackLookup::Pending => Ok(TrackLookup::Pending),
            TrackLookup::Absent => Ok(TrackLookup::Absent),
        }
    }

    /// Returns the item recorded on an item-carrying track at `cycle`.
    pub fn track_item(&self, track: TrackId, cycle: Cycle) -> DbResult<TrackLookup<ItemId>> {
        Ok(self
            .tracks
            .get(track, ITEMID_TAG, cycle)?
            .map(|raw| raw as ItemId))
    }

    /// Formats a value using the display base of `tag`.
    pub fn format_tag_value(&self, tag: &str, value: &TagValue) -> DbResult<String> {
        let id = self.tags.require(tag)?;
        Ok(self.tags.format_value(id, value))
    }

    /// Returns the statistics with store counters refreshed.
    pub fn stats(&mut self) -> &IngestStats {
        self.refresh_store_stats();
        &self.stats
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn graph(&self) -> &DbGraph {
        &self.graph
    }

    pub fn tags(&self) -> &TagDescriptors {
        &self.tags
    }

    pub fn strings(&self) -> &StrTable {
        &self.strings
    }

    pub fn items(&self) -> &ItemTagHeap {
        &self.items
    }

    pub fn tracks(&self) -> &TrackHeap {
        &self.tracks
    }

    /// Returns the current cycle.
    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Returns the text comments in trace order.
    pub fn comments(&self) -> &[(u32, String)] {
        &self.comments
    }

    /// Returns the binary comments in trace order.
    pub fn binary_comments(&self) -> &[(u32, Vec<u8>)] {
        &self.binary_comments
    }

    /// Returns true once the trace has ended.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    // ---- event handlers ----

    fn on_cycle(&mut self, cycle: Cycle) {
        self.cycle = cycle;

        if self.config.max_item_age.is_some()
            && cycle >= self.last_purge.saturating_add(self.config.purge_interval)
        {
            self.last_purge = cycle;
            let purged = self.items.purge(cycle);
            self.stats.store.items_purged += purged;
        }
        self.tracks.on_cycle(cycle);
    }

    fn on_clock(&mut self, clock: ClockId, cycle: Cycle, phase: u8) -> DbResult<()> {
        self.graph.advance_clock(clock, cycle, phase)?;
        Ok(())
    }

    fn on_new_clock(&mut self, id: ClockId, frequency: u64, skew: u16, divisions: u16, name: &str) -> DbResult<()> {
        self.graph
            .add_clock(DbClock::new(id, frequency, skew, divisions, name))?;
        Ok(())
    }

    fn on_new_item(&mut self, id: ItemId) -> DbResult<()> {
        self.items.new_item(id, self.cycle)?;
        self.stats.store.items_created += 1;
        Ok(())
    }

    fn on_delete_item(&mut self, id: ItemId) -> DbResult<()> {
        self.items.delete_item(id, self.cycle)?;
        self.stats.store.items_deleted += 1;
        Ok(())
    }

    fn on_item_tag(&mut self, item: ItemId, tag: &str, value: &TagValue) -> DbResult<()> {
        let (id, raw) = self.intern_value(tag, value)?;
        let mutable = self.tags.is_mutable(id);
        self.items
            .set_tag(item, id, raw, value.value_type(), mutable, self.cycle)
    }

    fn on_move(&mut self, edge: EdgeId, items: &[(ItemId, u32)]) -> DbResult<()> {
        if self.graph.edge(edge).is_none() {
            return Err(GraphError::UnknownEdge(edge).into());
        }
        self.tracks.record_move(edge, items, self.cycle)
    }

    fn on_enter(&mut self, node: NodeId, item: ItemId, position: &[u32]) -> DbResult<()> {
        self.require_node(node)?;
        self.tracks.record_enter(node, position, item, self.cycle)
    }

    fn on_exit(&mut self, node: NodeId, item: ItemId, position: &[u32]) -> DbResult<()> {
        self.require_node(node)?;
        self.tracks.record_exit(node, position, item, self.cycle)
    }

    fn on_node_tag(&mut self, node: NodeId, tag: &str, value: &TagValue, slot: &[u32]) -> DbResult<()> {
        self.require_node(node)?;
        let (id, raw) = self.intern_value(tag, value)?;
        self.tracks.record_node_tag(node, slot, id, raw, self.cycle)
    }

    fn on_cycle_tag(&mut self, tag: &str, value: &TagValue) -> DbResult<()> {
        let (id, raw) = self.intern_value(tag, value)?;
        self.tracks.record_cycle_tag(id, raw, self.cycle)
    }

    fn on_end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if self.config.auto_compress {
            self.tracks.compress_all();
        }
        self.refresh_store_stats();
        debug!(cycle = self.cycle, "simulation ended");
    }

    // ---- helpers ----

    /// Reports the outcome of a listener callback.
    fn topology_changed(&mut self) {
        self.tracks.bind_deferred(&self.graph);
    }

    fn settle(&mut self, kind: &'static str, result: DbResult<()>) {
        self.stats.record_event(kind);
        if let Err(e) = result {
            warn!(cycle = self.cycle, event = kind, error = %e, "event rejected");
            self.stats.record_non_critical(&e.to_string());
        }
    }

    fn require_node(&self, node: NodeId) -> DbResult<()> {
        match self.graph.node(node) {
            Some(_) => Ok(()),
            None => Err(GraphError::UnknownNode(node).into()),
        }
    }

    /// Checks the tag type and returns `(tag id, raw value)`.
    fn intern_value(&mut self, tag: &str, value: &TagValue) -> DbResult<(TagId, u64)> {
        let id = self.tags.observe(tag, value.value_type())?;
        let raw = match value {
            TagValue::Integer(v) => *v,
            TagValue::Str(s) => self.strings.intern(s.as_str()) as u64,
            TagValue::Set(set) => self.sets.intern(set.as_slice()) as u64,
        };
        Ok((id, raw))
    }

    fn fact_value(&self, fact: &TagFact) -> DbResult<TagValue> {
        self.typed_value(fact.kind, fact.value)
    }

    fn raw_value(&self, tag: TagId, raw: u64) -> DbResult<TagValue> {
        let kind = self
            .tags
            .get(tag)
            .and_then(|d| d.value_type)
            .unwrap_or(TagValueType::Integer);
        self.typed_value(kind, raw)
    }

    fn typed_value(&self, kind: TagValueType, raw: u64) -> DbResult<TagValue> {
        let value = match kind {
            TagValueType::Integer => Some(TagValue::Integer(raw)),
            TagValueType::Str => self
                .strings
                .lookup(raw as StrId)
                .map(|s| TagValue::Str(s.clone())),
            TagValueType::Set => self
                .sets
                .lookup(raw as StrId)
                .map(|s| TagValue::Set(s.clone())),
        };
        value.ok_or_else(|| DbError::UnknownTag(format!("interned value {}", raw)))
    }

    fn refresh_store_stats(&mut self) {
        let store = &mut self.stats.store;
        store.last_cycle = self.cycle;
        store.items_purged = self.items.purged_count();
        store.item_facts = self.items.fact_count();
        store.nodes = self.graph.node_count();
        store.edges = self.graph.edge_count();
        store.tags = self.tags.len();
        store.tracks = self.tracks.track_count();
        store.track_writes = self.tracks.write_count();
        store.compressions = self.tracks.compressions();
    }
}

impl DralListener for DralDb {
    fn version(&mut self, version: u16) {
        self.stats.record_event("Version");
        debug!(version, "trace version");
    }

    fn cycle(&mut self, cycle: Cycle) {
        self.stats.record_event("Cycle");
        self.on_cycle(cycle);
    }

    fn cycle_with_clock(&mut self, clock_id: ClockId, cycle: Cycle, phase: u8) {
        let r = self.on_clock(clock_id, cycle, phase);
        self.settle("CycleWithClock", r);
    }

    fn new_clock(&mut self, id: ClockId, frequency: u64, skew: u16, divisions: u16, name: &str) {
        let r = self.on_new_clock(id, frequency, skew, divisions, name);
        self.settle("NewClock", r);
    }

    fn set_node_clock(&mut self, node_id: NodeId, clock_id: ClockId) {
        let r = self.graph.set_node_clock(node_id, clock_id).map_err(DbError::from);
        self.settle("SetNodeClock", r);
    }

    fn new_node(&mut self, id: NodeId, name: &str, parent_id: NodeId, instance: u16) {
        let r = self.graph.add_node(id, name, parent_id, instance).map_err(DbError::from);
        let r = r.map(|()| self.topology_changed());
        self.settle("NewNode", r);
    }

    fn new_edge(&mut self, id: EdgeId, src: NodeId, dst: NodeId, bandwidth: u32, latency: u32, name: &str) {
        let r = self
            .graph
            .add_edge(id, src, dst, bandwidth, latency, name)
            .map_err(DbError::from);
        let r = r.map(|()| self.topology_changed());
        self.settle("NewEdge", r);
    }

    fn set_node_layout(&mut self, node_id: NodeId, capacities: &[u32]) {
        let r = self.graph.set_node_layout(node_id, capacities).map_err(DbError::from);
        let r = r.map(|()| self.topology_changed());
        self.settle("SetNodeLayout", r);
    }

    fn set_node_input_bandwidth(&mut self, node_id: NodeId, bandwidth: u32) {
        let r = self.graph.set_input_bandwidth(node_id, bandwidth).map_err(DbError::from);
        self.settle("SetNodeInputBandwidth", r);
    }

    fn set_node_output_bandwidth(&mut self, node_id: NodeId, bandwidth: u32) {
        let r = self.graph.set_output_bandwidth(node_id, bandwidth).map_err(DbError::from);
        self.settle("SetNodeOutputBandwidth", r);
    }

    fn set_high_water_mark(&mut self, node_id: NodeId, mark: u64) {
        let r = self.graph.set_high_water_mark(node_id, mark).map_err(DbError::from);
        self.settle("SetHighWaterMark", r);
    }

    fn new_item(&mut self, item_id: ItemId) {
        let r = self.on_new_item(item_id);
        self.settle("NewItem", r);
    }

    fn delete_item(&mut self, item_id: ItemId) {
        let r = self.on_delete_item(item_id);
        self.settle("DeleteItem", r);
    }

    fn set_item_tag(&mut self, item_id: ItemId, tag: &str, value: &TagValue) {
        let r = self.on_item_tag(item_id, tag, value);
        self.settle("SetItemTag", r);
    }

    fn move_items(&mut self, edge_id: EdgeId, items: &[(ItemId, u32)]) {
        let r = self.on_move(edge_id, items);
        self.settle("MoveItems", r);
    }

    fn enter_node(&mut self, node_id: NodeId, item_id: ItemId, position: &[u32]) {
        let r = self.on_enter(node_id, item_id, position);
        self.settle("EnterNode", r);
    }

    fn exit_node(&mut self, node_id: NodeId, item_id: ItemId, position: &[u32]) {
        let r = self.on_exit(node_id, item_id, position);
        self.settle("ExitNode", r);
    }

    fn set_node_tag(&mut self, node_id: NodeId, tag: &str, value: &TagValue, slot: &[u32]) {
        let r = self.on_node_tag(node_id, tag, value, slot);
        self.settle("SetNodeTag", r);
    }

    fn set_cycle_tag(&mut self, tag: &str, value: &TagValue) {
        let r = self.on_cycle_tag(tag, value);
        self.settle("SetCycleTag", r);
    }

    fn comment(&mut self, magic: u32, text: &str) {
        self.stats.record_event("Comment");
        self.comments.push((magic, text.to_string()));
    }

    fn comment_bin(&mut self, magic: u32, bytes: &[u8]) {
        self.stats.record_event("CommentBin");
        self.binary_comments.push((magic, bytes.to_vec()));
    }

    fn set_tag_description(&mut self, tag: &str, text: &str) {
        self.stats.record_event("SetTagDescription");
        self.tags.set_description(tag, text);
    }

    fn new_tag(&mut self, id: TagId, name: &str) {
        trace!(id, name, "wire tag defined");
    }

    fn new_string_value(&mut self, id: StrId, text: &str) {
        trace!(id, text, "wire string defined");
    }

    fn error(&mut self, message: &str) {
        error!(cycle = self.cycle, message, "trace error");
        self.stats.record_error(message);
    }

    fn non_critical_error(&mut self, message: &str) {
        warn!(cycle = self.cycle, message, "trace warning");
        self.stats.record_non_critical(message);
    }

    fn end_simulation(&mut self) {
        self.on_end();
    }
}

impl std::fmt::Debug for DralDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DralDb")
            .field("cycle", &self.cycle)
            .field("nodes", &self.graph.node_count())
            .field("items", &self.items.item_count())
            .field("tracks", &self.tracks.track_count())
            .field("ended", &self.ended)
            .finish()
    }
}
