//! Event encoder.
//!
//! Mirrors every [`DralEvent`] into the exact byte layout of one wire
//! generation. Definition events (`Version`, `NewTag`, `NewStringValue`,
//! `Error`) are accepted and dropped: the encoder writes its own preamble and,
//! for v3/v4, its own tag and string definitions.

use std::io::Write;

use crate::codec::{ascii, command, op_v01, op_v2, op_v34, width_selector, WireVersion, MAGIC, WIDTHS};
use crate::error::{DralError, DralResult};
use crate::event::DralEvent;
use crate::io::ByteSink;
use crate::strings::LruStrMap;
use crate::types::{TagId, TagValue};

/// Default bound of the v3/v4 tag and string caches.
pub const DEFAULT_WIRE_CACHE: usize = 65536;

const RECORD_CAPACITY: usize = 256;

/// Writes events in one wire generation.
///
/// Each record is staged in memory and only handed to the sink once it has
/// been fully encoded, so an event that fails to encode leaves no trace in
/// the output and the encoder stays usable.
pub struct DralEncoder<W: Write> {
    sink: ByteSink<W>,
    record: ByteSink<Vec<u8>>,
    version: WireVersion,
    tags: LruStrMap,
    strings: LruStrMap,
    events: u64,
}

impl<W: Write> DralEncoder<W> {
    /// Creates an encoder and writes the stream preamble.
    pub fn new(sink: ByteSink<W>, version: WireVersion) -> DralResult<Self> {
        Self::with_cache(sink, version, DEFAULT_WIRE_CACHE)
    }

    /// Creates an encoder whose v3/v4 tag and string caches hold at most
    /// `capacity` entries each.
    pub fn with_cache(sink: ByteSink<W>, version: WireVersion, capacity: usize) -> DralResult<Self> {
        // Tag ids travel as u16.
        let tag_capacity = capacity.min(TagId::MAX as usize + 1);
        let mut encoder = Self {
            sink,
            record: ByteSink::new(Vec::new(), false, RECORD_CAPACITY),
            version,
            tags: LruStrMap::new(tag_capacity),
            strings: LruStrMap::new(capacity),
            events: 0,
        };
        encoder.write_preamble()?;
        Ok(encoder)
    }

    fn write_preamble(&mut self) -> DralResult<()> {
        match self.version {
            WireVersion::Ascii => {
                let line = format!("{} {} minor 0\n", crate::codec::ASCII_PREAMBLE, self.version.number());
                self.sink.write(line.as_bytes())
            }
            v => {
                self.sink.write(&MAGIC)?;
                self.sink.write_u8(v.number())
            }
        }
    }

    /// Returns the wire generation being written.
    pub fn version(&self) -> WireVersion {
        self.version
    }

    /// Returns the number of events encoded so far (definitions excluded).
    pub fn events_written(&self) -> u64 {
        self.events
    }

    /// Returns the number of bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.sink.written()
    }

    /// Returns the number of tag and string cache evictions so far.
    pub fn cache_evictions(&self) -> u64 {
        self.tags.evictions() + self.strings.evictions()
    }

    /// Encodes one event.
    pub fn encode(&mut self, event: &DralEvent) -> DralResult<()> {
        if event.is_definition() {
            return Ok(());
        }
        if !self.version.supports(event) {
            return Err(self.unsupported(event, "no record for this event in this generation".to_string()));
        }
        let staged = match self.version {
            WireVersion::V0 | WireVersion::V1 => self.encode_legacy(event),
            WireVersion::V2 => self.encode_v2(event),
            WireVersion::V3 | WireVersion::V4 => self
                .check_compact(event)
                .and_then(|()| self.encode_compact(event)),
            WireVersion::Ascii => match ascii::format_event(event) {
                Some(line) => self
                    .record
                    .write(line.as_bytes())
                    .and_then(|()| self.record.write(b"\n")),
                None => Ok(()),
            },
        };
        if let Err(e) = staged {
            self.record.discard();
            tracing::debug!(
                event = event.kind(),
                version = %self.version,
                error = %e,
                "dropped unencodable event"
            );
            return Err(e);
        }
        if let Err(e) = self.record.transfer(&mut self.sink) {
            self.record.discard();
            return Err(e);
        }
        self.events += 1;
        Ok(())
    }

    /// Flushes buffered bytes to the underlying writer.
    pub fn flush(&mut self) -> DralResult<()> {
        self.sink.flush()
    }

    /// Flushes, terminates compression and returns the underlying writer.
    pub fn finish(self) -> DralResult<W> {
        self.sink.finish()
    }

    // ---- shared helpers ----

    fn unsupported(&self, event: &DralEvent, reason: String) -> DralError {
        DralError::UnsupportedEvent {
            event: event.kind(),
            version: self.version.name(),
            reason,
        }
    }

    fn fit<T: TryFrom<u64>>(&self, value: u64, what: &str, event: &DralEvent) -> DralResult<T> {
        T::try_from(value).map_err(|_| self.unsupported(event, format!("{} {} out of range", what, value)))
    }

    fn check_len(&self, s: &str) -> DralResult<()> {
        let max = self.version.max_string_len();
        if s.len() > max {
            return Err(DralError::StringTooLong { len: s.len(), max });
        }
        Ok(())
    }

    fn write_str16(&mut self, s: &str) -> DralResult<()> {
        if s.len() > u16::MAX as usize {
            return Err(DralError::StringTooLong {
                len: s.len(),
                max: u16::MAX as usize,
            });
        }
        self.record.write_u16(s.len() as u16)?;
        self.record.write(s.as_bytes())
    }

    /// Writes a v3 (u8 length) or v4 (u32 length) string.
    fn write_str_compact(&mut self, s: &str) -> DralResult<()> {
        self.check_len(s)?;
        if self.version == WireVersion::V3 {
            self.record.write_u8(s.len() as u8)?;
        } else {
            self.record.write_u32(s.len() as u32)?;
        }
        self.record.write(s.as_bytes())
    }

    fn write_positions<T: TryFrom<u64>>(
        &mut self,
        positions: &[u32],
        event: &DralEvent,
        mut put: impl FnMut(&mut ByteSink<Vec<u8>>, T) -> DralResult<()>,
    ) -> DralResult<()> {
        let count: u8 = self.fit(positions.len() as u64, "dimension count", event)?;
        self.record.write_u8(count)?;
        for &p in positions {
            let p: T = self.fit(p as u64, "position", event)?;
            put(&mut self.record, p)?;
        }
        Ok(())
    }

    // ---- v0 / v1 ----

    /// Returns the flag bits and byte width of a legacy value field.
    fn legacy_width(&self, value: u64, event: &DralEvent) -> DralResult<(u8, usize)> {
        if self.version == WireVersion::V0 {
            let _: u32 = self.fit(value, "value", event)?;
            return Ok((0, 4));
        }
        let sel = width_selector(value);
        if sel == 3 {
            return Err(self.unsupported(event, format!("value {} wider than 32 bits", value)));
        }
        Ok((sel, WIDTHS[sel as usize]))
    }

    fn encode_legacy(&mut self, event: &DralEvent) -> DralResult<()> {
        match event {
            DralEvent::Cycle(cycle) => {
                let (flags, width) = self.legacy_width(*cycle, event)?;
                self.record.write_u8(command(op_v01::CYCLE, flags))?;
                self.record.write_sized(*cycle, width)
            }
            DralEvent::NewItem(item) => {
                self.record.write_u8(command(op_v01::NEWITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::DeleteItem(item) => {
                self.record.write_u8(command(op_v01::DELETEITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::MoveItems { edge_id, items } => {
                let count: u8 = self.fit(items.len() as u64, "item count", event)?;
                self.record.write_u8(command(op_v01::MOVEITEMS, 0))?;
                self.record.write_u16(*edge_id)?;
                self.record.write_u8(count)?;
                for &(item, pos) in items {
                    let pos: u8 = self.fit(pos as u64, "position", event)?;
                    self.record.write_u32(item)?;
                    self.record.write_u8(pos)?;
                }
                Ok(())
            }
            DralEvent::SetItemTag {
                item_id,
                tag,
                value: TagValue::Integer(v),
            } => {
                let (flags, width) = self.legacy_width(*v, event)?;
                self.record.write_u8(command(op_v01::SETTAG, flags))?;
                self.record.write_u32(*item_id)?;
                self.write_str16(tag)?;
                self.record.write_sized(*v, width)
            }
            DralEvent::EnterNode {
                node_id,
                item_id,
                position,
            }
            | DralEvent::ExitNode {
                node_id,
                item_id,
                position,
            } => {
                let op = if matches!(event, DralEvent::EnterNode { .. }) {
                    op_v01::ENTERNODE
                } else {
                    op_v01::EXITNODE
                };
                self.record.write_u8(command(op, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*item_id)?;
                self.write_positions::<u16>(position, event, |s, p| s.write_u16(p))
            }
            DralEvent::NewNode {
                id,
                name,
                parent_id,
                instance,
            } => {
                self.record.write_u8(command(op_v01::ADDNODE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*parent_id)?;
                self.record.write_u16(*instance)?;
                self.write_str16(name)
            }
            DralEvent::NewEdge {
                id,
                src,
                dst,
                bandwidth,
                latency,
                name,
            } => {
                self.record.write_u8(command(op_v01::ADDEDGE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*src)?;
                self.record.write_u16(*dst)?;
                self.record.write_u32(*bandwidth)?;
                self.record.write_u32(*latency)?;
                self.write_str16(name)
            }
            DralEvent::SetNodeLayout { node_id, capacities } => {
                self.record.write_u8(command(op_v01::SETCAPACITY, 0))?;
                self.record.write_u16(*node_id)?;
                self.write_positions::<u32>(capacities, event, |s, c| s.write_u32(c))
            }
            DralEvent::SetHighWaterMark { node_id, mark } => {
                let (flags, width) = self.legacy_width(*mark, event)?;
                self.record.write_u8(command(op_v01::SETHIGHWATERMARK, flags))?;
                self.record.write_u16(*node_id)?;
                self.record.write_sized(*mark, width)
            }
            DralEvent::Comment { magic, text } => {
                self.record.write_u8(command(op_v01::COMMENT, 0))?;
                self.record.write_u32(*magic)?;
                self.write_str16(text)
            }
            DralEvent::SetNodeTag {
                node_id,
                tag,
                value: TagValue::Integer(v),
                slot,
            } => {
                let (flags, width) = self.legacy_width(*v, event)?;
                self.record.write_u8(command(op_v01::SETTAGNODE, flags))?;
                self.record.write_u16(*node_id)?;
                self.write_str16(tag)?;
                self.record.write_sized(*v, width)?;
                self.write_positions::<u16>(slot, event, |s, p| s.write_u16(p))
            }
            _ => Err(self.unsupported(event, "no record for this event in this generation".to_string())),
        }
    }

    // ---- v2 ----

    fn write_set_v2(&mut self, set: &[u64], event: &DralEvent) -> DralResult<()> {
        let n: u16 = self.fit(set.len() as u64, "set size", event)?;
        self.record.write_u16(n)?;
        for &v in set {
            self.record.write_u64(v)?;
        }
        Ok(())
    }

    fn encode_v2(&mut self, event: &DralEvent) -> DralResult<()> {
        match event {
            DralEvent::Cycle(cycle) => {
                self.record.write_u8(command(op_v2::CYCLE, 0))?;
                self.record.write_u64(*cycle)
            }
            DralEvent::CycleWithClock { clock_id, cycle, phase } => {
                self.record.write_u8(command(op_v2::CYCLEWITHCLOCK, 0))?;
                self.record.write_u16(*clock_id)?;
                self.record.write_u64(*cycle)?;
                self.record.write_u8(*phase)
            }
            DralEvent::NewItem(item) => {
                self.record.write_u8(command(op_v2::NEWITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::DeleteItem(item) => {
                self.record.write_u8(command(op_v2::DELETEITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::MoveItems { edge_id, items } => {
                let count: u32 = self.fit(items.len() as u64, "item count", event)?;
                self.record.write_u8(command(op_v2::MOVEITEMS, 0))?;
                self.record.write_u16(*edge_id)?;
                self.record.write_u32(count)?;
                for &(item, pos) in items {
                    self.record.write_u32(item)?;
                    self.record.write_u32(pos)?;
                }
                Ok(())
            }
            DralEvent::SetItemTag { item_id, tag, value } => {
                let op = match value {
                    TagValue::Integer(_) => op_v2::SETITEMTAG,
                    TagValue::Str(_) => op_v2::SETITEMTAGSTR,
                    TagValue::Set(_) => op_v2::SETITEMTAGSET,
                };
                self.record.write_u8(command(op, 0))?;
                self.record.write_u32(*item_id)?;
                self.write_str16(tag)?;
                self.write_value_v2(value, event)
            }
            DralEvent::EnterNode {
                node_id,
                item_id,
                position,
            }
            | DralEvent::ExitNode {
                node_id,
                item_id,
                position,
            } => {
                let op = if matches!(event, DralEvent::EnterNode { .. }) {
                    op_v2::ENTERNODE
                } else {
                    op_v2::EXITNODE
                };
                self.record.write_u8(command(op, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*item_id)?;
                self.write_positions::<u32>(position, event, |s, p| s.write_u32(p))
            }
            DralEvent::NewNode {
                id,
                name,
                parent_id,
                instance,
            } => {
                self.record.write_u8(command(op_v2::NEWNODE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*parent_id)?;
                self.record.write_u16(*instance)?;
                self.write_str16(name)
            }
            DralEvent::NewEdge {
                id,
                src,
                dst,
                bandwidth,
                latency,
                name,
            } => {
                self.record.write_u8(command(op_v2::NEWEDGE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*src)?;
                self.record.write_u16(*dst)?;
                self.record.write_u32(*bandwidth)?;
                self.record.write_u32(*latency)?;
                self.write_str16(name)
            }
            DralEvent::SetNodeLayout { node_id, capacities } => {
                self.record.write_u8(command(op_v2::SETNODELAYOUT, 0))?;
                self.record.write_u16(*node_id)?;
                self.write_positions::<u32>(capacities, event, |s, c| s.write_u32(c))
            }
            DralEvent::Comment { magic, text } => {
                self.record.write_u8(command(op_v2::COMMENT, 0))?;
                self.record.write_u32(*magic)?;
                self.write_str16(text)
            }
            DralEvent::CommentBin { magic, bytes } => {
                let len: u32 = self.fit(bytes.len() as u64, "comment length", event)?;
                self.record.write_u8(command(op_v2::COMMENTBIN, 0))?;
                self.record.write_u32(*magic)?;
                self.record.write_u32(len)?;
                self.record.write(bytes)
            }
            DralEvent::SetNodeTag {
                node_id,
                tag,
                value,
                slot,
            } => {
                let op = match value {
                    TagValue::Integer(_) => op_v2::SETNODETAG,
                    TagValue::Str(_) => op_v2::SETNODETAGSTR,
                    TagValue::Set(_) => op_v2::SETNODETAGSET,
                };
                self.record.write_u8(command(op, 0))?;
                self.record.write_u16(*node_id)?;
                self.write_str16(tag)?;
                self.write_value_v2(value, event)?;
                self.write_positions::<u32>(slot, event, |s, p| s.write_u32(p))
            }
            DralEvent::SetCycleTag { tag, value } => {
                let op = match value {
                    TagValue::Integer(_) => op_v2::SETCYCLETAG,
                    TagValue::Str(_) => op_v2::SETCYCLETAGSTR,
                    TagValue::Set(_) => op_v2::SETCYCLETAGSET,
                };
                self.record.write_u8(command(op, 0))?;
                self.write_str16(tag)?;
                self.write_value_v2(value, event)
            }
            DralEvent::SetTagDescription { tag, text } => {
                self.record.write_u8(command(op_v2::SETTAGDESC, 0))?;
                self.write_str16(tag)?;
                self.write_str16(text)
            }
            DralEvent::SetNodeInputBandwidth { node_id, bandwidth } => {
                self.record.write_u8(command(op_v2::SETNODEINPUTBW, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*bandwidth)
            }
            DralEvent::SetNodeOutputBandwidth { node_id, bandwidth } => {
                self.record.write_u8(command(op_v2::SETNODEOUTPUTBW, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*bandwidth)
            }
            DralEvent::NewClock {
                id,
                frequency,
                skew,
                divisions,
                name,
            } => {
                self.record.write_u8(command(op_v2::NEWCLOCK, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u64(*frequency)?;
                self.record.write_u16(*skew)?;
                self.record.write_u16(*divisions)?;
                self.write_str16(name)
            }
            DralEvent::SetNodeClock { node_id, clock_id } => {
                self.record.write_u8(command(op_v2::SETNODECLOCK, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u16(*clock_id)
            }
            DralEvent::SetHighWaterMark { node_id, mark } => {
                self.record.write_u8(command(op_v2::SETHIGHWATERMARK, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u64(*mark)
            }
            DralEvent::EndSimulation => self.record.write_u8(command(op_v2::ENDSIMULATION, 0)),
            _ => Err(self.unsupported(event, "no record for this event in this generation".to_string())),
        }
    }

    fn write_value_v2(&mut self, value: &TagValue, event: &DralEvent) -> DralResult<()> {
        match value {
            TagValue::Integer(v) => self.record.write_u64(*v),
            TagValue::Str(s) => self.write_str16(s),
            TagValue::Set(set) => self.write_set_v2(set, event),
        }
    }

    // ---- v3 / v4 ----

    /// Rejects a tag-bearing record before any of its names are interned.
    ///
    /// Once `tag_id` or `string_id` has bound a name, the rest of the record
    /// must not fail, or the caches would run ahead of the stream.
    fn check_compact(&self, event: &DralEvent) -> DralResult<()> {
        let (tag, value, slot) = match event {
            DralEvent::SetItemTag { tag, value, .. } | DralEvent::SetCycleTag { tag, value } => {
                (tag, Some(value), &[][..])
            }
            DralEvent::SetNodeTag { tag, value, slot, .. } => (tag, Some(value), slot.as_slice()),
            DralEvent::SetTagDescription { tag, text } => {
                self.check_len(text)?;
                (tag, None, &[][..])
            }
            _ => return Ok(()),
        };
        self.check_len(tag)?;
        match value {
            Some(TagValue::Str(s)) => self.check_len(s)?,
            Some(TagValue::Set(set)) => {
                let _: u16 = self.fit(set.len() as u64, "set size", event)?;
            }
            _ => {}
        }
        let _: u8 = self.fit(slot.len() as u64, "dimension count", event)?;
        for &p in slot {
            let _: u16 = self.fit(p as u64, "position", event)?;
        }
        Ok(())
    }

    /// Returns the wire id of a tag name, writing NEWTAG when it is (re)bound.
    fn tag_id(&mut self, name: &str) -> DralResult<u16> {
        let interned = self.tags.insert(name);
        let id = interned.id as u16;
        if interned.is_new {
            self.record.write_u8(command(op_v34::NEWTAG, 0))?;
            self.record.write_u16(id)?;
            self.write_str_compact(name)?;
        }
        Ok(id)
    }

    /// Returns the wire id of a string value, writing NEWSTRING when it is (re)bound.
    fn string_id(&mut self, text: &str) -> DralResult<u32> {
        let interned = self.strings.insert(text);
        if interned.is_new {
            self.record.write_u8(command(op_v34::NEWSTRING, 0))?;
            self.record.write_u32(interned.id)?;
            self.write_str_compact(text)?;
        }
        Ok(interned.id)
    }

    /// Width selector for a value field: a scalar, or the widest set element.
    fn value_selector(value: &TagValue) -> u8 {
        match value {
            TagValue::Integer(v) => width_selector(*v),
            TagValue::Set(set) => width_selector(set.iter().copied().max().unwrap_or(0)),
            TagValue::Str(_) => 0,
        }
    }

    fn write_compact_value(&mut self, value: &TagValue, sel: u8, string: Option<u32>, event: &DralEvent) -> DralResult<()> {
        let width = WIDTHS[sel as usize];
        match value {
            TagValue::Integer(v) => self.record.write_sized(*v, width),
            TagValue::Str(_) => self.record.write_u32(string.unwrap_or_default()),
            TagValue::Set(set) => {
                let n: u16 = self.fit(set.len() as u64, "set size", event)?;
                self.record.write_u16(n)?;
                for &v in set {
                    self.record.write_sized(v, width)?;
                }
                Ok(())
            }
        }
    }

    /// Resolves a string value to its wire id before the record is started.
    fn prepare_value(&mut self, value: &TagValue) -> DralResult<Option<u32>> {
        match value {
            TagValue::Str(s) => Ok(Some(self.string_id(s)?)),
            _ => Ok(None),
        }
    }

    fn encode_compact(&mut self, event: &DralEvent) -> DralResult<()> {
        match event {
            DralEvent::Cycle(cycle) => {
                let sel = width_selector(*cycle);
                self.record.write_u8(command(op_v34::CYCLE, sel))?;
                self.record.write_sized(*cycle, WIDTHS[sel as usize])
            }
            DralEvent::CycleWithClock { clock_id, cycle, phase } => {
                let sel = width_selector(*cycle);
                self.record.write_u8(command(op_v34::CYCLEWITHCLOCK, sel))?;
                self.record.write_u16(*clock_id)?;
                self.record.write_u8(*phase)?;
                self.record.write_sized(*cycle, WIDTHS[sel as usize])
            }
            DralEvent::NewItem(item) => {
                self.record.write_u8(command(op_v34::NEWITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::DeleteItem(item) => {
                self.record.write_u8(command(op_v34::DELETEITEM, 0))?;
                self.record.write_u32(*item)
            }
            DralEvent::SetItemTag { item_id, tag, value } => {
                let tag = self.tag_id(tag)?;
                let string = self.prepare_value(value)?;
                let sel = Self::value_selector(value);
                let op = match value {
                    TagValue::Integer(_) => op_v34::SETITEMTAG,
                    TagValue::Str(_) => op_v34::SETITEMTAGSTR,
                    TagValue::Set(_) => op_v34::SETITEMTAGSET,
                };
                self.record.write_u8(command(op, sel))?;
                self.record.write_u32(*item_id)?;
                self.record.write_u16(tag)?;
                self.write_compact_value(value, sel, string, event)
            }
            DralEvent::MoveItems { edge_id, items } => {
                let count: u16 = self.fit(items.len() as u64, "item count", event)?;
                self.record.write_u8(command(op_v34::MOVEITEMS, 0))?;
                self.record.write_u16(*edge_id)?;
                self.record.write_u16(count)?;
                for &(item, pos) in items {
                    let pos: u16 = self.fit(pos as u64, "position", event)?;
                    self.record.write_u32(item)?;
                    self.record.write_u16(pos)?;
                }
                Ok(())
            }
            DralEvent::EnterNode {
                node_id,
                item_id,
                position,
            }
            | DralEvent::ExitNode {
                node_id,
                item_id,
                position,
            } => {
                let op = if matches!(event, DralEvent::EnterNode { .. }) {
                    op_v34::ENTERNODE
                } else {
                    op_v34::EXITNODE
                };
                self.record.write_u8(command(op, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*item_id)?;
                self.write_positions::<u16>(position, event, |s, p| s.write_u16(p))
            }
            DralEvent::SetNodeTag {
                node_id,
                tag,
                value,
                slot,
            } => {
                let tag = self.tag_id(tag)?;
                let string = self.prepare_value(value)?;
                let sel = Self::value_selector(value);
                let op = match value {
                    TagValue::Integer(_) => op_v34::SETNODETAG,
                    TagValue::Str(_) => op_v34::SETNODETAGSTR,
                    TagValue::Set(_) => op_v34::SETNODETAGSET,
                };
                self.record.write_u8(command(op, sel))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u16(tag)?;
                self.write_positions::<u16>(slot, event, |s, p| s.write_u16(p))?;
                self.write_compact_value(value, sel, string, event)
            }
            DralEvent::SetCycleTag { tag, value } => {
                let tag = self.tag_id(tag)?;
                let string = self.prepare_value(value)?;
                let sel = Self::value_selector(value);
                let op = match value {
                    TagValue::Integer(_) => op_v34::SETCYCLETAG,
                    TagValue::Str(_) => op_v34::SETCYCLETAGSTR,
                    TagValue::Set(_) => op_v34::SETCYCLETAGSET,
                };
                self.record.write_u8(command(op, sel))?;
                self.record.write_u16(tag)?;
                self.write_compact_value(value, sel, string, event)
            }
            DralEvent::NewNode {
                id,
                name,
                parent_id,
                instance,
            } => {
                self.record.write_u8(command(op_v34::NEWNODE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*parent_id)?;
                self.record.write_u16(*instance)?;
                self.write_str_compact(name)
            }
            DralEvent::NewEdge {
                id,
                src,
                dst,
                bandwidth,
                latency,
                name,
            } => {
                self.record.write_u8(command(op_v34::NEWEDGE, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u16(*src)?;
                self.record.write_u16(*dst)?;
                self.record.write_u32(*bandwidth)?;
                self.record.write_u32(*latency)?;
                self.write_str_compact(name)
            }
            DralEvent::SetNodeLayout { node_id, capacities } => {
                self.record.write_u8(command(op_v34::SETNODELAYOUT, 0))?;
                self.record.write_u16(*node_id)?;
                self.write_positions::<u32>(capacities, event, |s, c| s.write_u32(c))
            }
            DralEvent::SetNodeInputBandwidth { node_id, bandwidth } => {
                self.record.write_u8(command(op_v34::SETNODEINPUTBW, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*bandwidth)
            }
            DralEvent::SetNodeOutputBandwidth { node_id, bandwidth } => {
                self.record.write_u8(command(op_v34::SETNODEOUTPUTBW, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u32(*bandwidth)
            }
            DralEvent::NewClock {
                id,
                frequency,
                skew,
                divisions,
                name,
            } => {
                self.record.write_u8(command(op_v34::NEWCLOCK, 0))?;
                self.record.write_u16(*id)?;
                self.record.write_u64(*frequency)?;
                self.record.write_u16(*skew)?;
                self.record.write_u16(*divisions)?;
                self.write_str_compact(name)
            }
            DralEvent::SetNodeClock { node_id, clock_id } => {
                self.record.write_u8(command(op_v34::SETNODECLOCK, 0))?;
                self.record.write_u16(*node_id)?;
                self.record.write_u16(*clock_id)
            }
            DralEvent::Comment { magic, text } => {
                self.record.write_u8(command(op_v34::COMMENT, 0))?;
                self.record.write_u32(*magic)?;
                self.write_str_compact(text)
            }
            DralEvent::CommentBin { magic, bytes } => {
                let len: u32 = self.fit(bytes.len() as u64, "comment length", event)?;
                self.record.write_u8(command(op_v34::COMMENTBIN, 0))?;
                self.record.write_u32(*magic)?;
                self.record.write_u32(len)?;
                self.record.write(bytes)
            }
            DralEvent::SetTagDescription { tag, text } => {
                let tag = self.tag_id(tag)?;
                self.record.write_u8(command(op_v34::SETTAGDESC, 0))?;
                self.record.write_u16(tag)?;
                self.write_str_compact(text)
            }
            DralEvent::SetHighWaterMark { node_id, mark } => {
                let sel = width_selector(*mark);
                self.record.write_u8(command(op_v34::SETHIGHWATERMARK, sel))?;
                self.record.write_u16(*node_id)?;
                self.record.write_sized(*mark, WIDTHS[sel as usize])
            }
            DralEvent::EndSimulation => self.record.write_u8(command(op_v34::ENDSIMULATION, 0)),
            _ => Err(self.unsupported(event, "no record for this event in this generation".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(version: WireVersion, events: &[DralEvent]) -> DralResult<Vec<u8>> {
        let mut enc = DralEncoder::new(ByteSink::new(Vec::new(), false, 256), version)?;
        for e in events {
            enc.encode(e)?;
        }
        enc.finish()
    }

    // ========== Layout Tests ==========

    #[test]
    fn test_preambles() {
        assert_eq!(encode_all(WireVersion::V2, &[]).unwrap(), b"DRAL\x02".to_vec());
        assert_eq!(
            encode_all(WireVersion::Ascii, &[]).unwrap(),
            b"version major 4 minor 0\n".to_vec()
        );
    }

    #[test]
    fn test_v2_cycle_layout() {
        let bytes = encode_all(WireVersion::V2, &[DralEvent::Cycle(0x0102)]).unwrap();
        assert_eq!(&bytes[5..], &[0, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_v3_narrowest_cycle_width() {
        let bytes = encode_all(WireVersion::V3, &[DralEvent::Cycle(300)]).unwrap();
        // CYCLE with 16-bit selector.
        assert_eq!(&bytes[5..], &[op_v34::CYCLE | 0x40, 0x2c, 0x01]);
    }

    #[test]
    fn test_v1_width_flags() {
        let bytes = encode_all(WireVersion::V1, &[DralEvent::Cycle(70_000)]).unwrap();
        assert_eq!(bytes[5], op_v01::CYCLE | 0x80);
        assert_eq!(bytes.len(), 5 + 1 + 4);
    }

    #[test]
    fn test_v3_tag_defined_once() {
        let set = |v| DralEvent::SetCycleTag {
            tag: "ipc".to_string(),
            value: TagValue::Integer(v),
        };
        let bytes = encode_all(WireVersion::V3, &[set(1), set(2)]).unwrap();
        // NEWTAG(0) record: opcode, id u16, len u8, "ipc"
        assert_eq!(&bytes[5..12], &[op_v34::NEWTAG, 0, 0, 3, b'i', b'p', b'c']);
        assert_eq!(&bytes[12..], &[op_v34::SETCYCLETAG, 0, 0, 1, op_v34::SETCYCLETAG, 0, 0, 2]);
    }

    // ========== Restriction Tests ==========

    #[test]
    fn test_legacy_rejects_strings_and_clocks() {
        let err = encode_all(
            WireVersion::V0,
            &[DralEvent::SetItemTag {
                item_id: 1,
                tag: "x".to_string(),
                value: TagValue::from("s"),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DralError::UnsupportedEvent { event: "SetItemTag", .. }));

        let err = encode_all(WireVersion::V1, &[DralEvent::Cycle(u64::MAX)]).unwrap_err();
        assert!(matches!(err, DralError::UnsupportedEvent { .. }));
    }

    #[test]
    fn test_v3_string_limit() {
        let long = "x".repeat(256);
        let err = encode_all(
            WireVersion::V3,
            &[DralEvent::Comment {
                magic: 1,
                text: long.clone(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DralError::StringTooLong { len: 256, max: 255 }));
        assert!(encode_all(WireVersion::V4, &[DralEvent::Comment { magic: 1, text: long }]).is_ok());
    }

    #[test]
    fn test_definitions_are_ignored() {
        let bytes = encode_all(
            WireVersion::V2,
            &[
                DralEvent::Version(2),
                DralEvent::NewTag {
                    id: 0,
                    name: "x".to_string(),
                },
                DralEvent::Error("e".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(bytes.len(), 5);
    }
}
