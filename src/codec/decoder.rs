//! Event decoder.
//!
//! Detects the wire generation from the preamble, then turns one record at a
//! time into a [`DralEvent`]. Use [`DralDecoder::next_event`] to pull events,
//! or [`DralDecoder::process_next_event`] to push them into a
//! [`DralListener`], which also receives every stream-level failure.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::Path;

use tracing::{debug, error, warn};

use crate::codec::{ascii, op_v01, op_v2, op_v34, split_command, WireVersion, ASCII_PREAMBLE, MAGIC, WIDTHS};
use crate::error::{DralError, DralResult};
use crate::event::{dispatch, DralEvent, DralListener};
use crate::io::{ByteSource, Compression, DEFAULT_BUFFER_SIZE};
use crate::strings::StrTable;
use crate::types::{Cycle, StrId, TagId, TagValue};

/// Pull/push decoder over one trace stream.
pub struct DralDecoder {
    source: ByteSource,
    version: Option<WireVersion>,
    finished: bool,
    end_reported: bool,
    pending: VecDeque<DralEvent>,
    /// Tag names seen inline (v0 to v2, ASCII)
    tag_names: StrTable,
    /// String values seen inline (v0 to v2, ASCII)
    string_values: StrTable,
    /// Tag ids defined on the wire (v3, v4)
    wire_tags: HashMap<TagId, String>,
    /// String ids defined on the wire (v3, v4)
    wire_strings: HashMap<StrId, String>,
    last_cycle: Option<Cycle>,
    line: usize,
    delivered: u64,
}

impl DralDecoder {
    /// Creates a decoder over an already opened byte source.
    pub fn new(source: ByteSource) -> Self {
        Self {
            source,
            version: None,
            finished: false,
            end_reported: false,
            pending: VecDeque::new(),
            tag_names: StrTable::new(),
            string_values: StrTable::new(),
            wire_tags: HashMap::new(),
            wire_strings: HashMap::new(),
            last_cycle: None,
            line: 0,
            delivered: 0,
        }
    }

    /// Creates a decoder over an arbitrary reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, gzip: bool) -> Self {
        Self::new(ByteSource::from_reader(reader, gzip, DEFAULT_BUFFER_SIZE))
    }

    /// Opens a trace file; gzip compression is detected automatically.
    pub fn open<P: AsRef<Path>>(path: P) -> DralResult<Self> {
        Self::open_with_buffer(path, DEFAULT_BUFFER_SIZE)
    }

    /// Opens a trace file with a specific read buffer size.
    pub fn open_with_buffer<P: AsRef<Path>>(path: P, buffer_size: usize) -> DralResult<Self> {
        Ok(Self::new(ByteSource::open(path, Compression::Auto, buffer_size)?))
    }

    /// Returns the detected wire generation, once the preamble has been read.
    pub fn version(&self) -> Option<WireVersion> {
        self.version
    }

    /// Returns the uncompressed stream size, if known.
    pub fn file_size(&self) -> Option<u64> {
        self.source.file_size()
    }

    /// Returns the number of (uncompressed) bytes consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.source.consumed()
    }

    /// Returns the number of events delivered through `process_next_event`.
    pub fn events_delivered(&self) -> u64 {
        self.delivered
    }

    /// Returns true once the stream has ended or failed.
    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    /// Decodes the next event. `Ok(None)` is a clean end of stream.
    ///
    /// After an error the decoder is finished; it never resynchronizes.
    pub fn next_event(&mut self) -> DralResult<Option<DralEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.finished {
            return Ok(None);
        }
        match self.decode_next() {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Delivers exactly one event to `listener`.
    ///
    /// Returns false once the stream is over. A clean end is reported through
    /// `end_simulation`; a truncated stream through `non_critical_error`
    /// followed by `end_simulation`; any other failure through `error`
    /// followed by `end_simulation`.
    pub fn process_next_event(&mut self, listener: &mut dyn DralListener) -> bool {
        if self.end_reported {
            return false;
        }
        match self.next_event() {
            Ok(Some(event)) => {
                if let DralEvent::Cycle(cycle) = event {
                    if let Some(last) = self.last_cycle {
                        if cycle < last {
                            warn!(cycle, last, "cycle went backwards");
                            listener.non_critical_error(&format!("cycle {} precedes previous cycle {}", cycle, last));
                        }
                    }
                    self.last_cycle = Some(cycle);
                }
                dispatch(listener, &event);
                self.delivered += 1;
                if event == DralEvent::EndSimulation {
                    self.end_reported = true;
                }
                true
            }
            Ok(None) => {
                debug!(events = self.delivered, bytes = self.bytes_consumed(), "end of stream");
                self.end_reported = true;
                listener.end_simulation();
                false
            }
            Err(e) if e.is_truncation() => {
                warn!(error = %e, "trace truncated");
                self.end_reported = true;
                listener.non_critical_error(&e.to_string());
                listener.end_simulation();
                false
            }
            Err(e) => {
                error!(error = %e, "fatal decode error");
                self.end_reported = true;
                listener.error(&e.to_string());
                listener.end_simulation();
                false
            }
        }
    }

    /// Processes the whole stream. Returns the number of events delivered.
    pub fn run(&mut self, listener: &mut dyn DralListener) -> u64 {
        while self.process_next_event(listener) {}
        self.delivered
    }

    // ---- record decoding ----

    fn decode_next(&mut self) -> DralResult<Option<DralEvent>> {
        let version = match self.version {
            Some(v) => v,
            None => return self.read_preamble(),
        };
        let event = match version {
            WireVersion::V0 | WireVersion::V1 => self.decode_legacy(version)?,
            WireVersion::V2 => self.decode_v2()?,
            WireVersion::V3 | WireVersion::V4 => return self.decode_compact(version),
            WireVersion::Ascii => self.decode_ascii()?,
        };
        Ok(event.map(|e| self.define_symbols(e)))
    }

    fn read_preamble(&mut self) -> DralResult<Option<DralEvent>> {
        if self.source.at_end()? {
            return Ok(None);
        }
        let head = match self.source.read(MAGIC.len()) {
            Ok(head) => head.to_vec(),
            Err(e) if e.is_truncation() => return Err(DralError::BadMagic(Vec::new())),
            Err(e) => return Err(e),
        };
        if head == MAGIC {
            let byte = self.source.read_u8()?;
            let version = WireVersion::from_byte(byte).ok_or(DralError::UnsupportedVersion(byte))?;
            debug!(version = %version, "detected binary trace");
            self.version = Some(version);
            return Ok(Some(DralEvent::Version(byte as u16)));
        }
        if head == ASCII_PREAMBLE.as_bytes()[..MAGIC.len()] {
            let rest = self.source.read_line()?.unwrap_or_default();
            let line = format!("{}{}", String::from_utf8_lossy(&head), rest);
            self.line = 1;
            let major = ascii::parse_preamble(&line)?;
            debug!(major, "detected ASCII trace");
            self.version = Some(WireVersion::Ascii);
            return Ok(Some(DralEvent::Version(major)));
        }
        Err(DralError::BadMagic(head))
    }

    /// Queues synthetic `NewTag` / `NewStringValue` events ahead of `event`
    /// the first time it references a name or string.
    fn define_symbols(&mut self, event: DralEvent) -> DralEvent {
        if let Some(tag) = event.tag_name() {
            let (id, is_new) = self.tag_names.intern_new(tag);
            if is_new {
                self.pending.push_back(DralEvent::NewTag {
                    id: id as TagId,
                    name: tag.to_string(),
                });
            }
        }
        if let Some(TagValue::Str(text)) = event.tag_value() {
            let (id, is_new) = self.string_values.intern_new(text.as_str());
            if is_new {
                self.pending.push_back(DralEvent::NewStringValue { id, text: text.clone() });
            }
        }
        match self.pending.pop_front() {
            Some(first) => {
                self.pending.push_back(event);
                first
            }
            None => event,
        }
    }

    // ---- field helpers ----

    fn read_str16(&mut self) -> DralResult<String> {
        let len = self.source.read_u16()? as usize;
        self.source.read_string(len)
    }

    fn read_str_compact(&mut self, version: WireVersion) -> DralResult<String> {
        let len = if version == WireVersion::V3 {
            self.source.read_u8()? as usize
        } else {
            self.source.read_u32()? as usize
        };
        self.source.read_string(len)
    }

    fn read_positions_u16(&mut self) -> DralResult<Vec<u32>> {
        let dims = self.source.read_u8()? as usize;
        (0..dims).map(|_| Ok(self.source.read_u16()? as u32)).collect()
    }

    fn read_positions_u32(&mut self) -> DralResult<Vec<u32>> {
        let dims = self.source.read_u8()? as usize;
        (0..dims).map(|_| self.source.read_u32()).collect()
    }

    fn read_set(&mut self, width: usize) -> DralResult<Vec<u64>> {
        let n = self.source.read_u16()? as usize;
        (0..n).map(|_| self.source.read_sized(width)).collect()
    }

    fn wire_tag(&self, id: TagId) -> DralResult<String> {
        self.wire_tags.get(&id).cloned().ok_or(DralError::UnknownTagId(id))
    }

    fn wire_string(&mut self) -> DralResult<TagValue> {
        let id = self.source.read_u32()?;
        self.wire_strings
            .get(&id)
            .cloned()
            .map(TagValue::Str)
            .ok_or(DralError::UnknownStringId(id))
    }

    // ---- v0 / v1 ----

    fn decode_legacy(&mut self, version: WireVersion) -> DralResult<Option<DralEvent>> {
        if self.source.at_end()? {
            return Ok(None);
        }
        let (op, flags) = split_command(self.source.read_u8()?);
        let width = match (version, flags) {
            (WireVersion::V0, 0) => 4,
            (WireVersion::V1, 0..=2) => WIDTHS[flags as usize],
            _ => {
                return Err(DralError::InvalidField(format!(
                    "command flags {} not allowed in {}",
                    flags, version
                )))
            }
        };
        let event = match op {
            op_v01::CYCLE => DralEvent::Cycle(self.source.read_sized(width)?),
            op_v01::NEWITEM => DralEvent::NewItem(self.source.read_u32()?),
            op_v01::MOVEITEMS => {
                let edge_id = self.source.read_u16()?;
                let count = self.source.read_u8()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = self.source.read_u32()?;
                    let pos = self.source.read_u8()? as u32;
                    items.push((item, pos));
                }
                DralEvent::MoveItems { edge_id, items }
            }
            op_v01::DELETEITEM => DralEvent::DeleteItem(self.source.read_u32()?),
            op_v01::SETTAG => {
                let item_id = self.source.read_u32()?;
                let tag = self.read_str16()?;
                let value = TagValue::Integer(self.source.read_sized(width)?);
                DralEvent::SetItemTag { item_id, tag, value }
            }
            op_v01::ENTERNODE | op_v01::EXITNODE => {
                let node_id = self.source.read_u16()?;
                let item_id = self.source.read_u32()?;
                let position = self.read_positions_u16()?;
                if op == op_v01::ENTERNODE {
                    DralEvent::EnterNode {
                        node_id,
                        item_id,
                        position,
                    }
                } else {
                    DralEvent::ExitNode {
                        node_id,
                        item_id,
                        position,
                    }
                }
            }
            op_v01::ADDNODE => {
                let id = self.source.read_u16()?;
                let parent_id = self.source.read_u16()?;
                let instance = self.source.read_u16()?;
                let name = self.read_str16()?;
                DralEvent::NewNode {
                    id,
                    name,
                    parent_id,
                    instance,
                }
            }
            op_v01::ADDEDGE => self.read_new_edge(|d| d.read_str16())?,
            op_v01::SETCAPACITY => {
                let node_id = self.source.read_u16()?;
                let capacities = self.read_positions_u32()?;
                DralEvent::SetNodeLayout { node_id, capacities }
            }
            op_v01::SETHIGHWATERMARK => {
                let node_id = self.source.read_u16()?;
                let mark = self.source.read_sized(width)?;
                DralEvent::SetHighWaterMark { node_id, mark }
            }
            op_v01::COMMENT => {
                let magic = self.source.read_u32()?;
                let text = self.read_str16()?;
                DralEvent::Comment { magic, text }
            }
            op_v01::SETTAGNODE => {
                let node_id = self.source.read_u16()?;
                let tag = self.read_str16()?;
                let value = TagValue::Integer(self.source.read_sized(width)?);
                let slot = self.read_positions_u16()?;
                DralEvent::SetNodeTag {
                    node_id,
                    tag,
                    value,
                    slot,
                }
            }
            _ => {
                return Err(DralError::UnknownOpcode {
                    opcode: op,
                    version: version.number(),
                })
            }
        };
        Ok(Some(event))
    }

    fn read_new_edge(&mut self, name: impl FnOnce(&mut Self) -> DralResult<String>) -> DralResult<DralEvent> {
        let id = self.source.read_u16()?;
        let src = self.source.read_u16()?;
        let dst = self.source.read_u16()?;
        let bandwidth = self.source.read_u32()?;
        let latency = self.source.read_u32()?;
        let name = name(self)?;
        Ok(DralEvent::NewEdge {
            id,
            src,
            dst,
            bandwidth,
            latency,
            name,
        })
    }

    // ---- v2 ----

    fn read_value_v2(&mut self, op: u8, integer: u8, string: u8) -> DralResult<TagValue> {
        if op == integer {
            Ok(TagValue::Integer(self.source.read_u64()?))
        } else if op == string {
            Ok(TagValue::Str(self.read_str16()?))
        } else {
            Ok(TagValue::Set(self.read_set(8)?))
        }
    }

    fn decode_v2(&mut self) -> DralResult<Option<DralEvent>> {
        if self.source.at_end()? {
            return Ok(None);
        }
        let (op, flags) = split_command(self.source.read_u8()?);
        if flags != 0 {
            return Err(DralError::InvalidField(format!("command flags {} not allowed in v2", flags)));
        }
        let event = match op {
            op_v2::CYCLE => DralEvent::Cycle(self.source.read_u64()?),
            op_v2::NEWITEM => DralEvent::NewItem(self.source.read_u32()?),
            op_v2::MOVEITEMS => {
                let edge_id = self.source.read_u16()?;
                let count = self.source.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    let item = self.source.read_u32()?;
                    let pos = self.source.read_u32()?;
                    items.push((item, pos));
                }
                DralEvent::MoveItems { edge_id, items }
            }
            op_v2::DELETEITEM => DralEvent::DeleteItem(self.source.read_u32()?),
            op_v2::SETITEMTAG | op_v2::SETITEMTAGSTR | op_v2::SETITEMTAGSET => {
                let item_id = self.source.read_u32()?;
                let tag = self.read_str16()?;
                let value = self.read_value_v2(op, op_v2::SETITEMTAG, op_v2::SETITEMTAGSTR)?;
                DralEvent::SetItemTag { item_id, tag, value }
            }
            op_v2::ENTERNODE | op_v2::EXITNODE => {
                let node_id = self.source.read_u16()?;
                let item_id = self.source.read_u32()?;
                let position = self.read_positions_u32()?;
                if op == op_v2::ENTERNODE {
                    DralEvent::EnterNode {
                        node_id,
                        item_id,
                        position,
                    }
                } else {
                    DralEvent::ExitNode {
                        node_id,
                        item_id,
                        position,
                    }
                }
            }
            op_v2::NEWNODE => {
                let id = self.source.read_u16()?;
                let parent_id = self.source.read_u16()?;
                let instance = self.source.read_u16()?;
                let name = self.read_str16()?;
                DralEvent::NewNode {
                    id,
                    name,
                    parent_id,
                    instance,
                }
            }
            op_v2::NEWEDGE => self.read_new_edge(|d| d.read_str16())?,
            op_v2::SETNODELAYOUT => {
                let node_id = self.source.read_u16()?;
                let capacities = self.read_positions_u32()?;
                DralEvent::SetNodeLayout { node_id, capacities }
            }
            op_v2::COMMENT => {
                let magic = self.source.read_u32()?;
                let text = self.read_str16()?;
                DralEvent::Comment { magic, text }
            }
            op_v2::COMMENTBIN => {
                let magic = self.source.read_u32()?;
                let len = self.source.read_u32()? as usize;
                let bytes = self.source.read(len)?.to_vec();
                DralEvent::CommentBin { magic, bytes }
            }
            op_v2::SETNODETAG | op_v2::SETNODETAGSTR | op_v2::SETNODETAGSET => {
                let node_id = self.source.read_u16()?;
                let tag = self.read_str16()?;
                let value = self.read_value_v2(op, op_v2::SETNODETAG, op_v2::SETNODETAGSTR)?;
                let slot = self.read_positions_u32()?;
                DralEvent::SetNodeTag {
                    node_id,
                    tag,
                    value,
                    slot,
                }
            }
            op_v2::SETCYCLETAG | op_v2::SETCYCLETAGSTR | op_v2::SETCYCLETAGSET => {
                let tag = self.read_str16()?;
                let value = self.read_value_v2(op, op_v2::SETCYCLETAG, op_v2::SETCYCLETAGSTR)?;
                DralEvent::SetCycleTag { tag, value }
            }
            op_v2::SETTAGDESC => {
                let tag = self.read_str16()?;
                let text = self.read_str16()?;
                DralEvent::SetTagDescription { tag, text }
            }
            op_v2::SETNODEINPUTBW => DralEvent::SetNodeInputBandwidth {
                node_id: self.source.read_u16()?,
                bandwidth: self.source.read_u32()?,
            },
            op_v2::SETNODEOUTPUTBW => DralEvent::SetNodeOutputBandwidth {
                node_id: self.source.read_u16()?,
                bandwidth: self.source.read_u32()?,
            },
            op_v2::NEWCLOCK => self.read_new_clock(|d| d.read_str16())?,
            op_v2::SETNODECLOCK => DralEvent::SetNodeClock {
                node_id: self.source.read_u16()?,
                clock_id: self.source.read_u16()?,
            },
            op_v2::CYCLEWITHCLOCK => {
                let clock_id = self.source.read_u16()?;
                let cycle = self.source.read_u64()?;
                let phase = self.source.read_u8()?;
                DralEvent::CycleWithClock { clock_id, cycle, phase }
            }
            op_v2::SETHIGHWATERMARK => DralEvent::SetHighWaterMark {
                node_id: self.source.read_u16()?,
                mark: self.source.read_u64()?,
            },
            op_v2::ENDSIMULATION => DralEvent::EndSimulation,
            _ => return Err(DralError::UnknownOpcode { opcode: op, version: 2 }),
        };
        Ok(Some(event))
    }

    fn read_new_clock(&mut self, name: impl FnOnce(&mut Self) -> DralResult<String>) -> DralResult<DralEvent> {
        let id = self.source.read_u16()?;
        let frequency = self.source.read_u64()?;
        let skew = self.source.read_u16()?;
        let divisions = self.source.read_u16()?;
        let name = name(self)?;
        Ok(DralEvent::NewClock {
            id,
            frequency,
            skew,
            divisions,
            name,
        })
    }

    // ---- v3 / v4 ----

    fn read_value_compact(&mut self, op: u8, integer: u8, string: u8, width: usize) -> DralResult<TagValue> {
        if op == integer {
            Ok(TagValue::Integer(self.source.read_sized(width)?))
        } else if op == string {
            self.wire_string()
        } else {
            Ok(TagValue::Set(self.read_set(width)?))
        }
    }

    fn decode_compact(&mut self, version: WireVersion) -> DralResult<Option<DralEvent>> {
        if self.source.at_end()? {
            return Ok(None);
        }
        let (op, flags) = split_command(self.source.read_u8()?);
        let width = WIDTHS[flags as usize];
        let event = match op {
            op_v34::NEWTAG => {
                let id = self.source.read_u16()?;
                let name = self.read_str_compact(version)?;
                self.wire_tags.insert(id, name.clone());
                DralEvent::NewTag { id, name }
            }
            op_v34::NEWSTRING => {
                let id = self.source.read_u32()?;
                let text = self.read_str_compact(version)?;
                self.wire_strings.insert(id, text.clone());
                DralEvent::NewStringValue { id, text }
            }
            op_v34::CYCLE => DralEvent::Cycle(self.source.read_sized(width)?),
            op_v34::CYCLEWITHCLOCK => {
                let clock_id = self.source.read_u16()?;
                let phase = self.source.read_u8()?;
                let cycle = self.source.read_sized(width)?;
                DralEvent::CycleWithClock { clock_id, cycle, phase }
            }
            op_v34::NEWITEM => DralEvent::NewItem(self.source.read_u32()?),
            op_v34::DELETEITEM => DralEvent::DeleteItem(self.source.read_u32()?),
            op_v34::SETITEMTAG | op_v34::SETITEMTAGSTR | op_v34::SETITEMTAGSET => {
                let item_id = self.source.read_u32()?;
                let tag_id = self.source.read_u16()?;
                let tag = self.wire_tag(tag_id)?;
                let value = self.read_value_compact(op, op_v34::SETITEMTAG, op_v34::SETITEMTAGSTR, width)?;
                DralEvent::SetItemTag { item_id, tag, value }
            }
            op_v34::MOVEITEMS => {
                let edge_id = self.source.read_u16()?;
                let count = self.source.read_u16()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = self.source.read_u32()?;
                    let pos = self.source.read_u16()? as u32;
                    items.push((item, pos));
                }
                DralEvent::MoveItems { edge_id, items }
            }
            op_v34::ENTERNODE | op_v34::EXITNODE => {
                let node_id = self.source.read_u16()?;
                let item_id = self.source.read_u32()?;
                let position = self.read_positions_u16()?;
                if op == op_v34::ENTERNODE {
                    DralEvent::EnterNode {
                        node_id,
                        item_id,
                        position,
                    }
                } else {
                    DralEvent::ExitNode {
                        node_id,
                        item_id,
                        position,
                    }
                }
            }
            op_v34::SETNODETAG | op_v34::SETNODETAGSTR | op_v34::SETNODETAGSET => {
                let node_id = self.source.read_u16()?;
                let tag_id = self.source.read_u16()?;
                let tag = self.wire_tag(tag_id)?;
                let slot = self.read_positions_u16()?;
                let value = self.read_value_compact(op, op_v34::SETNODETAG, op_v34::SETNODETAGSTR, width)?;
                DralEvent::SetNodeTag {
                    node_id,
                    tag,
                    value,
                    slot,
                }
            }
            op_v34::SETCYCLETAG | op_v34::SETCYCLETAGSTR | op_v34::SETCYCLETAGSET => {
                let tag_id = self.source.read_u16()?;
                let tag = self.wire_tag(tag_id)?;
                let value = self.read_value_compact(op, op_v34::SETCYCLETAG, op_v34::SETCYCLETAGSTR, width)?;
                DralEvent::SetCycleTag { tag, value }
            }
            op_v34::NEWNODE => {
                let id = self.source.read_u16()?;
                let parent_id = self.source.read_u16()?;
                let instance = self.source.read_u16()?;
                let name = self.read_str_compact(version)?;
                DralEvent::NewNode {
                    id,
                    name,
                    parent_id,
                    instance,
                }
            }
            op_v34::NEWEDGE => self.read_new_edge(|d| d.read_str_compact(version))?,
            op_v34::SETNODELAYOUT => {
                let node_id = self.source.read_u16()?;
                let capacities = self.read_positions_u32()?;
                DralEvent::SetNodeLayout { node_id, capacities }
            }
            op_v34::SETNODEINPUTBW => DralEvent::SetNodeInputBandwidth {
                node_id: self.source.read_u16()?,
                bandwidth: self.source.read_u32()?,
            },
            op_v34::SETNODEOUTPUTBW => DralEvent::SetNodeOutputBandwidth {
                node_id: self.source.read_u16()?,
                bandwidth: self.source.read_u32()?,
            },
            op_v34::NEWCLOCK => self.read_new_clock(|d| d.read_str_compact(version))?,
            op_v34::SETNODECLOCK => DralEvent::SetNodeClock {
                node_id: self.source.read_u16()?,
                clock_id: self.source.read_u16()?,
            },
            op_v34::COMMENT => {
                let magic = self.source.read_u32()?;
                let text = self.read_str_compact(version)?;
                DralEvent::Comment { magic, text }
            }
            op_v34::COMMENTBIN => {
                let magic = self.source.read_u32()?;
                let len = self.source.read_u32()? as usize;
                let bytes = self.source.read(len)?.to_vec();
                DralEvent::CommentBin { magic, bytes }
            }
            op_v34::SETTAGDESC => {
                let tag_id = self.source.read_u16()?;
                let tag = self.wire_tag(tag_id)?;
                let text = self.read_str_compact(version)?;
                DralEvent::SetTagDescription { tag, text }
            }
            op_v34::SETHIGHWATERMARK => DralEvent::SetHighWaterMark {
                node_id: self.source.read_u16()?,
                mark: self.source.read_sized(width)?,
            },
            op_v34::ENDSIMULATION => DralEvent::EndSimulation,
            _ => {
                return Err(DralError::UnknownOpcode {
                    opcode: op,
                    version: version.number(),
                })
            }
        };
        Ok(Some(event))
    }

    // ---- ASCII ----

    fn decode_ascii(&mut self) -> DralResult<Option<DralEvent>> {
        while let Some(line) = self.source.read_line()? {
            self.line += 1;
            if let Some(event) = ascii::parse_line(&line, self.line)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for DralDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DralDecoder")
            .field("version", &self.version)
            .field("finished", &self.finished)
            .field("delivered", &self.delivered)
            .field("source", &self.source)
            .finish()
    }
}
