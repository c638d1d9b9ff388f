//! Protocol codec.
//!
//! Translates between the DRAL byte stream and [`DralEvent`]s. Five binary
//! generations (v0 to v4) and one ASCII generation are supported; the
//! generation is detected from the stream preamble. Per-version layouts live
//! in the opcode tables below and are dispatched by `match`, never through
//! trait objects.
//!
//! # Example
//!
//! ```
//! use dralkit::codec::{DralDecoder, DralEncoder, WireVersion};
//! use dralkit::event::DralEvent;
//! use dralkit::io::ByteSink;
//!
//! let mut enc = DralEncoder::new(ByteSink::new(Vec::new(), false, 4096), WireVersion::V3).unwrap();
//! enc.encode(&DralEvent::Cycle(10)).unwrap();
//! enc.encode(&DralEvent::NewItem(7)).unwrap();
//! let bytes = enc.finish().unwrap();
//!
//! let mut dec = DralDecoder::from_reader(std::io::Cursor::new(bytes), false);
//! assert_eq!(dec.next_event().unwrap(), Some(DralEvent::Version(3)));
//! assert_eq!(dec.next_event().unwrap(), Some(DralEvent::Cycle(10)));
//! assert_eq!(dec.next_event().unwrap(), Some(DralEvent::NewItem(7)));
//! assert_eq!(dec.next_event().unwrap(), None);
//! ```

pub mod ascii;
pub mod decoder;
pub mod encoder;

use serde::{Deserialize, Serialize};

use crate::event::DralEvent;
use crate::types::TagValue;

pub use decoder::DralDecoder;
pub use encoder::DralEncoder;

/// Magic bytes opening every binary trace.
pub const MAGIC: [u8; 4] = *b"DRAL";

/// Prefix of the ASCII preamble line.
pub const ASCII_PREAMBLE: &str = "version major";

/// Major version announced by the ASCII writer.
pub const ASCII_MAJOR: u16 = 4;

/// Mask selecting the opcode bits of a command byte.
pub const OPCODE_MASK: u8 = 0x3f;

/// Shift of the per-version flag bits of a command byte.
pub const FLAGS_SHIFT: u8 = 6;

/// A wire-format generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireVersion {
    V0,
    V1,
    V2,
    V3,
    V4,
    Ascii,
}

impl WireVersion {
    /// Maps a preamble version byte to a binary generation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(WireVersion::V0),
            1 => Some(WireVersion::V1),
            2 => Some(WireVersion::V2),
            3 => Some(WireVersion::V3),
            4 => Some(WireVersion::V4),
            _ => None,
        }
    }

    /// Returns the preamble version byte (the announced major for ASCII).
    pub fn number(self) -> u8 {
        match self {
            WireVersion::V0 => 0,
            WireVersion::V1 => 1,
            WireVersion::V2 => 2,
            WireVersion::V3 => 3,
            WireVersion::V4 => 4,
            WireVersion::Ascii => ASCII_MAJOR as u8,
        }
    }

    /// Returns a display name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            WireVersion::V0 => "v0",
            WireVersion::V1 => "v1",
            WireVersion::V2 => "v2",
            WireVersion::V3 => "v3",
            WireVersion::V4 => "v4",
            WireVersion::Ascii => "ascii",
        }
    }

    /// Returns true for v0 and v1.
    pub fn is_legacy(self) -> bool {
        matches!(self, WireVersion::V0 | WireVersion::V1)
    }

    /// Returns true for v3 and v4, which reference tags and strings by id.
    pub fn is_compact(self) -> bool {
        matches!(self, WireVersion::V3 | WireVersion::V4)
    }

    /// Returns the longest string the generation can carry.
    pub fn max_string_len(self) -> usize {
        match self {
            WireVersion::V3 => u8::MAX as usize,
            WireVersion::V4 => u32::MAX as usize,
            WireVersion::Ascii => usize::MAX,
            _ => u16::MAX as usize,
        }
    }

    /// Returns true if the generation has a record for this event kind and
    /// value type. Range limits are checked when encoding.
    pub fn supports(self, event: &DralEvent) -> bool {
        if event.is_definition() {
            return true;
        }
        if !self.is_legacy() {
            return true;
        }
        match event {
            DralEvent::Cycle(_)
            | DralEvent::NewNode { .. }
            | DralEvent::NewEdge { .. }
            | DralEvent::SetNodeLayout { .. }
            | DralEvent::SetHighWaterMark { .. }
            | DralEvent::NewItem(_)
            | DralEvent::DeleteItem(_)
            | DralEvent::MoveItems { .. }
            | DralEvent::EnterNode { .. }
            | DralEvent::ExitNode { .. }
            | DralEvent::Comment { .. } => true,
            DralEvent::SetItemTag { value, .. } | DralEvent::SetNodeTag { value, .. } => {
                matches!(value, TagValue::Integer(_))
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for WireVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Opcodes of the v0 and v1 generations.
pub mod op_v01 {
    pub const CYCLE: u8 = 0;
    pub const NEWITEM: u8 = 1;
    pub const MOVEITEMS: u8 = 2;
    pub const DELETEITEM: u8 = 3;
    pub const SETTAG: u8 = 5;
    pub const ENTERNODE: u8 = 6;
    pub const EXITNODE: u8 = 7;
    pub const ADDNODE: u8 = 8;
    pub const ADDEDGE: u8 = 9;
    pub const SETCAPACITY: u8 = 10;
    pub const SETHIGHWATERMARK: u8 = 11;
    pub const COMMENT: u8 = 12;
    pub const SETTAGNODE: u8 = 14;
}

/// Opcodes of the v2 generation.
pub mod op_v2 {
    pub const CYCLE: u8 = 0;
    pub const NEWITEM: u8 = 1;
    pub const MOVEITEMS: u8 = 2;
    pub const DELETEITEM: u8 = 3;
    pub const SETITEMTAG: u8 = 4;
    pub const SETITEMTAGSTR: u8 = 5;
    pub const SETITEMTAGSET: u8 = 6;
    pub const ENTERNODE: u8 = 7;
    pub const EXITNODE: u8 = 8;
    pub const NEWNODE: u8 = 9;
    pub const NEWEDGE: u8 = 10;
    pub const SETNODELAYOUT: u8 = 11;
    pub const COMMENT: u8 = 12;
    pub const COMMENTBIN: u8 = 13;
    pub const SETNODETAG: u8 = 14;
    pub const SETNODETAGSTR: u8 = 15;
    pub const SETNODETAGSET: u8 = 16;
    pub const SETCYCLETAG: u8 = 17;
    pub const SETCYCLETAGSTR: u8 = 18;
    pub const SETCYCLETAGSET: u8 = 19;
    pub const SETTAGDESC: u8 = 20;
    pub const SETNODEINPUTBW: u8 = 21;
    pub const SETNODEOUTPUTBW: u8 = 22;
    pub const NEWCLOCK: u8 = 23;
    pub const SETNODECLOCK: u8 = 24;
    pub const CYCLEWITHCLOCK: u8 = 25;
    pub const SETHIGHWATERMARK: u8 = 26;
    pub const ENDSIMULATION: u8 = 27;
}

/// Opcodes of the v3 and v4 generations.
pub mod op_v34 {
    pub const NEWTAG: u8 = 0;
    pub const NEWSTRING: u8 = 1;
    pub const CYCLE: u8 = 2;
    pub const CYCLEWITHCLOCK: u8 = 3;
    pub const NEWITEM: u8 = 4;
    pub const DELETEITEM: u8 = 5;
    pub const SETITEMTAG: u8 = 6;
    pub const SETITEMTAGSTR: u8 = 7;
    pub const SETITEMTAGSET: u8 = 8;
    pub const MOVEITEMS: u8 = 9;
    pub const ENTERNODE: u8 = 10;
    pub const EXITNODE: u8 = 11;
    pub const SETNODETAG: u8 = 12;
    pub const SETNODETAGSTR: u8 = 13;
    pub const SETNODETAGSET: u8 = 14;
    pub const SETCYCLETAG: u8 = 15;
    pub const SETCYCLETAGSTR: u8 = 16;
    pub const SETCYCLETAGSET: u8 = 17;
    pub const NEWNODE: u8 = 18;
    pub const NEWEDGE: u8 = 19;
    pub const SETNODELAYOUT: u8 = 20;
    pub const SETNODEINPUTBW: u8 = 21;
    pub const SETNODEOUTPUTBW: u8 = 22;
    pub const NEWCLOCK: u8 = 23;
    pub const SETNODECLOCK: u8 = 24;
    pub const COMMENT: u8 = 25;
    pub const COMMENTBIN: u8 = 26;
    pub const SETTAGDESC: u8 = 27;
    pub const SETHIGHWATERMARK: u8 = 28;
    pub const ENDSIMULATION: u8 = 29;
}

/// Byte widths selected by the two command flag bits.
pub(crate) const WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Packs an opcode and its flag bits into a command byte.
#[inline]
pub(crate) fn command(opcode: u8, flags: u8) -> u8 {
    (opcode & OPCODE_MASK) | (flags << FLAGS_SHIFT)
}

/// Splits a command byte into `(opcode, flags)`.
#[inline]
pub(crate) fn split_command(cmd: u8) -> (u8, u8) {
    (cmd & OPCODE_MASK, cmd >> FLAGS_SHIFT)
}

/// Returns the narrowest width selector whose width holds `value`.
#[inline]
pub(crate) fn width_selector(value: u64) -> u8 {
    if value <= u8::MAX as u64 {
        0
    } else if value <= u16::MAX as u64 {
        1
    } else if value <= u32::MAX as u64 {
        2
    } else {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_packing() {
        let cmd = command(op_v34::SETITEMTAG, 3);
        assert_eq!(cmd, 0xc6);
        assert_eq!(split_command(cmd), (op_v34::SETITEMTAG, 3));
        assert_eq!(split_command(op_v2::ENDSIMULATION), (27, 0));
    }

    #[test]
    fn test_width_selector() {
        assert_eq!(width_selector(0), 0);
        assert_eq!(width_selector(255), 0);
        assert_eq!(width_selector(256), 1);
        assert_eq!(width_selector(70_000), 2);
        assert_eq!(width_selector(u64::MAX), 3);
        assert_eq!(WIDTHS[width_selector(70_000) as usize], 4);
    }

    #[test]
    fn test_version_support() {
        let str_tag = DralEvent::SetItemTag {
            item_id: 1,
            tag: "t".to_string(),
            value: TagValue::from("x"),
        };
        assert!(!WireVersion::V0.supports(&str_tag));
        assert!(WireVersion::V2.supports(&str_tag));
        assert!(!WireVersion::V1.supports(&DralEvent::EndSimulation));
        assert!(WireVersion::V1.supports(&DralEvent::NewTag {
            id: 0,
            name: "t".to_string()
        }));
        assert!(WireVersion::Ascii.supports(&DralEvent::EndSimulation));
    }

    #[test]
    fn test_version_bytes() {
        for b in 0..=4u8 {
            assert_eq!(WireVersion::from_byte(b).map(|v| v.number()), Some(b));
        }
        assert_eq!(WireVersion::from_byte(5), None);
        assert_eq!(WireVersion::V3.max_string_len(), 255);
    }
}
