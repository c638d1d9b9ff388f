//! ASCII trace generation.
//!
//! One command per line, whitespace separated. The writer is the
//! authoritative direction; the reader is best effort and exists so debug
//! traces can be replayed.
//!
//! ```text
//! version major 4 minor 0
//! cycle 10
//! newnode 1 L1 0 0
//! setItemTag 7 opcode = "add r1, r2"
//! moveitems 2 7@0 8@1
//! setNodeTag 1 occupancy = {1,2} 0 3
//! ```

use crate::codec::ASCII_PREAMBLE;
use crate::error::{DralError, DralResult};
use crate::event::DralEvent;
use crate::types::TagValue;

/// Renders one event as an ASCII line, without the newline.
///
/// Definition events have no ASCII form and yield `None`.
pub fn format_event(event: &DralEvent) -> Option<String> {
    let line = match event {
        DralEvent::Version(_)
        | DralEvent::NewTag { .. }
        | DralEvent::NewStringValue { .. }
        | DralEvent::Error(_) => return None,
        DralEvent::Cycle(c) => format!("cycle {}", c),
        DralEvent::CycleWithClock { clock_id, cycle, phase } => format!("cycleclock {} {} {}", clock_id, cycle, phase),
        DralEvent::NewClock {
            id,
            frequency,
            skew,
            divisions,
            name,
        } => format!("newclock {} {} {} {} {}", id, frequency, skew, divisions, quote(name)),
        DralEvent::SetNodeClock { node_id, clock_id } => format!("setnodeclock {} {}", node_id, clock_id),
        DralEvent::NewNode {
            id,
            name,
            parent_id,
            instance,
        } => format!("newnode {} {} {} {}", id, quote(name), parent_id, instance),
        DralEvent::NewEdge {
            id,
            src,
            dst,
            bandwidth,
            latency,
            name,
        } => format!("newedge {} {} {} {} {} {}", id, src, dst, bandwidth, latency, quote(name)),
        DralEvent::SetNodeLayout { node_id, capacities } => {
            format!("setnodelayout {}{}", node_id, join_positions(capacities))
        }
        DralEvent::SetNodeInputBandwidth { node_id, bandwidth } => format!("setnodeinputbw {} {}", node_id, bandwidth),
        DralEvent::SetNodeOutputBandwidth { node_id, bandwidth } => format!("setnodeoutputbw {} {}", node_id, bandwidth),
        DralEvent::SetHighWaterMark { node_id, mark } => format!("sethighwatermark {} {}", node_id, mark),
        DralEvent::NewItem(id) => format!("newitem {}", id),
        DralEvent::DeleteItem(id) => format!("deleteitem {}", id),
        DralEvent::SetItemTag { item_id, tag, value } => {
            format!("setItemTag {} {} = {}", item_id, quote(tag), format_value(value))
        }
        DralEvent::MoveItems { edge_id, items } => {
            let mut line = format!("moveitems {}", edge_id);
            for (item, pos) in items {
                line.push_str(&format!(" {}@{}", item, pos));
            }
            line
        }
        DralEvent::EnterNode {
            node_id,
            item_id,
            position,
        } => format!("enternode {} {}{}", node_id, item_id, join_positions(position)),
        DralEvent::ExitNode {
            node_id,
            item_id,
            position,
        } => format!("exitnode {} {}{}", node_id, item_id, join_positions(position)),
        DralEvent::SetNodeTag {
            node_id,
            tag,
            value,
            slot,
        } => format!(
            "setNodeTag {} {} = {}{}",
            node_id,
            quote(tag),
            format_value(value),
            join_positions(slot)
        ),
        DralEvent::SetCycleTag { tag, value } => format!("setCycleTag {} = {}", quote(tag), format_value(value)),
        DralEvent::Comment { magic, text } => format!("comment {} {}", magic, quote(text)),
        DralEvent::CommentBin { magic, bytes } => format!("commentbin {} {}", magic, quote(&hex::encode(bytes))),
        DralEvent::SetTagDescription { tag, text } => format!("settagdesc {} {}", quote(tag), quote(text)),
        DralEvent::EndSimulation => "endsimulation".to_string(),
    };
    Some(line)
}

/// Renders a tag value: decimal, quoted string or `{a,b,c}`.
pub fn format_value(value: &TagValue) -> String {
    match value {
        TagValue::Integer(v) => v.to_string(),
        TagValue::Str(s) => quote_always(s),
        TagValue::Set(set) => {
            let items: Vec<String> = set.iter().map(|v| v.to_string()).collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

fn join_positions(positions: &[u32]) -> String {
    positions.iter().map(|p| format!(" {}", p)).collect()
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '=' | '{' | '@' | '\\'))
}

/// Writes `s` bare when it is a safe token, quoted otherwise.
pub fn quote(s: &str) -> String {
    if needs_quotes(s) {
        quote_always(s)
    } else {
        s.to_string()
    }
}

fn quote_always(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Parses the `version major <M> minor <m>` preamble. Returns `M`.
pub fn parse_preamble(line: &str) -> DralResult<u16> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let bad = || DralError::Ascii {
        line: 1,
        message: format!("expected '{} <M> minor <m>', got '{}'", ASCII_PREAMBLE, line),
    };
    match fields.as_slice() {
        ["version", "major", major, "minor", minor] => {
            let major: u16 = major.parse().map_err(|_| bad())?;
            let _: u16 = minor.parse().map_err(|_| bad())?;
            if major > 4 {
                return Err(DralError::UnsupportedVersion(major.min(u8::MAX as u16) as u8));
            }
            Ok(major)
        }
        _ => Err(bad()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(line: &str, line_no: usize) -> DralResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut text = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => break,
                    },
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(DralError::Ascii {
                    line: line_no,
                    message: "unterminated quoted string".to_string(),
                });
            }
            tokens.push(Token { text, quoted: true });
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token { text, quoted: false });
        }
    }
    Ok(tokens)
}

struct Fields {
    tokens: std::vec::IntoIter<Token>,
    line: usize,
}

impl Fields {
    fn err(&self, message: impl Into<String>) -> DralError {
        DralError::Ascii {
            line: self.line,
            message: message.into(),
        }
    }

    fn next(&mut self, what: &str) -> DralResult<Token> {
        let line = self.line;
        self.tokens.next().ok_or_else(|| DralError::Ascii {
            line,
            message: format!("missing {}", what),
        })
    }

    fn text(&mut self, what: &str) -> DralResult<String> {
        Ok(self.next(what)?.text)
    }

    fn uint<T: TryFrom<u64>>(&mut self, what: &str) -> DralResult<T> {
        let token = self.next(what)?;
        let value = parse_u64(&token.text).ok_or_else(|| self.err(format!("bad {} '{}'", what, token.text)))?;
        T::try_from(value).map_err(|_| self.err(format!("{} {} out of range", what, value)))
    }

    fn equals(&mut self) -> DralResult<()> {
        let token = self.next("'='")?;
        if token.quoted || token.text != "=" {
            return Err(self.err(format!("expected '=', got '{}'", token.text)));
        }
        Ok(())
    }

    fn value(&mut self) -> DralResult<TagValue> {
        let token = self.next("value")?;
        if token.quoted {
            return Ok(TagValue::Str(token.text));
        }
        if let Some(inner) = token.text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            let set = inner
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| parse_u64(s).ok_or_else(|| self.err(format!("bad set element '{}'", s))))
                .collect::<DralResult<Vec<u64>>>()?;
            return Ok(TagValue::Set(set));
        }
        parse_u64(&token.text)
            .map(TagValue::Integer)
            .ok_or_else(|| self.err(format!("bad value '{}'", token.text)))
    }

    fn positions(&mut self) -> DralResult<Vec<u32>> {
        let mut out = Vec::new();
        while self.tokens.len() > 0 {
            out.push(self.uint("position")?);
        }
        Ok(out)
    }

    fn done(&mut self) -> DralResult<()> {
        match self.tokens.next() {
            Some(extra) => Err(self.err(format!("unexpected trailing token '{}'", extra.text))),
            None => Ok(()),
        }
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Parses one ASCII line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str, line_no: usize) -> DralResult<Option<DralEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let tokens = tokenize(trimmed, line_no)?;
    let mut f = Fields {
        tokens: tokens.into_iter(),
        line: line_no,
    };
    let command = f.text("command")?.to_ascii_lowercase();
    let event = match command.as_str() {
        "cycle" => DralEvent::Cycle(f.uint("cycle")?),
        "cycleclock" => DralEvent::CycleWithClock {
            clock_id: f.uint("clock")?,
            cycle: f.uint("cycle")?,
            phase: f.uint("phase")?,
        },
        "newclock" => DralEvent::NewClock {
            id: f.uint("clock id")?,
            frequency: f.uint("frequency")?,
            skew: f.uint("skew")?,
            divisions: f.uint("divisions")?,
            name: f.text("clock name")?,
        },
        "setnodeclock" => DralEvent::SetNodeClock {
            node_id: f.uint("node")?,
            clock_id: f.uint("clock")?,
        },
        "newnode" => DralEvent::NewNode {
            id: f.uint("node id")?,
            name: f.text("node name")?,
            parent_id: f.uint("parent")?,
            instance: f.uint("instance")?,
        },
        "newedge" => DralEvent::NewEdge {
            id: f.uint("edge id")?,
            src: f.uint("source")?,
            dst: f.uint("destination")?,
            bandwidth: f.uint("bandwidth")?,
            latency: f.uint("latency")?,
            name: f.text("edge name")?,
        },
        "setnodelayout" => DralEvent::SetNodeLayout {
            node_id: f.uint("node")?,
            capacities: f.positions()?,
        },
        "setnodeinputbw" => DralEvent::SetNodeInputBandwidth {
            node_id: f.uint("node")?,
            bandwidth: f.uint("bandwidth")?,
        },
        "setnodeoutputbw" => DralEvent::SetNodeOutputBandwidth {
            node_id: f.uint("node")?,
            bandwidth: f.uint("bandwidth")?,
        },
        "sethighwatermark" => DralEvent::SetHighWaterMark {
            node_id: f.uint("node")?,
            mark: f.uint("mark")?,
        },
        "newitem" => DralEvent::NewItem(f.uint("item")?),
        "deleteitem" => DralEvent::DeleteItem(f.uint("item")?),
        "setitemtag" => {
            let item_id = f.uint("item")?;
            let tag = f.text("tag")?;
            f.equals()?;
            DralEvent::SetItemTag {
                item_id,
                tag,
                value: f.value()?,
            }
        }
        "moveitems" => {
            let edge_id = f.uint("edge")?;
            let mut items = Vec::new();
            while f.tokens.len() > 0 {
                let token = f.text("item@position")?;
                let parsed = token
                    .split_once('@')
                    .and_then(|(i, p)| Some((parse_u64(i)?, parse_u64(p)?)))
                    .and_then(|(i, p)| Some((u32::try_from(i).ok()?, u32::try_from(p).ok()?)));
                match parsed {
                    Some(pair) => items.push(pair),
                    None => return Err(f.err(format!("bad item@position '{}'", token))),
                }
            }
            DralEvent::MoveItems { edge_id, items }
        }
        "enternode" | "exitnode" => {
            let node_id = f.uint("node")?;
            let item_id = f.uint("item")?;
            let position = f.positions()?;
            if command == "enternode" {
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
        "setnodetag" => {
            let node_id = f.uint("node")?;
            let tag = f.text("tag")?;
            f.equals()?;
            let value = f.value()?;
            DralEvent::SetNodeTag {
                node_id,
                tag,
                value,
                slot: f.positions()?,
            }
        }
        "setcycletag" => {
            let tag = f.text("tag")?;
            f.equals()?;
            DralEvent::SetCycleTag { tag, value: f.value()? }
        }
        "comment" => DralEvent::Comment {
            magic: f.uint("magic")?,
            text: f.text("comment text")?,
        },
        "commentbin" => {
            let magic = f.uint("magic")?;
            let text = f.text("comment bytes")?;
            let bytes = hex::decode(&text).map_err(|e| f.err(format!("bad hex payload: {}", e)))?;
            DralEvent::CommentBin { magic, bytes }
        }
        "settagdesc" => DralEvent::SetTagDescription {
            tag: f.text("tag")?,
            text: f.text("description")?,
        },
        "endsimulation" => DralEvent::EndSimulation,
        other => return Err(f.err(format!("unknown command '{}'", other))),
    };
    f.done()?;
    Ok(Some(event))
}
