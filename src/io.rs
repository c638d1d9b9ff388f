//! Buffered byte source and sink with optional gzip compression.
//!
//! The decoder pulls exact-length byte runs from a [`ByteSource`]; the
//! encoder pushes records into a [`ByteSink`]. Both sides hide the gzip layer
//! (flate2) from the codec.
//!
//! # Example
//!
//! ```
//! use dralkit::io::{ByteSink, ByteSource};
//!
//! let mut sink = ByteSink::new(Vec::new(), false, 16);
//! sink.write(b"DRAL").unwrap();
//! sink.write_u32(7).unwrap();
//! let bytes = sink.finish().unwrap();
//!
//! let mut source = ByteSource::from_reader(std::io::Cursor::new(bytes), false, 4);
//! assert_eq!(source.read(4).unwrap(), b"DRAL");
//! assert_eq!(source.read_u32().unwrap(), 7);
//! assert!(source.at_end().unwrap());
//! ```

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DralError, DralResult};

/// The two magic bytes that open every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Buffer size used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Compression selection when opening a trace file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain byte stream
    None,
    /// Gzip-compressed stream
    Gzip,
    /// Detect from the gzip magic bytes
    #[default]
    Auto,
}

/// Streaming reader that hands out exact-length byte runs.
pub struct ByteSource {
    inner: Box<dyn Read + Send>,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
    consumed: u64,
    eof: bool,
    compressed: bool,
    path: Option<PathBuf>,
}

impl ByteSource {
    /// Wraps an arbitrary reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, gzip: bool, buffer_size: usize) -> Self {
        let inner: Box<dyn Read + Send> = if gzip {
            Box::new(MultiGzDecoder::new(reader))
        } else {
            Box::new(reader)
        };
        Self {
            inner,
            buf: vec![0; buffer_size.max(1)],
            pos: 0,
            end: 0,
            consumed: 0,
            eof: false,
            compressed: gzip,
            path: None,
        }
    }

    /// Opens a trace file.
    pub fn open<P: AsRef<Path>>(path: P, compression: Compression, buffer_size: usize) -> DralResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let gzip = match compression {
            Compression::None => false,
            Compression::Gzip => true,
            Compression::Auto => {
                let mut magic = [0u8; 2];
                let mut got = 0;
                while got < magic.len() {
                    match file.read(&mut magic[got..]) {
                        Ok(0) => break,
                        Ok(n) => got += n,
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                file.seek(SeekFrom::Start(0))?;
                got == magic.len() && magic == GZIP_MAGIC
            }
        };
        tracing::debug!(path = %path.display(), gzip, "opened trace source");
        let mut source = Self::from_reader(file, gzip, buffer_size);
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    /// Returns true if the underlying stream is gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Returns the number of bytes handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Returns the current capacity of the internal buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the uncompressed size of the stream, if it can be determined.
    ///
    /// Plain files report their length; gzip files report the ISIZE field of
    /// the gzip footer (the uncompressed size modulo 2^32). Readers that are
    /// not backed by a file report `None`.
    pub fn file_size(&self) -> Option<u64> {
        let path = self.path.as_ref()?;
        let mut file = File::open(path).ok()?;
        if !self.compressed {
            return file.metadata().ok().map(|m| m.len());
        }
        file.seek(SeekFrom::End(-4)).ok()?;
        let mut footer = [0u8; 4];
        file.read_exact(&mut footer).ok()?;
        Some(LittleEndian::read_u32(&footer) as u64)
    }

    fn available(&self) -> usize {
        self.end - self.pos
    }

    /// Refills until at least `n` bytes are buffered or the stream ends.
    ///
    /// The buffer only grows once it is full, doubling up to `n`, so a
    /// length field claiming more bytes than the stream holds costs at most
    /// twice what was actually read.
    fn fill(&mut self, n: usize) -> DralResult<()> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
        while self.end < n && !self.eof {
            if self.end == self.buf.len() {
                let grown = self.buf.len().saturating_mul(2).min(n);
                tracing::trace!(from = self.buf.len(), to = grown, "growing source buffer");
                self.buf.resize(grown, 0);
            }
            match self.inner.read(&mut self.buf[self.end..]) {
                Ok(0) => self.eof = true,
                Ok(read) => self.end += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Returns exactly `n` bytes, or `UnexpectedEof` if the stream ends first.
    pub fn read(&mut self, n: usize) -> DralResult<&[u8]> {
        if self.available() < n {
            self.fill(n)?;
            if self.available() < n {
                return Err(DralError::UnexpectedEof {
                    consumed: self.consumed + self.available() as u64,
                });
            }
        }
        let start = self.pos;
        self.pos += n;
        self.consumed += n as u64;
        Ok(&self.buf[start..start + n])
    }

    /// Returns true if no byte is left in the stream.
    pub fn at_end(&mut self) -> DralResult<bool> {
        if self.available() > 0 {
            return Ok(false);
        }
        self.fill(1)?;
        Ok(self.available() == 0)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> DralResult<u8> {
        Ok(self.read(1)?[0])
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> DralResult<u16> {
        Ok(LittleEndian::read_u16(self.read(2)?))
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> DralResult<u32> {
        Ok(LittleEndian::read_u32(self.read(4)?))
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> DralResult<u64> {
        Ok(LittleEndian::read_u64(self.read(8)?))
    }

    /// Reads a little-endian unsigned integer of `width` bytes (1, 2, 4 or 8).
    pub fn read_sized(&mut self, width: usize) -> DralResult<u64> {
        match width {
            1 => Ok(self.read_u8()? as u64),
            2 => Ok(self.read_u16()? as u64),
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            _ => Err(DralError::InvalidField(format!("invalid value width {}", width))),
        }
    }

    /// Reads `len` bytes as a UTF-8 string.
    pub fn read_string(&mut self, len: usize) -> DralResult<String> {
        let bytes = self.read(len)?.to_vec();
        String::from_utf8(bytes).map_err(|e| DralError::InvalidField(format!("invalid UTF-8 string: {}", e)))
    }

    /// Reads one line, without its terminator. Returns `None` at end of stream.
    pub fn read_line(&mut self) -> DralResult<Option<String>> {
        let mut line = Vec::new();
        loop {
            if self.at_end()? {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            let byte = self.read_u8()?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| DralError::InvalidField(format!("invalid UTF-8 line: {}", e)))
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("buffered", &self.available())
            .field("consumed", &self.consumed)
            .field("compressed", &self.compressed)
            .field("path", &self.path)
            .finish()
    }
}

enum SinkInner<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

/// Buffered writer that flushes in fixed-size blocks.
///
/// Call [`ByteSink::finish`] to flush the tail and close the gzip member.
pub struct ByteSink<W: Write> {
    out: SinkInner<W>,
    buf: Vec<u8>,
    capacity: usize,
    written: u64,
}

impl<W: Write> ByteSink<W> {
    /// Wraps a writer, optionally gzip-compressing everything written.
    pub fn new(writer: W, gzip: bool, capacity: usize) -> Self {
        let out = if gzip {
            SinkInner::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
        } else {
            SinkInner::Plain(writer)
        };
        let capacity = capacity.max(1);
        Self {
            out,
            buf: Vec::with_capacity(capacity),
            capacity,
            written: 0,
        }
    }

    /// Returns the number of uncompressed bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn out(&mut self) -> &mut dyn Write {
        match &mut self.out {
            SinkInner::Plain(w) => w,
            SinkInner::Gzip(w) => w,
        }
    }

    fn drain(&mut self) -> DralResult<()> {
        if !self.buf.is_empty() {
            let buf = std::mem::take(&mut self.buf);
            self.out().write_all(&buf)?;
            self.buf = buf;
            self.buf.clear();
        }
        Ok(())
    }

    /// Accumulates bytes, draining the buffer to the writer when full.
    pub fn write(&mut self, bytes: &[u8]) -> DralResult<()> {
        self.written += bytes.len() as u64;
        if self.buf.len() + bytes.len() > self.capacity {
            self.drain()?;
        }
        if bytes.len() >= self.capacity {
            self.out().write_all(bytes)?;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, v: u8) -> DralResult<()> {
        self.write(&[v])
    }

    /// Writes a little-endian u16.
    pub fn write_u16(&mut self, v: u16) -> DralResult<()> {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, v);
        self.write(&bytes)
    }

    /// Writes a little-endian u32.
    pub fn write_u32(&mut self, v: u32) -> DralResult<()> {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, v);
        self.write(&bytes)
    }

    /// Writes a little-endian u64.
    pub fn write_u64(&mut self, v: u64) -> DralResult<()> {
        let mut bytes = [0u8; 8];
        LittleEndian::write_u64(&mut bytes, v);
        self.write(&bytes)
    }

    /// Writes the low `width` bytes (1, 2, 4 or 8) of `v` little-endian.
    pub fn write_sized(&mut self, v: u64, width: usize) -> DralResult<()> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(DralError::InvalidField(format!("invalid value width {}", width)));
        }
        let v = if width == 8 { v } else { v & ((1u64 << (width * 8)) - 1) };
        let mut bytes = Vec::with_capacity(width);
        bytes.write_uint::<LittleEndian>(v, width)?;
        self.write(&bytes)
    }

    /// Pushes buffered bytes to the writer and flushes it.
    pub fn flush(&mut self) -> DralResult<()> {
        self.drain()?;
        self.out().flush()?;
        Ok(())
    }

    /// Flushes everything, finishes compression and returns the writer.
    pub fn finish(mut self) -> DralResult<W> {
        self.drain()?;
        match self.out {
            SinkInner::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            SinkInner::Gzip(encoder) => Ok(encoder.finish()?),
        }
    }
}

impl ByteSink<Vec<u8>> {
    /// Hands everything written to an uncompressed in-memory sink over to
    /// `dest` and empties this sink for reuse.
    pub fn transfer<D: Write>(&mut self, dest: &mut ByteSink<D>) -> DralResult<()> {
        match &mut self.out {
            SinkInner::Plain(spilled) => {
                if !spilled.is_empty() {
                    dest.write(spilled)?;
                    spilled.clear();
                }
            }
            SinkInner::Gzip(_) => {
                return Err(DralError::InvalidField(
                    "cannot transfer out of a compressed sink".to_string(),
                ))
            }
        }
        dest.write(&self.buf)?;
        self.buf.clear();
        self.written = 0;
        Ok(())
    }

    /// Drops everything written to an in-memory sink.
    pub fn discard(&mut self) {
        self.buf.clear();
        self.written = 0;
        if let SinkInner::Plain(spilled) = &mut self.out {
            spilled.clear();
        }
    }
}

impl ByteSink<File> {
    /// Creates a trace file.
    pub fn create<P: AsRef<Path>>(path: P, gzip: bool, capacity: usize) -> DralResult<Self> {
        let file = File::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), gzip, "created trace sink");
        Ok(Self::new(file, gzip, capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(bytes: Vec<u8>, buffer: usize) -> ByteSource {
        ByteSource::from_reader(Cursor::new(bytes), false, buffer)
    }

    // ========== ByteSource Tests ==========

    #[test]
    fn test_exact_reads_across_refills() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut src = source(data, 8);

        assert_eq!(src.read(3).unwrap(), &[0, 1, 2]);
        assert_eq!(src.read(7).unwrap(), &[3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(src.consumed(), 10);
        assert_eq!(src.read_u8().unwrap(), 10);
    }

    #[test]
    fn test_buffer_grows_for_large_request() {
        let data: Vec<u8> = (0..64u8).collect();
        let mut src = source(data, 4);

        let run = src.read(40).unwrap().to_vec();
        assert_eq!(run.len(), 40);
        assert_eq!(run[39], 39);
        assert!(src.buffer_capacity() >= 40);
    }

    #[test]
    fn test_oversized_request_on_short_stream() {
        let mut src = source(vec![7; 10], 16);

        let err = src.read(u32::MAX as usize).unwrap_err();
        assert!(err.is_truncation());
        assert_eq!(src.buffer_capacity(), 16);

        let mut src = source(vec![7; 100], 8);
        assert!(src.read(1 << 30).unwrap_err().is_truncation());
        assert!(src.buffer_capacity() <= 256);
    }

    #[test]
    fn test_short_read_is_truncation() {
        let mut src = source(vec![1, 2, 3], 16);
        let err = src.read(5).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_at_end() {
        let mut src = source(vec![9], 16);
        assert!(!src.at_end().unwrap());
        src.read_u8().unwrap();
        assert!(src.at_end().unwrap());
    }

    #[test]
    fn test_integer_helpers() {
        let mut sink = ByteSink::new(Vec::new(), false, 64);
        sink.write_u16(0xBEEF).unwrap();
        sink.write_u32(0xDEAD_BEEF).unwrap();
        sink.write_u64(u64::MAX - 1).unwrap();
        sink.write_sized(0x0102_0304, 4).unwrap();
        sink.write_sized(0xAB, 1).unwrap();
        let bytes = sink.finish().unwrap();

        let mut src = source(bytes, 4);
        assert_eq!(src.read_u16().unwrap(), 0xBEEF);
        assert_eq!(src.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(src.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(src.read_sized(4).unwrap(), 0x0102_0304);
        assert_eq!(src.read_sized(1).unwrap(), 0xAB);
        assert!(src.read_sized(3).is_err());
    }

    #[test]
    fn test_read_line() {
        let mut src = source(b"first\r\nsecond\nthird".to_vec(), 4);
        assert_eq!(src.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("second"));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("third"));
        assert_eq!(src.read_line().unwrap(), None);
    }

    #[test]
    fn test_reader_without_file_has_unknown_size() {
        let src = source(vec![1, 2, 3], 4);
        assert_eq!(src.file_size(), None);
    }

    // ========== ByteSink Tests ==========

    #[test]
    fn test_sink_flushes_when_full() {
        let mut sink = ByteSink::new(Vec::new(), false, 4);
        sink.write(&[1, 2, 3]).unwrap();
        sink.write(&[4, 5]).unwrap();
        sink.write(&[6, 7, 8, 9, 10]).unwrap();
        assert_eq!(sink.written(), 10);
        let bytes = sink.finish().unwrap();
        assert_eq!(bytes, (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_staged_bytes_transfer_in_order() {
        let mut staged = ByteSink::new(Vec::new(), false, 4);
        let mut sink = ByteSink::new(Vec::new(), false, 64);

        staged.write(&[1, 2, 3]).unwrap();
        staged.write(&[4, 5, 6, 7, 8]).unwrap();
        staged.write_u8(9).unwrap();
        staged.transfer(&mut sink).unwrap();
        assert_eq!(staged.written(), 0);

        staged.write(&[0xEE; 10]).unwrap();
        staged.discard();
        staged.write_u8(10).unwrap();
        staged.transfer(&mut sink).unwrap();

        assert_eq!(sink.written(), 10);
        assert_eq!(sink.finish().unwrap(), (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_gzip_roundtrip_in_memory() {
        let mut sink = ByteSink::new(Vec::new(), true, 32);
        for i in 0..1000u32 {
            sink.write_u32(i).unwrap();
        }
        let compressed = sink.finish().unwrap();
        assert_eq!(&compressed[..2], &GZIP_MAGIC);

        let mut src = ByteSource::from_reader(Cursor::new(compressed), true, 64);
        assert!(src.is_compressed());
        for i in 0..1000u32 {
            assert_eq!(src.read_u32().unwrap(), i);
        }
        assert!(src.at_end().unwrap());
    }
}
