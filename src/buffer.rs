//! The central record-encoding and chunk-management engine (spec §4.3).
//!
//! A Buffer owns one logical stream: it turns caller field writes into
//! var-int-encoded record frames, chains chunks as they fill, drains the
//! chain to a [`File`] on flush, and on the read side reverses the
//! process, including the rewind-point mechanism and the by-event/
//! by-time seek indices.
//!
//! The chunk chain here is a plain `Vec<Chunk>` rather than an arena of
//! indexed, intrusively-linked nodes: since a buffer only ever appends to
//! its own chain and rewind only ever truncates it, a growable vector
//! gives the same invariants (no shared ownership, O(1) append, cheap
//! truncation) without the bookkeeping a general arena would need for a
//! structure that, here, is never actually cyclic in memory.

use crate::archive::Mode;
use crate::chunk::{Chunk, ChunkHeader, CHUNK_HEADER_SIZE};
use crate::control::{
    Endianness, BUFFER_FLUSH, CHUNK_HEADER, END_OF_CHUNK, END_OF_FILE, TIMESTAMP,
};
use crate::error::{TraceError, TraceResult};
use crate::file::File;
use crate::limits::ALLOCATOR_MEMORY_CAP;
use crate::rewind::{RewindPoint, RewindRegistry};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Event/definition/snapshot streams: split across many fixed-size
    /// chunks, each independently framed (spec §4.3, invariant 2).
    Chunked,
    /// Thumbnail/anchor-like streams: one logical chunk sized to the
    /// decompressed stream length (invariant 3).
    NotChunked,
}

/// Whether flushing a chunk chain should actually hit the File layer.
/// Returned by the caller's pre-flush callback (spec §4.3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Flush,
    NoFlush,
}

/// One frame read from the stream: either a caller record or one of the
/// engine's own control markers.
#[derive(Debug, Clone, Copy)]
pub enum Frame {
    Record { record_type: u8, length: u64, start: usize },
    EndOfChunk,
    EndOfFile,
}

struct CatalogEntry {
    ordinal: u64,
    first_event_number: u64,
    last_event_number: u64,
    first_timestamp: Option<u64>,
}

pub struct Buffer {
    mode: Mode,
    chunk_mode: ChunkMode,
    chunk_size: u64,
    is_event_stream: bool,
    file: Option<File>,

    // Write side.
    write_chain: Vec<Chunk>,
    old_chunk_list: Vec<Chunk>,
    next_event_number: u64,
    write_timestamp_cursor: u64,
    rewind: RewindRegistry,
    pending_record: Option<PendingRecord>,
    pending_record_max_len: usize,
    last_timestamp_write_pos: Option<usize>,
    pre_flush_callback: Option<Box<dyn FnMut() -> FlushDecision>>,
    post_flush_timestamp_callback: Option<Box<dyn FnMut() -> u64>>,

    // Read side.
    current_chunk: Option<Chunk>,
    current_ordinal: u64,
    read_pos: usize,
    read_timestamp_cursor: u64,
    last_timestamp_read_pos: Option<usize>,
    catalog: Option<Vec<CatalogEntry>>,
}

struct PendingRecord {
    /// Offset, in the current chunk's byte vector, of the record-type byte.
    start: usize,
    /// Offset of the length-prefix field (immediately after the type byte).
    length_field_start: usize,
    /// Width in bytes of the length-prefix field (1 or 9).
    length_field_width: usize,
}

impl Buffer {
    pub fn new(mode: Mode, chunk_mode: ChunkMode, chunk_size: u64, is_event_stream: bool) -> TraceResult<Self> {
        crate::limits::validate_chunk_size(chunk_size)?;
        let mut buf = Buffer {
            mode,
            chunk_mode,
            chunk_size,
            is_event_stream,
            file: None,
            write_chain: Vec::new(),
            old_chunk_list: Vec::new(),
            next_event_number: 1,
            write_timestamp_cursor: 0,
            rewind: RewindRegistry::new(),
            pending_record: None,
            pending_record_max_len: 0,
            last_timestamp_write_pos: None,
            pre_flush_callback: None,
            post_flush_timestamp_callback: None,
            current_chunk: None,
            current_ordinal: 0,
            read_pos: CHUNK_HEADER_SIZE,
            read_timestamp_cursor: 0,
            last_timestamp_read_pos: None,
            catalog: None,
        };
        if matches!(mode, Mode::Write) {
            buf.allocate_chain_head()?;
        }
        Ok(buf)
    }

    pub fn attach_file(&mut self, file: File) {
        self.file = Some(file);
    }

    pub fn set_pre_flush_callback(&mut self, cb: Box<dyn FnMut() -> FlushDecision>) {
        self.pre_flush_callback = Some(cb);
    }

    pub fn set_post_flush_timestamp_callback(&mut self, cb: Box<dyn FnMut() -> u64>) {
        self.post_flush_timestamp_callback = Some(cb);
    }

    // ---------------------------------------------------------------
    // 4.3.3 Mode transitions
    // ---------------------------------------------------------------

    /// `Write -> Modify`: pad the tail, rewind the read cursor to the
    /// start of the chain, keep the write cursor where it is.
    pub fn transition_write_to_modify(&mut self) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        self.pad_current_chunk_tail()?;
        self.mode = Mode::Modify;
        self.read_pos = CHUNK_HEADER_SIZE;
        Ok(())
    }

    /// `Write -> Read`: as above, but the write cursor becomes invalid.
    pub fn transition_write_to_read(&mut self) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        self.pad_current_chunk_tail()?;
        self.mode = Mode::Read;
        self.read_pos = CHUNK_HEADER_SIZE;
        Ok(())
    }

    /// `Modify -> Read`: drop the write cursor, read cursor restarts.
    pub fn transition_modify_to_read(&mut self) -> TraceResult<()> {
        self.require_mode(Mode::Modify)?;
        self.mode = Mode::Read;
        self.read_pos = CHUNK_HEADER_SIZE;
        Ok(())
    }

    fn require_mode(&self, expected: Mode) -> TraceResult<()> {
        if self.mode != expected {
            return Err(TraceError::state(format!(
                "operation requires {expected:?} mode, buffer is in {:?}",
                self.mode
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // 4.3.4 / 4.3.5 Write pipeline
    // ---------------------------------------------------------------

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        self.write_chain.last_mut().expect("chain head always allocated while writing")
    }

    fn endianness(&self) -> Endianness {
        Endianness::host()
    }

    /// Step 1 of the write pipeline: emits `TIMESTAMP` + 8-byte fixed time
    /// if `t` differs from the cursor (invariant 7).
    pub fn write_timestamp(&mut self, t: u64) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        if !self.is_event_stream || t == self.write_timestamp_cursor {
            return Ok(());
        }
        self.ensure_space(1 + 8)?;
        let endianness = self.endianness();
        let pos = self.current_chunk_mut().bytes.len();
        self.last_timestamp_write_pos = Some(pos);
        let chunk = self.current_chunk_mut();
        chunk.bytes.push(TIMESTAMP);
        varint::write_fixed_u64(&mut chunk.bytes, t, endianness);
        if chunk.first_timestamp.is_none() {
            chunk.first_timestamp = Some(t);
        }
        self.write_timestamp_cursor = t;
        Ok(())
    }

    /// Steps 2-4: reserves space, writes the type byte and a length
    /// placeholder sized for `max_record_length`.
    pub fn begin_record(&mut self, record_type: u8, max_record_length: usize) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        if record_type < crate::control::FIRST_CALLER_RECORD_TYPE {
            return Err(TraceError::argument(format!(
                "record type {record_type} collides with reserved control bytes"
            )));
        }
        let length_field_width = if max_record_length < 255 { 1 } else { 9 };
        self.ensure_space(1 + length_field_width + max_record_length)?;
        self.pending_record_max_len = max_record_length;
        let chunk = self.current_chunk_mut();
        let start = chunk.bytes.len();
        chunk.bytes.push(record_type);
        let length_field_start = chunk.bytes.len();
        if length_field_width == 1 {
            chunk.bytes.push(0);
        } else {
            chunk.bytes.push(0xFF);
            chunk.bytes.extend_from_slice(&[0u8; 8]);
        }
        self.pending_record = Some(PendingRecord {
            start,
            length_field_start,
            length_field_width,
        });
        Ok(())
    }

    fn pending_chunk_bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.current_chunk_mut().bytes
    }

    pub fn write_u8(&mut self, v: u8) -> TraceResult<()> {
        varint::write_u8(self.pending_chunk_bytes_mut(), v);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> TraceResult<()> {
        let e = self.endianness();
        varint::write_u16(self.pending_chunk_bytes_mut(), v, e);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> TraceResult<()> {
        let e = self.endianness();
        varint::write_varint_u32(self.pending_chunk_bytes_mut(), v, e);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> TraceResult<()> {
        let e = self.endianness();
        varint::write_varint_u64(self.pending_chunk_bytes_mut(), v, e);
        Ok(())
    }

    pub fn write_f32(&mut self, v: f32) -> TraceResult<()> {
        let e = self.endianness();
        varint::write_f32(self.pending_chunk_bytes_mut(), v, e);
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> TraceResult<()> {
        let e = self.endianness();
        varint::write_f64(self.pending_chunk_bytes_mut(), v, e);
        Ok(())
    }

    pub fn write_str(&mut self, v: &str) -> TraceResult<()> {
        varint::write_str(self.pending_chunk_bytes_mut(), v);
        Ok(())
    }

    /// Step 6: backfills the real length and closes out the record.
    pub fn finish_record(&mut self) -> TraceResult<()> {
        let pending = self
            .pending_record
            .take()
            .ok_or_else(|| TraceError::state("finish_record called with no open record".into()))?;
        let max_len = self.pending_record_max_len;
        let event_number = self.next_event_number;
        let chunk = self.current_chunk_mut();
        let payload_start = pending.length_field_start + pending.length_field_width;
        let actual_len = (chunk.bytes.len() - payload_start) as u64;
        if actual_len as usize > max_len {
            return Err(TraceError::argument(format!(
                "record body ({actual_len} bytes) exceeded its reserved max length ({max_len})"
            )));
        }
        if pending.length_field_width == 1 {
            chunk.bytes[pending.length_field_start] = actual_len as u8;
        } else {
            chunk.bytes[pending.length_field_start] = 0xFF;
            chunk.bytes[pending.length_field_start + 1..pending.length_field_start + 9]
                .copy_from_slice(&actual_len.to_be_bytes());
        }
        chunk.close(event_number);
        self.next_event_number += 1;
        Ok(())
    }

    /// Ensures at least `n` more bytes fit in the current chunk,
    /// allocating (and, if the chain is too large, flushing) as needed.
    fn ensure_space(&mut self, n: usize) -> TraceResult<()> {
        if matches!(self.chunk_mode, ChunkMode::NotChunked) {
            return Ok(());
        }
        let used = self
            .write_chain
            .last()
            .expect("chain head always allocated while writing")
            .bytes
            .len() as u64;
        if used + n as u64 <= self.chunk_size {
            return Ok(());
        }
        self.roll_over_chunk()
    }

    /// spec §4.3.5: stamp+pad the outgoing chunk, then link a fresh one.
    fn roll_over_chunk(&mut self) -> TraceResult<()> {
        self.pad_current_chunk_tail()?;

        let chain_bytes: u64 = self.write_chain.iter().map(|c| c.bytes.len() as u64).sum();
        let forced_flush = chain_bytes >= ALLOCATOR_MEMORY_CAP && self.pre_flush_callback.is_some();
        if forced_flush {
            self.flush()?;
        }

        let reused = self.old_chunk_list.pop();
        let endianness = self.endianness();
        let next_event_number = self.next_event_number;
        let mut chunk = match reused {
            Some(mut c) => {
                c.bytes.clear();
                c.header = ChunkHeader {
                    endianness,
                    first_event_number: next_event_number,
                    last_event_number: next_event_number.wrapping_sub(1),
                };
                c.first_timestamp = None;
                c
            }
            None => Chunk::new(next_event_number, endianness),
        };
        chunk.bytes.extend_from_slice(&chunk.header.encode());
        self.write_chain.push(chunk);

        if self.is_event_stream {
            let t = self.write_timestamp_cursor;
            let endianness = self.endianness();
            let chunk = self.current_chunk_mut();
            let pos = chunk.bytes.len();
            chunk.bytes.push(TIMESTAMP);
            varint::write_fixed_u64(&mut chunk.bytes, t, endianness);
            if chunk.first_timestamp.is_none() {
                chunk.first_timestamp = Some(t);
            }
            self.last_timestamp_write_pos = Some(pos + 1);
        }

        if forced_flush && self.post_flush_timestamp_callback.is_some() {
            let t = {
                let cb = self.post_flush_timestamp_callback.as_mut().unwrap();
                cb()
            };
            self.emit_buffer_flush(t)?;
        }
        Ok(())
    }

    /// Emits the synthetic `BUFFER_FLUSH` event directly (it is a reserved
    /// control byte, not a caller record) and counts it toward the
    /// chunk's event numbers (invariant 4).
    fn emit_buffer_flush(&mut self, t: u64) -> TraceResult<()> {
        let endianness = self.endianness();
        let event_number = self.next_event_number;
        let chunk = self.current_chunk_mut();
        chunk.bytes.push(BUFFER_FLUSH);
        varint::write_fixed_u64(&mut chunk.bytes, t, endianness);
        if chunk.first_timestamp.is_none() {
            chunk.first_timestamp = Some(t);
        }
        chunk.close(event_number);
        self.next_event_number += 1;
        self.write_timestamp_cursor = t;
        Ok(())
    }

    fn pad_current_chunk_tail(&mut self) -> TraceResult<()> {
        let chunk_size = self.chunk_size;
        let last_event_number = self.next_event_number.wrapping_sub(1);
        let chunk = self.current_chunk_mut();
        chunk.close(last_event_number);
        if matches!(self.chunk_mode, ChunkMode::Chunked) {
            let pad_to = chunk_size as usize;
            if chunk.bytes.len() < pad_to {
                chunk.bytes.resize(pad_to, END_OF_CHUNK);
            }
        } else {
            chunk.bytes.push(END_OF_CHUNK);
        }
        Ok(())
    }

    fn allocate_chain_head(&mut self) -> TraceResult<()> {
        let endianness = self.endianness();
        let mut chunk = Chunk::new(self.next_event_number, endianness);
        chunk.bytes.extend_from_slice(&chunk.header.encode());
        self.write_chain.push(chunk);
        Ok(())
    }

    // ---------------------------------------------------------------
    // 4.3.6 Flush
    // ---------------------------------------------------------------

    pub fn flush(&mut self) -> TraceResult<()> {
        self.rewind.invalidate_all();

        let decision = if let Some(cb) = self.pre_flush_callback.as_mut() {
            cb()
        } else if self.is_event_stream {
            FlushDecision::NoFlush
        } else {
            FlushDecision::Flush
        };
        if matches!(decision, FlushDecision::NoFlush) {
            return Ok(());
        }

        self.pad_current_chunk_tail()?;

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TraceError::state("flush called before a file was attached".into()))?;
        for chunk in self.write_chain.drain(..) {
            file.write_block(&chunk.bytes)?;
        }
        file.finalize()?;
        self.allocate_chain_head()?;
        Ok(())
    }

    /// Writes `END_OF_FILE`, pads and flushes the final chunk (invariant 5).
    pub fn close_write(&mut self) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        {
            let chunk = self.current_chunk_mut();
            chunk.bytes.push(END_OF_FILE);
        }
        self.flush()
    }

    // ---------------------------------------------------------------
    // 4.3.7 / 4.3.8 Read pipeline & chunk navigation
    // ---------------------------------------------------------------

    fn ensure_current_chunk_loaded(&mut self) -> TraceResult<()> {
        if self.current_chunk.is_some() {
            return Ok(());
        }
        self.load_chunk(1)
    }

    fn load_chunk(&mut self, ordinal: u64) -> TraceResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TraceError::state("read attempted before a file was attached".into()))?;
        // A compressed handle frames one `read_block` call to exactly one
        // `write_block` call, i.e. the whole chunk (header and body were
        // written together at flush time); splitting the read in two
        // would desynchronize against the next chunk's framing.
        let bytes = if file.is_block_framed() {
            file.read_block(0)?
        } else {
            let header_bytes = file.read_block(CHUNK_HEADER_SIZE)?;
            let body_len = if matches!(self.chunk_mode, ChunkMode::Chunked) {
                self.chunk_size as usize - CHUNK_HEADER_SIZE
            } else {
                file.get_size()?.saturating_sub(CHUNK_HEADER_SIZE as u64) as usize
            };
            let body = file.read_block(body_len)?;
            let mut bytes = header_bytes;
            bytes.extend_from_slice(&body);
            bytes
        };
        let header = ChunkHeader::decode(&bytes)?;
        self.current_chunk = Some(Chunk {
            header,
            bytes,
            first_timestamp: None,
        });
        self.current_ordinal = ordinal;
        self.read_pos = CHUNK_HEADER_SIZE;
        self.read_timestamp_cursor = 0;
        if !header.endianness.matches_host() {
            log::debug!("reading chunk {ordinal} written with non-host endianness {:?}", header.endianness);
        }
        Ok(())
    }

    pub fn read_get_next_chunk(&mut self) -> TraceResult<()> {
        self.load_chunk(self.current_ordinal + 1)
    }

    pub fn read_get_previous_chunk(&mut self) -> TraceResult<()> {
        if self.current_ordinal <= 1 {
            return Err(TraceError::OutOfBounds);
        }
        let file = self.file.as_mut().ok_or_else(|| TraceError::state("no file attached".into()))?;
        file.seek_prev_chunk(self.current_ordinal, self.chunk_size)?;
        self.load_chunk(self.current_ordinal - 1)
    }

    fn chunk(&self) -> TraceResult<&Chunk> {
        self.current_chunk.as_ref().ok_or(TraceError::OutOfBounds)
    }

    pub fn read_timestamp(&mut self) -> TraceResult<u64> {
        self.require_read_mode()?;
        self.ensure_current_chunk_loaded()?;
        let endianness = self.chunk()?.header.endianness;
        let pos = self.read_pos;
        let bytes = &self.chunk()?.bytes;
        if pos >= bytes.len() {
            return Err(TraceError::OutOfBounds);
        }
        if bytes[pos] == TIMESTAMP {
            let mut cursor = pos + 1;
            let t = varint::read_fixed_u64(bytes, &mut cursor, endianness)?;
            self.last_timestamp_read_pos = Some(pos + 1);
            self.read_pos = cursor;
            self.read_timestamp_cursor = t;
        }
        Ok(self.read_timestamp_cursor)
    }

    fn require_read_mode(&self) -> TraceResult<()> {
        if !matches!(self.mode, Mode::Read | Mode::Modify) {
            return Err(TraceError::state(format!("read requires Read or Modify mode, buffer is in {:?}", self.mode)));
        }
        Ok(())
    }

    /// Reads the next control byte or record header, advancing past the
    /// type byte and length prefix only (spec §6.2).
    pub fn next_frame(&mut self) -> TraceResult<Frame> {
        self.require_read_mode()?;
        self.ensure_current_chunk_loaded()?;
        let pos = self.read_pos;
        let bytes = self.chunk()?.bytes.clone();
        if pos >= bytes.len() {
            return Ok(Frame::EndOfChunk);
        }
        let tag = bytes[pos];
        match tag {
            END_OF_CHUNK => Ok(Frame::EndOfChunk),
            END_OF_FILE => Ok(Frame::EndOfFile),
            CHUNK_HEADER => Err(TraceError::integrity("unexpected chunk header inside chunk body".into())),
            TIMESTAMP => Err(TraceError::integrity("timestamp frame must be consumed via read_timestamp".into())),
            record_type => {
                let mut cursor = pos + 1;
                let length = self.read_length_prefix(&bytes, &mut cursor)?;
                self.read_pos = cursor;
                Ok(Frame::Record { record_type, length, start: pos })
            }
        }
    }

    fn read_length_prefix(&self, bytes: &[u8], pos: &mut usize) -> TraceResult<u64> {
        let first = *bytes.get(*pos).ok_or(TraceError::OutOfBounds)?;
        *pos += 1;
        if first < 255 {
            return Ok(first as u64);
        }
        let raw: [u8; 8] = bytes
            .get(*pos..*pos + 8)
            .ok_or(TraceError::OutOfBounds)?
            .try_into()
            .unwrap();
        *pos += 8;
        Ok(u64::from_be_bytes(raw))
    }

    /// Forward-compatibility rule (invariant 6): always advance to
    /// `record_start + header_len + length`, regardless of fields read.
    pub fn finish_record_read(&mut self, frame: Frame) -> TraceResult<()> {
        if let Frame::Record { length, start, .. } = frame {
            let header_len = self.chunk()?.bytes.get(start + 1).map_or(1, |&b| if b == 0xFF { 9 } else { 1 });
            self.read_pos = start + 1 + header_len + length as usize;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> TraceResult<u8> {
        let mut pos = self.read_pos;
        let v = varint::read_u8(&self.chunk()?.bytes, &mut pos)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> TraceResult<u16> {
        let endianness = self.chunk()?.header.endianness;
        let mut pos = self.read_pos;
        let v = varint::read_u16(&self.chunk()?.bytes, &mut pos, endianness)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> TraceResult<u32> {
        let endianness = self.chunk()?.header.endianness;
        let mut pos = self.read_pos;
        let v = varint::read_varint_u32(&self.chunk()?.bytes, &mut pos, endianness)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> TraceResult<u64> {
        let endianness = self.chunk()?.header.endianness;
        let mut pos = self.read_pos;
        let v = varint::read_varint_u64(&self.chunk()?.bytes, &mut pos, endianness)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> TraceResult<f32> {
        let endianness = self.chunk()?.header.endianness;
        let mut pos = self.read_pos;
        let v = varint::read_f32(&self.chunk()?.bytes, &mut pos, endianness)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_f64(&mut self) -> TraceResult<f64> {
        let endianness = self.chunk()?.header.endianness;
        let mut pos = self.read_pos;
        let v = varint::read_f64(&self.chunk()?.bytes, &mut pos, endianness)?;
        self.read_pos = pos;
        Ok(v)
    }

    pub fn read_str(&mut self) -> TraceResult<String> {
        let mut pos = self.read_pos;
        let s = varint::read_str(&self.chunk()?.bytes, &mut pos)?.to_owned();
        self.read_pos = pos;
        Ok(s)
    }

    pub fn skip(&mut self, n: usize) -> TraceResult<()> {
        self.guarantee_read(n)?;
        self.read_pos += n;
        Ok(())
    }

    pub fn skip_compressed(&mut self) -> TraceResult<()> {
        let mut pos = self.read_pos;
        let bytes = self.chunk()?.bytes.clone();
        let l = varint::read_u8(&bytes, &mut pos)?;
        let n = if l == 0xFF { 0 } else { l as usize };
        self.read_pos = pos + n;
        Ok(())
    }

    pub fn guarantee_read(&self, n: usize) -> TraceResult<()> {
        let bytes = &self.chunk()?.bytes;
        if self.read_pos + n > bytes.len() {
            return Err(TraceError::integrity("read would run past the end of the current chunk".into()));
        }
        Ok(())
    }

    pub fn guarantee_record(&self, len: u64) -> TraceResult<()> {
        self.guarantee_read(len as usize)
    }

    // ---------------------------------------------------------------
    // 4.3.8 Seeks
    // ---------------------------------------------------------------

    fn build_catalog(&mut self) -> TraceResult<()> {
        if self.catalog.is_some() {
            return Ok(());
        }
        let saved_ordinal = self.current_ordinal;
        let saved_chunk = self.current_chunk.take();
        let saved_pos = self.read_pos;

        let file = self.file.as_mut().ok_or_else(|| TraceError::state("no file attached".into()))?;
        file.rewind_to_start()?;
        let mut entries = Vec::new();
        let mut ordinal = 1u64;
        loop {
            let header_bytes = match file.read_block(CHUNK_HEADER_SIZE) {
                Ok(b) if b.len() == CHUNK_HEADER_SIZE => b,
                _ => break,
            };
            let header = match ChunkHeader::decode(&header_bytes) {
                Ok(h) => h,
                Err(_) => break,
            };
            let body_len = self.chunk_size as usize - CHUNK_HEADER_SIZE;
            let body = file.read_block(body_len).unwrap_or_default();
            let first_timestamp = first_timestamp_in_body(&body, header.endianness);
            entries.push(CatalogEntry {
                ordinal,
                first_event_number: header.first_event_number,
                last_event_number: header.last_event_number,
                first_timestamp,
            });
            ordinal += 1;
        }
        self.catalog = Some(entries);
        self.current_ordinal = saved_ordinal;
        self.current_chunk = saved_chunk;
        self.read_pos = saved_pos;
        Ok(())
    }

    /// `seek_chunk(position)` (spec §4.3.8, property 9).
    pub fn seek_chunk(&mut self, event_number: u64) -> TraceResult<()> {
        self.build_catalog()?;
        let ordinal = {
            let catalog = self.catalog.as_ref().unwrap();
            catalog
                .iter()
                .find(|e| e.first_event_number <= event_number && event_number <= e.last_event_number)
                .map(|e| e.ordinal)
        };
        let ordinal = ordinal.ok_or(TraceError::OutOfBounds)?;
        let file = self.file.as_mut().ok_or_else(|| TraceError::state("no file attached".into()))?;
        file.seek_chunk(ordinal, self.chunk_size)?;
        self.load_chunk(ordinal)
    }

    /// `seek_chunk_time(req_time)` (spec §4.3.8, property 10). Returns
    /// `Ok(false)` when every chunk's first timestamp exceeds `req_time`.
    pub fn seek_chunk_time(&mut self, req_time: u64) -> TraceResult<bool> {
        self.build_catalog()?;
        let ordinal = {
            let catalog = self.catalog.as_ref().unwrap();
            catalog
                .iter()
                .filter(|e| e.first_timestamp.map_or(false, |t| t <= req_time))
                .max_by_key(|e| e.first_timestamp)
                .map(|e| e.ordinal)
        };
        let ordinal = match ordinal {
            Some(o) => o,
            None => return Ok(false),
        };
        let file = self.file.as_mut().ok_or_else(|| TraceError::state("no file attached".into()))?;
        file.seek_chunk(ordinal, self.chunk_size)?;
        self.load_chunk(ordinal)?;
        Ok(true)
    }

    // ---------------------------------------------------------------
    // 4.3.9 Rewind
    // ---------------------------------------------------------------

    pub fn store_rewind_point(&mut self, key: u64) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        let chunk = self.write_chain.last().expect("chain head always allocated while writing");
        self.rewind.store(
            key,
            RewindPoint {
                event_number: self.next_event_number,
                timestamp: self.write_timestamp_cursor,
                chunk_len: chunk.bytes.len(),
                chunk_first_event_number: chunk.header.first_event_number,
            },
        );
        Ok(())
    }

    pub fn clear_rewind_point(&mut self, key: u64) -> TraceResult<()> {
        self.rewind.remove(key)
    }

    /// Rolls back to a stored rewind point (invariant 10). Chunks
    /// allocated after the snapshot are transplanted to the old-chunk-list
    /// for reuse rather than freed.
    pub fn rewind(&mut self, key: u64) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        let chunk_first_event_number = self.rewind.get(key)?.chunk_first_event_number;
        let point = self.rewind.remove_from(key, chunk_first_event_number)?;

        while let Some(chunk) = self.write_chain.last() {
            if chunk.header.first_event_number == point.chunk_first_event_number {
                break;
            }
            let chunk = self.write_chain.pop().unwrap();
            self.old_chunk_list.push(chunk);
        }
        let chunk = self.current_chunk_mut();
        chunk.bytes.truncate(point.chunk_len);
        self.next_event_number = point.event_number;
        self.write_timestamp_cursor = point.timestamp;
        self.pending_record = None;
        Ok(())
    }

    // ---------------------------------------------------------------
    // 4.3.10 Timestamp rewrite
    // ---------------------------------------------------------------

    /// Overwrites the last-read `TIMESTAMP` in place; the sole supported
    /// in-place mutation, valid only in Modify mode.
    pub fn rewrite_timestamp(&mut self, t: u64) -> TraceResult<()> {
        self.require_mode(Mode::Modify)?;
        let endianness = self.chunk()?.header.endianness;
        let pos = self
            .last_timestamp_read_pos
            .ok_or_else(|| TraceError::state("no timestamp has been read yet in this chunk".into()))?;
        let chunk = self.current_chunk.as_mut().ok_or(TraceError::OutOfBounds)?;
        let mut scratch = Vec::new();
        varint::write_fixed_u64(&mut scratch, t, endianness);
        chunk.bytes[pos..pos + 8].copy_from_slice(&scratch);
        self.read_timestamp_cursor = t;
        Ok(())
    }
}

fn first_timestamp_in_body(body: &[u8], endianness: Endianness) -> Option<u64> {
    let mut pos = 0;
    if *body.first()? == TIMESTAMP {
        pos = 1;
        varint::read_fixed_u64(body, &mut pos, endianness).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{FileType, Substrate};
    use crate::file::Compression;
    use tempfile::tempdir;

    fn writer(chunk_size: u64) -> (tempfile::TempDir, Buffer) {
        let dir = tempdir().unwrap();
        let sub = Substrate::posix();
        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Write, 0)
            .unwrap();
        let file = File::new(handle, Compression::None, true);
        let mut buf = Buffer::new(Mode::Write, ChunkMode::Chunked, chunk_size, true).unwrap();
        buf.attach_file(file);
        (dir, buf)
    }

    fn reader(dir: &tempfile::TempDir, chunk_size: u64) -> Buffer {
        let sub = Substrate::posix();
        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Read, 0)
            .unwrap();
        let file = File::new(handle, Compression::None, true);
        let mut buf = Buffer::new(Mode::Read, ChunkMode::Chunked, chunk_size, true).unwrap();
        buf.attach_file(file);
        buf
    }

    fn write_tiny_record(buf: &mut Buffer, t: u64, value: u32) {
        buf.write_timestamp(t).unwrap();
        buf.begin_record(10, 5).unwrap();
        buf.write_u32(value).unwrap();
        buf.finish_record().unwrap();
    }

    #[test]
    fn round_trip_single_chunk() {
        let (dir, mut buf) = writer(crate::limits::CHUNK_MIN);
        write_tiny_record(&mut buf, 100, 7);
        write_tiny_record(&mut buf, 100, 8);
        write_tiny_record(&mut buf, 150, 9);
        buf.close_write().unwrap();

        let mut r = reader(&dir, crate::limits::CHUNK_MIN);
        let mut seen = Vec::new();
        loop {
            let t = r.read_timestamp().unwrap();
            match r.next_frame().unwrap() {
                Frame::Record { record_type, .. } => {
                    assert_eq!(record_type, 10);
                    let v = r.read_u32().unwrap();
                    seen.push((t, v));
                    r.finish_record_read(Frame::Record { record_type, length: 0, start: 0 }).ok();
                }
                Frame::EndOfChunk | Frame::EndOfFile => break,
            }
        }
        assert_eq!(seen, vec![(100, 7), (100, 8), (150, 9)]);
    }

    #[test]
    fn rewind_discards_speculative_writes() {
        let (_dir, mut buf) = writer(crate::limits::CHUNK_MIN);
        write_tiny_record(&mut buf, 1, 1);
        buf.store_rewind_point(1).unwrap();
        write_tiny_record(&mut buf, 2, 2);
        write_tiny_record(&mut buf, 3, 3);
        buf.rewind(1).unwrap();
        write_tiny_record(&mut buf, 4, 4);
        assert_eq!(buf.next_event_number, 3);
    }

    #[test]
    fn flush_invalidates_rewind_points() {
        let (_dir, mut buf) = writer(crate::limits::CHUNK_MIN);
        write_tiny_record(&mut buf, 1, 1);
        buf.store_rewind_point(1).unwrap();
        write_tiny_record(&mut buf, 2, 2);
        buf.flush().unwrap();
        let err = buf.rewind(1).unwrap_err();
        assert!(matches!(err, TraceError::ArgumentInvalid(_)));
    }
}
