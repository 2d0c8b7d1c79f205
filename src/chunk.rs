//! In-memory chunk representation and its on-disk header (spec §6.1).
//!
//! A chunk is a self-contained, independently decompressible span of
//! records bounded by a [`ChunkHeader`] and an `END_OF_CHUNK` pad. The
//! header is fixed at 18 bytes so a reader can locate the next chunk
//! without decoding any record inside the current one.

use crate::control::{Endianness, CHUNK_HEADER};
use crate::error::{TraceError, TraceResult};

/// Fixed on-disk size of a chunk header: control byte, endianness byte,
/// 8-byte first-event-number, 8-byte last-event-number.
pub const CHUNK_HEADER_SIZE: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub endianness: Endianness,
    /// Sequence number of the first record recorded in this chunk.
    pub first_event_number: u64,
    /// Sequence number of the last record in this chunk; stamped only when
    /// the chunk is closed (spec §6.1), zero until then.
    pub last_event_number: u64,
}

impl ChunkHeader {
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[0] = CHUNK_HEADER;
        out[1] = self.endianness.to_byte();
        let (first, last) = match self.endianness {
            Endianness::Little => (
                self.first_event_number.to_le_bytes(),
                self.last_event_number.to_le_bytes(),
            ),
            Endianness::Big => (
                self.first_event_number.to_be_bytes(),
                self.last_event_number.to_be_bytes(),
            ),
        };
        out[2..10].copy_from_slice(&first);
        out[10..18].copy_from_slice(&last);
        out
    }

    pub fn decode(bytes: &[u8]) -> TraceResult<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(TraceError::OutOfBounds);
        }
        if bytes[0] != CHUNK_HEADER {
            return Err(TraceError::integrity(format!(
                "expected chunk header control byte {CHUNK_HEADER}, found {}",
                bytes[0]
            )));
        }
        let endianness = Endianness::from_byte(bytes[1])?;
        let first_raw: [u8; 8] = bytes[2..10].try_into().unwrap();
        let last_raw: [u8; 8] = bytes[10..18].try_into().unwrap();
        let (first_event_number, last_event_number) = match endianness {
            Endianness::Little => (u64::from_le_bytes(first_raw), u64::from_le_bytes(last_raw)),
            Endianness::Big => (u64::from_be_bytes(first_raw), u64::from_be_bytes(last_raw)),
        };
        Ok(ChunkHeader {
            endianness,
            first_event_number,
            last_event_number,
        })
    }
}

/// An in-memory chunk body: the decoded header plus the record bytes that
/// follow it, up to (but not including) the `END_OF_CHUNK` pad.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub bytes: Vec<u8>,
    /// First absolute timestamp recorded in this chunk, if any record has
    /// been written yet. Used by `seek_chunk_time` (spec §4.3.8).
    pub first_timestamp: Option<u64>,
}

impl Chunk {
    pub fn new(first_event_number: u64, endianness: Endianness) -> Self {
        Chunk {
            header: ChunkHeader {
                endianness,
                first_event_number,
                last_event_number: first_event_number.wrapping_sub(1),
            },
            bytes: Vec::new(),
            first_timestamp: None,
        }
    }

    pub fn last_event_number(&self) -> u64 {
        self.header.last_event_number
    }

    pub fn record_count(&self) -> u64 {
        self.header
            .last_event_number
            .wrapping_sub(self.header.first_event_number)
            .wrapping_add(1)
    }

    /// Stamps the header's `last_event_number` on chunk close (invariant 2).
    pub fn close(&mut self, last_event_number: u64) {
        self.header.last_event_number = last_event_number;
    }
}
