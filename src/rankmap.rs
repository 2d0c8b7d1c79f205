//! Rank-map file: the multiplex substrate's auxiliary binary index, mapping
//! each location to the container file and intra-file rank that holds it
//! (spec §6.3). Built on the same [`Buffer`]/var-int record framing as
//! every other archive stream, just with a handful of fixed record shapes
//! instead of a caller-defined record catalog.

use crate::archive::Mode;
use crate::buffer::{Buffer, ChunkMode, Frame};
use crate::error::{TraceError, TraceResult};
use crate::file::File;

const HEADER_RECORD: u8 = 10;
const RANK_RECORD: u8 = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMapEntry {
    pub rank: u32,
    pub file_number: u32,
    pub rank_in_file: u32,
    pub locations: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RankMap {
    pub n_files: u32,
    pub entries: Vec<RankMapEntry>,
}

impl RankMap {
    pub fn n_ranks(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn n_locations(&self) -> u32 {
        self.entries.iter().map(|e| e.locations.len() as u32).sum()
    }

    /// Writes the header record, one rank record per entry (with its
    /// repeated location IDs), then closes the stream.
    pub fn write(&self, file: File) -> TraceResult<()> {
        let mut buf = Buffer::new(Mode::Write, ChunkMode::NotChunked, crate::limits::CHUNK_MIN, false)?;
        buf.attach_file(file);

        buf.begin_record(HEADER_RECORD, 12)?;
        buf.write_u32(self.n_files)?;
        buf.write_u32(self.n_ranks())?;
        buf.write_u32(self.n_locations())?;
        buf.finish_record()?;

        for entry in &self.entries {
            let max_len = 16 + entry.locations.len() * 9;
            buf.begin_record(RANK_RECORD, max_len)?;
            buf.write_u32(entry.rank)?;
            buf.write_u32(entry.file_number)?;
            buf.write_u32(entry.rank_in_file)?;
            buf.write_u32(entry.locations.len() as u32)?;
            for loc in &entry.locations {
                buf.write_u64(*loc)?;
            }
            buf.finish_record()?;
        }

        buf.close_write()
    }

    /// Parses a rank-map stream in full; the master participant does this
    /// once and broadcasts the resulting vectors (spec §6.3).
    pub fn read(file: File) -> TraceResult<Self> {
        let mut buf = Buffer::new(Mode::Read, ChunkMode::NotChunked, crate::limits::CHUNK_MIN, false)?;
        buf.attach_file(file);

        let mut n_files = 0u32;
        let mut entries = Vec::new();
        let mut seen_header = false;

        loop {
            match buf.next_frame()? {
                Frame::EndOfFile | Frame::EndOfChunk => break,
                Frame::Record { record_type, .. } if record_type == HEADER_RECORD => {
                    n_files = buf.read_u32()?;
                    let _n_ranks = buf.read_u32()?;
                    let _n_locations = buf.read_u32()?;
                    seen_header = true;
                }
                Frame::Record { record_type, .. } if record_type == RANK_RECORD => {
                    let rank = buf.read_u32()?;
                    let file_number = buf.read_u32()?;
                    let rank_in_file = buf.read_u32()?;
                    let count = buf.read_u32()?;
                    let mut locations = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        locations.push(buf.read_u64()?);
                    }
                    entries.push(RankMapEntry {
                        rank,
                        file_number,
                        rank_in_file,
                        locations,
                    });
                }
                Frame::Record { record_type, .. } => {
                    return Err(TraceError::integrity(format!(
                        "rank-map stream contains unknown record type {record_type}"
                    )));
                }
            }
        }

        if !seen_header {
            return Err(TraceError::integrity("rank-map stream is missing its header record".into()));
        }
        Ok(RankMap { n_files, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{FileType, Substrate};
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_a_posix_file() {
        let dir = tempdir().unwrap();
        let sub = Substrate::posix();

        let map = RankMap {
            n_files: 1,
            entries: vec![
                RankMapEntry {
                    rank: 0,
                    file_number: 0,
                    rank_in_file: 0,
                    locations: vec![1, 2, 3],
                },
                RankMapEntry {
                    rank: 1,
                    file_number: 0,
                    rank_in_file: 1,
                    locations: vec![4],
                },
            ],
        };

        let handle = sub
            .open_file(dir.path(), "trace", FileType::RankMap, None, crate::archive::Mode::Write, 0)
            .unwrap();
        map.write(File::new(handle, crate::file::Compression::None, false)).unwrap();

        let handle = sub
            .open_file(dir.path(), "trace", FileType::RankMap, None, crate::archive::Mode::Read, 0)
            .unwrap();
        let read_back = RankMap::read(File::new(handle, crate::file::Compression::None, false)).unwrap();

        assert_eq!(read_back.n_files, 1);
        assert_eq!(read_back.n_locations(), 4);
        assert_eq!(read_back.entries, map.entries);
    }
}
