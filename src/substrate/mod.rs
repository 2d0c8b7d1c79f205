//! Pluggable byte-level file backend (spec §4.1): POSIX, SIONlib-style
//! multiplex, and Null, unified behind the [`Substrate`] / [`SubstrateFile`]
//! tagged-enum pair. A trait-object vtable would work equally well here;
//! the enum form reads as the more idiomatic choice once the variant set
//! is fixed and small.

pub mod multiplex;
pub mod null;
pub mod posix;

use std::path::PathBuf;

use crate::archive::Mode;
use crate::error::TraceResult;
use multiplex::{MultiplexFile, MultiplexSubstrate, RankAssignment};
use null::{NullFile, NullSubstrate};
use posix::{PosixFile, PosixSubstrate};

/// Which substrate an archive was opened with; recorded in the anchor
/// file and used to reject requests for a substrate not compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstrateKind {
    Posix,
    Sion,
    Null,
}

/// Identifies one of the archive's physical file kinds. Drives both the
/// POSIX naming convention and whether the File layer is allowed to
/// compress a stream (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Evt,
    Def,
    GlobalDef,
    Snap,
    Thumb,
    Marker,
    Anchor,
    RankMap,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Evt => "evt",
            FileType::Def => "def",
            FileType::GlobalDef => "gdef",
            FileType::Snap => "snap",
            FileType::Thumb => "thumb",
            FileType::Marker => "marker",
            FileType::Anchor => "anchor",
            FileType::RankMap => "rankmap",
        }
    }

    /// Event/def/snapshot/marker streams may be compressed; anchor and
    /// thumbnail streams (and the rank-map index) are not (spec §4.2).
    pub fn permits_compression(self) -> bool {
        matches!(
            self,
            FileType::Evt | FileType::Def | FileType::GlobalDef | FileType::Snap | FileType::Marker
        )
    }

    /// Whether this file type is per-location (one physical stream per
    /// location ID) or archive-global (one physical stream total).
    pub fn is_per_location(self) -> bool {
        matches!(self, FileType::Evt | FileType::Def | FileType::Snap)
    }
}

#[derive(Debug, Clone)]
pub enum Substrate {
    Posix(PosixSubstrate),
    Multiplex(MultiplexSubstrate),
    Null(NullSubstrate),
}

impl Substrate {
    pub fn posix() -> Self {
        Substrate::Posix(PosixSubstrate::new())
    }

    pub fn multiplex(archive_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Substrate::Multiplex(MultiplexSubstrate::new(archive_dir, name))
    }

    pub fn null() -> Self {
        Substrate::Null(NullSubstrate::new())
    }

    pub fn kind(&self) -> SubstrateKind {
        match self {
            Substrate::Posix(_) => SubstrateKind::Posix,
            Substrate::Multiplex(_) => SubstrateKind::Sion,
            Substrate::Null(_) => SubstrateKind::Null,
        }
    }

    /// Opens a per-stream handle. `global_rank` is only consulted by the
    /// multiplex substrate to decide which container/rank this stream
    /// lands in (spec §4.1).
    pub fn open_file(
        &self,
        archive_dir: &std::path::Path,
        archive_name: &str,
        file_type: FileType,
        location: Option<u64>,
        mode: Mode,
        global_rank: u32,
    ) -> TraceResult<SubstrateFile> {
        match self {
            Substrate::Posix(s) => Ok(SubstrateFile::Posix(s.open_file(
                archive_dir,
                archive_name,
                file_type,
                location,
                mode,
            )?)),
            Substrate::Multiplex(s) => {
                let assignment = s.assign_rank(global_rank);
                match mode {
                    Mode::Write => Ok(SubstrateFile::Multiplex(s.open_file_write(file_type, assignment)?)),
                    Mode::Read => Ok(SubstrateFile::Multiplex(s.open_file_read(
                        file_type,
                        assignment.file_number,
                        assignment.rank_in_file,
                    )?)),
                    Mode::Modify => Ok(SubstrateFile::Multiplex(s.open_file_write(file_type, assignment)?)),
                }
            }
            Substrate::Null(s) => Ok(SubstrateFile::Null(s.open_file()?)),
        }
    }

    /// Collective close of one file type: for the multiplex substrate,
    /// concatenates every participant's part file into the final
    /// container (spec §4.1, §5).
    pub fn close_file_type(&self, file_type: FileType, participant_ranks: &[u32]) -> TraceResult<()> {
        if let Substrate::Multiplex(s) = self {
            s.finalize_file_type(file_type, participant_ranks)?;
        }
        Ok(())
    }

    pub fn rank_assignment(&self, global_rank: u32) -> Option<RankAssignment> {
        match self {
            Substrate::Multiplex(s) => Some(s.assign_rank(global_rank)),
            _ => None,
        }
    }
}

pub enum SubstrateFile {
    Posix(PosixFile),
    Multiplex(MultiplexFile),
    Null(NullFile),
}

impl SubstrateFile {
    pub fn read(&mut self, buf: &mut [u8]) -> TraceResult<usize> {
        match self {
            SubstrateFile::Posix(f) => f.read(buf),
            SubstrateFile::Multiplex(f) => f.read(buf),
            SubstrateFile::Null(f) => f.read(buf),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> TraceResult<usize> {
        match self {
            SubstrateFile::Posix(f) => f.write(buf),
            SubstrateFile::Multiplex(f) => f.write(buf),
            SubstrateFile::Null(f) => f.write(buf),
        }
    }

    pub fn seek(&mut self, offset: u64) -> TraceResult<()> {
        match self {
            SubstrateFile::Posix(f) => f.seek(offset),
            SubstrateFile::Multiplex(f) => f.seek(offset),
            SubstrateFile::Null(f) => f.seek(offset),
        }
    }

    pub fn get_size(&mut self) -> TraceResult<u64> {
        match self {
            SubstrateFile::Posix(f) => f.get_size(),
            SubstrateFile::Multiplex(f) => f.get_size(),
            SubstrateFile::Null(f) => f.get_size(),
        }
    }

    pub fn reset(&mut self) -> TraceResult<()> {
        match self {
            SubstrateFile::Posix(f) => f.reset(),
            SubstrateFile::Multiplex(f) => f.reset(),
            SubstrateFile::Null(f) => f.reset(),
        }
    }
}
