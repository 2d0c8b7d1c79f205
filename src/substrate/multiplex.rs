//! Multiplex substrate: concatenates many logical streams into a small
//! number of container files (spec §4.1, SIONlib-style).
//!
//! True SIONlib interleaves concurrent writers into one growing container
//! via collectively-negotiated byte ranges. Here every participant writes
//! its stream to a private sidecar part file; `close_file_type` (a
//! collective operation, driven by the archive layer) concatenates the
//! parts for one file type, in rank order, into the final container,
//! prefixing each rank's span with an 8-byte big-endian length so a reader
//! can locate its rank without a separate offset table beyond the
//! rank-map's `(file_number, rank_in_file)` pair. The externally observable
//! contract — many locations landing in few physical files, addressed via
//! the rank-map on read — is preserved.

use std::fs::{File as FsFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::{TraceError, TraceResult};
use crate::substrate::FileType;

const RANK_SPAN_PREFIX: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct RankAssignment {
    pub file_number: u32,
    pub rank_in_file: u32,
}

#[derive(Debug, Clone)]
pub struct MultiplexSubstrate {
    archive_dir: PathBuf,
    name: String,
}

impl MultiplexSubstrate {
    pub fn new(archive_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        MultiplexSubstrate {
            archive_dir: archive_dir.into(),
            name: name.into(),
        }
    }

    fn part_path(&self, file_type: FileType, rank: u32) -> PathBuf {
        self.archive_dir
            .join(".multiplex")
            .join(format!("{}.{}.rank{rank}.part", self.name, file_type.extension()))
    }

    fn container_path(&self, file_type: FileType, file_number: u32) -> PathBuf {
        self.archive_dir
            .join(format!("{}.{}.mplex.{file_number}", self.name, file_type.extension()))
    }

    /// Assigns the writing rank to a container file. The current policy
    /// places every participant into a single container (`file_number =
    /// 0`), ordered by global rank; a future policy may split across
    /// several containers once a real collective size negotiation lands.
    pub fn assign_rank(&self, global_rank: u32) -> RankAssignment {
        RankAssignment {
            file_number: 0,
            rank_in_file: global_rank,
        }
    }

    pub fn open_file_write(&self, file_type: FileType, assignment: RankAssignment) -> TraceResult<MultiplexFile> {
        let path = self.part_path(file_type, assignment.rank_in_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let handle = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        Ok(MultiplexFile::Part(PartFile { handle }))
    }

    /// Collective operation run by the file-type's coordinating rank:
    /// concatenates every part file into the final container, in
    /// ascending `rank_in_file` order, then removes the parts.
    pub fn finalize_file_type(&self, file_type: FileType, ranks: &[u32]) -> TraceResult<()> {
        let container_path = self.container_path(file_type, 0);
        if let Some(parent) = container_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut container = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&container_path)?;
        for &rank in ranks {
            let part_path = self.part_path(file_type, rank);
            let mut part = FsFile::open(&part_path)?;
            let len = part.metadata()?.len();
            let mut body = Vec::with_capacity(len as usize);
            part.read_to_end(&mut body)?;
            container.write_all(&len.to_be_bytes())?;
            container.write_all(&body)?;
            std::fs::remove_file(&part_path)?;
        }
        Ok(())
    }

    pub fn open_file_read(
        &self,
        file_type: FileType,
        file_number: u32,
        rank_in_file: u32,
    ) -> TraceResult<MultiplexFile> {
        let path = self.container_path(file_type, file_number);
        let mut handle = FsFile::open(&path)?;
        let mut offset = 0u64;
        for _ in 0..rank_in_file {
            handle.seek(SeekFrom::Start(offset))?;
            let mut len_buf = [0u8; RANK_SPAN_PREFIX];
            handle.read_exact(&mut len_buf)?;
            let span_len = u64::from_be_bytes(len_buf);
            offset += RANK_SPAN_PREFIX as u64 + span_len;
        }
        handle.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; RANK_SPAN_PREFIX];
        handle.read_exact(&mut len_buf)?;
        let span_len = u64::from_be_bytes(len_buf);
        let span_start = offset + RANK_SPAN_PREFIX as u64;
        Ok(MultiplexFile::View(ContainerView {
            handle,
            span_start,
            span_len,
            pos: 0,
        }))
    }
}

pub struct PartFile {
    handle: FsFile,
}

pub struct ContainerView {
    handle: FsFile,
    span_start: u64,
    span_len: u64,
    pos: u64,
}

pub enum MultiplexFile {
    Part(PartFile),
    View(ContainerView),
}

impl MultiplexFile {
    pub fn read(&mut self, buf: &mut [u8]) -> TraceResult<usize> {
        match self {
            MultiplexFile::Part(_) => Err(TraceError::state("multiplex part file is write-only".into())),
            MultiplexFile::View(v) => {
                let remaining = v.span_len.saturating_sub(v.pos);
                let want = (buf.len() as u64).min(remaining) as usize;
                if want == 0 {
                    return Ok(0);
                }
                v.handle.seek(SeekFrom::Start(v.span_start + v.pos))?;
                let n = v.handle.read(&mut buf[..want])?;
                v.pos += n as u64;
                Ok(n)
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> TraceResult<usize> {
        match self {
            MultiplexFile::Part(p) => {
                p.handle.write_all(buf)?;
                Ok(buf.len())
            }
            MultiplexFile::View(_) => Err(TraceError::state("multiplex container view is read-only".into())),
        }
    }

    pub fn seek(&mut self, offset: u64) -> TraceResult<()> {
        match self {
            MultiplexFile::Part(p) => {
                p.handle.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
            MultiplexFile::View(v) => {
                if offset > v.span_len {
                    return Err(TraceError::OutOfBounds);
                }
                v.pos = offset;
                Ok(())
            }
        }
    }

    pub fn get_size(&mut self) -> TraceResult<u64> {
        match self {
            MultiplexFile::Part(p) => Ok(p.handle.metadata()?.len()),
            MultiplexFile::View(v) => Ok(v.span_len),
        }
    }

    pub fn reset(&mut self) -> TraceResult<()> {
        match self {
            MultiplexFile::Part(p) => {
                p.handle.set_len(0)?;
                p.handle.seek(SeekFrom::Start(0))?;
                Ok(())
            }
            MultiplexFile::View(_) => Err(TraceError::state("cannot reset a read-only container view".into())),
        }
    }
}
