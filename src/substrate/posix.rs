//! POSIX substrate: one OS file per logical stream (spec §4.1).

use std::fs::{File as FsFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::archive::Mode;
use crate::error::{TraceError, TraceResult};
use crate::substrate::FileType;

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixSubstrate;

impl PosixSubstrate {
    pub fn new() -> Self {
        PosixSubstrate
    }

    /// Synthesizes the per-stream path from the archive directory, the
    /// file type and, for per-location streams, the location ID.
    pub fn stream_path(&self, archive_dir: &Path, name: &str, file_type: FileType, location: Option<u64>) -> PathBuf {
        let mut path = archive_dir.join(name);
        match location {
            Some(id) => path.set_extension(format!("{}.{id}", file_type.extension())),
            None => path.set_extension(file_type.extension()),
        };
        path
    }

    pub fn open_file(
        &self,
        archive_dir: &Path,
        name: &str,
        file_type: FileType,
        location: Option<u64>,
        mode: Mode,
    ) -> TraceResult<PosixFile> {
        let path = self.stream_path(archive_dir, name, file_type, location);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let handle = match mode {
            Mode::Write => OpenOptions::new().create(true).write(true).truncate(true).open(&path)?,
            Mode::Read => OpenOptions::new().read(true).open(&path)?,
            Mode::Modify => OpenOptions::new().read(true).write(true).open(&path)?,
        };
        Ok(PosixFile { path, handle })
    }
}

pub struct PosixFile {
    path: PathBuf,
    handle: FsFile,
}

impl PosixFile {
    pub fn read(&mut self, buf: &mut [u8]) -> TraceResult<usize> {
        Ok(self.handle.read(buf)?)
    }

    pub fn write(&mut self, buf: &[u8]) -> TraceResult<usize> {
        self.handle.write_all(buf)?;
        Ok(buf.len())
    }

    pub fn seek(&mut self, offset: u64) -> TraceResult<()> {
        self.handle.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn get_size(&mut self) -> TraceResult<u64> {
        Ok(self.handle.metadata()?.len())
    }

    /// Truncates and reopens the file write-only, positioned at offset 0.
    pub fn reset(&mut self) -> TraceResult<()> {
        self.handle = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(TraceError::from)?;
        Ok(())
    }
}
