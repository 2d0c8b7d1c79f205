//! Archive: root configuration, writer/reader factories, and Close
//! semantics (spec §4.4). Mediates between user callbacks (collectives,
//! locking, flush policy) and the Buffer/File/Substrate stack below it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::anchor::{Anchor, TRACE_FORMAT_VERSION};
use crate::buffer::{Buffer, ChunkMode, FlushDecision};
use crate::collectives::Collectives;
use crate::error::{TraceError, TraceResult};
use crate::file::{Compression, File};
use crate::location::LocationState;
use crate::locking::Locking;
use crate::substrate::{FileType, Substrate, SubstrateKind};

/// The three states a Buffer or a Substrate file handle can be opened in.
/// Transitions are restricted; see [`crate::buffer::Buffer`] §4.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Read,
    Modify,
}

/// Governs whether a buffer's chunk-allocation flushes to the substrate
/// once the archive-wide memory cap is reached (spec §4.3.6). Exposed as a
/// plain policy rather than a user-supplied closure, since the underlying
/// `Buffer::set_pre_flush_callback` already takes arbitrary `FnMut`
/// closures for callers who need finer control than a fixed policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    AlwaysFlush,
    NeverFlush,
}

impl FlushPolicy {
    fn into_callback(self) -> Box<dyn FnMut() -> FlushDecision> {
        Box::new(move || match self {
            FlushPolicy::AlwaysFlush => FlushDecision::Flush,
            FlushPolicy::NeverFlush => FlushDecision::NoFlush,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    event_chunk_size: u64,
    def_chunk_size: u64,
    compression: Compression,
    flush_policy: FlushPolicy,
    post_flush_timestamp: Option<fn() -> u64>,
    trace_id: Option<u64>,
    machine: String,
    description: String,
    creator: String,
    version: String,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            event_chunk_size: crate::limits::CHUNK_MIN,
            def_chunk_size: crate::limits::CHUNK_MIN,
            #[cfg(feature = "zlib")]
            compression: Compression::Zlib,
            #[cfg(not(feature = "zlib"))]
            compression: Compression::None,
            flush_policy: FlushPolicy::NeverFlush,
            post_flush_timestamp: None,
            trace_id: None,
            machine: String::new(),
            description: String::new(),
            creator: String::from("tracefmt"),
            version: String::from(env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_chunk_size(self, size: u64) -> Self {
        Self { event_chunk_size: size, ..self }
    }

    pub fn def_chunk_size(self, size: u64) -> Self {
        Self { def_chunk_size: size, ..self }
    }

    pub fn compression(self, compression: Compression) -> Self {
        Self { compression, ..self }
    }

    pub fn flush_policy(self, policy: FlushPolicy) -> Self {
        Self { flush_policy: policy, ..self }
    }

    pub fn post_flush_timestamp(self, cb: fn() -> u64) -> Self {
        Self { post_flush_timestamp: Some(cb), ..self }
    }

    pub fn trace_id(self, id: u64) -> Self {
        Self { trace_id: Some(id), ..self }
    }

    pub fn machine<S: Into<String>>(self, machine: S) -> Self {
        Self { machine: machine.into(), ..self }
    }

    pub fn description<S: Into<String>>(self, description: S) -> Self {
        Self { description: description.into(), ..self }
    }

    pub fn creator<S: Into<String>>(self, creator: S) -> Self {
        Self { creator: creator.into(), ..self }
    }
}

/// Orchestrates one archive directory: factory methods for every stream
/// kind, mode transitions, and Close (spec §4.4).
pub struct Archive {
    archive_dir: PathBuf,
    name: String,
    mode: Mode,
    substrate: Substrate,
    options: ArchiveOptions,
    collectives: Box<dyn Collectives>,
    locking: Box<dyn Locking<Handle = ()>>,
    archive_lock: (),
    trace_id: u64,
    properties: BTreeMap<String, String>,
    n_global_defs: u64,
    n_snapshots: u64,
    n_thumbnails: u64,

    locations: HashMap<u64, LocationState>,

    event_writers: HashMap<u64, Buffer>,
    def_writers: HashMap<u64, Buffer>,
    snap_writers: HashMap<u64, Buffer>,
    thumb_writers: HashMap<u64, Buffer>,
    global_def_writer: Option<Buffer>,
    marker_writer: Option<Buffer>,

    event_readers: HashMap<u64, Buffer>,
    def_readers: HashMap<u64, Buffer>,
    snap_readers: HashMap<u64, Buffer>,
    thumb_readers: HashMap<u64, Buffer>,
    global_evt_reader: Option<Buffer>,
    global_def_reader: Option<Buffer>,
    marker_reader: Option<Buffer>,
}

impl Archive {
    /// Opens a fresh archive for writing. Collectively agrees on a
    /// trace ID (spec §5) and creates the archive directory.
    pub fn create(
        archive_dir: impl Into<PathBuf>,
        name: impl Into<String>,
        substrate: Substrate,
        collectives: Box<dyn Collectives>,
        locking: Box<dyn Locking<Handle = ()>>,
        options: ArchiveOptions,
    ) -> TraceResult<Self> {
        crate::limits::validate_chunk_size(options.event_chunk_size)?;
        crate::limits::validate_chunk_size(options.def_chunk_size)?;
        let archive_dir = archive_dir.into();
        std::fs::create_dir_all(&archive_dir)?;

        let candidate = options.trace_id.unwrap_or_else(|| crc32fast::hash(name_seed(&archive_dir, &options).as_bytes()) as u64);
        let trace_id = collectives.bcast_u64(candidate, 0)?;
        let archive_lock = locking.create()?;

        Ok(Archive {
            archive_dir,
            name: name.into(),
            mode: Mode::Write,
            substrate,
            options,
            collectives,
            locking,
            archive_lock,
            trace_id,
            properties: BTreeMap::new(),
            n_global_defs: 0,
            n_snapshots: 0,
            n_thumbnails: 0,
            locations: HashMap::new(),
            event_writers: HashMap::new(),
            def_writers: HashMap::new(),
            snap_writers: HashMap::new(),
            thumb_writers: HashMap::new(),
            global_def_writer: None,
            marker_writer: None,
            event_readers: HashMap::new(),
            def_readers: HashMap::new(),
            snap_readers: HashMap::new(),
            thumb_readers: HashMap::new(),
            global_evt_reader: None,
            global_def_reader: None,
            marker_reader: None,
        })
    }

    /// Opens an existing archive for reading: the anchor file is parsed
    /// first (spec §6.4), which also enforces the reader's maximum
    /// accepted trace-format version (spec §6.5).
    pub fn open(
        archive_dir: impl Into<PathBuf>,
        name: impl Into<String>,
        collectives: Box<dyn Collectives>,
        locking: Box<dyn Locking<Handle = ()>>,
    ) -> TraceResult<Self> {
        let archive_dir = archive_dir.into();
        let name = name.into();
        let anchor_path = anchor_path(&archive_dir, &name);
        let anchor = Anchor::read_from(&anchor_path)?;

        let substrate = match anchor.substrate {
            SubstrateKind::Posix => Substrate::posix(),
            SubstrateKind::Null => Substrate::null(),
            SubstrateKind::Sion => Substrate::multiplex(archive_dir.clone(), name.clone()),
        };
        let archive_lock = locking.create()?;
        let options = ArchiveOptions {
            event_chunk_size: anchor.event_chunk_size,
            def_chunk_size: anchor.def_chunk_size,
            compression: if anchor.compressed {
                #[cfg(feature = "zlib")]
                {
                    Compression::Zlib
                }
                #[cfg(not(feature = "zlib"))]
                {
                    return Err(TraceError::state(
                        "archive was written with compression but the zlib feature is disabled".into(),
                    ));
                }
            } else {
                Compression::None
            },
            machine: anchor.machine.clone(),
            description: anchor.description.clone(),
            creator: anchor.creator.clone(),
            version: anchor.version.clone(),
            ..ArchiveOptions::default()
        };

        Ok(Archive {
            archive_dir,
            name,
            mode: Mode::Read,
            substrate,
            options,
            collectives,
            locking,
            archive_lock,
            trace_id: anchor.trace_id,
            properties: anchor.properties,
            n_global_defs: anchor.n_global_defs,
            n_snapshots: anchor.n_snapshots,
            n_thumbnails: anchor.n_thumbnails,
            locations: HashMap::new(),
            event_writers: HashMap::new(),
            def_writers: HashMap::new(),
            snap_writers: HashMap::new(),
            thumb_writers: HashMap::new(),
            global_def_writer: None,
            marker_writer: None,
            event_readers: HashMap::new(),
            def_readers: HashMap::new(),
            snap_readers: HashMap::new(),
            thumb_readers: HashMap::new(),
            global_evt_reader: None,
            global_def_reader: None,
            marker_reader: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    pub fn location_mut(&mut self, location: u64) -> &mut LocationState {
        self.locations.entry(location).or_insert_with(LocationState::new)
    }

    pub fn location(&self, location: u64) -> Option<&LocationState> {
        self.locations.get(&location)
    }

    pub fn note_global_def_written(&mut self) {
        self.n_global_defs += 1;
    }

    pub fn note_snapshot_written(&mut self) {
        self.n_snapshots += 1;
    }

    pub fn note_thumbnail_written(&mut self) {
        self.n_thumbnails += 1;
    }

    /// `set_def_chunk_size`: a collective. The value is broadcast from the
    /// global root, then range-checked and stored (spec §4.4).
    pub fn set_def_chunk_size(&mut self, requested: u64) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        self.locking.lock(&self.archive_lock)?;
        let agreed = self.collectives.bcast_u64(requested, 0);
        self.locking.unlock(&self.archive_lock)?;
        let agreed = agreed?;
        crate::limits::validate_chunk_size(agreed)?;
        self.options.def_chunk_size = agreed;
        Ok(())
    }

    /// `switch_file_mode(new)`: the only permitted transition is
    /// `Read -> Write`, and only on the Posix substrate (spec §4.4).
    pub fn switch_file_mode(&mut self, new: Mode) -> TraceResult<()> {
        if self.mode != Mode::Read || new != Mode::Write {
            return Err(TraceError::FileModeTransitionInvalid);
        }
        if !matches!(self.substrate, Substrate::Posix(_)) {
            return Err(TraceError::FileModeTransitionInvalid);
        }
        self.mode = Mode::Write;
        Ok(())
    }

    fn require_mode(&self, expected: Mode) -> TraceResult<()> {
        if self.mode != expected {
            return Err(TraceError::state(format!(
                "operation requires {expected:?} mode, archive is in {:?}",
                self.mode
            )));
        }
        Ok(())
    }

    fn open_stream(
        &self,
        file_type: FileType,
        location: Option<u64>,
        mode: Mode,
        chunk_size: u64,
        is_event_stream: bool,
    ) -> TraceResult<Buffer> {
        let handle = self.substrate.open_file(
            &self.archive_dir,
            &self.name,
            file_type,
            location,
            mode,
            self.collectives.rank(),
        )?;
        let compressible = file_type.permits_compression();
        let compression = if compressible { self.options.compression } else { Compression::None };
        let file = File::new(handle, compression, compressible);
        let chunk_mode = match file_type {
            FileType::Anchor | FileType::Thumb | FileType::RankMap => ChunkMode::NotChunked,
            _ => ChunkMode::Chunked,
        };
        let mut buf = Buffer::new(mode, chunk_mode, chunk_size, is_event_stream)?;
        buf.attach_file(file);
        if matches!(mode, Mode::Write) {
            buf.set_pre_flush_callback(self.options.flush_policy.into_callback());
            if let Some(cb) = self.options.post_flush_timestamp {
                buf.set_post_flush_timestamp_callback(Box::new(cb));
            }
        }
        Ok(buf)
    }

    // -----------------------------------------------------------------
    // Writer factories (spec §4.4)
    // -----------------------------------------------------------------

    pub fn get_evt_writer(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if !self.event_writers.contains_key(&location) {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Evt, Some(location), Mode::Write, chunk_size, true)?;
            self.event_writers.insert(location, buf);
            self.locations.entry(location).or_insert_with(LocationState::new);
        }
        Ok(self.event_writers.get_mut(&location).unwrap())
    }

    pub fn get_def_writer(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if !self.def_writers.contains_key(&location) {
            let chunk_size = self.options.def_chunk_size;
            let buf = self.open_stream(FileType::Def, Some(location), Mode::Write, chunk_size, false)?;
            self.def_writers.insert(location, buf);
        }
        Ok(self.def_writers.get_mut(&location).unwrap())
    }

    /// Only valid on the master participant (rank 0 of the global
    /// communicator).
    pub fn get_global_def_writer(&mut self) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if self.collectives.rank() != 0 {
            return Err(TraceError::state("global definition writer is only available on the master participant".into()));
        }
        if self.global_def_writer.is_none() {
            let chunk_size = self.options.def_chunk_size;
            let buf = self.open_stream(FileType::GlobalDef, None, Mode::Write, chunk_size, false)?;
            self.global_def_writer = Some(buf);
        }
        Ok(self.global_def_writer.as_mut().unwrap())
    }

    pub fn get_snap_writer(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if !self.snap_writers.contains_key(&location) {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Snap, Some(location), Mode::Write, chunk_size, true)?;
            self.snap_writers.insert(location, buf);
        }
        Ok(self.snap_writers.get_mut(&location).unwrap())
    }

    pub fn get_thumb_writer(&mut self, id: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if !self.thumb_writers.contains_key(&id) {
            let buf = self.open_stream(FileType::Thumb, Some(id), Mode::Write, self.options.event_chunk_size, false)?;
            self.thumb_writers.insert(id, buf);
        }
        Ok(self.thumb_writers.get_mut(&id).unwrap())
    }

    pub fn get_marker_writer(&mut self) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Write)?;
        if self.marker_writer.is_none() {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Marker, None, Mode::Write, chunk_size, true)?;
            self.marker_writer = Some(buf);
        }
        Ok(self.marker_writer.as_mut().unwrap())
    }

    // -----------------------------------------------------------------
    // Reader factories (spec §4.4)
    // -----------------------------------------------------------------

    pub fn get_evt_reader(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if !self.event_readers.contains_key(&location) {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Evt, Some(location), Mode::Read, chunk_size, true)?;
            self.event_readers.insert(location, buf);
        }
        Ok(self.event_readers.get_mut(&location).unwrap())
    }

    pub fn get_def_reader(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if !self.def_readers.contains_key(&location) {
            let chunk_size = self.options.def_chunk_size;
            let buf = self.open_stream(FileType::Def, Some(location), Mode::Read, chunk_size, false)?;
            self.def_readers.insert(location, buf);
        }
        Ok(self.def_readers.get_mut(&location).unwrap())
    }

    pub fn get_global_evt_reader(&mut self) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if self.global_evt_reader.is_none() {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Evt, None, Mode::Read, chunk_size, true)?;
            self.global_evt_reader = Some(buf);
        }
        Ok(self.global_evt_reader.as_mut().unwrap())
    }

    pub fn get_global_def_reader(&mut self) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if self.global_def_reader.is_none() {
            let chunk_size = self.options.def_chunk_size;
            let buf = self.open_stream(FileType::GlobalDef, None, Mode::Read, chunk_size, false)?;
            self.global_def_reader = Some(buf);
        }
        Ok(self.global_def_reader.as_mut().unwrap())
    }

    pub fn get_snap_reader(&mut self, location: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if !self.snap_readers.contains_key(&location) {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Snap, Some(location), Mode::Read, chunk_size, true)?;
            self.snap_readers.insert(location, buf);
        }
        Ok(self.snap_readers.get_mut(&location).unwrap())
    }

    pub fn get_thumb_reader(&mut self, id: u64) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if !self.thumb_readers.contains_key(&id) {
            let buf = self.open_stream(FileType::Thumb, Some(id), Mode::Read, self.options.event_chunk_size, false)?;
            self.thumb_readers.insert(id, buf);
        }
        Ok(self.thumb_readers.get_mut(&id).unwrap())
    }

    pub fn get_marker_reader(&mut self) -> TraceResult<&mut Buffer> {
        self.require_mode(Mode::Read)?;
        if self.marker_reader.is_none() {
            let chunk_size = self.options.event_chunk_size;
            let buf = self.open_stream(FileType::Marker, None, Mode::Read, chunk_size, true)?;
            self.marker_reader = Some(buf);
        }
        Ok(self.marker_reader.as_mut().unwrap())
    }

    // -----------------------------------------------------------------
    // Close (spec §4.4)
    // -----------------------------------------------------------------

    /// Walks every cached writer, finalizing each buffer before releasing;
    /// on the master, also persists the anchor file with the final counts
    /// of locations and global definitions. Best-effort: a non-zero number
    /// of per-stream faults is reported via `ProcessedWithFaults` rather
    /// than aborting early (spec §7).
    pub fn close(mut self) -> TraceResult<()> {
        self.require_mode(Mode::Write)?;
        let mut faults = 0usize;

        for buf in self.event_writers.values_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }
        for buf in self.def_writers.values_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }
        for buf in self.snap_writers.values_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }
        for buf in self.thumb_writers.values_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }
        if let Some(buf) = self.global_def_writer.as_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }
        if let Some(buf) = self.marker_writer.as_mut() {
            if buf.close_write().is_err() {
                faults += 1;
            }
        }

        let participant_ranks: Vec<u32> = (0..self.collectives.size()).collect();
        for file_type in [FileType::Evt, FileType::Def, FileType::Snap, FileType::Marker, FileType::GlobalDef] {
            if self.substrate.close_file_type(file_type, &participant_ranks).is_err() {
                faults += 1;
            }
        }

        self.collectives.barrier().ok();

        if self.collectives.rank() == 0 {
            let anchor = Anchor {
                archive_name: self.name.clone(),
                machine: self.options.machine.clone(),
                description: self.options.description.clone(),
                creator: self.options.creator.clone(),
                version: self.options.version.clone(),
                trace_format_version: TRACE_FORMAT_VERSION,
                substrate: self.substrate.kind(),
                compressed: !matches!(self.options.compression, Compression::None),
                event_chunk_size: self.options.event_chunk_size,
                def_chunk_size: self.options.def_chunk_size,
                n_locations: self.locations.len() as u64,
                n_global_defs: self.n_global_defs,
                trace_id: self.trace_id,
                n_snapshots: self.n_snapshots,
                n_thumbnails: self.n_thumbnails,
                properties: self.properties.clone(),
            };
            if anchor.write_to(&anchor_path(&self.archive_dir, &self.name)).is_err() {
                faults += 1;
            }
        }

        self.locking.destroy(self.archive_lock)?;

        if faults > 0 {
            Err(TraceError::ProcessedWithFaults(faults))
        } else {
            Ok(())
        }
    }
}

fn anchor_path(archive_dir: &Path, name: &str) -> PathBuf {
    archive_dir.join(name).with_extension("anchor")
}

fn name_seed(archive_dir: &Path, options: &ArchiveOptions) -> String {
    format!("{}{}{}", archive_dir.display(), options.machine, options.creator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectives::SerialCollectives;
    use crate::locking::NullLocking;
    use tempfile::tempdir;

    fn new_archive(dir: &std::path::Path) -> Archive {
        Archive::create(
            dir,
            "trace",
            Substrate::posix(),
            Box::new(SerialCollectives),
            Box::new(NullLocking),
            ArchiveOptions::new().event_chunk_size(crate::limits::CHUNK_MIN),
        )
        .unwrap()
    }

    #[test]
    fn write_two_locations_then_close_persists_anchor() {
        let dir = tempdir().unwrap();
        let mut archive = new_archive(dir.path());

        {
            let w = archive.get_evt_writer(0).unwrap();
            w.write_timestamp(1).unwrap();
            w.begin_record(10, 4).unwrap();
            w.write_u32(42).unwrap();
            w.finish_record().unwrap();
        }
        {
            let w = archive.get_evt_writer(1).unwrap();
            w.write_timestamp(2).unwrap();
            w.begin_record(10, 4).unwrap();
            w.write_u32(43).unwrap();
            w.finish_record().unwrap();
        }
        archive.close().unwrap();

        let anchor = Anchor::read_from(&anchor_path(dir.path(), "trace")).unwrap();
        assert_eq!(anchor.n_locations, 2);
        assert_eq!(anchor.trace_format_version, TRACE_FORMAT_VERSION);
    }

    #[test]
    fn global_def_writer_is_available_to_the_master_participant() {
        let dir = tempdir().unwrap();
        let mut archive = new_archive(dir.path());
        assert!(archive.get_global_def_writer().is_ok());
    }

    #[test]
    fn switch_file_mode_rejects_anything_but_read_to_write() {
        let dir = tempdir().unwrap();
        let mut archive = new_archive(dir.path());
        let err = archive.switch_file_mode(Mode::Read).unwrap_err();
        assert!(matches!(err, TraceError::FileModeTransitionInvalid));
    }

    #[test]
    fn reopened_archive_round_trips_through_the_anchor() {
        let dir = tempdir().unwrap();
        let archive = new_archive(dir.path());
        let original_trace_id = archive.trace_id();
        archive.close().unwrap();

        let reopened = Archive::open(dir.path(), "trace", Box::new(SerialCollectives), Box::new(NullLocking)).unwrap();
        assert_eq!(reopened.mode(), Mode::Read);
        assert_eq!(reopened.trace_id(), original_trace_id);
    }
}
