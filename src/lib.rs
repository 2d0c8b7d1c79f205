//! `tracefmt`: a chunked, streaming, compressible binary archive engine for
//! high-resolution parallel trace data.
//!
//! The write pipeline turns caller-supplied fields into var-int-encoded
//! record frames ([`buffer`]), chains them into fixed-size chunks, drains
//! chunks through an optional compressor ([`file`]) onto a pluggable byte
//! substrate ([`substrate`]). The read pipeline reverses the process,
//! including rewind points, by-event and by-time seeking, and an
//! endianness handshake so a chunk written on one host decodes correctly
//! on a host of the opposite byte order. [`archive`] ties the per-location
//! streams, the anchor file, and the collective/locking coordination
//! needed for parallel measurement runs together.

pub mod anchor;
pub mod archive;
pub mod buffer;
pub mod chunk;
pub mod collectives;
pub mod control;
pub mod error;
pub mod file;
pub mod limits;
pub mod location;
pub mod locking;
pub mod rankmap;
pub mod rewind;
pub mod substrate;
pub mod varint;

pub use archive::{Archive, ArchiveOptions, FlushPolicy, Mode};
pub use buffer::{Buffer, ChunkMode, Frame};
pub use error::{TraceError, TraceResult};
pub use file::{Compression, File};
pub use location::{LocationState, MappingKind};
pub use substrate::{FileType, Substrate, SubstrateFile, SubstrateKind};
