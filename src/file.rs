//! File wrapper: write-coalescing and optional per-block compression on
//! top of a [`Substrate`] handle (spec §4.2).

use crate::error::{TraceError, TraceResult};
use crate::limits::COALESCE_SIZE;
use crate::substrate::SubstrateFile;

/// Signature chosen so it cannot collide with a zlib flush marker or with
/// any possible compressed payload (compressed blocks cannot hit 4 GiB).
const COMPRESSION_SIGNATURE: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
const COMPRESSION_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    #[cfg(feature = "zlib")]
    Zlib,
}

pub struct File {
    handle: SubstrateFile,
    compression: Compression,
    compressible: bool,
    write_buf: Vec<u8>,
    /// Position in the *logical* (uncompressed) stream the caller has
    /// written up through; used to honor `seek_chunk` on uncompressed
    /// files without consulting the substrate.
    logical_len: u64,
    previous_compressed_size: u32,
}

impl File {
    pub fn new(handle: SubstrateFile, compression: Compression, compressible: bool) -> Self {
        File {
            handle,
            compression,
            compressible,
            write_buf: Vec::with_capacity(COALESCE_SIZE),
            logical_len: 0,
            previous_compressed_size: 0,
        }
    }

    fn compresses(&self) -> bool {
        self.compressible && !matches!(self.compression, Compression::None)
    }

    /// Whether a read on this handle is framed per-call (one
    /// `read_block` returns exactly one `write_block`'s worth of bytes,
    /// regardless of the length requested) rather than a raw byte
    /// stream that callers may split across several calls.
    pub(crate) fn is_block_framed(&self) -> bool {
        self.compresses()
    }

    /// Writes one logical block (normally one chunk's worth of bytes).
    /// Compression, when enabled, treats each call as an independent
    /// block framed by a 20-byte header (spec §4.2).
    pub fn write_block(&mut self, bytes: &[u8]) -> TraceResult<()> {
        self.logical_len += bytes.len() as u64;
        if self.compresses() {
            let framed = self.frame_compressed(bytes)?;
            self.buffer(&framed)
        } else {
            self.buffer(bytes)
        }
    }

    fn buffer(&mut self, bytes: &[u8]) -> TraceResult<()> {
        if bytes.len() >= COALESCE_SIZE {
            self.drain()?;
            self.write_all(bytes)?;
            return Ok(());
        }
        if self.write_buf.len() + bytes.len() > COALESCE_SIZE {
            self.drain()?;
        }
        self.write_buf.extend_from_slice(bytes);
        if self.write_buf.len() >= COALESCE_SIZE {
            self.drain()?;
        }
        Ok(())
    }

    fn drain(&mut self) -> TraceResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let mut buf = std::mem::take(&mut self.write_buf);
        let result = self.write_all(&buf);
        buf.clear();
        self.write_buf = buf;
        result
    }

    /// Loops until every byte is written, mirroring `read_exact`'s loop on
    /// the read side; a substrate's `write` is not guaranteed to consume
    /// its whole argument in one call.
    fn write_all(&mut self, mut buf: &[u8]) -> TraceResult<()> {
        while !buf.is_empty() {
            let n = self.handle.write(buf)?;
            if n == 0 {
                return Err(TraceError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "substrate write consumed zero bytes",
                )));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flushes the pending coalescing tail. Must be called on close.
    pub fn finalize(&mut self) -> TraceResult<()> {
        self.drain()
    }

    #[cfg(feature = "zlib")]
    fn frame_compressed(&mut self, bytes: &[u8]) -> TraceResult<Vec<u8>> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression as Level;
        use std::io::Write as _;

        let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;

        let mut out = Vec::with_capacity(COMPRESSION_HEADER_SIZE + compressed.len());
        out.extend_from_slice(&COMPRESSION_SIGNATURE);
        out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.previous_compressed_size.to_be_bytes());
        out.extend_from_slice(&compressed);
        self.previous_compressed_size = compressed.len() as u32;
        Ok(out)
    }

    #[cfg(not(feature = "zlib"))]
    fn frame_compressed(&mut self, _bytes: &[u8]) -> TraceResult<Vec<u8>> {
        Err(TraceError::state("zlib compression requested but the zlib feature is disabled".into()))
    }

    /// Reads exactly one logical block. With compression enabled this
    /// consumes one 20-byte header plus its compressed payload and
    /// inflates it; without compression it reads `len` raw bytes.
    pub fn read_block(&mut self, len: usize) -> TraceResult<Vec<u8>> {
        if self.compresses() {
            self.read_compressed_block()
        } else {
            let mut buf = vec![0u8; len];
            self.read_exact(&mut buf)?;
            Ok(buf)
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> TraceResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.handle.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(TraceError::OutOfBounds);
            }
            filled += n;
        }
        Ok(())
    }

    fn read_compressed_block(&mut self) -> TraceResult<Vec<u8>> {
        let mut header = [0u8; COMPRESSION_HEADER_SIZE];
        self.read_exact(&mut header)?;
        if header[0..8] != COMPRESSION_SIGNATURE {
            return Err(TraceError::integrity("compression block signature mismatch".to_string()));
        }
        let compressed_size = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
        let uncompressed_size = u32::from_be_bytes(header[12..16].try_into().unwrap()) as usize;
        let mut compressed = vec![0u8; compressed_size];
        self.read_exact(&mut compressed)?;
        self.inflate(&compressed, uncompressed_size)
    }

    #[cfg(feature = "zlib")]
    fn inflate(&self, compressed: &[u8], uncompressed_size: usize) -> TraceResult<Vec<u8>> {
        use flate2::read::ZlibDecoder;
        use std::io::Read as _;

        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::with_capacity(uncompressed_size);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    #[cfg(not(feature = "zlib"))]
    fn inflate(&self, _compressed: &[u8], _uncompressed_size: usize) -> TraceResult<Vec<u8>> {
        Err(TraceError::state("zlib compression requested but the zlib feature is disabled".into()))
    }

    /// `seek_chunk(n)`, uncompressed files only (spec §4.2).
    pub fn seek_chunk(&mut self, n: u64, chunk_size: u64) -> TraceResult<()> {
        if self.compresses() {
            return Err(TraceError::state("chunk seek by offset is unavailable on a compressed stream".into()));
        }
        self.drain()?;
        self.handle.seek((n.saturating_sub(1)) * chunk_size)
    }

    /// `seek_prev_chunk(n)`, uncompressed files only (spec §4.2).
    pub fn seek_prev_chunk(&mut self, n: u64, chunk_size: u64) -> TraceResult<()> {
        if self.compresses() {
            return Err(TraceError::state("chunk seek by offset is unavailable on a compressed stream".into()));
        }
        self.drain()?;
        self.handle.seek((n.saturating_sub(2)) * chunk_size)
    }

    pub fn rewind_to_start(&mut self) -> TraceResult<()> {
        self.drain()?;
        self.handle.seek(0)
    }

    pub fn get_size(&mut self) -> TraceResult<u64> {
        self.handle.get_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{FileType, Substrate};
    use crate::archive::Mode;
    use tempfile::tempdir;

    #[test]
    fn uncompressed_write_coalesces_and_reads_back() {
        let dir = tempdir().unwrap();
        let sub = Substrate::posix();
        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Write, 0)
            .unwrap();
        let mut file = File::new(handle, Compression::None, true);
        file.write_block(b"hello ").unwrap();
        file.write_block(b"world").unwrap();
        file.finalize().unwrap();

        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Read, 0)
            .unwrap();
        let mut file = File::new(handle, Compression::None, true);
        let buf = file.read_block(11).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn compressed_round_trip() {
        let dir = tempdir().unwrap();
        let sub = Substrate::posix();
        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(1), Mode::Write, 0)
            .unwrap();
        let mut file = File::new(handle, Compression::Zlib, true);
        let payload = vec![7u8; 4096];
        file.write_block(&payload).unwrap();
        file.finalize().unwrap();

        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(1), Mode::Read, 0)
            .unwrap();
        let mut file = File::new(handle, Compression::Zlib, true);
        let got = file.read_block(0).unwrap();
        assert_eq!(got, payload);
    }
}
