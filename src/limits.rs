//! Configuration limits (spec §6.5).

/// Smallest allowed chunk size: 256 KiB.
pub const CHUNK_MIN: u64 = 256 * 1024;

/// Largest allowed chunk size: 1 GiB.
pub const CHUNK_MAX: u64 = 1024 * 1024 * 1024;

/// Fixed size of the [`crate::file::File`] write-coalescing buffer.
pub const COALESCE_SIZE: usize = 4 * 1024 * 1024;

/// Memory cap for the internal (non-substrate-provided) chunk allocator.
pub const ALLOCATOR_MEMORY_CAP: u64 = 128 * 1024 * 1024;

/// Highest trace-format version a reader will accept.
pub const MAX_TRACE_FORMAT_VERSION: u32 = 2;

pub(crate) fn validate_chunk_size(size: u64) -> crate::error::TraceResult<()> {
    if !(CHUNK_MIN..=CHUNK_MAX).contains(&size) {
        return Err(crate::error::TraceError::argument(format!(
            "chunk size {size} outside [{CHUNK_MIN}, {CHUNK_MAX}]"
        )));
    }
    Ok(())
}
