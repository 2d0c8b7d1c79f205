//! Integer and string wire codecs used by record fields (spec §4.3.4).
//!
//! `u8` is written verbatim. `u16`/`f32`/`f64` are fixed-width, written in
//! the writer's host order and reconstructed by the reader using the
//! endianness marker recorded in the owning chunk's header (spec §6.1) —
//! Rust's `from_le_bytes`/`from_be_bytes` already encode "reinterpret these
//! bytes as written by a writer of this endianness", so no explicit swap is
//! needed beyond picking the right constructor. `u32`/`u64` are var-int:
//! a length byte followed by only the significant bytes, with `0xFF`
//! reserved for the "undefined" sentinel (spec invariant 8).

use crate::control::Endianness;
use crate::error::{TraceError, TraceResult};

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn read_u8(bytes: &[u8], pos: &mut usize) -> TraceResult<u8> {
    let b = *bytes.get(*pos).ok_or(TraceError::OutOfBounds)?;
    *pos += 1;
    Ok(b)
}

pub fn write_u16(out: &mut Vec<u8>, v: u16, writer: Endianness) {
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
        Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

pub fn read_u16(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<u16> {
    let raw = take(bytes, pos, 2)?;
    Ok(match writer {
        Endianness::Little => u16::from_le_bytes([raw[0], raw[1]]),
        Endianness::Big => u16::from_be_bytes([raw[0], raw[1]]),
    })
}

pub fn write_f32(out: &mut Vec<u8>, v: f32, writer: Endianness) {
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
        Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

pub fn read_f32(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<f32> {
    let raw = take(bytes, pos, 4)?;
    let arr: [u8; 4] = raw.try_into().expect("took exactly 4 bytes");
    Ok(match writer {
        Endianness::Little => f32::from_le_bytes(arr),
        Endianness::Big => f32::from_be_bytes(arr),
    })
}

pub fn write_f64(out: &mut Vec<u8>, v: f64, writer: Endianness) {
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
        Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

pub fn read_f64(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<f64> {
    let raw = take(bytes, pos, 8)?;
    let arr: [u8; 8] = raw.try_into().expect("took exactly 8 bytes");
    Ok(match writer {
        Endianness::Little => f64::from_le_bytes(arr),
        Endianness::Big => f64::from_be_bytes(arr),
    })
}

/// Fixed-width 8-byte absolute timestamp, as written after a `TIMESTAMP`
/// control byte (spec invariant 7). Always host-order at write, recovered
/// via the chunk's endianness marker.
pub fn write_fixed_u64(out: &mut Vec<u8>, v: u64, writer: Endianness) {
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
        Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
    }
}

pub fn read_fixed_u64(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<u64> {
    let raw = take(bytes, pos, 8)?;
    let arr: [u8; 8] = raw.try_into().expect("took exactly 8 bytes");
    Ok(match writer {
        Endianness::Little => u64::from_le_bytes(arr),
        Endianness::Big => u64::from_be_bytes(arr),
    })
}

pub fn write_varint_u32(out: &mut Vec<u8>, v: u32, writer: Endianness) {
    if v == u32::MAX {
        out.push(0xFF);
        return;
    }
    let be = v.to_be_bytes();
    let l = 4 - be.iter().take_while(|&&b| b == 0).count();
    out.push(l as u8);
    if l == 0 {
        return;
    }
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()[0..l]),
        Endianness::Big => out.extend_from_slice(&be[4 - l..4]),
    }
}

pub fn read_varint_u32(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<u32> {
    let l = read_u8(bytes, pos)?;
    if l == 0xFF {
        return Ok(u32::MAX);
    }
    if l > 4 {
        return Err(TraceError::integrity(format!(
            "var-int length byte {l} exceeds 4 for a u32 field"
        )));
    }
    let l = l as usize;
    if l == 0 {
        return Ok(0);
    }
    let raw = take(bytes, pos, l)?;
    let mut buf = [0u8; 4];
    match writer {
        Endianness::Little => buf[0..l].copy_from_slice(raw),
        Endianness::Big => buf[4 - l..4].copy_from_slice(raw),
    }
    Ok(match writer {
        Endianness::Little => u32::from_le_bytes(buf),
        Endianness::Big => u32::from_be_bytes(buf),
    })
}

pub fn write_varint_u64(out: &mut Vec<u8>, v: u64, writer: Endianness) {
    if v == u64::MAX {
        out.push(0xFF);
        return;
    }
    let be = v.to_be_bytes();
    let l = 8 - be.iter().take_while(|&&b| b == 0).count();
    out.push(l as u8);
    if l == 0 {
        return;
    }
    match writer {
        Endianness::Little => out.extend_from_slice(&v.to_le_bytes()[0..l]),
        Endianness::Big => out.extend_from_slice(&be[8 - l..8]),
    }
}

pub fn read_varint_u64(bytes: &[u8], pos: &mut usize, writer: Endianness) -> TraceResult<u64> {
    let l = read_u8(bytes, pos)?;
    if l == 0xFF {
        return Ok(u64::MAX);
    }
    if l > 8 {
        return Err(TraceError::integrity(format!(
            "var-int length byte {l} exceeds 8 for a u64 field"
        )));
    }
    let l = l as usize;
    if l == 0 {
        return Ok(0);
    }
    let raw = take(bytes, pos, l)?;
    let mut buf = [0u8; 8];
    match writer {
        Endianness::Little => buf[0..l].copy_from_slice(raw),
        Endianness::Big => buf[8 - l..8].copy_from_slice(raw),
    }
    Ok(match writer {
        Endianness::Little => u64::from_le_bytes(buf),
        Endianness::Big => u64::from_be_bytes(buf),
    })
}

pub fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Reads a NUL-terminated string, returning a borrowed view into `bytes`.
pub fn read_str<'a>(bytes: &'a [u8], pos: &mut usize) -> TraceResult<&'a str> {
    let start = *pos;
    let nul = bytes[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(TraceError::OutOfBounds)?;
    let s = std::str::from_utf8(&bytes[start..start + nul])
        .map_err(|e| TraceError::integrity(format!("non-utf8 string field: {e}")))?;
    *pos = start + nul + 1;
    Ok(s)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> TraceResult<&'a [u8]> {
    let end = pos.checked_add(n).ok_or(TraceError::OutOfBounds)?;
    if end > bytes.len() {
        return Err(TraceError::OutOfBounds);
    }
    let out = &bytes[*pos..end];
    *pos = end;
    Ok(out)
}
