//! Example record encoders standing in for the generated per-record
//! wrappers a real measurement API would provide; the record catalog
//! itself is out of scope, but exercising the engine end to end needs a
//! handful of concrete record shapes.

#![allow(dead_code)]

use tracefmt::archive::Mode;
use tracefmt::buffer::{Buffer, ChunkMode, Frame};
use tracefmt::file::{Compression, File};
use tracefmt::substrate::{FileType, Substrate};
use tracefmt::TraceResult;

pub const ENTER: u8 = 10;
pub const METRIC: u8 = 11;
pub const LEAVE: u8 = 12;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Enter { t: u64, region: u32 },
    Metric { t: u64, metric: u32, value: f64 },
    Leave { t: u64, region: u32 },
}

pub fn write_enter(buf: &mut Buffer, t: u64, region: u32) -> TraceResult<()> {
    buf.write_timestamp(t)?;
    buf.begin_record(ENTER, 5)?;
    buf.write_u32(region)?;
    buf.finish_record()
}

pub fn write_metric(buf: &mut Buffer, t: u64, metric: u32, value: f64) -> TraceResult<()> {
    buf.write_timestamp(t)?;
    buf.begin_record(METRIC, 13)?;
    buf.write_u32(metric)?;
    buf.write_f64(value)?;
    buf.finish_record()
}

pub fn write_leave(buf: &mut Buffer, t: u64, region: u32) -> TraceResult<()> {
    buf.write_timestamp(t)?;
    buf.begin_record(LEAVE, 5)?;
    buf.write_u32(region)?;
    buf.finish_record()
}

/// Reads every event out of `buf` until `END_OF_FILE`/`END_OF_CHUNK` with
/// no further chunk to load.
pub fn read_all_events(buf: &mut Buffer) -> TraceResult<Vec<Event>> {
    let mut events = Vec::new();
    loop {
        let t = buf.read_timestamp()?;
        match buf.next_frame()? {
            Frame::EndOfFile => break,
            Frame::EndOfChunk => match buf.read_get_next_chunk() {
                Ok(()) => continue,
                Err(_) => break,
            },
            Frame::Record { record_type, .. } if record_type == ENTER => {
                let region = buf.read_u32()?;
                events.push(Event::Enter { t, region });
            }
            Frame::Record { record_type, .. } if record_type == METRIC => {
                let metric = buf.read_u32()?;
                let value = buf.read_f64()?;
                events.push(Event::Metric { t, metric, value });
            }
            Frame::Record { record_type, .. } if record_type == LEAVE => {
                let region = buf.read_u32()?;
                events.push(Event::Leave { t, region });
            }
            Frame::Record { record_type, .. } => {
                panic!("unexpected record type {record_type}");
            }
        }
    }
    Ok(events)
}

pub fn writer(dir: &std::path::Path, chunk_size: u64) -> Buffer {
    let sub = Substrate::posix();
    let handle = sub
        .open_file(dir, "trace", FileType::Evt, Some(0), Mode::Write, 0)
        .unwrap();
    let file = File::new(handle, Compression::None, true);
    let mut buf = Buffer::new(Mode::Write, ChunkMode::Chunked, chunk_size, true).unwrap();
    buf.attach_file(file);
    buf
}

pub fn reader(dir: &std::path::Path, chunk_size: u64) -> Buffer {
    let sub = Substrate::posix();
    let handle = sub
        .open_file(dir, "trace", FileType::Evt, Some(0), Mode::Read, 0)
        .unwrap();
    let file = File::new(handle, Compression::None, true);
    let mut buf = Buffer::new(Mode::Read, ChunkMode::Chunked, chunk_size, true).unwrap();
    buf.attach_file(file);
    buf
}
