//! Property 11: a compressed chunk decodes to exactly the bytes that
//! went in, transparently to the buffer layer above it.

#![cfg(feature = "zlib")]

mod common;

use common::{read_all_events, write_enter, write_metric, write_leave, Event};
use tracefmt::archive::Mode;
use tracefmt::buffer::{Buffer, ChunkMode};
use tracefmt::file::{Compression, File};
use tracefmt::limits::CHUNK_MIN;
use tracefmt::substrate::{FileType, Substrate};

#[test]
fn a_zlib_compressed_stream_round_trips_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let sub = Substrate::posix();

    {
        let handle = sub
            .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Write, 0)
            .unwrap();
        let file = File::new(handle, Compression::Zlib, true);
        let mut buf = Buffer::new(Mode::Write, ChunkMode::Chunked, CHUNK_MIN, true).unwrap();
        buf.attach_file(file);
        for i in 0..50u64 {
            write_enter(&mut buf, 100 + i, i as u32).unwrap();
            write_metric(&mut buf, 100 + i, i as u32, i as f64 * 1.5).unwrap();
            write_leave(&mut buf, 100 + i, i as u32).unwrap();
        }
        buf.close_write().unwrap();
    }

    let handle = sub
        .open_file(dir.path(), "trace", FileType::Evt, Some(0), Mode::Read, 0)
        .unwrap();
    let file = File::new(handle, Compression::Zlib, true);
    let mut buf = Buffer::new(Mode::Read, ChunkMode::Chunked, CHUNK_MIN, true).unwrap();
    buf.attach_file(file);
    let events = read_all_events(&mut buf).unwrap();

    let mut expected = Vec::new();
    for i in 0..50u64 {
        expected.push(Event::Enter { t: 100 + i, region: i as u32 });
        expected.push(Event::Metric { t: 100 + i, metric: i as u32, value: i as f64 * 1.5 });
        expected.push(Event::Leave { t: 100 + i, region: i as u32 });
    }
    assert_eq!(events, expected);
}
