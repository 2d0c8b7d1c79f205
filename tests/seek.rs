//! Properties 9-10: seeking by event number or by timestamp lands on the
//! chunk that contains the request and reads forward correctly from there.

mod common;

use common::{read_all_events, write_enter, writer, Event};
use tracefmt::limits::CHUNK_MIN;

const N: u64 = 30_000;

fn build(dir: &std::path::Path, chunk_size: u64) -> Vec<Event> {
    let mut buf = writer(dir, chunk_size);
    let mut expected = Vec::new();
    for i in 0..N {
        let t = 1000 + i * 10;
        let region = i as u32;
        write_enter(&mut buf, t, region).unwrap();
        expected.push(Event::Enter { t, region });
    }
    buf.close_write().unwrap();
    expected
}

#[test]
fn seek_chunk_by_event_number_lands_in_the_right_chunk_and_reads_onward() {
    let dir = tempfile::tempdir().unwrap();
    let chunk_size = CHUNK_MIN;
    let expected = build(dir.path(), chunk_size);

    let mut buf = common::reader(dir.path(), chunk_size);
    // Event numbers are 1-based; ask for roughly the middle of the stream.
    buf.seek_chunk(N / 2).unwrap();
    let tail = read_all_events(&mut buf).unwrap();
    assert!(!tail.is_empty());
    // Whatever chunk we land in, its contents must be a suffix of the
    // full recorded stream (no reordering, no duplication once replayed
    // from the start of that chunk).
    assert_eq!(&expected[expected.len() - tail.len()..], tail.as_slice());
}

#[test]
fn seek_chunk_time_lands_on_the_chunk_whose_first_timestamp_covers_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let chunk_size = CHUNK_MIN;
    let expected = build(dir.path(), chunk_size);

    let mut buf = common::reader(dir.path(), chunk_size);
    let found = buf.seek_chunk_time(1000 + (N / 2) * 10).unwrap();
    assert!(found);
    let tail = read_all_events(&mut buf).unwrap();
    assert!(!tail.is_empty());
    assert_eq!(&expected[expected.len() - tail.len()..], tail.as_slice());
}

#[test]
fn seek_chunk_time_before_the_first_recorded_timestamp_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let chunk_size = CHUNK_MIN;
    build(dir.path(), chunk_size);

    let mut buf = common::reader(dir.path(), chunk_size);
    let found = buf.seek_chunk_time(0).unwrap();
    assert!(!found);
}

#[test]
fn seek_chunk_past_the_last_event_number_is_out_of_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let chunk_size = CHUNK_MIN;
    build(dir.path(), chunk_size);

    let mut buf = common::reader(dir.path(), chunk_size);
    assert!(buf.seek_chunk(10_000_000).is_err());
}
