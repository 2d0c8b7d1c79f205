//! Properties 1-3: a stream of records written through the buffer/file/
//! substrate stack reads back in the same order with the same field
//! values, across chunk boundaries, without any loss or reordering.

mod common;

use common::{read_all_events, reader, write_enter, write_leave, write_metric, writer, Event};
use tempfile::tempdir;
use tracefmt::limits::CHUNK_MIN;

#[test]
fn single_chunk_round_trip_preserves_order_and_values() {
    let dir = tempdir().unwrap();
    {
        let mut buf = writer(dir.path(), CHUNK_MIN);
        write_enter(&mut buf, 100, 7).unwrap();
        write_metric(&mut buf, 105, 3, 42.5).unwrap();
        write_leave(&mut buf, 110, 7).unwrap();
        buf.close_write().unwrap();
    }
    let mut buf = reader(dir.path(), CHUNK_MIN);
    let events = read_all_events(&mut buf).unwrap();
    assert_eq!(
        events,
        vec![
            Event::Enter { t: 100, region: 7 },
            Event::Metric { t: 105, metric: 3, value: 42.5 },
            Event::Leave { t: 110, region: 7 },
        ]
    );
}

#[test]
fn records_spanning_many_chunks_still_round_trip_in_order() {
    let dir = tempdir().unwrap();
    let chunk_size = CHUNK_MIN;
    let mut written = Vec::new();
    {
        let mut buf = writer(dir.path(), chunk_size);
        // Enough records that the chunk (256 KiB) rolls over several times.
        for i in 0..20_000u64 {
            let t = 1000 + i;
            let region = (i % 5) as u32;
            write_enter(&mut buf, t, region).unwrap();
            written.push(Event::Enter { t, region });
            write_leave(&mut buf, t + 1, region).unwrap();
            written.push(Event::Leave { t: t + 1, region });
        }
        buf.close_write().unwrap();
    }
    let mut buf = reader(dir.path(), chunk_size);
    let events = read_all_events(&mut buf).unwrap();
    assert_eq!(events, written);
}

#[test]
fn empty_stream_round_trips_to_no_events() {
    let dir = tempdir().unwrap();
    {
        let mut buf = writer(dir.path(), CHUNK_MIN);
        buf.close_write().unwrap();
    }
    let mut buf = reader(dir.path(), CHUNK_MIN);
    let events = read_all_events(&mut buf).unwrap();
    assert!(events.is_empty());
}
