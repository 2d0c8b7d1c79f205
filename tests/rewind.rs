//! Properties 5-6: a rewind point discards every write made after it,
//! and a flush invalidates every outstanding rewind point (since the
//! chunks it drains can no longer be truncated in place).

mod common;

use common::{read_all_events, write_enter, write_leave, writer, Event};
use tracefmt::limits::CHUNK_MIN;

#[test]
fn rewind_discards_records_written_after_the_point_was_stored() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut buf = writer(dir.path(), CHUNK_MIN);
        write_enter(&mut buf, 10, 1).unwrap();
        buf.store_rewind_point(42).unwrap();
        write_enter(&mut buf, 20, 2).unwrap();
        write_leave(&mut buf, 30, 2).unwrap();
        buf.rewind(42).unwrap();
        write_leave(&mut buf, 15, 1).unwrap();
        buf.close_write().unwrap();
    }
    let mut buf = common::reader(dir.path(), CHUNK_MIN);
    let events = read_all_events(&mut buf).unwrap();
    assert_eq!(
        events,
        vec![Event::Enter { t: 10, region: 1 }, Event::Leave { t: 15, region: 1 }]
    );
}

#[test]
fn rewinding_to_an_unknown_key_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut buf = writer(dir.path(), CHUNK_MIN);
    write_enter(&mut buf, 10, 1).unwrap();
    assert!(buf.rewind(999).is_err());
}

#[test]
fn a_flush_invalidates_outstanding_rewind_points() {
    let dir = tempfile::tempdir().unwrap();
    let mut buf = writer(dir.path(), CHUNK_MIN);
    write_enter(&mut buf, 10, 1).unwrap();
    buf.store_rewind_point(1).unwrap();
    buf.flush().unwrap();
    let err = buf.rewind(1).unwrap_err();
    assert!(format!("{err:?}").len() > 0);
}

#[test]
fn clearing_a_rewind_point_makes_it_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut buf = writer(dir.path(), CHUNK_MIN);
    write_enter(&mut buf, 10, 1).unwrap();
    buf.store_rewind_point(7).unwrap();
    buf.clear_rewind_point(7).unwrap();
    assert!(buf.rewind(7).is_err());
}
