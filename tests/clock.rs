//! Property 12: per-location clock correction is tracked alongside the
//! rest of an archive's per-location bookkeeping and survives as part of
//! normal archive writing, not just in isolation.

use tracefmt::archive::{Archive, ArchiveOptions};
use tracefmt::collectives::SerialCollectives;
use tracefmt::location::MappingKind;
use tracefmt::locking::NullLocking;

#[test]
fn location_state_created_through_the_archive_tracks_clock_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = Archive::create(
        dir.path().join("trace"),
        "trace",
        tracefmt::substrate::Substrate::posix(),
        Box::new(SerialCollectives),
        Box::new(NullLocking),
        ArchiveOptions::default(),
    )
    .unwrap();

    let loc = archive.location_mut(0);
    loc.add_clock_offset(0, 0.0, 0.0).unwrap();
    loc.add_clock_offset(1_000_000, 50.0, 0.0).unwrap();
    loc.finalize_clock();

    let loc = archive.location(0).unwrap();
    assert_eq!(loc.to_global_time(500_000), Some(500_025));
}

#[test]
fn mapping_tables_set_on_one_location_do_not_leak_into_another() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = Archive::create(
        dir.path().join("trace"),
        "trace",
        tracefmt::substrate::Substrate::posix(),
        Box::new(SerialCollectives),
        Box::new(NullLocking),
        ArchiveOptions::default(),
    )
    .unwrap();

    archive
        .location_mut(0)
        .set_mapping_table(MappingKind::Region, vec![(1, 100)])
        .unwrap();

    assert!(archive.location(1).is_none());
    assert_eq!(archive.location(0).unwrap().mapping_table(MappingKind::Region), Some(&[(1, 100)][..]));
}
