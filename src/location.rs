//! Per-location archive state collected on the read side (spec §4.5):
//! ID-remap mapping tables and the piecewise-linear clock-offset interval
//! list used to translate local timestamps to the global clock.

use crate::error::{TraceError, TraceResult};

/// Which kind of local->global ID space a mapping table translates. The
/// engine treats the map contents as opaque; only the container and the
/// one-table-per-kind invariant are implemented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    Region,
    Group,
    Metric,
    String,
}

/// One completed segment of the piecewise-linear clock function
/// `global = local * (1 + slope) + offset` on `[begin, end)` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockInterval {
    pub begin: u64,
    pub end: u64,
    pub offset_at_begin: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingInterval {
    begin: u64,
    offset: f64,
}

/// Per-location metadata: at most one mapping table per [`MappingKind`],
/// plus the ordered clock-interval list and the in-progress interval
/// waiting on its next synchronization point (invariant 11).
#[derive(Debug, Default)]
pub struct LocationState {
    mappings: Vec<(MappingKind, Vec<(u64, u64)>)>,
    intervals: Vec<ClockInterval>,
    pending: Option<PendingInterval>,
    /// Whether the local-definition reader has finished for this location;
    /// events must not be consumed ahead of this (`OTF2_Archive_Location`'s
    /// definitions-done flag).
    definitions_done: bool,
}

impl LocationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `set_mapping_table(location, kind, map)`: fails if a table of this
    /// kind is already installed for the location.
    pub fn set_mapping_table(&mut self, kind: MappingKind, map: Vec<(u64, u64)>) -> TraceResult<()> {
        if self.mappings.iter().any(|(k, _)| *k == kind) {
            return Err(TraceError::DuplicateMappingTable(kind));
        }
        self.mappings.push((kind, map));
        Ok(())
    }

    pub fn mapping_table(&self, kind: MappingKind) -> Option<&[(u64, u64)]> {
        self.mappings.iter().find(|(k, _)| *k == kind).map(|(_, m)| m.as_slice())
    }

    /// `add_clock_offset(location, t, offset, std_dev)`. `std_dev` is
    /// accepted (per the external call signature) but not otherwise used by
    /// the piecewise-linear model; OTF2 itself only surfaces it through
    /// diagnostics.
    pub fn add_clock_offset(&mut self, t: u64, offset: f64, std_dev: f64) -> TraceResult<()> {
        if std_dev < 0.0 {
            return Err(TraceError::argument("clock offset std_dev must be non-negative"));
        }
        if let Some(pending) = self.pending.take() {
            if t <= pending.begin {
                return Err(TraceError::argument(
                    "clock synchronization points must strictly increase in time",
                ));
            }
            let slope = (offset - pending.offset) / (t - pending.begin) as f64;
            self.intervals.push(ClockInterval {
                begin: pending.begin,
                end: t,
                offset_at_begin: pending.offset,
                slope,
            });
        }
        self.pending = Some(PendingInterval { begin: t, offset });
        Ok(())
    }

    /// Drops any trailing pending interval; called once no further
    /// synchronization points will arrive (there is no point to bound it).
    pub fn finalize_clock(&mut self) {
        self.pending = None;
    }

    pub fn clock_intervals(&self) -> &[ClockInterval] {
        &self.intervals
    }

    /// Translates a local timestamp using the interval covering it
    /// (invariant 11: `begin <= t` for the selected interval). Returns
    /// `None` if `t` precedes every completed interval.
    pub fn to_global_time(&self, t: u64) -> Option<u64> {
        self.intervals
            .iter()
            .rev()
            .find(|iv| iv.begin <= t)
            .map(|iv| ((t - iv.begin) as f64 * (1.0 + iv.slope) + iv.offset_at_begin).round() as u64)
    }

    pub fn mark_definitions_done(&mut self) {
        self.definitions_done = true;
    }

    pub fn definitions_done(&self) -> bool {
        self.definitions_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_table_rejects_duplicate_kind() {
        let mut loc = LocationState::new();
        loc.set_mapping_table(MappingKind::Region, vec![(0, 100)]).unwrap();
        let err = loc.set_mapping_table(MappingKind::Region, vec![(1, 101)]).unwrap_err();
        assert!(matches!(err, TraceError::DuplicateMappingTable(MappingKind::Region)));
    }

    #[test]
    fn clock_offsets_build_bounded_intervals() {
        let mut loc = LocationState::new();
        loc.add_clock_offset(0, 0.0, 0.0).unwrap();
        loc.add_clock_offset(100, 10.0, 0.0).unwrap();
        loc.add_clock_offset(200, 10.0, 0.0).unwrap();
        loc.finalize_clock();

        let intervals = loc.clock_intervals();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].begin, 0);
        assert_eq!(intervals[0].end, 100);
        assert_eq!(intervals[1].begin, 100);
        assert_eq!(intervals[1].end, 200);
        // global(t_i) = off_i for every observed synchronization point.
        assert_eq!(loc.to_global_time(0), Some(0));
        assert_eq!(loc.to_global_time(100), Some(10));
    }

    #[test]
    fn first_observation_opens_pending_without_completing() {
        let mut loc = LocationState::new();
        loc.add_clock_offset(5, 1.0, 0.0).unwrap();
        assert!(loc.clock_intervals().is_empty());
        loc.finalize_clock();
        assert!(loc.clock_intervals().is_empty());
    }

    #[test]
    fn non_increasing_sync_points_are_rejected() {
        let mut loc = LocationState::new();
        loc.add_clock_offset(10, 0.0, 0.0).unwrap();
        let err = loc.add_clock_offset(10, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, TraceError::ArgumentInvalid(_)));
    }
}
