//! Rewind points: speculative-write checkpoints on the current chunk
//! (spec §4.3.9, invariant 10).
//!
//! A rewind point captures the write cursor at a moment in time. Rewinding
//! truncates the current chunk's buffer back to that moment and restores
//! the event-number and timestamp counters; it never reaches across a
//! chunk boundary. A flush invalidates every outstanding rewind point,
//! since the chunk the points reference may already be on its way to the
//! substrate.

use std::collections::HashMap;

use crate::error::{TraceError, TraceResult};

#[derive(Debug, Clone, Copy)]
pub struct RewindPoint {
    pub event_number: u64,
    pub timestamp: u64,
    pub chunk_len: usize,
    pub chunk_first_event_number: u64,
}

#[derive(Debug, Default)]
pub struct RewindRegistry {
    points: HashMap<u64, RewindPoint>,
}

impl RewindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, id: u64, point: RewindPoint) {
        self.points.insert(id, point);
    }

    pub fn get(&self, id: u64) -> TraceResult<RewindPoint> {
        self.points
            .get(&id)
            .copied()
            .ok_or_else(|| TraceError::argument(format!("no rewind point with id {id}")))
    }

    /// `clear_rewind_point(key)`: drops one point without touching others.
    pub fn remove(&mut self, id: u64) -> TraceResult<()> {
        self.points
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TraceError::argument(format!("no rewind point with id {id}")))
    }

    /// Consumes the rewind point named `id`; points from the same chunk
    /// taken after it are no longer valid once this one is applied, so the
    /// caller drops them all (invariant 10).
    pub fn remove_from(&mut self, id: u64, chunk_first_event_number: u64) -> TraceResult<RewindPoint> {
        let point = self.get(id)?;
        self.points.retain(|_, p| {
            p.chunk_first_event_number != chunk_first_event_number || p.event_number < point.event_number
        });
        Ok(point)
    }

    /// Drops every outstanding rewind point. Called whenever the buffer
    /// flushes its current chunk to the substrate.
    pub fn invalidate_all(&mut self) {
        self.points.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_fetch() {
        let mut reg = RewindRegistry::new();
        reg.store(
            1,
            RewindPoint {
                event_number: 10,
                timestamp: 100,
                chunk_len: 64,
                chunk_first_event_number: 0,
            },
        );
        let p = reg.get(1).unwrap();
        assert_eq!(p.event_number, 10);
    }

    #[test]
    fn missing_point_is_argument_error() {
        let reg = RewindRegistry::new();
        let err = reg.get(7).unwrap_err();
        assert!(matches!(err, TraceError::ArgumentInvalid(_)));
    }

    #[test]
    fn invalidate_all_clears_registry() {
        let mut reg = RewindRegistry::new();
        reg.store(
            1,
            RewindPoint {
                event_number: 1,
                timestamp: 1,
                chunk_len: 1,
                chunk_first_event_number: 0,
            },
        );
        reg.invalidate_all();
        assert!(reg.is_empty());
    }

    #[test]
    fn removing_a_point_drops_later_points_in_same_chunk() {
        let mut reg = RewindRegistry::new();
        reg.store(
            1,
            RewindPoint {
                event_number: 5,
                timestamp: 5,
                chunk_len: 5,
                chunk_first_event_number: 0,
            },
        );
        reg.store(
            2,
            RewindPoint {
                event_number: 9,
                timestamp: 9,
                chunk_len: 9,
                chunk_first_event_number: 0,
            },
        );
        reg.remove_from(1, 0).unwrap();
        assert!(reg.get(2).is_err());
    }
}
