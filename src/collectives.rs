//! Collective-operation vtable (spec §5): invoked around every archive-wide
//! decision (anchor write, definition chunk-size negotiation, multiplex
//! substrate open/close, rank-map creation and loading).

use crate::error::{TraceError, TraceResult};

/// User-supplied collective callbacks. A serial, single-participant
/// default is provided as [`SerialCollectives`].
pub trait Collectives {
    fn size(&self) -> u32;
    fn rank(&self) -> u32;
    fn barrier(&self) -> TraceResult<()>;

    /// Broadcasts `value` from `root`; every participant (including root)
    /// returns the same value once this call returns.
    fn bcast_u64(&self, value: u64, root: u32) -> TraceResult<u64>;

    /// Gathers one `u64` per participant at `root`; non-root participants
    /// get `None` back.
    fn gather_u64(&self, value: u64, root: u32) -> TraceResult<Option<Vec<u64>>>;

    /// Variable-length gather: each participant contributes a byte buffer,
    /// `root` receives them all in rank order.
    fn gatherv(&self, value: &[u8], root: u32) -> TraceResult<Option<Vec<Vec<u8>>>>;

    fn scatter_u64(&self, values: Option<&[u64]>, root: u32) -> TraceResult<u64>;

    fn scatterv(&self, values: Option<&[Vec<u8>]>, root: u32) -> TraceResult<Vec<u8>>;

    /// Partitions the current communicator; returns an opaque handle to a
    /// new, smaller collectives instance.
    fn create_local_comm(&self, color: u32, key: u32) -> TraceResult<Box<dyn Collectives>>;

    fn free_local_comm(&self) -> TraceResult<()>;
}

/// Single-participant default: every collective is a local no-op or an
/// identity pass-through (spec §5, "a serial default is provided for
/// single-participant use").
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCollectives;

impl Collectives for SerialCollectives {
    fn size(&self) -> u32 {
        1
    }

    fn rank(&self) -> u32 {
        0
    }

    fn barrier(&self) -> TraceResult<()> {
        Ok(())
    }

    fn bcast_u64(&self, value: u64, root: u32) -> TraceResult<u64> {
        self.require_root(root)?;
        Ok(value)
    }

    fn gather_u64(&self, value: u64, root: u32) -> TraceResult<Option<Vec<u64>>> {
        self.require_root(root)?;
        Ok(Some(vec![value]))
    }

    fn gatherv(&self, value: &[u8], root: u32) -> TraceResult<Option<Vec<Vec<u8>>>> {
        self.require_root(root)?;
        Ok(Some(vec![value.to_vec()]))
    }

    fn scatter_u64(&self, values: Option<&[u64]>, root: u32) -> TraceResult<u64> {
        self.require_root(root)?;
        values
            .and_then(|v| v.first().copied())
            .ok_or_else(|| TraceError::argument("scatter_u64 requires one value for the sole participant"))
    }

    fn scatterv(&self, values: Option<&[Vec<u8>]>, root: u32) -> TraceResult<Vec<u8>> {
        self.require_root(root)?;
        values
            .and_then(|v| v.first().cloned())
            .ok_or_else(|| TraceError::argument("scatterv requires one value for the sole participant"))
    }

    fn create_local_comm(&self, _color: u32, _key: u32) -> TraceResult<Box<dyn Collectives>> {
        Ok(Box::new(SerialCollectives))
    }

    fn free_local_comm(&self) -> TraceResult<()> {
        Ok(())
    }
}

impl SerialCollectives {
    fn require_root(&self, root: u32) -> TraceResult<()> {
        if root != 0 {
            return Err(TraceError::CollectiveCallback(format!(
                "root {root} is out of range for a single-participant communicator"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_report_one_participant() {
        let c = SerialCollectives;
        assert_eq!(c.size(), 1);
        assert_eq!(c.rank(), 0);
        assert_eq!(c.bcast_u64(42, 0).unwrap(), 42);
    }

    #[test]
    fn gather_returns_single_element_vec() {
        let c = SerialCollectives;
        assert_eq!(c.gather_u64(7, 0).unwrap(), Some(vec![7]));
    }

    #[test]
    fn non_zero_root_is_rejected() {
        let c = SerialCollectives;
        assert!(c.bcast_u64(1, 3).is_err());
    }
}
