//! Locking vtable (spec §5): the archive lock and, in the multiplex
//! substrate, the per-file-type locks guarding a shared container handle.

use crate::error::TraceResult;

/// User-supplied locking callbacks over an opaque handle. A null
/// implementation is provided ([`NullLocking`]) for callers who guarantee
/// single-threaded use.
pub trait Locking {
    type Handle;

    fn create(&self) -> TraceResult<Self::Handle>;
    fn destroy(&self, handle: Self::Handle) -> TraceResult<()>;
    fn lock(&self, handle: &Self::Handle) -> TraceResult<()>;
    fn unlock(&self, handle: &Self::Handle) -> TraceResult<()>;
}

/// "A null locking vtable means the caller guarantees single-threaded use"
/// (spec §5). `create`/`destroy` are no-ops and `lock`/`unlock` never
/// block or contend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLocking;

impl Locking for NullLocking {
    type Handle = ();

    fn create(&self) -> TraceResult<()> {
        Ok(())
    }

    fn destroy(&self, _handle: ()) -> TraceResult<()> {
        Ok(())
    }

    fn lock(&self, _handle: &()) -> TraceResult<()> {
        Ok(())
    }

    fn unlock(&self, _handle: &()) -> TraceResult<()> {
        Ok(())
    }
}
