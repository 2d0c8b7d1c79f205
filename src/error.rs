//! Error types returned by the archive engine.

use thiserror::Error;

/// Convenience alias used throughout this crate.
pub type TraceResult<T> = Result<T, TraceError>;

/// The typed error enumeration returned by every fallible operation in the
/// archive engine (spec §7).
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    #[error("operation not permitted in current state: {0}")]
    StateInvalid(String),

    #[error("archive data violates an invariant: {0}")]
    Integrity(String),

    #[error("reader callback requested termination")]
    InterruptedByCallback,

    #[error("end of file reached during read")]
    OutOfBounds,

    #[error("allocation failed")]
    Memory,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("collective callback failed: {0}")]
    CollectiveCallback(String),

    #[error("locking callback failed: {0}")]
    LockingCallback(String),

    #[error("requested substrate was not compiled in: {0:?}")]
    FileSubstrateNotSupported(crate::substrate::SubstrateKind),

    #[error("a mapping table of kind {0:?} is already installed for this location")]
    DuplicateMappingTable(crate::location::MappingKind),

    #[error("requested file-mode transition is not allowed")]
    FileModeTransitionInvalid,

    /// Write-close is best effort: one or more streams failed to flush or
    /// close cleanly, but the rest of the archive was still finalized.
    #[error("archive closed with {0} fault(s); see log for details")]
    ProcessedWithFaults(usize),
}

impl TraceError {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        TraceError::ArgumentInvalid(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        TraceError::StateInvalid(msg.into())
    }

    pub(crate) fn integrity(msg: impl Into<String>) -> Self {
        TraceError::Integrity(msg.into())
    }
}
