//! Layered error types for the worker core.
//!
//! The split mirrors the teacher's own `WorkerInterfaceError`/`WorkerError` layering: a
//! store-agnostic `StoreError` at the boundary, and a `WorkerError` above it that additionally
//! distinguishes invariant breaches (fatal) from everything else (recoverable within a phase).

use crate::model::JobId;
use std::fmt;

/// An error from the underlying document store, opaque to the core.
///
/// The core never inspects the wrapped error's concrete type; it only needs to know "the store
/// call failed" so it can log and move on. Concrete store adapters convert their native error
/// type into this one at the boundary.
#[derive(thiserror::Error)]
#[error("store error: {source}")]
pub struct StoreError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl fmt::Debug for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.source, f)
    }
}

impl StoreError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self { source: Box::new(source) }
    }
}

/// Errors surfaced by the worker core's phases.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A store mutation that should have matched exactly one document matched zero or many.
    /// Indicates a coordination bug or an external mutation of the shared store; fatal to the
    /// worker's main loop.
    #[error("invariant breach: {context} for job {job_id:?} (matched {matched} documents)")]
    Invariant { context: &'static str, job_id: Option<JobId>, matched: u64 },

    /// A transient failure talking to the store. Recoverable: the phase that hit it simply
    /// returns and is retried on its next scheduled interval.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkerError {
    /// Invariant breaches are fatal to the worker; everything else is recoverable within the
    /// phase that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Invariant { .. })
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
