//! The launcher contract: an external collaborator that forks and runs a job body.
//!
//! Out of scope for the core proper — the core only ever hands the launcher a `job_id` and
//! `name` and never inspects what the job body actually does. `queue-worker`'s binary crate
//! supplies a concrete `tokio::process`-backed implementation.

use crate::model::JobId;
use async_trait::async_trait;

/// How the launcher should run the job body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Spawn detached; the launcher updates `locked.pid`/`locked.heartbeat` and the terminal
    /// `state` asynchronously as the job body runs.
    Async,
    /// Block until the job body completes. Used for manual/foreground execution.
    Sync,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch the job body for `job_id` (whose dotted `name` identifies the owning project and
    /// entry point). In [`LaunchMode::Sync`] mode this resolves only once the job body has
    /// finished; in [`LaunchMode::Async`] mode it resolves as soon as the process is spawned.
    async fn launch(&self, job_name: &str, job_id: JobId, mode: LaunchMode);
}

/// A [`Launcher`] that does nothing, for tests that only care about the selector's own state
/// transitions and never expect a job body to actually run.
pub struct NullLauncher;

#[async_trait]
impl Launcher for NullLauncher {
    async fn launch(&self, _job_name: &str, _job_id: JobId, _mode: LaunchMode) {}
}
