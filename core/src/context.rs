//! The worker's injected dependencies: store handles, identity, and collaborators.
//!
//! Per the design notes, the core holds no process-wide singletons — worker identity,
//! configuration, and collection handles are all threaded through explicitly via this context.

use crate::launcher::Launcher;
use crate::lock_service::LockService;
use crate::stats::StatsSink;
use crate::store::{JournalStore, MaintenanceCheck, QueueStore};
use std::sync::Arc;

pub struct WorkerContext {
    /// This worker's cluster-unique identity. Defaults to the hostname.
    pub identifier: String,
    /// Hostname recorded on `locked.hostname`; usually equal to `identifier` but kept distinct
    /// since an operator may override `identifier` while the OS hostname stays fixed.
    pub hostname: String,
    pub queue: Arc<dyn QueueStore>,
    pub lock: LockService<dyn crate::store::LockStore>,
    pub journal: Arc<dyn JournalStore>,
    pub maintenance: Arc<dyn MaintenanceCheck>,
    pub stats: Arc<dyn StatsSink>,
    pub launcher: Arc<dyn Launcher>,
}

/// The hostname this process is running on, used as the default worker identity and as
/// `locked.hostname` when no operator override is configured.
pub fn default_identity() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identifier: impl Into<String>,
        hostname: impl Into<String>,
        queue: Arc<dyn QueueStore>,
        lock_store: Arc<dyn crate::store::LockStore>,
        journal: Arc<dyn JournalStore>,
        maintenance: Arc<dyn MaintenanceCheck>,
        stats: Arc<dyn StatsSink>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let identifier = identifier.into();
        let lock = LockService::new(lock_store, identifier.clone());
        Self { identifier, hostname: hostname.into(), queue, lock, journal, maintenance, stats, launcher }
    }
}
