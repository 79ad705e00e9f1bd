//! Narrow, typed traits over the shared document store's `queue`, `lock`, and `journal`
//! collections (see the store contract in the external-interfaces section of the spec).
//!
//! These traits capture exactly the operations the worker core needs — filtered find with sort
//! and an implicit limit of one, atomic update-one, count, delete-one, insert-one — and say
//! nothing about a concrete wire protocol. `queue-worker-store-mongo` implements them against a
//! real `mongodb` client; the core's own tests use an in-memory implementation.

use crate::error::{StoreError, WorkerResult};
use crate::model::{JobDocument, JobId, JobState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Parameters for "give me the single best next eligible job" — the query issued once per
/// fairness cursor, per tick.
///
/// The base eligibility criteria (not-removed, not-killed, waiting state, attempts remaining,
/// targeted at this worker or unassigned, `query_at` due) are always applied. `id_gt`/`id_lt`
/// narrow the scan to the half of the id space a particular cursor owns; sort order is always
/// `force desc, priority desc, id asc`.
///
/// Deliberately does *not* exclude locked jobs: lock-collection membership is checked separately
/// by the selector via [`LockStore::is_locked`], since the lock collection — not any field on the
/// job document — is the authoritative record of whether a job is claimed.
#[derive(Debug, Clone)]
pub struct NextJobQuery {
    pub worker: String,
    pub at: DateTime<Utc>,
    /// Restrict to `id > id_gt` (exclusive). The bottom cursor's bound.
    pub id_gt: Option<JobId>,
    /// Restrict to `id < id_lt` (exclusive). The top cursor's bound.
    pub id_lt: Option<JobId>,
}

impl NextJobQuery {
    pub fn bottom(worker: impl Into<String>, at: DateTime<Utc>, after: Option<JobId>) -> Self {
        Self { worker: worker.into(), at, id_gt: after, id_lt: None }
    }

    pub fn top(worker: impl Into<String>, at: DateTime<Utc>, before: JobId) -> Self {
        Self { worker: worker.into(), at, id_gt: None, id_lt: Some(before) }
    }
}

/// Typed view over the `queue` collection.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// The single best-ranked eligible job matching `query`, or `None`.
    async fn find_next(&self, query: &NextJobQuery) -> Result<Option<JobDocument>, StoreError>;

    /// Fetch a job document by id, regardless of eligibility.
    async fn find_by_id(&self, id: JobId) -> Result<Option<JobDocument>, StoreError>;

    /// Count queue documents with this `name` whose `locked.worker` is `worker`. Used for the
    /// per-name parallelism cap.
    async fn count_running_by_name(&self, name: &str, worker: &str) -> Result<u64, StoreError>;

    /// Atomically transition a reserved job to `running`, writing `started_at`, clearing
    /// `query_at`, incrementing `trial`, and setting `locked` with `pid = None`. Must match
    /// exactly one document; any other count is an invariant breach.
    async fn reserve_running(
        &self,
        id: JobId,
        at: DateTime<Utc>,
        hostname: &str,
        worker: &str,
    ) -> WorkerResult<()>;

    /// Atomically transition a deferred job to `inactive`. Must match exactly one document.
    async fn set_inactive(&self, id: JobId) -> WorkerResult<()>;

    /// All documents with `removed_at` set, regardless of state.
    async fn find_removed(&self) -> Result<Vec<JobDocument>, StoreError>;

    /// All `running` documents locked by `worker`.
    async fn find_running_locked_by(&self, worker: &str) -> Result<Vec<JobDocument>, StoreError>;

    /// Documents in a waiting state (`pending`, `deferred`, `failed`) with `killed_at` set.
    async fn find_waiting_killed(&self) -> Result<Vec<JobDocument>, StoreError>;

    /// Set `wall_at` if still unset. Returns whether a document was actually updated (idempotent
    /// no-op if another worker's tick already flagged it, or if the field was no longer unset).
    async fn set_wall_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Set `zombie_at` if still unset. Returns whether a document was actually updated.
    async fn set_zombie_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Publish the external launcher's observed pid onto `locked.pid`. Returns whether the
    /// document (still running) was found and updated.
    async fn set_pid(&self, id: JobId, pid: u32) -> Result<bool, StoreError>;

    /// Transition a running job to `killed` and clear its `locked` sub-record. This does *not*
    /// touch the lock collection: releasing the lock is the caller's responsibility and
    /// retirement deliberately skips it (see [`crate::retirement`]).
    async fn exec_kill(&self, id: JobId) -> Result<bool, StoreError>;

    /// Transition a running job to a terminal `state` (`complete`, `failed`, or `error`) and
    /// clear its `locked` sub-record. Used by the process launcher once the job body exits; the
    /// lock-collection entry is released separately by the caller.
    async fn finish_running(&self, id: JobId, state: JobState, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete a job document by id. Returns the number of documents deleted (retirement requires
    /// this to be exactly one).
    async fn delete(&self, id: JobId) -> Result<u64, StoreError>;

    /// All job ids currently present in the queue. Used by [`LockStore::cleanup_orphaned`] to
    /// find stale locks left behind by retirement.
    async fn all_ids(&self) -> Result<Vec<JobId>, StoreError>;
}

/// Typed view over the dedicated `lock` collection: the cluster's single atomic coordination
/// point. Do not fold this into the job document — see the design notes.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Attempt an atomic insert of `{job_id, owner}`. Returns `true` on success, `false` if a
    /// lock for `job_id` already exists (uniqueness violation).
    async fn lock(&self, owner: &str, job_id: JobId) -> Result<bool, StoreError>;

    /// Delete the lock document for `job_id`, if any.
    async fn unlock(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Whether a lock document exists for `job_id`. Authoritative for eligibility, regardless of
    /// what the job document's own `locked` field says.
    async fn is_locked(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Delete all locks owned by `owner`. Run at worker startup and teardown.
    async fn cleanup(&self, owner: &str) -> Result<u64, StoreError>;

    /// Delete any lock whose `job_id` is not among `existing_ids`. Safe because a job absent from
    /// the queue has already been journaled; a residual lock for it can never be legitimately
    /// reacquired.
    async fn cleanup_orphaned(&self, existing_ids: &[JobId]) -> Result<u64, StoreError>;
}

/// Typed view over the `journal` collection: an archive of retired jobs.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Insert a full snapshot of `doc`, keyed by its original id. Idempotent re-insertion is an
    /// error the caller logs and treats as "leave in place, retry next tick".
    async fn insert(&self, doc: &JobDocument, journaled_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Whether a project is currently under maintenance (an external, operator-driven flag). A
/// project under maintenance is skipped by the selector without consuming a lock attempt.
#[async_trait]
pub trait MaintenanceCheck: Send + Sync {
    async fn is_under_maintenance(&self, project: &str) -> Result<bool, StoreError>;
}

/// A [`MaintenanceCheck`] that never reports maintenance. Suitable for deployments that manage
/// maintenance windows out of band, and for tests that don't exercise the maintenance gate.
pub struct NeverMaintenance;

#[async_trait]
impl MaintenanceCheck for NeverMaintenance {
    async fn is_under_maintenance(&self, _project: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Whether a candidate's eligibility comes from the waiting states the selector will consider.
pub fn is_waiting_state(state: JobState) -> bool {
    state.is_waiting()
}
