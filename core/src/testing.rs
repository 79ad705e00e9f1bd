//! An in-memory implementation of [`QueueStore`]/[`LockStore`]/[`JournalStore`], used to exercise
//! the worker core's scenarios deterministically and without a running database.
//!
//! Grounded on the teacher's own `crate::testing` convention for keeping fixture-grade store
//! implementations alongside the real thing rather than behind `#[cfg(test)]`, so both inline
//! unit tests and out-of-crate integration tests can build a [`WorkerContext`] against it. Never
//! built with a production feature flag and never advertised to the `worker` binary crate.

use crate::error::{StoreError, WorkerError, WorkerResult};
use crate::model::{JobDocument, JobId, JobState};
use crate::store::{JournalStore, LockStore, MaintenanceCheck, NextJobQuery, QueueStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// A minimal, otherwise-eligible pending job document, for building scenario fixtures with struct
/// update syntax (`JobDocument { priority: 5, ..fixture(1, "proj.job") }`).
pub fn fixture(id: JobId, name: &str) -> JobDocument {
    JobDocument {
        id,
        name: name.to_string(),
        state: JobState::Pending,
        priority: 0,
        force: false,
        attempts_left: 3,
        trial: 0,
        worker: None,
        max_parallel: 1,
        query_at: None,
        inactive_at: None,
        removed_at: None,
        killed_at: None,
        wall_time: None,
        wall_at: None,
        zombie_time: 300,
        zombie_at: None,
        started_at: None,
        locked: None,
        args: serde_json::Value::Null,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    queue: Mutex<Vec<JobDocument>>,
    locks: Mutex<HashMap<JobId, String>>,
    journal: Mutex<Vec<(JobDocument, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new(docs: Vec<JobDocument>) -> Self {
        Self { queue: Mutex::new(docs), locks: Mutex::new(HashMap::new()), journal: Mutex::new(Vec::new()) }
    }

    /// Snapshot the current queue contents, for test assertions.
    pub fn snapshot(&self) -> Vec<JobDocument> {
        self.queue.lock().unwrap().clone()
    }

    /// Append a document mid-scenario, simulating a concurrent producer enqueueing new work.
    pub fn push_test(&self, doc: JobDocument) {
        self.queue.lock().unwrap().push(doc);
    }

    /// Pre-seed the journal, simulating an earlier attempt that archived `doc` before being
    /// interrupted (used to exercise retirement's idempotent-re-insert error path).
    pub fn journal_insert_test(&self, doc: JobDocument, journaled_at: DateTime<Utc>) {
        self.journal.lock().unwrap().push((doc, journaled_at));
    }

    pub fn journaled(&self) -> Vec<JobDocument> {
        self.journal.lock().unwrap().iter().map(|(doc, _)| doc.clone()).collect()
    }

    fn eligible(doc: &JobDocument, query: &NextJobQuery) -> bool {
        doc.state.is_waiting()
            && doc.removed_at.is_none()
            && doc.killed_at.is_none()
            && doc.attempts_left > 0
            && doc.query_at.map(|at| at <= query.at).unwrap_or(true)
            && doc.worker.as_deref().map(|w| w == query.worker).unwrap_or(true)
            && query.id_gt.map(|bound| doc.id > bound).unwrap_or(true)
            && query.id_lt.map(|bound| doc.id < bound).unwrap_or(true)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn find_next(&self, query: &NextJobQuery) -> Result<Option<JobDocument>, StoreError> {
        let queue = self.queue.lock().unwrap();
        let best = queue
            .iter()
            .filter(|doc| Self::eligible(doc, query))
            .min_by(|a, b| {
                b.force.cmp(&a.force).then(b.priority.cmp(&a.priority)).then(a.id.cmp(&b.id))
            })
            .cloned();
        Ok(best)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobDocument>, StoreError> {
        Ok(self.queue.lock().unwrap().iter().find(|d| d.id == id).cloned())
    }

    async fn count_running_by_name(&self, name: &str, worker: &str) -> Result<u64, StoreError> {
        let queue = self.queue.lock().unwrap();
        Ok(queue
            .iter()
            .filter(|d| {
                d.name == name
                    && d.state == JobState::Running
                    && d.locked.as_ref().map(|l| l.worker == worker).unwrap_or(false)
            })
            .count() as u64)
    }

    async fn reserve_running(&self, id: JobId, at: DateTime<Utc>, hostname: &str, worker: &str) -> WorkerResult<()> {
        let mut queue = self.queue.lock().unwrap();
        let matched = queue.iter_mut().filter(|d| d.id == id).count();
        if matched != 1 {
            return Err(WorkerError::Invariant { context: "reserve_running", job_id: Some(id), matched: matched as u64 });
        }
        let doc = queue.iter_mut().find(|d| d.id == id).unwrap();
        doc.state = JobState::Running;
        doc.started_at = Some(at);
        doc.query_at = None;
        doc.trial += 1;
        doc.locked = Some(crate::model::LockedInfo {
            at,
            heartbeat: at,
            hostname: hostname.to_string(),
            pid: None,
            worker: worker.to_string(),
        });
        Ok(())
    }

    async fn set_inactive(&self, id: JobId) -> WorkerResult<()> {
        let mut queue = self.queue.lock().unwrap();
        let matched = queue.iter().filter(|d| d.id == id).count();
        if matched != 1 {
            return Err(WorkerError::Invariant { context: "set_inactive", job_id: Some(id), matched: matched as u64 });
        }
        queue.iter_mut().find(|d| d.id == id).unwrap().state = JobState::Inactive;
        Ok(())
    }

    async fn find_removed(&self) -> Result<Vec<JobDocument>, StoreError> {
        Ok(self.queue.lock().unwrap().iter().filter(|d| d.removed_at.is_some()).cloned().collect())
    }

    async fn find_running_locked_by(&self, worker: &str) -> Result<Vec<JobDocument>, StoreError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.state == JobState::Running && d.locked.as_ref().map(|l| l.worker == worker).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn find_waiting_killed(&self) -> Result<Vec<JobDocument>, StoreError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.state.is_waiting() && d.killed_at.is_some())
            .cloned()
            .collect())
    }

    async fn set_wall_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|d| d.id == id && d.wall_at.is_none()) {
            Some(doc) => {
                doc.wall_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_zombie_at(&self, id: JobId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|d| d.id == id && d.zombie_at.is_none()) {
            Some(doc) => {
                doc.zombie_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_pid(&self, id: JobId, pid: u32) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|d| d.id == id && d.state == JobState::Running) {
            Some(doc) => {
                if let Some(locked) = &mut doc.locked {
                    locked.pid = Some(pid);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exec_kill(&self, id: JobId) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                doc.state = JobState::Killed;
                doc.locked = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish_running(&self, id: JobId, state: JobState, _at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        match queue.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                doc.state = state;
                doc.locked = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: JobId) -> Result<u64, StoreError> {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|d| d.id != id);
        Ok((before - queue.len()) as u64)
    }

    async fn all_ids(&self) -> Result<Vec<JobId>, StoreError> {
        Ok(self.queue.lock().unwrap().iter().map(|d| d.id).collect())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn lock(&self, owner: &str, job_id: JobId) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        if locks.contains_key(&job_id) {
            return Ok(false);
        }
        locks.insert(job_id, owner.to_string());
        Ok(true)
    }

    async fn unlock(&self, job_id: JobId) -> Result<(), StoreError> {
        self.locks.lock().unwrap().remove(&job_id);
        Ok(())
    }

    async fn is_locked(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self.locks.lock().unwrap().contains_key(&job_id))
    }

    async fn cleanup(&self, owner: &str) -> Result<u64, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|_, o| o != owner);
        Ok((before - locks.len()) as u64)
    }

    async fn cleanup_orphaned(&self, existing_ids: &[JobId]) -> Result<u64, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|id, _| existing_ids.contains(id));
        Ok((before - locks.len()) as u64)
    }
}

#[async_trait]
impl JournalStore for MemoryStore {
    async fn insert(&self, doc: &JobDocument, journaled_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().unwrap();
        if journal.iter().any(|(existing, _)| existing.id == doc.id) {
            let err = std::io::Error::new(std::io::ErrorKind::AlreadyExists, format!("job {} already journaled", doc.id));
            return Err(StoreError::new(err));
        }
        journal.push((doc.clone(), journaled_at));
        Ok(())
    }
}

/// A [`MaintenanceCheck`] driven by an explicit allow-list of projects, for scenarios that
/// exercise the maintenance gate.
#[derive(Default)]
pub struct MapMaintenance(Mutex<std::collections::HashSet<String>>);

impl MapMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_under_maintenance(&self, project: impl Into<String>, value: bool) {
        let mut set = self.0.lock().unwrap();
        let project = project.into();
        if value {
            set.insert(project);
        } else {
            set.remove(&project);
        }
    }
}

#[async_trait]
impl MaintenanceCheck for MapMaintenance {
    async fn is_under_maintenance(&self, project: &str) -> Result<bool, StoreError> {
        Ok(self.0.lock().unwrap().contains(project))
    }
}

/// Wire a [`MemoryStore`] (as queue, lock, and journal), a given maintenance check and stats
/// sink, and a [`crate::launcher::NullLauncher`] into a ready-to-use [`crate::context::WorkerContext`].
/// Scenario tests that want to assert on stats or maintenance gating build their own sink/check
/// and pass it through; everything else can reach for this directly.
pub fn test_context(
    store: std::sync::Arc<MemoryStore>,
    identifier: &str,
    maintenance: std::sync::Arc<dyn MaintenanceCheck>,
    stats: std::sync::Arc<dyn crate::stats::StatsSink>,
) -> crate::context::WorkerContext {
    crate::context::WorkerContext::new(
        identifier,
        identifier,
        store.clone(),
        store.clone(),
        store,
        maintenance,
        stats,
        std::sync::Arc::new(crate::launcher::NullLauncher),
    )
}
