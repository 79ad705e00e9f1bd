//! The job document and the handful of small types that travel alongside it.
//!
//! Field names and shapes mirror the shared document store's `queue`, `lock`, and `journal`
//! collections as described by the worker's store contract; nothing here is specific to any one
//! store implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque, unique, monotonically increasing job identifier (enqueue-time-ordered).
pub type JobId = i64;

/// Lifecycle state of a job document in the `queue` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Deferred,
    Failed,
    Running,
    Inactive,
    Complete,
    Killed,
    Error,
}

impl JobState {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Deferred => "deferred",
            JobState::Failed => "failed",
            JobState::Running => "running",
            JobState::Inactive => "inactive",
            JobState::Complete => "complete",
            JobState::Killed => "killed",
            JobState::Error => "error",
        }
    }

    /// States `get_next_job` is willing to consider.
    pub const fn is_waiting(self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed | JobState::Deferred)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `locked` sub-record, present while (and only while) a job is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedInfo {
    pub at: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
    pub hostname: String,
    pub pid: Option<u32>,
    pub worker: String,
}

/// A job document as stored in the `queue` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    pub priority: i64,
    pub force: bool,
    pub attempts_left: u32,
    pub trial: u32,
    pub worker: Option<String>,
    pub max_parallel: u32,
    pub query_at: Option<DateTime<Utc>>,
    pub inactive_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub killed_at: Option<DateTime<Utc>>,
    pub wall_time: Option<u64>,
    pub wall_at: Option<DateTime<Utc>>,
    pub zombie_time: u64,
    pub zombie_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub locked: Option<LockedInfo>,
    /// Arbitrary job-body arguments, opaque to the core.
    #[serde(default)]
    pub args: Value,
}

impl JobDocument {
    /// First dotted segment of `name`, which names the owning project.
    pub fn project(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_is_the_first_dotted_segment() {
        let doc = JobDocument { name: "billing.invoice.generate".to_string(), ..crate::testing::fixture(1, "x") };
        assert_eq!(doc.project(), "billing");
    }

    #[test]
    fn project_of_an_undotted_name_is_the_whole_name() {
        let doc = JobDocument { name: "standalone".to_string(), ..crate::testing::fixture(1, "x") };
        assert_eq!(doc.project(), "standalone");
    }

    #[test]
    fn waiting_states_are_exactly_pending_failed_deferred() {
        assert!(JobState::Pending.is_waiting());
        assert!(JobState::Failed.is_waiting());
        assert!(JobState::Deferred.is_waiting());
        assert!(!JobState::Running.is_waiting());
        assert!(!JobState::Inactive.is_waiting());
        assert!(!JobState::Complete.is_waiting());
        assert!(!JobState::Killed.is_waiting());
        assert!(!JobState::Error.is_waiting());
    }
}

/// A lock document in the dedicated `lock` collection: `{job_id, owner}` with uniqueness on
/// `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDocument {
    pub job_id: JobId,
    pub owner: String,
}

/// A journal document: a full snapshot of a retired job, keyed by its original `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalDocument {
    pub job: JobDocument,
    pub journaled_at: DateTime<Utc>,
}
