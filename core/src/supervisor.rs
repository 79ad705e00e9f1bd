//! `flag_jobs`: heartbeat/wall-time/zombie observation, liveness checks, and kill execution over
//! this worker's running jobs, plus a separate `check_kill` pass over killed-but-still-waiting
//! jobs.
//!
//! Grounded on `core4.queue.worker.CoreWorker.flag_jobs`/`flag_nonstop`/`flag_zombie`/
//! `check_pid`/`kill_pid`/`check_kill`. Per the spec's resolution of the update-mismatch Open
//! Question, a flag update that matches zero documents is logged as a warning, not treated as an
//! invariant breach — these updates are observational.

use crate::context::WorkerContext;
use crate::model::JobDocument;
use crate::stats::StatEvent;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, warn};

/// Run the full `flag_jobs` phase: non-stop/zombie flags, liveness, kill requests over this
/// worker's running jobs, then the separate `check_kill` pass over waiting-but-killed jobs.
pub async fn flag_jobs(ctx: &WorkerContext, at: DateTime<Utc>) {
    let docs = match ctx.queue.find_running_locked_by(&ctx.identifier).await {
        Ok(docs) => docs,
        Err(err) => {
            warn!(error = %err, "flag_jobs: failed to list running jobs, will retry next tick");
            return;
        }
    };

    for doc in &docs {
        flag_nonstop(ctx, doc, at).await;
        flag_zombie(ctx, doc, at).await;
        check_liveness(ctx, doc).await;
        kill_running(ctx, doc).await;
    }

    check_kill(ctx).await;
}

async fn flag_nonstop(ctx: &WorkerContext, doc: &JobDocument, at: DateTime<Utc>) {
    let (Some(wall_time), None) = (doc.wall_time, doc.wall_at) else { return };
    let Some(started_at) = doc.started_at else { return };
    if started_at >= at - ChronoDuration::seconds(wall_time as i64) {
        return;
    }
    match ctx.queue.set_wall_at(doc.id, Utc::now()).await {
        Ok(true) => warn!(job_id = doc.id, "successfully set non-stop job"),
        Ok(false) => warn!(job_id = doc.id, "flag_nonstop update matched no document"),
        Err(err) => warn!(job_id = doc.id, error = %err, "flag_nonstop update failed"),
    }
    ctx.stats.make_stat(StatEvent::FlagNonstop, doc.id);
}

async fn flag_zombie(ctx: &WorkerContext, doc: &JobDocument, at: DateTime<Utc>) {
    if doc.zombie_at.is_some() {
        return;
    }
    let Some(locked) = &doc.locked else { return };
    if locked.heartbeat >= at - ChronoDuration::seconds(doc.zombie_time as i64) {
        return;
    }
    match ctx.queue.set_zombie_at(doc.id, Utc::now()).await {
        Ok(true) => warn!(job_id = doc.id, "successfully set zombie job"),
        Ok(false) => warn!(job_id = doc.id, "flag_zombie update matched no document"),
        Err(err) => warn!(job_id = doc.id, error = %err, "flag_zombie update failed"),
    }
    ctx.stats.make_stat(StatEvent::FlagZombie, doc.id);
}

/// Whether the OS reports `pid` as alive and not a dead/zombie process, probed with a signal-0
/// no-op (does not disturb the process).
fn pid_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // Any other errno (e.g. EPERM) means the pid exists but we can't signal it; treat as
        // alive rather than risk killing a live job on a permissions hiccup.
        Err(_) => true,
    }
}

async fn check_liveness(ctx: &WorkerContext, doc: &JobDocument) {
    let Some(locked) = &doc.locked else { return };
    let Some(pid) = locked.pid else { return };
    if pid_alive(pid) {
        return;
    }
    error!(job_id = doc.id, pid, "pid does not exist, killing");
    exec_kill(ctx, doc.id).await;
}

async fn kill_running(ctx: &WorkerContext, doc: &JobDocument) {
    if doc.killed_at.is_none() {
        return;
    }
    if let Some(locked) = &doc.locked {
        if let Some(pid) = locked.pid {
            if pid_alive(pid) {
                if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    warn!(job_id = doc.id, pid, %err, "failed to signal pid for kill");
                }
            }
        }
    }
    exec_kill(ctx, doc.id).await;
}

/// Jobs requested to be killed while still in a waiting state (`pending`, `deferred`, `failed`):
/// no process to signal, just a lock-then-transition.
async fn check_kill(ctx: &WorkerContext) {
    let docs = match ctx.queue.find_waiting_killed().await {
        Ok(docs) => docs,
        Err(err) => {
            warn!(error = %err, "check_kill: failed to list waiting-killed jobs, will retry next tick");
            return;
        }
    };
    for doc in &docs {
        match ctx.lock.lock(doc.id).await {
            Ok(true) => exec_kill(ctx, doc.id).await,
            Ok(false) => debug!(job_id = doc.id, "check_kill: skipped, already locked elsewhere"),
            Err(err) => warn!(job_id = doc.id, error = %err, "check_kill: lock attempt failed"),
        }
    }
}

/// Transition a job to `killed` and release both its store-side `locked` record and its
/// lock-collection entry.
async fn exec_kill(ctx: &WorkerContext, job_id: crate::model::JobId) {
    match ctx.queue.exec_kill(job_id).await {
        Ok(true) => debug!(job_id, "exec_kill: transitioned to killed"),
        Ok(false) => debug!(job_id, "exec_kill: no matching document (already retired?)"),
        Err(err) => {
            warn!(job_id, error = %err, "exec_kill: state transition failed");
            return;
        }
    }
    if let Err(err) = ctx.lock.unlock(job_id).await {
        warn!(job_id, error = %err, "exec_kill: failed to release lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, LockedInfo};
    use crate::stats::RecordingStatsSink;
    use crate::store::{LockStore, NeverMaintenance};
    use crate::testing::{fixture, test_context, MemoryStore};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn running_job(id: crate::model::JobId, started_at: DateTime<Utc>, heartbeat: DateTime<Utc>) -> JobDocument {
        let mut doc = fixture(id, "proj.a");
        doc.state = JobState::Running;
        doc.started_at = Some(started_at);
        doc.locked =
            Some(LockedInfo { at: started_at, heartbeat, hostname: "h".into(), pid: None, worker: "w1".into() });
        doc
    }

    #[tokio::test]
    async fn flag_nonstop_sets_wall_at_once_and_does_not_kill() {
        let mut doc = running_job(1, at(0), at(0));
        doc.wall_time = Some(10);
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let stats = Arc::new(RecordingStatsSink::new());
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), stats.clone());

        flag_jobs(&ctx, at(20)).await;
        assert!(store.snapshot()[0].wall_at.is_some());
        assert_eq!(store.snapshot()[0].state, JobState::Running);
        assert_eq!(stats.count(StatEvent::FlagNonstop), 1);

        // A second tick must not re-set wall_at or double-count the stat.
        flag_jobs(&ctx, at(30)).await;
        assert_eq!(stats.count(StatEvent::FlagNonstop), 1);
    }

    #[tokio::test]
    async fn heartbeat_exactly_at_threshold_is_not_yet_a_zombie() {
        // zombie_time is the fixture default (300s); heartbeat sits exactly at at - zombie_time.
        let doc = running_job(1, at(0), at(0));
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let stats = Arc::new(RecordingStatsSink::new());
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), stats.clone());

        flag_jobs(&ctx, at(300)).await;
        assert!(store.snapshot()[0].zombie_at.is_none());
        assert_eq!(stats.count(StatEvent::FlagZombie), 0);
    }

    #[tokio::test]
    async fn stale_heartbeat_flags_zombie_exactly_once() {
        let doc = running_job(1, at(0), at(0));
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let stats = Arc::new(RecordingStatsSink::new());
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), stats.clone());

        flag_jobs(&ctx, at(301)).await;
        assert!(store.snapshot()[0].zombie_at.is_some());
        assert_eq!(stats.count(StatEvent::FlagZombie), 1);

        flag_jobs(&ctx, at(400)).await;
        assert_eq!(stats.count(StatEvent::FlagZombie), 1);
    }

    #[tokio::test]
    async fn liveness_check_kills_job_whose_pid_is_gone() {
        let mut doc = running_job(1, at(0), at(0));
        doc.locked.as_mut().unwrap().pid = Some(i32::MAX as u32 - 1);
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));

        flag_jobs(&ctx, at(1)).await;
        assert_eq!(store.snapshot()[0].state, JobState::Killed);
        assert!(!LockStore::is_locked(&*store, 1).await.unwrap());
    }

    #[tokio::test]
    async fn liveness_check_leaves_alive_pid_running() {
        let mut doc = running_job(1, at(0), at(0));
        doc.locked.as_mut().unwrap().pid = Some(std::process::id());
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));

        flag_jobs(&ctx, at(1)).await;
        assert_eq!(store.snapshot()[0].state, JobState::Running);
    }

    #[tokio::test]
    async fn kill_request_on_running_job_transitions_to_killed_and_releases_lock() {
        let mut doc = running_job(1, at(0), at(0));
        doc.killed_at = Some(at(1));
        let store = Arc::new(MemoryStore::new(vec![doc]));
        LockStore::lock(&*store, "w1", 1).await.unwrap();
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));

        flag_jobs(&ctx, at(1)).await;
        assert_eq!(store.snapshot()[0].state, JobState::Killed);
        assert!(store.snapshot()[0].locked.is_none());
        assert!(!LockStore::is_locked(&*store, 1).await.unwrap());
    }

    #[tokio::test]
    async fn check_kill_transitions_a_waiting_job_without_touching_a_process() {
        let mut doc = fixture(1, "proj.a");
        doc.killed_at = Some(at(0));
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));

        flag_jobs(&ctx, at(0)).await;
        assert_eq!(store.snapshot()[0].state, JobState::Killed);
    }

    #[tokio::test]
    async fn supervisor_only_considers_jobs_locked_by_this_worker() {
        let doc = running_job(1, at(0), at(0).checked_sub_signed(ChronoDuration::seconds(1000)).unwrap());
        // Locked by a different worker identity; this worker's flag_jobs must not touch it.
        let mut foreign = doc.clone();
        foreign.locked.as_mut().unwrap().worker = "other-worker".into();
        let store = Arc::new(MemoryStore::new(vec![foreign]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));

        flag_jobs(&ctx, at(2000)).await;
        assert!(store.snapshot()[0].zombie_at.is_none());
    }
}
