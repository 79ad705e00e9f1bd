//! `work_jobs`: next-job selection with fairness offset, priority preemption, resource gating,
//! per-name parallelism caps, and distributed lock acquisition.
//!
//! Grounded on `core4.queue.worker.CoreWorker.get_next_job`, restructured around two independent
//! [`NextJobQuery`] cursors instead of one combined Mongo `$or`/`$and` pipeline, since a single
//! sort over the full eligible set can't express "prefer bottom unless top has strictly higher
//! priority" (see the design notes' "two cursors, not a union query").

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::launcher::LaunchMode;
use crate::model::{JobId, JobState};
use crate::resource_sampler::ResourceSampler;
use crate::stats::StatEvent;
use crate::store::NextJobQuery;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// What `work_jobs` did this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Launched(JobId),
    Inactivated(JobId),
    NoJob,
}

/// Next-job selector. Owns the fairness `offset`; everything else is looked up through
/// [`WorkerContext`] and [`ResourceSampler`] on each call.
pub struct JobSelector {
    offset: Option<JobId>,
    max_cpu: f64,
    min_free_ram: f64,
}

impl JobSelector {
    pub fn new(max_cpu: f64, min_free_ram: f64) -> Self {
        Self { offset: None, max_cpu, min_free_ram }
    }

    /// The id of the most recently reserved job on this worker, or `None` if the fairness scan
    /// has wrapped (or never reserved anything yet).
    pub fn offset(&self) -> Option<JobId> {
        self.offset
    }

    /// Run one selection tick: pick at most one job, admit it, reserve it, and hand it to the
    /// launcher.
    pub async fn work_jobs(
        &mut self,
        ctx: &WorkerContext,
        sampler: &ResourceSampler,
        at: DateTime<Utc>,
    ) -> WorkerResult<SelectionOutcome> {
        let mut bottom_after = self.offset;
        let mut top_before = self.offset.map(|id| id + 1);

        loop {
            let bottom = ctx.queue.find_next(&NextJobQuery::bottom(&ctx.identifier, at, bottom_after)).await?;
            let top = match top_before {
                Some(before) => ctx.queue.find_next(&NextJobQuery::top(&ctx.identifier, at, before)).await?,
                None => None,
            };

            let from_top = match (&bottom, &top) {
                (None, None) => {
                    self.offset = None;
                    return Ok(SelectionOutcome::NoJob);
                }
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (Some(b), Some(t)) => t.priority > b.priority,
            };
            let candidate = if from_top { top.unwrap() } else { bottom.unwrap() };

            // The lock collection is authoritative over the job document's own `locked` field
            // (invariant 5): a job with an existing lock is simply not eligible, full stop.
            if ctx.lock.is_locked(candidate.id).await? {
                debug!(job_id = candidate.id, "skipped job already locked");
                self.reject(from_top, candidate.id, &mut bottom_after, &mut top_before);
                continue;
            }

            if candidate.state == JobState::Deferred {
                if let Some(inactive_at) = candidate.inactive_at {
                    if inactive_at <= at {
                        ctx.queue.set_inactive(candidate.id).await?;
                        let _ = ctx.lock.unlock(candidate.id).await;
                        ctx.stats.make_stat(StatEvent::InactivateJob, candidate.id);
                        debug!(job_id = candidate.id, name = %candidate.name, "inactivated deferred job");
                        return Ok(SelectionOutcome::Inactivated(candidate.id));
                    }
                }
            }

            if ctx.maintenance.is_under_maintenance(candidate.project()).await? {
                debug!(job_id = candidate.id, project = candidate.project(), "skipped job in maintenance");
                self.reject(from_top, candidate.id, &mut bottom_after, &mut top_before);
                continue;
            }

            if !candidate.force {
                let avg = sampler.avg_stats();
                if avg.cpu_pct > self.max_cpu || avg.free_ram_mb < self.min_free_ram {
                    info!(
                        job_id = candidate.id,
                        name = %candidate.name,
                        cpu_pct = avg.cpu_pct,
                        free_ram_mb = avg.free_ram_mb,
                        "skipped job: not enough resources available"
                    );
                    return Ok(SelectionOutcome::NoJob);
                }
            }

            let running = ctx.queue.count_running_by_name(&candidate.name, &ctx.identifier).await?;
            if running >= candidate.max_parallel as u64 {
                debug!(job_id = candidate.id, name = %candidate.name, running, "skipped job over max_parallel");
                self.reject(from_top, candidate.id, &mut bottom_after, &mut top_before);
                continue;
            }

            if !ctx.lock.lock(candidate.id).await? {
                self.reject(from_top, candidate.id, &mut bottom_after, &mut top_before);
                continue;
            }

            self.offset = Some(candidate.id);
            ctx.queue.reserve_running(candidate.id, at, &ctx.hostname, &ctx.identifier).await?;
            ctx.stats.make_stat(StatEvent::RequestStartJob, candidate.id);
            info!(job_id = candidate.id, name = %candidate.name, "launching job");
            ctx.launcher.launch(&candidate.name, candidate.id, LaunchMode::Async).await;
            return Ok(SelectionOutcome::Launched(candidate.id));
        }
    }

    /// Advance only the cursor the rejected candidate came from; the other cursor's current
    /// front is kept as-is.
    fn reject(
        &self,
        from_top: bool,
        rejected_id: JobId,
        bottom_after: &mut Option<JobId>,
        top_before: &mut Option<JobId>,
    ) {
        if from_top {
            *top_before = Some(rejected_id);
        } else {
            *bottom_after = Some(rejected_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobDocument;
    use crate::resource_sampler::Sample;
    use crate::stats::RecordingStatsSink;
    use crate::store::{LockStore, NeverMaintenance};
    use crate::testing::{fixture, test_context, MapMaintenance, MemoryStore};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn plentiful_sampler() -> ResourceSampler {
        ResourceSampler::with_fixed(vec![Sample { cpu_pct: 1.0, free_ram_mb: 1_000_000.0 }])
    }

    fn scarce_sampler() -> ResourceSampler {
        ResourceSampler::with_fixed(vec![Sample { cpu_pct: 95.0, free_ram_mb: 1.0 }])
    }

    #[tokio::test]
    async fn fifo_at_equal_priority_reserves_in_ascending_id_order() {
        let store = Arc::new(MemoryStore::new(vec![
            fixture(1, "proj.a"),
            fixture(2, "proj.b"),
            fixture(3, "proj.c"),
        ]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        for (tick, expected_id) in [(0, 1), (1, 2), (2, 3)] {
            let outcome = selector.work_jobs(&ctx, &sampler, at(tick)).await.unwrap();
            assert_eq!(outcome, SelectionOutcome::Launched(expected_id));
            assert_eq!(selector.offset(), Some(expected_id));
        }
    }

    #[tokio::test]
    async fn empty_queue_resets_offset_and_returns_no_job() {
        let store = Arc::new(MemoryStore::new(vec![]));
        let ctx = test_context(store, "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::NoJob);
        assert_eq!(selector.offset(), None);
    }

    #[tokio::test]
    async fn priority_preemption_favors_top_cursor_over_offset() {
        // offset = 5 from a prior reservation; D(id=3) sits behind it, E(id=10, p=5) ahead.
        let store = Arc::new(MemoryStore::new(vec![
            JobDocument { priority: 0, ..fixture(3, "proj.d") },
            JobDocument { priority: 5, ..fixture(10, "proj.e") },
        ]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);
        selector.offset = Some(5);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(10));

        // Now re-enqueue F(id=2, p=9) below the offset: its priority beats the bottom cursor's
        // current front (D, p=0), so it preempts on the very next tick.
        store.push_test(JobDocument { priority: 9, ..fixture(2, "proj.f") });
        let outcome = selector.work_jobs(&ctx, &sampler, at(1)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(2));
    }

    #[tokio::test]
    async fn resource_backpressure_blocks_non_force_jobs_and_leaves_document_untouched() {
        let store = Arc::new(MemoryStore::new(vec![fixture(1, "proj.a")]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = scarce_sampler();
        let mut selector = JobSelector::new(50.0, 256.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::NoJob);
        assert_eq!(store.snapshot()[0].state, JobState::Pending);
    }

    #[tokio::test]
    async fn force_flag_bypasses_resource_gate() {
        let store = Arc::new(MemoryStore::new(vec![JobDocument { force: true, ..fixture(1, "proj.a") }]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = scarce_sampler();
        let mut selector = JobSelector::new(50.0, 256.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(1));
    }

    #[tokio::test]
    async fn max_parallel_cap_skips_over_the_capped_name() {
        let mut already_running = fixture(1, "p.x");
        already_running.state = JobState::Running;
        already_running.locked = Some(crate::model::LockedInfo {
            at: at(0),
            heartbeat: at(0),
            hostname: "h".into(),
            pid: None,
            worker: "w1".into(),
        });
        let mut capped = fixture(2, "p.x");
        capped.max_parallel = 1;
        let behind = fixture(3, "p.y");

        let store = Arc::new(MemoryStore::new(vec![already_running, capped, behind]));
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(1)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(3));
    }

    #[tokio::test]
    async fn maintenance_gate_skips_candidate_and_continues_scan() {
        let maintenance = Arc::new(MapMaintenance::new());
        maintenance.set_under_maintenance("proj", true);
        let store = Arc::new(MemoryStore::new(vec![fixture(1, "proj.a"), fixture(2, "other.b")]));
        let ctx = test_context(store.clone(), "w1", maintenance, Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(2));
    }

    #[tokio::test]
    async fn deferred_job_past_inactive_at_is_inactivated_before_admission() {
        let mut doc = fixture(1, "proj.a");
        doc.state = JobState::Deferred;
        doc.inactive_at = Some(at(0));
        let store = Arc::new(MemoryStore::new(vec![doc]));
        let stats = Arc::new(RecordingStatsSink::new());
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), stats.clone());
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Inactivated(1));
        assert_eq!(store.snapshot()[0].state, JobState::Inactive);
        assert_eq!(stats.count(StatEvent::InactivateJob), 1);
        // Inactive is terminal: the job must never be selected again.
        let outcome = selector.work_jobs(&ctx, &sampler, at(1)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::NoJob);
    }

    #[tokio::test]
    async fn existing_lock_makes_a_job_ineligible_regardless_of_document_state() {
        let store = Arc::new(MemoryStore::new(vec![fixture(1, "proj.a"), fixture(2, "proj.b")]));
        // Simulate a lock held by some other worker's concurrent selection, bypassing this
        // worker's own lock service.
        LockStore::lock(&*store, "other-worker", 1).await.unwrap();
        let ctx = test_context(store.clone(), "w1", Arc::new(NeverMaintenance), Arc::new(RecordingStatsSink::new()));
        let sampler = plentiful_sampler();
        let mut selector = JobSelector::new(90.0, 0.0);

        let outcome = selector.work_jobs(&ctx, &sampler, at(0)).await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Launched(2));
    }
}
