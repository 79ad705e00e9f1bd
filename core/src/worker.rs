//! The worker daemon: startup, the main tick loop driving [`ExecutionPlan`], and graceful
//! shutdown.
//!
//! Grounded on `core4.queue.worker.CoreWorker.start`/`loop_sync`/base-daemon startup/shutdown
//! hooks. The child-exit-ignoring behavior mirrors the original's rationale (job bodies are
//! launched detached; the parent never waits on them) and the `SIGINT`/`SIGTERM` graceful-halt
//! handler is this implementation's expansion of that same daemon-lifecycle concern onto
//! `tokio::signal`.

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::execution_plan::{ExecutionPlan, PhaseIntervals, PhaseKind};
use crate::resource_sampler::ResourceSampler;
use crate::retirement::remove_jobs;
use crate::selector::JobSelector;
use crate::supervisor::flag_jobs;
use chrono::Utc;
use tracing::{debug, info, warn};

pub struct WorkerConfig {
    pub phases: PhaseIntervals,
    pub avg_stats_secs: u64,
    pub max_cpu: f64,
    pub min_free_ram: f64,
}

pub struct Worker {
    ctx: WorkerContext,
    selector: JobSelector,
    sampler: ResourceSampler,
    plan: ExecutionPlan,
}

impl Worker {
    pub fn new(ctx: WorkerContext, config: WorkerConfig) -> Self {
        let depth = (config.avg_stats_secs / config.phases.collect_stats.max(1)).max(1) as usize;
        let sampler = ResourceSampler::new(depth);
        let selector = JobSelector::new(config.max_cpu, config.min_free_ram);
        let plan = ExecutionPlan::new(config.phases, Utc::now());
        Self { ctx, selector, sampler, plan }
    }

    /// Base-daemon startup: ignore child-exit signals (job bodies run detached; nothing in this
    /// process ever waits on them) and release any locks orphaned by a previous crash of this
    /// same identity, plus any lock left behind for a job no longer present in the queue (see the
    /// stale-lock Open Question resolution in the design notes).
    pub async fn startup(&self) -> WorkerResult<()> {
        ignore_sigchld();
        let removed = self.ctx.lock.cleanup().await?;
        info!(identifier = %self.ctx.identifier, removed, "worker startup: cleared stale locks");
        self.cleanup_orphaned_locks().await;
        Ok(())
    }

    /// Release every lock this worker owns. Run on shutdown (and safe to run again on the next
    /// startup if the process is killed before reaching it).
    pub async fn cleanup(&self) {
        match self.ctx.lock.cleanup().await {
            Ok(removed) => debug!(removed, "worker cleanup: released owned locks"),
            Err(err) => warn!(error = %err, "worker cleanup: failed to release locks"),
        }
        self.cleanup_orphaned_locks().await;
    }

    /// Drop any lock whose `job_id` has no matching queue document — the residue of a retirement
    /// that journaled and deleted a job without releasing its lock. Best-effort: a failure here is
    /// logged and left for the next daemon boundary, not fatal.
    async fn cleanup_orphaned_locks(&self) {
        let existing_ids = match self.ctx.queue.all_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "worker: failed to list queue ids, skipping orphaned-lock cleanup");
                return;
            }
        };
        match self.ctx.lock.cleanup_orphaned(&existing_ids).await {
            Ok(removed) => debug!(removed, "worker: cleared orphaned locks"),
            Err(err) => warn!(error = %err, "worker: failed to clear orphaned locks"),
        }
    }

    /// Run the main loop until a shutdown signal arrives. Never returns mid-phase: the halt
    /// signal is only observed between ticks.
    pub async fn run_until_halt(&mut self) -> WorkerResult<()> {
        self.startup().await?;

        let mut ticker = tokio::time::interval(self.plan.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let at = Utc::now();
                    for phase in self.plan.due(at) {
                        self.run_phase(phase, at).await?;
                    }
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, halting after the current tick");
                    break;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn run_phase(&mut self, phase: PhaseKind, at: chrono::DateTime<Utc>) -> WorkerResult<()> {
        match phase {
            PhaseKind::WorkJobs => {
                self.selector.work_jobs(&self.ctx, &self.sampler, at).await?;
            }
            PhaseKind::RemoveJobs => remove_jobs(&self.ctx).await?,
            PhaseKind::FlagJobs => flag_jobs(&self.ctx, at).await,
            PhaseKind::CollectStats => self.sampler.collect(),
        }
        Ok(())
    }
}

#[cfg(unix)]
fn ignore_sigchld() {
    // Safety: installing SIG_IGN for SIGCHLD at startup, before any signal handlers or threads
    // that could race with it are set up.
    unsafe {
        let _ = nix::sys::signal::signal(nix::sys::signal::Signal::SIGCHLD, nix::sys::signal::SigHandler::SigIgn);
    }
}

#[cfg(not(unix))]
fn ignore_sigchld() {}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
