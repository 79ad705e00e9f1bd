//! `remove_jobs`: the retirement phase. Jobs marked `removed_at` are journaled and deleted from
//! the queue collection.
//!
//! Grounded on `core4.queue.worker.CoreWorker.remove_jobs`. The lock acquired here is
//! deliberately never released — the job id no longer exists in the queue once deleted, so its
//! lock record is orphaned by construction and is reclaimed later by
//! [`crate::lock_service::LockService::cleanup_orphaned`], not by an explicit unlock here (see
//! the design notes' resolution of the stale-lock Open Question).

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::stats::StatEvent;
use chrono::Utc;
use tracing::{debug, warn};

/// Run one `remove_jobs` pass: journal and delete every job queued for removal.
///
/// A delete that doesn't match exactly one document after a successful journal insert is an
/// invariant breach (the document vanished or multiplied under us) and is fatal, per the spec's
/// resolution of the update-mismatch Open Question for selector/retirement paths.
pub async fn remove_jobs(ctx: &WorkerContext) -> WorkerResult<()> {
    let docs = match ctx.queue.find_removed().await {
        Ok(docs) => docs,
        Err(err) => {
            warn!(error = %err, "remove_jobs: failed to list removed jobs, will retry next tick");
            return Ok(());
        }
    };

    for doc in docs {
        match ctx.lock.lock(doc.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = doc.id, "remove_jobs: skipped, already locked elsewhere");
                continue;
            }
            Err(err) => {
                warn!(job_id = doc.id, error = %err, "remove_jobs: lock attempt failed");
                continue;
            }
        }

        let job_id = doc.id;
        if let Err(err) = ctx.journal.insert(&doc, Utc::now()).await {
            warn!(job_id, error = %err, "remove_jobs: journal insert failed, leaving job in queue");
            continue;
        }

        match ctx.queue.delete(job_id).await {
            Ok(1) => {
                ctx.stats.make_stat(StatEvent::RemoveJob, job_id);
                debug!(job_id, "remove_jobs: job journaled and removed");
            }
            Ok(matched) => {
                return Err(WorkerError::Invariant { context: "remove_jobs.delete", job_id: Some(job_id), matched });
            }
            Err(err) => warn!(job_id, error = %err, "remove_jobs: delete failed after journaling"),
        }
    }
    Ok(())
}
