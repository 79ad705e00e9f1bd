//! The concrete [`Launcher`]: spawns the job body as a detached OS process, publishes its pid,
//! and on exit writes the job's terminal state and releases its lock.
//!
//! Grounded on §4.9's expansion of the launcher contract. Job bodies are resolved as
//! `<folder.home>/<project>/<name>` when `folder.home` is configured, falling back to the bare
//! dotted job name on `PATH` otherwise — mirroring the original's per-project virtualenv
//! resolution without depending on any particular virtualenv layout.

use async_trait::async_trait;
use queue_worker_core::launcher::{LaunchMode, Launcher};
use queue_worker_core::model::{JobId, JobState};
use queue_worker_core::store::{LockStore, QueueStore};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{error, info, warn};

pub struct ProcessLauncher {
    queue: Arc<dyn QueueStore>,
    lock: Arc<dyn LockStore>,
    folder_home: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(queue: Arc<dyn QueueStore>, lock: Arc<dyn LockStore>, folder_home: Option<PathBuf>) -> Self {
        Self { queue, lock, folder_home }
    }

    fn resolve_executable(&self, job_name: &str) -> PathBuf {
        let project = job_name.split('.').next().unwrap_or(job_name);
        match &self.folder_home {
            Some(home) => home.join(project).join(job_name),
            None => PathBuf::from(job_name),
        }
    }

    async fn run(&self, job_name: &str, job_id: JobId) {
        let executable = self.resolve_executable(job_name);
        let mut child = match Command::new(&executable).stdin(Stdio::null()).spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(job_id, executable = %executable.display(), %err, "failed to spawn job body");
                self.finish(job_id, JobState::Error).await;
                return;
            }
        };

        if let Some(pid) = child.id() {
            if let Err(err) = self.queue.set_pid(job_id, pid).await {
                warn!(job_id, pid, %err, "failed to publish pid");
            }
        }

        let terminal = match child.wait().await {
            Ok(status) if status.success() => JobState::Complete,
            Ok(status) => {
                warn!(job_id, ?status, "job body exited non-zero");
                JobState::Failed
            }
            Err(err) => {
                error!(job_id, %err, "failed to wait on job body");
                JobState::Error
            }
        };
        self.finish(job_id, terminal).await;
    }

    async fn finish(&self, job_id: JobId, terminal: JobState) {
        if let Err(err) = self.queue.finish_running(job_id, terminal, chrono::Utc::now()).await {
            warn!(job_id, %err, "failed to write terminal state");
        }
        if let Err(err) = self.lock.unlock(job_id).await {
            warn!(job_id, %err, "failed to release lock after job body exit");
        }
        info!(job_id, state = terminal.as_str(), "job body finished");
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, job_name: &str, job_id: JobId, mode: LaunchMode) {
        match mode {
            LaunchMode::Async => {
                let executable = self.resolve_executable(job_name);
                info!(job_id, executable = %executable.display(), "launching job body (async)");
                // `self` outlives nothing here: launched from an `Arc<Self>` shared with the
                // worker context, so this task can run detached from the tick that spawned it.
                let job_name = job_name.to_string();
                let this = self.clone_handles();
                // Spawned onto its own task so `work_jobs` can move on to the next tick without
                // waiting on the job body; the launcher keeps its own clone of the store handles.
                tokio::spawn(async move { this.run(&job_name, job_id).await });
            }
            LaunchMode::Sync => self.run(job_name, job_id).await,
        }
    }
}

impl ProcessLauncher {
    fn clone_handles(&self) -> Self {
        Self { queue: self.queue.clone(), lock: self.lock.clone(), folder_home: self.folder_home.clone() }
    }
}
