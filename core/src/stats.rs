//! Stat-event emission. The core names five events; what happens to them (counters, a metrics
//! exporter, a log sink) is left to the embedder via the [`StatsSink`] trait.

use crate::model::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    RequestStartJob,
    InactivateJob,
    FlagNonstop,
    FlagZombie,
    RemoveJob,
}

impl StatEvent {
    pub const fn name(self) -> &'static str {
        match self {
            StatEvent::RequestStartJob => "request_start_job",
            StatEvent::InactivateJob => "inactivate_job",
            StatEvent::FlagNonstop => "flag_nonstop",
            StatEvent::FlagZombie => "flag_zombie",
            StatEvent::RemoveJob => "remove_job",
        }
    }
}

pub trait StatsSink: Send + Sync {
    fn make_stat(&self, event: StatEvent, job_id: JobId);
}

/// A [`StatsSink`] that just emits a `tracing` event per stat. Reasonable default for a
/// standalone worker binary; an embedder wanting counters can supply its own sink instead.
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn make_stat(&self, event: StatEvent, job_id: JobId) {
        tracing::info!(stat = event.name(), job_id, "stat");
    }
}

/// A [`StatsSink`] that records events in memory, for tests that assert on stat counts (e.g. "the
/// zombie flag fires exactly once").
#[derive(Default)]
pub struct RecordingStatsSink {
    events: std::sync::Mutex<Vec<(StatEvent, JobId)>>,
}

impl RecordingStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event: StatEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|(e, _)| *e == event).count()
    }

    pub fn events(&self) -> Vec<(StatEvent, JobId)> {
        self.events.lock().unwrap().clone()
    }
}

impl StatsSink for RecordingStatsSink {
    fn make_stat(&self, event: StatEvent, job_id: JobId) {
        self.events.lock().unwrap().push((event, job_id));
    }
}
