//! The cooperative phase scheduler: a static table of `(phase, interval, next_due)`, ticking at
//! the minimum of all configured intervals.
//!
//! Grounded on the design notes' "replace any source dynamic-dispatch call-phase with a static
//! table" redesign flag. Deliberately holds no reference to [`crate::context::WorkerContext`] or
//! any phase's own state — it only decides *which* phases are due on a given tick; the worker
//! daemon owns invoking them, since each phase needs different collaborators (the selector needs
//! the resource sampler, `collect_stats` needs a `&mut` sampler, the rest only need the context).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// One of the four phases `ExecutionPlan` schedules, in their declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    WorkJobs,
    RemoveJobs,
    FlagJobs,
    CollectStats,
}

struct PhaseSchedule {
    kind: PhaseKind,
    interval_secs: u64,
    next_due: DateTime<Utc>,
}

/// Intervals (seconds) for each phase, as configured by the operator.
#[derive(Debug, Clone, Copy)]
pub struct PhaseIntervals {
    pub work_jobs: u64,
    pub remove_jobs: u64,
    pub flag_jobs: u64,
    pub collect_stats: u64,
}

pub struct ExecutionPlan {
    phases: Vec<PhaseSchedule>,
    tick_secs: u64,
}

impl ExecutionPlan {
    pub fn new(intervals: PhaseIntervals, start: DateTime<Utc>) -> Self {
        let raw = [
            (PhaseKind::WorkJobs, intervals.work_jobs),
            (PhaseKind::RemoveJobs, intervals.remove_jobs),
            (PhaseKind::FlagJobs, intervals.flag_jobs),
            (PhaseKind::CollectStats, intervals.collect_stats),
        ];
        let tick_secs = raw.iter().map(|(_, i)| *i).min().unwrap_or(1).max(1);
        let phases = raw
            .into_iter()
            .map(|(kind, interval_secs)| PhaseSchedule { kind, interval_secs: interval_secs.max(1), next_due: start })
            .collect();
        Self { phases, tick_secs }
    }

    /// The main loop's sleep interval: the minimum of all phase intervals.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs)
    }

    /// Every phase whose `next_due <= at`, in declared order, with `next_due` advanced to
    /// `at + interval`.
    pub fn due(&mut self, at: DateTime<Utc>) -> Vec<PhaseKind> {
        let mut due = Vec::new();
        for phase in &mut self.phases {
            if phase.next_due <= at {
                due.push(phase.kind);
                phase.next_due = at + ChronoDuration::seconds(phase.interval_secs as i64);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn tick_is_the_minimum_of_configured_intervals() {
        let plan = ExecutionPlan::new(
            PhaseIntervals { work_jobs: 2, remove_jobs: 10, flag_jobs: 15, collect_stats: 5 },
            at(0),
        );
        assert_eq!(plan.tick_interval(), std::time::Duration::from_secs(2));
    }

    #[test]
    fn each_phase_fires_on_its_own_cadence() {
        let mut plan = ExecutionPlan::new(
            PhaseIntervals { work_jobs: 1, remove_jobs: 2, flag_jobs: 4, collect_stats: 1 },
            at(0),
        );
        assert_eq!(plan.due(at(0)).len(), 4);
        let second = plan.due(at(1));
        assert!(second.contains(&PhaseKind::WorkJobs));
        assert!(second.contains(&PhaseKind::CollectStats));
        assert!(!second.contains(&PhaseKind::RemoveJobs));
        assert!(!second.contains(&PhaseKind::FlagJobs));
        let fourth = plan.due(at(2));
        assert!(fourth.contains(&PhaseKind::RemoveJobs));
    }
}
