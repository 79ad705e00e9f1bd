//! Rolling CPU/free-memory window used by the selector's resource admission gate.
//!
//! Mirrors `core4.queue.worker.CoreWorker`'s `stats_collector`: a bounded deque of
//! `(cpu_pct, free_ram_mb)` samples, appended once per `collect_stats` tick, averaged on demand.
//! The ring is sized in samples, not wall-clock time — the sampler's cadence is the phase
//! interval, so sample count already encodes the averaging window.

use std::collections::VecDeque;
use sysinfo::{CpuExt, System, SystemExt};

/// One `(cpu_pct, free_ram_mb)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub cpu_pct: f64,
    pub free_ram_mb: f64,
}

/// Rolling window of host resource samples.
pub struct ResourceSampler {
    system: System,
    samples: VecDeque<Sample>,
    depth: usize,
}

impl ResourceSampler {
    /// `depth` is `avg_stats_secs / collect_stats_interval`, rounded as the caller sees fit.
    /// One sample is taken immediately so admission has a value before the first scheduled
    /// `collect_stats` tick.
    pub fn new(depth: usize) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        let depth = depth.max(1);
        let mut samples = VecDeque::with_capacity(depth);
        samples.push_back(Self::read(&system));
        Self { system, samples, depth }
    }

    /// Build a sampler pre-loaded with fixed samples and no live `sysinfo` backing, for
    /// deterministic tests of the selector's resource gate.
    pub fn with_fixed(samples: Vec<Sample>) -> Self {
        let depth = samples.len().max(1);
        Self { system: System::new(), samples: samples.into(), depth }
    }

    fn read(system: &System) -> Sample {
        let cpu_pct = system
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as f64)
            .fold(f64::INFINITY, f64::min);
        let cpu_pct = if cpu_pct.is_finite() { cpu_pct } else { 0.0 };
        let free_ram_mb = system.available_memory() as f64 / 1024.0;
        Sample { cpu_pct, free_ram_mb }
    }

    /// Append one sample, evicting the oldest once `depth` is exceeded.
    pub fn collect(&mut self) {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        if self.samples.len() >= self.depth {
            self.samples.pop_front();
        }
        self.samples.push_back(Self::read(&self.system));
    }

    /// Arithmetic mean of each column over the current window contents.
    pub fn avg_stats(&self) -> Sample {
        let n = self.samples.len().max(1) as f64;
        let (cpu_sum, mem_sum) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(c, m), s| (c + s.cpu_pct, m + s.free_ram_mb));
        Sample { cpu_pct: cpu_sum / n, free_ram_mb: mem_sum / n }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_the_configured_depth() {
        let mut sampler = ResourceSampler::new(3);
        // Overwrite the implicit startup sample with deterministic fixtures.
        sampler.samples.clear();
        sampler.samples.push_back(Sample { cpu_pct: 10.0, free_ram_mb: 100.0 });
        sampler.samples.push_back(Sample { cpu_pct: 20.0, free_ram_mb: 200.0 });
        sampler.samples.push_back(Sample { cpu_pct: 30.0, free_ram_mb: 300.0 });
        let avg = sampler.avg_stats();
        assert_eq!(avg.cpu_pct, 20.0);
        assert_eq!(avg.free_ram_mb, 200.0);
    }

    #[test]
    fn evicts_oldest_once_depth_exceeded() {
        let mut sampler = ResourceSampler::new(2);
        sampler.samples.clear();
        sampler.samples.push_back(Sample { cpu_pct: 10.0, free_ram_mb: 0.0 });
        sampler.samples.push_back(Sample { cpu_pct: 20.0, free_ram_mb: 0.0 });
        if sampler.samples.len() >= sampler.depth {
            sampler.samples.pop_front();
        }
        sampler.samples.push_back(Sample { cpu_pct: 30.0, free_ram_mb: 0.0 });
        assert_eq!(sampler.samples.len(), 2);
        let avg = sampler.avg_stats();
        assert_eq!(avg.cpu_pct, 25.0);
    }
}
