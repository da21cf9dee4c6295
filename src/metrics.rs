//! Pool statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the pool and its queue.
#[derive(Debug)]
pub struct PoolStats {
    /// Jobs accepted into the queue.
    pub jobs_pushed: AtomicU64,
    /// Jobs that ran to completion.
    pub jobs_run: AtomicU64,
    /// Jobs whose body panicked.
    pub jobs_panicked: AtomicU64,
    /// Jobs dropped unrun (destroyed pool or closed queue).
    pub jobs_discarded: AtomicU64,
    /// Ticks that switched into a context and found nothing to do.
    pub idle_ticks: AtomicU64,
    /// Contexts successfully created by `init`.
    pub contexts_created: AtomicU64,
    /// Contexts `init` failed to create.
    pub contexts_failed: AtomicU64,
    /// Time when stats collection started.
    pub start_time: Instant,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            jobs_pushed: AtomicU64::new(0),
            jobs_run: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            jobs_discarded: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            contexts_created: AtomicU64::new(0),
            contexts_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Returns a snapshot of current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            jobs_pushed: self.jobs_pushed.load(Ordering::Relaxed),
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            contexts_failed: self.contexts_failed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of stats at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub jobs_pushed: u64,
    pub jobs_run: u64,
    pub jobs_panicked: u64,
    pub jobs_discarded: u64,
    pub idle_ticks: u64,
    pub contexts_created: u64,
    pub contexts_failed: u64,
    pub elapsed_seconds: f64,
}

impl StatsSnapshot {
    /// Approximates queue depth (pushed minus everything that left the queue).
    pub fn pending_estimate(&self) -> i64 {
        self.jobs_pushed as i64
            - self.jobs_run as i64
            - self.jobs_panicked as i64
            - self.jobs_discarded as i64
    }

    /// Completed jobs per second since stats started.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_run as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let snapshot = PoolStats::new().snapshot();
        assert_eq!(snapshot.jobs_pushed, 0);
        assert_eq!(snapshot.jobs_run, 0);
        assert_eq!(snapshot.contexts_created, 0);
        assert_eq!(snapshot.pending_estimate(), 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_derived_values() {
        let stats = PoolStats::new();
        PoolStats::bump(&stats.jobs_pushed, 10);
        PoolStats::bump(&stats.jobs_run, 6);
        PoolStats::bump(&stats.jobs_panicked, 1);
        PoolStats::bump(&stats.jobs_discarded, 2);
        PoolStats::bump(&stats.contexts_created, 4);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pending_estimate(), 1);
        assert_eq!(snapshot.contexts_created, 4);
    }
}
