//! Stats counters (component I).
//!
//! Generalizes `jobs::metrics::MetricsCollector`'s fixed Prometheus
//! counters to the six lifecycle events plus `retryAdmitted` the spec
//! tracks (§5), backed by plain atomics rather than a metrics-crate
//! registry since nothing here is exported externally.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time counter values, as returned by [`Stats::describe`] and
/// persisted inside a [`crate::snapshot::Snapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub jobs_registered: u64,
    pub jobs_rejected: u64,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_expired: u64,
    pub retries_admitted: u64,
    pub queue_length: usize,
    pub retry_length: usize,
}

/// Live atomic counters. `queue_length`/`retry_length` are sampled fresh
/// from the scheduler at `describe()` time rather than tracked here,
/// since they're derived state, not events.
#[derive(Debug, Default)]
pub struct Stats {
    jobs_registered: AtomicU64,
    jobs_rejected: AtomicU64,
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_expired: AtomicU64,
    retries_admitted: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registered(&self) {
        self.jobs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.jobs_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_admitted(&self) {
        self.retries_admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough snapshot for reporting; `queue_length`/
    /// `retry_length` are filled in by the caller, which has the actual
    /// queue state.
    pub fn describe(&self, queue_length: usize, retry_length: usize) -> CountersSnapshot {
        CountersSnapshot {
            jobs_registered: self.jobs_registered.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_expired: self.jobs_expired.load(Ordering::Relaxed),
            retries_admitted: self.retries_admitted.load(Ordering::Relaxed),
            queue_length,
            retry_length,
        }
    }

    /// Overwrite this instance's counters in place from a loaded
    /// snapshot, for a `Scheduler` that already owns a `Stats` by value
    /// and can't swap it wholesale behind a shared reference.
    pub fn load_from(&self, snapshot: &CountersSnapshot) {
        self.jobs_registered.store(snapshot.jobs_registered, Ordering::Relaxed);
        self.jobs_rejected.store(snapshot.jobs_rejected, Ordering::Relaxed);
        self.jobs_started.store(snapshot.jobs_started, Ordering::Relaxed);
        self.jobs_succeeded.store(snapshot.jobs_succeeded, Ordering::Relaxed);
        self.jobs_failed.store(snapshot.jobs_failed, Ordering::Relaxed);
        self.jobs_expired.store(snapshot.jobs_expired, Ordering::Relaxed);
        self.retries_admitted.store(snapshot.retries_admitted, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = Stats::new();
        let snapshot = stats.describe(0, 0);
        assert_eq!(snapshot.jobs_registered, 0);
        assert_eq!(snapshot.jobs_succeeded, 0);
    }

    #[test]
    fn each_event_increments_its_own_counter_only() {
        let stats = Stats::new();
        stats.record_succeeded();
        let snapshot = stats.describe(0, 0);
        assert_eq!(snapshot.jobs_succeeded, 1);
        assert_eq!(snapshot.jobs_failed, 0);
    }

    #[test]
    fn load_from_overwrites_counts_in_place() {
        let stats = Stats::new();
        stats.record_registered();
        stats.record_registered();
        stats.record_expired();
        let snapshot = stats.describe(5, 2);

        let fresh = Stats::new();
        fresh.load_from(&snapshot);
        let restored_snapshot = fresh.describe(0, 0);
        assert_eq!(restored_snapshot.jobs_registered, 2);
        assert_eq!(restored_snapshot.jobs_expired, 1);
    }
}
