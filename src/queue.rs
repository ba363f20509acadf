//! Priority queue per job type (component E).
//!
//! Generalizes `rcommerce_core::jobs::queue::JobQueue`'s three
//! priority-bucket Redis lists into a single ordered, in-memory
//! structure keyed by the §3 ordering relation: `(priority desc, ready_at
//! asc, created_at asc)`. Non-ready jobs stay in the queue but are
//! skipped by [`TypeQueue::next_eligible`] — the queue itself doesn't
//! know about cooldowns or handler registration, only readiness and
//! expiry, keeping it an easy property to test in isolation.

use std::collections::BTreeMap;

use crate::job::{Job, JobId};

/// Sort key matching spec.md §3's ordering relation. `Ord` is derived in
/// field order, so `neg_priority` (ascending = highest priority first)
/// dominates, then `ready_at`, then `created_at`, with `id` only to break
/// exact ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    neg_priority: i64,
    ready_at: i64,
    created_at: i64,
    id: JobId,
}

impl OrderKey {
    fn of(job: &Job) -> Self {
        Self {
            neg_priority: -(job.priority as i64),
            ready_at: job.ready_at,
            created_at: job.created_at,
            id: job.id,
        }
    }
}

/// Ordered sequence of jobs of one type.
///
/// Not persisted directly — a snapshot stores the plain job list per
/// type (see [`crate::snapshot::Snapshot`]) and queues are rebuilt from
/// it on load, since `BTreeMap`'s struct-keyed ordering isn't a natural
/// serialization shape.
#[derive(Debug, Default)]
pub struct TypeQueue {
    entries: BTreeMap<OrderKey, Job>,
}

impl TypeQueue {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, job: Job) {
        self.entries.insert(OrderKey::of(&job), job);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.entries.values()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.entries.values().cloned().collect()
    }

    /// The best job in this queue that is ready and unexpired at `now`,
    /// per the §3 ordering relation. Jobs ordered ahead of it but not yet
    /// ready are skipped over, not removed.
    pub fn next_eligible(&self, now_ms: i64) -> Option<JobId> {
        self.entries
            .iter()
            .find(|(_, job)| job.is_ready(now_ms) && !job.is_expired(now_ms))
            .map(|(_, job)| job.id)
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        let key = self
            .entries
            .iter()
            .find(|(_, job)| job.id == job_id)
            .map(|(k, _)| *k)?;
        self.entries.remove(&key)
    }

    /// Remove every job matching `predicate`, returning them.
    pub fn drain_matching(&mut self, mut predicate: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let keys: Vec<OrderKey> = self
            .entries
            .iter()
            .filter(|(_, job)| predicate(job))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    /// Earliest `ready_at` among jobs that are not yet ready — the
    /// soonest time this queue could next produce an eligible job absent
    /// cooldown (used to compute `nextWake`, §4.5 step 7).
    pub fn earliest_not_yet_ready(&self, now_ms: i64) -> Option<i64> {
        self.entries
            .values()
            .filter(|job| !job.is_ready(now_ms))
            .map(|job| job.ready_at)
            .min()
    }

    pub fn earliest_expiry(&self) -> Option<i64> {
        self.entries.values().map(|job| job.expires_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandlerConfig, JobSubmission};

    fn job(job_type: &str, priority: i32, created_at: i64) -> Job {
        let cfg = HandlerConfig {
            priority,
            ..HandlerConfig::with_global_default(1000)
        };
        Job::admit(JobSubmission::new(job_type, serde_json::json!({})), &cfg, created_at)
    }

    #[test]
    fn higher_priority_first() {
        let mut q = TypeQueue::new();
        let low = job("t", 1, 0);
        let high = job("t", 5, 0);
        let low_id = low.id;
        let high_id = high.id;
        q.insert(low);
        q.insert(high);

        let first = q.next_eligible(1000).unwrap();
        assert_eq!(first, high_id);
        q.remove(first);
        let second = q.next_eligible(1000).unwrap();
        assert_eq!(second, low_id);
    }

    #[test]
    fn tie_breaks_on_insertion_order() {
        let mut q = TypeQueue::new();
        let first = job("t", 1, 100);
        let second = job("t", 1, 200);
        let first_id = first.id;
        q.insert(second);
        q.insert(first);

        assert_eq!(q.next_eligible(1000), Some(first_id));
    }

    #[test]
    fn non_ready_jobs_are_skipped() {
        let mut q = TypeQueue::new();
        let mut future = job("t", 5, 0);
        future.ready_at = 10_000;
        let ready = job("t", 1, 0);
        let ready_id = ready.id;
        q.insert(future);
        q.insert(ready);

        assert_eq!(q.next_eligible(500), Some(ready_id));
    }

    #[test]
    fn expired_jobs_are_not_eligible() {
        let mut q = TypeQueue::new();
        let mut expired = job("t", 5, 0);
        expired.expires_at = 100;
        q.insert(expired);

        assert_eq!(q.next_eligible(500), None);
    }

    #[test]
    fn drain_matching_removes_and_returns() {
        let mut q = TypeQueue::new();
        let mut expired = job("t", 1, 0);
        expired.expires_at = 100;
        let keep = job("t", 1, 0);
        let keep_id = keep.id;
        q.insert(expired);
        q.insert(keep);

        let drained = q.drain_matching(|j| j.is_expired(500));
        assert_eq!(drained.len(), 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_eligible(500), Some(keep_id));
    }
}
