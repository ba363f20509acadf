//! Expiry & clock-jump sweep (component H, §4.8).
//!
//! Generalizes `jobs::dead_letter::DeadLetterQueue`'s "give up on this
//! job" bookkeeping into the broader sweep the spec calls for: expired
//! jobs are dropped (not archived — there is no dead-letter store in
//! this design, see DESIGN.md), corrupt `readyAt` values are re-pinned
//! rather than discarded, and orphaned empty queues are pruned.

use std::collections::HashMap;

use crate::job::Job;
use crate::queue::TypeQueue;

/// What one sweep pass did, for logging and for the observer bus to turn
/// into `jobExpired` events.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired: Vec<Job>,
    pub repinned_count: usize,
    pub pruned_types: Vec<String>,
}

/// Run a sweep over every type queue (§4.8). `max_expire_in_ms` bounds
/// how far in the future a `readyAt` may legitimately sit; anything
/// beyond `now + max_expire_in_ms` is treated as corruption and re-pinned
/// to `now` in place, rather than dropped, since the job payload itself
/// is still presumably valid.
pub fn sweep(
    queues: &mut HashMap<String, TypeQueue>,
    registered_types: &std::collections::HashSet<String>,
    now_ms: i64,
    max_expire_in_ms: i64,
) -> SweepReport {
    let mut report = SweepReport::default();

    for queue in queues.values_mut() {
        let expired = queue.drain_matching(|job| job.is_expired(now_ms));
        report.expired.extend(expired);

        let corrupt_ids: Vec<_> = queue
            .iter()
            .filter(|job| job.ready_at > now_ms + max_expire_in_ms)
            .map(|job| job.id)
            .collect();
        for id in corrupt_ids {
            if let Some(mut job) = queue.remove(id) {
                job.ready_at = now_ms;
                if job.expires_at < job.ready_at {
                    job.expires_at = job.ready_at;
                }
                queue.insert(job);
                report.repinned_count += 1;
            }
        }
    }

    let orphaned: Vec<String> = queues
        .iter()
        .filter(|(job_type, queue)| queue.is_empty() && !registered_types.contains(*job_type))
        .map(|(job_type, _)| job_type.clone())
        .collect();
    for job_type in &orphaned {
        queues.remove(job_type);
    }
    report.pruned_types = orphaned;

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandlerConfig, JobSubmission};
    use std::collections::HashSet;

    fn job(job_type: &str, ready_at: i64, expires_at: i64) -> Job {
        let cfg = HandlerConfig::with_global_default(1000);
        let mut job = Job::admit(JobSubmission::new(job_type, serde_json::json!({})), &cfg, 0);
        job.ready_at = ready_at;
        job.expires_at = expires_at;
        job
    }

    #[test]
    fn expired_jobs_are_removed_and_reported() {
        let mut queues = HashMap::new();
        let mut q = TypeQueue::new();
        q.insert(job("t", 0, 50));
        queues.insert("t".to_string(), q);

        let registered: HashSet<String> = ["t".to_string()].into_iter().collect();
        let report = sweep(&mut queues, &registered, 100, 1_000_000);

        assert_eq!(report.expired.len(), 1);
        assert!(queues["t"].is_empty());
    }

    #[test]
    fn absurd_ready_at_is_repinned_not_dropped() {
        let mut queues = HashMap::new();
        let mut q = TypeQueue::new();
        let mut far_future = job("t", 0, 0);
        far_future.ready_at = 10_000_000;
        far_future.expires_at = 10_000_000;
        let id = far_future.id;
        q.insert(far_future);
        queues.insert("t".to_string(), q);

        let registered: HashSet<String> = ["t".to_string()].into_iter().collect();
        let report = sweep(&mut queues, &registered, 100, 1_000);

        assert_eq!(report.repinned_count, 1);
        let remaining = queues["t"].jobs();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, id);
        assert_eq!(remaining[0].ready_at, 100);
    }

    #[test]
    fn orphaned_empty_queue_is_pruned() {
        let mut queues = HashMap::new();
        queues.insert("gone".to_string(), TypeQueue::new());
        queues.insert("kept".to_string(), TypeQueue::new());

        let registered: HashSet<String> = ["kept".to_string()].into_iter().collect();
        let report = sweep(&mut queues, &registered, 0, 1_000_000);

        assert_eq!(report.pruned_types, vec!["gone".to_string()]);
        assert!(!queues.contains_key("gone"));
        assert!(queues.contains_key("kept"));
    }

    #[test]
    fn non_empty_unregistered_queue_is_not_pruned() {
        let mut queues = HashMap::new();
        let mut q = TypeQueue::new();
        q.insert(job("stale", 0, 1_000_000));
        queues.insert("stale".to_string(), q);

        let registered: HashSet<String> = HashSet::new();
        let report = sweep(&mut queues, &registered, 0, 1_000_000);

        assert!(report.pruned_types.is_empty());
        assert!(queues.contains_key("stale"));
    }
}
