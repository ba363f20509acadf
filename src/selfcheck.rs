//! Self-check (component J, §4.10).
//!
//! A pure, non-mutating evaluation of the §3 invariants against the
//! scheduler's current state. Grounded in the teacher's health-check
//! idiom (`rcommerce_core::jobs::mod`'s queue-depth assertions are ad
//! hoc; this generalizes that into a proper structured report). Intended
//! to be asserted in tests and logged (not panicked on) in production.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::job::HandlerConfig;
use crate::queue::TypeQueue;

/// One invariant from §3 failing to hold, with enough detail to act on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Violation {
    /// I1: a job's type has never had a registered handler and isn't
    /// queued for orphan cleanup.
    OrphanedType { job_type: String },
    /// I2: total or per-type job count exceeds its quota.
    QuotaExceeded {
        job_type: Option<String>,
        count: usize,
        limit: usize,
    },
    /// I3: `created_at <= ready_at <= expires_at` doesn't hold.
    TimestampOrderingViolated {
        job_type: String,
        job_id: crate::job::JobId,
    },
}

/// Result of one [`run`] pass. Empty `violations` means every invariant
/// held at the moment of the check.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InvariantReport {
    pub violations: Vec<Violation>,
}

impl InvariantReport {
    pub fn is_healthy(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Evaluate I1-I3 against the supplied state. I4 (exclusivity) is held by
/// construction — `Scheduler::process_pending_jobs` serializes every
/// dispatch pass behind a single `dispatch_lock` and awaits one handler
/// at a time, so two jobs of the same type (or any two jobs at all) can
/// never be executing concurrently; there is no runtime state to check it
/// against. I5 is a lifecycle-spanning property (exactly-one-terminal-
/// counter across history) rather than a point-in-time structural fact,
/// so it isn't checked here either — it's exercised by the
/// `jobSucceeded + jobFailed = jobRegistered` property test instead. I6
/// (snapshot fixed point) is likewise checked directly on the serializer,
/// not here, since this routine never touches storage.
pub fn run(
    queues: &HashMap<String, TypeQueue>,
    ever_registered_types: &HashSet<String>,
    handler_configs: &HashMap<String, HandlerConfig>,
    global_job_limit: usize,
) -> InvariantReport {
    let mut violations = Vec::new();

    // I1
    for job_type in queues.keys() {
        if !ever_registered_types.contains(job_type) {
            violations.push(Violation::OrphanedType {
                job_type: job_type.clone(),
            });
        }
    }

    // I2 (global)
    let total: usize = queues.values().map(TypeQueue::len).sum();
    if total > global_job_limit {
        violations.push(Violation::QuotaExceeded {
            job_type: None,
            count: total,
            limit: global_job_limit,
        });
    }

    // I2 (per-type)
    for (job_type, queue) in queues {
        if let Some(config) = handler_configs.get(job_type) {
            if queue.len() > config.max_jobs_total {
                violations.push(Violation::QuotaExceeded {
                    job_type: Some(job_type.clone()),
                    count: queue.len(),
                    limit: config.max_jobs_total,
                });
            }
        }
    }

    // I3
    for (job_type, queue) in queues {
        for job in queue.iter() {
            if !(job.created_at <= job.ready_at && job.ready_at <= job.expires_at) {
                violations.push(Violation::TimestampOrderingViolated {
                    job_type: job_type.clone(),
                    job_id: job.id,
                });
            }
        }
    }

    InvariantReport { violations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandlerConfig, JobSubmission};

    fn queue_with(job_type: &str, count: usize) -> TypeQueue {
        let cfg = HandlerConfig::with_global_default(1000);
        let mut queue = TypeQueue::new();
        for _ in 0..count {
            queue.insert(crate::job::Job::admit(
                JobSubmission::new(job_type, serde_json::json!({})),
                &cfg,
                0,
            ));
        }
        queue
    }

    #[test]
    fn healthy_state_has_no_violations() {
        let mut queues = HashMap::new();
        queues.insert("t".to_string(), queue_with("t", 2));
        let registered: HashSet<String> = ["t".to_string()].into_iter().collect();
        let mut configs = HashMap::new();
        configs.insert("t".to_string(), HandlerConfig::with_global_default(1000));

        let report = run(&queues, &registered, &configs, 1000);
        assert!(report.is_healthy());
    }

    #[test]
    fn unregistered_type_is_flagged_orphaned() {
        let mut queues = HashMap::new();
        queues.insert("ghost".to_string(), queue_with("ghost", 1));

        let report = run(&queues, &HashSet::new(), &HashMap::new(), 1000);
        assert!(report
            .violations
            .contains(&Violation::OrphanedType { job_type: "ghost".to_string() }));
    }

    #[test]
    fn over_quota_per_type_is_flagged() {
        let mut queues = HashMap::new();
        queues.insert("t".to_string(), queue_with("t", 5));
        let registered: HashSet<String> = ["t".to_string()].into_iter().collect();
        let mut configs = HashMap::new();
        configs.insert(
            "t".to_string(),
            HandlerConfig {
                max_jobs_total: 2,
                ..HandlerConfig::with_global_default(1000)
            },
        );

        let report = run(&queues, &registered, &configs, 1000);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::QuotaExceeded { job_type: Some(t), .. } if t == "t")));
    }

    #[test]
    fn timestamp_violation_is_detected() {
        let mut queues = HashMap::new();
        let mut queue = TypeQueue::new();
        let cfg = HandlerConfig::with_global_default(1000);
        let mut job = crate::job::Job::admit(JobSubmission::new("t", serde_json::json!({})), &cfg, 100);
        job.ready_at = 50; // violates I3 directly, bypassing admit()'s clamp
        queue.insert(job);
        queues.insert("t".to_string(), queue);
        let registered: HashSet<String> = ["t".to_string()].into_iter().collect();

        let report = run(&queues, &registered, &HashMap::new(), 1000);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::TimestampOrderingViolated { .. })));
    }
}
