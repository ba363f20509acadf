//! Job model (component D).
//!
//! Mirrors `rcommerce_core::jobs::job::Job`'s builder style, generalized
//! to the richer per-job overrides and absolute-time resolution the spec
//! calls for (§3).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// Process-local job identifier. Explicitly not persisted as a stable
/// identity across restarts (§3: "id ... not persisted across restarts");
/// a reloaded job is re-minted a fresh id on admission.
pub type JobId = u64;

fn next_job_id() -> JobId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An inclusive `[min, max]` millisecond range a concrete delay is drawn
/// from uniformly. `max` defaults to `min` when absent (a fixed delay).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationRange {
    pub min_ms: u64,
    pub max_ms: Option<u64>,
}

impl DurationRange {
    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: None,
        }
    }

    pub fn ranged(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms: Some(max_ms),
        }
    }

    /// Draw a concrete millisecond delay uniformly from the range.
    pub fn sample(&self) -> u64 {
        let max = self.max_ms.unwrap_or(self.min_ms);
        if max <= self.min_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=max)
        }
    }
}

/// Per-type defaults, merged with per-job overrides at admission time
/// (§3 "HandlerConfig").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Higher runs first.
    pub priority: i32,
    pub ttl_in_ms: u64,
    /// Minimum interval between two starts of this type.
    pub cooldown_in_ms: u64,
    /// Per-type job cap. Resolved against `global_job_limit / 2` by
    /// [`HandlerConfig::with_global_default`] when not set explicitly.
    pub max_jobs_total: usize,
    pub max_auto_retries_after_error: u32,
    pub ready_in_default: Option<DurationRange>,
    pub expire_in_default: Option<DurationRange>,
}

impl HandlerConfig {
    /// Defaults per §3, with `max_jobs_total` resolved against the
    /// scheduler's `globalJobLimit`.
    pub fn with_global_default(global_job_limit: usize) -> Self {
        Self {
            priority: 0,
            ttl_in_ms: 24 * 60 * 60 * 1000,
            cooldown_in_ms: 0,
            max_jobs_total: (global_job_limit / 2).max(1),
            max_auto_retries_after_error: 10,
            ready_in_default: None,
            expire_in_default: None,
        }
    }
}

/// A candidate job handed to `register_job`, before admission resolves
/// it to absolute times and merges in per-type defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_type: String,
    pub args: serde_json::Value,
    pub ready_in: Option<DurationRange>,
    pub expire_in: Option<DurationRange>,
    /// Absolute `readyAt`, preferred over `ready_in` when present.
    pub ready_at: Option<i64>,
    pub priority: Option<i32>,
    pub ttl_in_ms: Option<u64>,
    pub cooldown_in_ms: Option<u64>,
    pub max_auto_retries_after_error: Option<u32>,
    pub max_jobs_total: Option<usize>,
}

impl JobSubmission {
    pub fn new(job_type: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            args,
            ready_in: None,
            expire_in: None,
            ready_at: None,
            priority: None,
            ttl_in_ms: None,
            cooldown_in_ms: None,
            max_auto_retries_after_error: None,
            max_jobs_total: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ready_in(mut self, ready_in: DurationRange) -> Self {
        self.ready_in = Some(ready_in);
        self
    }

    pub fn with_ready_at(mut self, ready_at: i64) -> Self {
        self.ready_at = Some(ready_at);
        self
    }

    pub fn with_expire_in(mut self, expire_in: DurationRange) -> Self {
        self.expire_in = Some(expire_in);
        self
    }

    pub fn with_ttl_in_ms(mut self, ttl_in_ms: u64) -> Self {
        self.ttl_in_ms = Some(ttl_in_ms);
        self
    }

    pub fn with_cooldown_in_ms(mut self, cooldown_in_ms: u64) -> Self {
        self.cooldown_in_ms = Some(cooldown_in_ms);
        self
    }

    pub fn with_max_auto_retries_after_error(mut self, n: u32) -> Self {
        self.max_auto_retries_after_error = Some(n);
        self
    }

    pub fn with_max_jobs_total(mut self, max_jobs_total: usize) -> Self {
        self.max_jobs_total = Some(max_jobs_total);
        self
    }
}

/// An admitted job, with every time field resolved to an absolute
/// millisecond timestamp (§3 invariant I3: `created_at <= ready_at <=
/// expires_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(skip, default = "next_job_id")]
    pub id: JobId,
    pub job_type: String,
    pub args: serde_json::Value,
    pub priority: i32,
    pub created_at: i64,
    pub ready_at: i64,
    pub expires_at: i64,
    pub ttl_in_ms: u64,
    pub cooldown_in_ms: u64,
    pub max_auto_retries_after_error: u32,
    /// Remaining retry budget. Counts *additional* retries beyond the
    /// original attempt (spec.md §9 Open Question (a)).
    pub retries_left: u32,
}

impl Job {
    /// Resolve a submission against the type's `HandlerConfig` and the
    /// current time, per §4.4 admission step 1.
    pub fn admit(submission: JobSubmission, config: &HandlerConfig, now_ms: i64) -> Self {
        let ready_at = match submission.ready_at {
            Some(at) => at,
            None => {
                let range = submission
                    .ready_in
                    .or(config.ready_in_default)
                    .unwrap_or(DurationRange::fixed(0));
                now_ms + range.sample() as i64
            }
        };

        let ttl_in_ms = submission.ttl_in_ms.unwrap_or(config.ttl_in_ms);
        let expires_at = {
            let range = submission
                .expire_in
                .or(config.expire_in_default)
                .unwrap_or(DurationRange::fixed(ttl_in_ms));
            let candidate = now_ms + range.sample() as i64;
            // Clamped to now + ttlInMs per §4.4 step 1.
            candidate.min(now_ms + ttl_in_ms as i64)
        };

        // I3: created_at <= ready_at <= expires_at. ready_at cannot
        // precede created_at; expires_at cannot precede ready_at.
        let ready_at = ready_at.max(now_ms);
        let expires_at = expires_at.max(ready_at);

        Self {
            id: next_job_id(),
            job_type: submission.job_type,
            args: submission.args,
            priority: submission.priority.unwrap_or(config.priority),
            created_at: now_ms,
            ready_at,
            expires_at,
            ttl_in_ms,
            cooldown_in_ms: submission.cooldown_in_ms.unwrap_or(config.cooldown_in_ms),
            max_auto_retries_after_error: submission
                .max_auto_retries_after_error
                .unwrap_or(config.max_auto_retries_after_error),
            retries_left: submission
                .max_auto_retries_after_error
                .unwrap_or(config.max_auto_retries_after_error),
        }
    }

    /// Re-mint a process-local id for a job reloaded from a snapshot.
    pub fn assign_fresh_id(&mut self) {
        self.id = next_job_id();
    }

    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.ready_at <= now_ms
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Handler contract (§6, §9's redesign of the source's thrown-error
/// pattern into a tagged `Result`).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<Vec<JobSubmission>, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HandlerConfig {
        HandlerConfig::with_global_default(1000)
    }

    #[test]
    fn admits_with_immediate_ready_by_default() {
        let job = Job::admit(JobSubmission::new("ping", serde_json::json!({})), &cfg(), 1000);
        assert_eq!(job.ready_at, 1000);
        assert_eq!(job.created_at, 1000);
    }

    #[test]
    fn absolute_ready_at_takes_precedence() {
        let submission = JobSubmission::new("ping", serde_json::json!({})).with_ready_at(5000);
        let job = Job::admit(submission, &cfg(), 1000);
        assert_eq!(job.ready_at, 5000);
    }

    #[test]
    fn ready_in_resolves_to_absolute_time() {
        let submission =
            JobSubmission::new("ping", serde_json::json!({})).with_ready_in(DurationRange::fixed(500));
        let job = Job::admit(submission, &cfg(), 1000);
        assert_eq!(job.ready_at, 1500);
    }

    #[test]
    fn expires_at_is_clamped_to_ttl() {
        let submission = JobSubmission::new("ping", serde_json::json!({}))
            .with_ttl_in_ms(1000)
            .with_expire_in(DurationRange::fixed(10_000));
        let job = Job::admit(submission, &cfg(), 0);
        assert_eq!(job.expires_at, 1000);
    }

    #[test]
    fn invariant_i3_holds() {
        let submission = JobSubmission::new("ping", serde_json::json!({}))
            .with_ready_at(-100)
            .with_ttl_in_ms(10);
        let job = Job::admit(submission, &cfg(), 50);
        assert!(job.created_at <= job.ready_at);
        assert!(job.ready_at <= job.expires_at);
    }

    #[test]
    fn retries_left_defaults_from_config() {
        let job = Job::admit(JobSubmission::new("ping", serde_json::json!({})), &cfg(), 0);
        assert_eq!(job.retries_left, 10);
    }

    #[test]
    fn duration_range_sample_within_bounds() {
        let range = DurationRange::ranged(10, 20);
        for _ in 0..50 {
            let sample = range.sample();
            assert!((10..=20).contains(&sample));
        }
    }

    #[test]
    fn job_ids_are_unique_and_monotonic() {
        let a = Job::admit(JobSubmission::new("a", serde_json::json!({})), &cfg(), 0);
        let b = Job::admit(JobSubmission::new("b", serde_json::json!({})), &cfg(), 0);
        assert!(b.id > a.id);
    }
}
