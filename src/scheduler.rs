//! The scheduler (component F) — the orchestrator tying every other
//! component together. Grounded in `jobs::scheduler::JobScheduler`'s
//! `Arc<Self>`-based `start`/`run` loop and its config-driven constructor,
//! generalized from a cron-and-Redis scheduler into the in-process,
//! storage-agnostic dispatcher the spec calls for.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockJumpDetector};
use crate::config::SchedulerSettings;
use crate::error::{SchedulerError, SchedulerResult};
use crate::expiry;
use crate::job::{HandlerConfig, Job, JobHandler, JobId, JobSubmission};
use crate::observer::{ObserverBus, ObserverId, RejectReason, SchedulerEvent};
use crate::queue::TypeQueue;
use crate::retry::RetryRegistry;
use crate::selfcheck::{self, InvariantReport};
use crate::snapshot::Snapshot;
use crate::stats::{CountersSnapshot, Stats};
use crate::storage::StorageAdapter;

struct Inner {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    configs: HashMap<String, HandlerConfig>,
    ever_registered_types: HashSet<String>,
    queues: HashMap<String, TypeQueue>,
    retry_registry: RetryRegistry,
    last_ran_at: HashMap<String, i64>,
    clock_jump_detector: ClockJumpDetector,
    last_clock: i64,
    dirty: bool,
}

impl Inner {
    fn new(max_clock_jump_ms: i64) -> Self {
        Self {
            handlers: HashMap::new(),
            configs: HashMap::new(),
            ever_registered_types: HashSet::new(),
            queues: HashMap::new(),
            retry_registry: RetryRegistry::new(),
            last_ran_at: HashMap::new(),
            clock_jump_detector: ClockJumpDetector::new(max_clock_jump_ms),
            last_clock: 0,
            dirty: false,
        }
    }

    fn total_jobs(&self) -> usize {
        self.queues.values().map(TypeQueue::len).sum()
    }
}

/// Candidate selected by one dispatch step: its type, the job itself, and
/// its per-type cooldown (read off the job, since `cooldownInMs` can be a
/// per-job override).
struct Candidate {
    job_type: String,
    job_id: JobId,
    priority: i32,
    ready_at: i64,
    created_at: i64,
}

/// The durable, priority-ordered, retry-aware job scheduler.
///
/// Always constructed behind `Arc<Scheduler>` (see `new`): the debounced
/// flush spawns a task that outlives the call that triggered it, and needs
/// an owned handle back to the scheduler to do so.
pub struct Scheduler {
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    observers: ObserverBus,
    stats: Stats,
    inner: Mutex<Inner>,
    dispatch_lock: Mutex<()>,
    flush_scheduled: AtomicBool,
    unloaded: AtomicBool,
    /// A weak handle to itself, populated at construction via
    /// `Arc::new_cyclic`. `self: &Arc<Self>` isn't a stable receiver
    /// type, so the debounced-flush background task (the one place that
    /// needs an owned, 'static handle) upgrades this instead.
    self_handle: std::sync::Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(storage: Arc<dyn StorageAdapter>, clock: Arc<dyn Clock>, settings: SchedulerSettings) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let inner = Inner::new(settings.max_clock_jump_ms);
            Self {
                storage,
                clock,
                settings,
                observers: ObserverBus::new(),
                stats: Stats::new(),
                inner: Mutex::new(inner),
                dispatch_lock: Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                unloaded: AtomicBool::new(false),
                self_handle: weak.clone(),
            }
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_handle.upgrade().expect("scheduler dropped while still running")
    }

    /// Load persisted state (if any) and run the initial sweep (§4.8a).
    pub async fn init(&self) -> SchedulerResult<()> {
        let now = self.clock.now_ms();
        let loaded = self.storage.get(&self.settings.storage_key).await?;

        let mut inner = self.inner.lock().await;
        match loaded.as_deref().map(Snapshot::deserialize) {
            Some(Ok(snapshot)) => {
                for (job_type, jobs) in snapshot.job_queues {
                    let mut queue = TypeQueue::new();
                    for mut job in jobs {
                        job.assign_fresh_id();
                        queue.insert(job);
                    }
                    inner.queues.insert(job_type, queue);
                }
                let retry_map = snapshot
                    .retry_registry
                    .into_iter()
                    .map(|(job_type, jobs)| {
                        let jobs = jobs
                            .into_iter()
                            .map(|mut job| {
                                job.assign_fresh_id();
                                job
                            })
                            .collect();
                        (job_type, jobs)
                    })
                    .collect();
                inner.retry_registry = RetryRegistry::from_map(retry_map);
                self.stats.load_from(&snapshot.stats);
                inner.last_clock = snapshot.last_clock;
                info!("restored scheduler state from persisted snapshot");
            }
            Some(Err(err)) => {
                warn!(error = %err, "discarding corrupt snapshot; starting from empty state");
            }
            None => {
                debug!("no persisted snapshot found; starting from empty state");
            }
        }

        inner.clock_jump_detector.observe(now);
        self.sweep_locked(&mut inner, now);
        inner.last_clock = now;
        Ok(())
    }

    /// Stop accepting admissions and flush any pending persistence
    /// (§5 "Cancellation"). In-flight handlers are not cancelled.
    pub async fn unload(&self) -> SchedulerResult<()> {
        self.unloaded.store(true, Ordering::SeqCst);
        self.sync().await
    }

    fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }

    /// Register a handler and its per-type defaults. Idempotent
    /// registration is rejected (§6: a duplicate is a programmer error,
    /// not a runtime condition to paper over).
    pub async fn register_handler(
        &self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        config: Option<HandlerConfig>,
    ) -> SchedulerResult<()> {
        let job_type = job_type.into();
        let mut inner = self.inner.lock().await;
        if inner.handlers.contains_key(&job_type) {
            return Err(SchedulerError::DuplicateHandler(job_type));
        }
        let config = config.unwrap_or_else(|| HandlerConfig::with_global_default(self.settings.global_job_limit));
        inner.configs.insert(job_type.clone(), config);
        inner.handlers.insert(job_type.clone(), handler);
        inner.ever_registered_types.insert(job_type.clone());
        inner.queues.entry(job_type.clone()).or_insert_with(TypeQueue::new);
        info!(job_type = %job_type, "registered job handler");
        Ok(())
    }

    /// Admit a single job (§4.4). Never fails the caller for a rejected
    /// job — rejection is reported via stats/observer, not `Err`.
    pub async fn register_job(&self, submission: JobSubmission) -> SchedulerResult<()> {
        self.register_jobs(vec![submission]).await
    }

    pub async fn register_jobs(&self, submissions: Vec<JobSubmission>) -> SchedulerResult<()> {
        if self.is_unloaded() {
            return Err(SchedulerError::Unloaded);
        }
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        for submission in submissions {
            self.admit_locked(&mut inner, submission, now);
        }
        inner.dirty = true;
        drop(inner);
        self.schedule_flush();
        Ok(())
    }

    /// Admission logic shared by `register_job(s)` and handler spawn
    /// lists (§4.4, §4.5 step 5). Caller already holds `inner`.
    fn admit_locked(&self, inner: &mut Inner, submission: JobSubmission, now: i64) {
        let job_type = submission.job_type.clone();
        let Some(config) = inner.configs.get(&job_type).cloned() else {
            self.stats.record_rejected();
            self.observers.emit(SchedulerEvent::JobRejected {
                job_type: job_type.clone(),
                args: submission.args.clone(),
                reason: RejectReason::UnknownType,
            });
            warn!(job_type = %job_type, "rejected job for unregistered type");
            return;
        };

        if inner.total_jobs() >= self.settings.global_job_limit {
            self.stats.record_rejected();
            self.observers.emit(SchedulerEvent::JobRejected {
                job_type: job_type.clone(),
                args: submission.args.clone(),
                reason: RejectReason::GlobalQuotaExceeded,
            });
            return;
        }

        let type_count = inner.queues.get(&job_type).map(TypeQueue::len).unwrap_or(0);
        let max_jobs_total = submission.max_jobs_total.unwrap_or(config.max_jobs_total);
        if type_count >= max_jobs_total {
            self.stats.record_rejected();
            self.observers.emit(SchedulerEvent::JobRejected {
                job_type: job_type.clone(),
                args: submission.args.clone(),
                reason: RejectReason::PerTypeQuotaExceeded,
            });
            return;
        }

        let job = Job::admit(submission, &config, now);
        inner
            .queues
            .entry(job_type.clone())
            .or_insert_with(TypeQueue::new)
            .insert(job.clone());
        self.stats.record_registered();
        self.observers.emit(SchedulerEvent::JobRegistered { job });
    }

    /// One dispatch pass (§4.5). Reentrant calls serialize on
    /// `dispatch_lock` rather than truly joining an in-flight pass — by
    /// the time a second caller gets the lock, the first pass has
    /// already drained every eligible job, so the second pass is a cheap
    /// no-op, which is observably equivalent to joining it.
    pub async fn process_pending_jobs(&self) -> SchedulerResult<()> {
        let _dispatch_guard = self.dispatch_lock.lock().await;
        let now = self.clock.now_ms();

        {
            let mut inner = self.inner.lock().await;
            // Opportunistic sweep every pass (§4.8c); a detected clock
            // jump (§4.1) doesn't need special-casing here since the
            // sweep already removes anything the jump would have made
            // stale.
            inner.clock_jump_detector.observe(now);
            self.sweep_locked(&mut inner, now);
            inner.last_clock = now;
        }

        loop {
            if self.is_unloaded() {
                break;
            }

            let (job, handler) = {
                let mut inner = self.inner.lock().await;
                let Some(candidate) = self.select_eligible(&inner, now) else {
                    break;
                };
                let queue = inner.queues.get_mut(&candidate.job_type).expect("queue exists for candidate");
                let job = queue.remove(candidate.job_id).expect("candidate came from this queue");
                inner.last_ran_at.insert(candidate.job_type.clone(), now);
                let handler = inner
                    .handlers
                    .get(&candidate.job_type)
                    .cloned()
                    .expect("candidate came from a registered type");
                inner.dirty = true;
                self.stats.record_started();
                self.observers.emit(SchedulerEvent::JobStarted { job: job.clone() });
                (job, handler)
            };

            let job_type = job.job_type.clone();
            let job_id = job.id;
            let outcome = handler.handle(job.clone()).await;

            let mut inner = self.inner.lock().await;
            match outcome {
                Ok(spawned) => {
                    self.stats.record_succeeded();
                    self.observers.emit(SchedulerEvent::JobSucceeded { job });
                    for submission in spawned {
                        self.admit_locked(&mut inner, submission, now);
                    }
                    if let Some(mut retried) = inner.retry_registry.pop_front(&job_type) {
                        retried.ready_at = now;
                        if retried.expires_at < retried.ready_at {
                            retried.expires_at = retried.ready_at;
                        }
                        let retry_job_type = retried.job_type.clone();
                        inner
                            .queues
                            .entry(retry_job_type)
                            .or_insert_with(TypeQueue::new)
                            .insert(retried);
                        self.stats.record_retry_admitted();
                    }
                }
                Err(err) if err.is_recoverable() => match inner.retry_registry.push(job) {
                    Ok(()) => {
                        debug!(job_type = %job_type, job_id, "recoverable failure; job re-entered retry registry");
                    }
                    Err(exhausted) => {
                        self.stats.record_failed();
                        warn!(job_type = %job_type, job_id, "retry budget exhausted; job failed permanently");
                        self.observers.emit(SchedulerEvent::JobFailed { job: exhausted, error: err });
                    }
                },
                Err(err) => {
                    self.stats.record_failed();
                    warn!(job_type = %job_type, job_id, error = err.message(), "job failed permanently");
                    self.observers.emit(SchedulerEvent::JobFailed { job, error: err });
                }
            }
            inner.dirty = true;
        }

        self.schedule_flush();
        Ok(())
    }

    fn select_eligible(&self, inner: &Inner, now: i64) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for (job_type, queue) in &inner.queues {
            let Some(candidate_id) = queue.next_eligible(now) else {
                continue;
            };
            let job = queue.iter().find(|j| j.id == candidate_id).expect("id came from this queue");
            if let Some(last_ran_at) = inner.last_ran_at.get(job_type) {
                if now < last_ran_at + job.cooldown_in_ms as i64 {
                    continue;
                }
            }
            let candidate = Candidate {
                job_type: job_type.clone(),
                job_id: job.id,
                priority: job.priority,
                ready_at: job.ready_at,
                created_at: job.created_at,
            };
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if is_better(&candidate, &current) {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best
    }

    fn sweep_locked(&self, inner: &mut Inner, now_ms: i64) {
        let registered_types = inner.ever_registered_types.clone();
        let report = expiry::sweep(&mut inner.queues, &registered_types, now_ms, self.settings.max_expire_in_ms);
        for job in &report.expired {
            self.stats.record_expired();
            self.observers.emit(SchedulerEvent::JobExpired { job: job.clone() });
        }
        if report.repinned_count > 0 {
            warn!(count = report.repinned_count, "re-pinned jobs with corrupt readyAt during sweep");
        }
        if !report.pruned_types.is_empty() {
            debug!(types = ?report.pruned_types, "pruned orphaned empty type queues");
        }
        if !report.expired.is_empty() || report.repinned_count > 0 || !report.pruned_types.is_empty() {
            inner.dirty = true;
        }
    }

    /// Earliest moment another dispatch pass could find new work (§4.5
    /// step 7): the soonest `readyAt` among not-yet-ready jobs, the
    /// soonest cooldown expiry, or the soonest expiry. `None` means no
    /// timer needs arming.
    pub async fn next_wake_ms(&self) -> Option<i64> {
        let inner = self.inner.lock().await;
        let now = self.clock.now_ms();
        let mut candidates = Vec::new();
        for (job_type, queue) in &inner.queues {
            if let Some(at) = queue.earliest_not_yet_ready(now) {
                candidates.push(at);
            }
            if let Some(at) = queue.earliest_expiry() {
                candidates.push(at);
            }
            if let Some(last_ran_at) = inner.last_ran_at.get(job_type) {
                if let Some(head) = queue.iter().next() {
                    candidates.push(last_ran_at + head.cooldown_in_ms as i64);
                }
            }
        }
        candidates.into_iter().min()
    }

    /// Drive the dispatcher until no jobs remain, sleeping between
    /// passes per `next_wake_ms` (§4.5 step 7). Mirrors the teacher's
    /// `JobScheduler::run` poll-and-sleep loop.
    pub async fn run_forever(&self) -> SchedulerResult<()> {
        loop {
            if self.is_unloaded() {
                break;
            }
            self.process_pending_jobs().await?;
            match self.next_wake_ms().await {
                None => break,
                Some(wake_at) => {
                    let now = self.clock.now_ms();
                    let delay_ms = (wake_at - now).max(0) as u64;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
        Ok(())
    }

    pub fn add_observer<F>(&self, listener: F) -> ObserverId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.observers.unsubscribe(id);
    }

    /// Flush persisted state immediately, bypassing the debounce window
    /// (§4.3: also called unconditionally before `unload`).
    pub async fn sync(&self) -> SchedulerResult<()> {
        let bytes = {
            let inner = self.inner.lock().await;
            if !inner.dirty {
                return Ok(());
            }
            let snapshot = Snapshot {
                version: crate::snapshot::SNAPSHOT_VERSION,
                job_queues: inner.queues.iter().map(|(t, q)| (t.clone(), q.jobs())).collect(),
                retry_registry: inner.retry_registry.to_map(),
                stats: self.stats.describe(inner.total_jobs(), inner.retry_registry.total_len()),
                last_clock: inner.last_clock,
            };
            snapshot.serialize()?
        };
        self.storage.set(&self.settings.storage_key, bytes).await?;
        self.inner.lock().await.dirty = false;
        Ok(())
    }

    /// Schedule a debounced flush (§4.3). A flush already in flight
    /// coalesces further dirty marks into its own follow-up check rather
    /// than spawning a second task.
    fn schedule_flush(&self) {
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let scheduler = self.arc_self();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(scheduler.settings.flush_debounce_ms)).await;
            if let Err(err) = scheduler.sync().await {
                warn!(error = %err, "debounced flush failed");
            }
            scheduler.flush_scheduled.store(false, Ordering::SeqCst);
        });
    }

    pub async fn self_checks(&self) -> InvariantReport {
        let inner = self.inner.lock().await;
        selfcheck::run(&inner.queues, &inner.ever_registered_types, &inner.configs, self.settings.global_job_limit)
    }

    pub async fn stats(&self) -> CountersSnapshot {
        let inner = self.inner.lock().await;
        self.stats.describe(inner.total_jobs(), inner.retry_registry.total_len())
    }
}

/// `true` if `candidate` should be preferred over `current` by the §3
/// ordering relation (priority desc, readyAt asc, createdAt asc).
fn is_better(candidate: &Candidate, current: &Candidate) -> bool {
    (candidate.priority, std::cmp::Reverse(candidate.ready_at), std::cmp::Reverse(candidate.created_at))
        > (current.priority, std::cmp::Reverse(current.ready_at), std::cmp::Reverse(current.created_at))
}
