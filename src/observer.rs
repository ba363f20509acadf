//! Observer bus (component I).
//!
//! Generalizes the teacher's `jobs::metrics::MetricsCollector` (a fixed
//! Prometheus-shaped sink) into an open `subscribe`/`unsubscribe` bus
//! callers can attach arbitrary listeners to (§5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::HandlerError;
use crate::job::Job;

/// One lifecycle event a registered observer may receive (§5). Each
/// carries the job that triggered it (payload included, per §4.9) and,
/// for failures, the classified error.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    JobRegistered { job: Job },
    /// No `Job` exists yet at rejection time (rejection happens against a
    /// bare submission), so the args are carried directly instead.
    JobRejected {
        job_type: String,
        args: serde_json::Value,
        reason: RejectReason,
    },
    JobStarted { job: Job },
    JobSucceeded { job: Job },
    JobFailed { job: Job, error: HandlerError },
    JobExpired { job: Job },
}

/// Why `register_job` declined a submission (§4.4 step 2-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownType,
    GlobalQuotaExceeded,
    PerTypeQuotaExceeded,
}

pub type ObserverId = u64;

type Listener = dyn Fn(&SchedulerEvent) + Send + Sync;

/// Fan-out point for [`SchedulerEvent`]s. Listeners run synchronously and
/// inline with whatever triggered the event (admission, a dispatch pass),
/// so they must stay cheap — this mirrors `MetricsCollector::record_*`,
/// which likewise updates in-process counters rather than doing I/O.
#[derive(Default)]
pub struct ObserverBus {
    listeners: RwLock<Vec<(ObserverId, Arc<Listener>)>>,
    next_id: AtomicU64,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ObserverId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().unwrap().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.listeners.write().unwrap().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn emit(&self, event: SchedulerEvent) {
        for (_, listener) in self.listeners.read().unwrap().iter() {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for ObserverBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("listener_count", &self.listeners.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HandlerConfig, JobSubmission};
    use std::sync::atomic::AtomicUsize;

    fn sample_job() -> Job {
        Job::admit(
            JobSubmission::new("t", serde_json::json!({"k": "v"})),
            &HandlerConfig::with_global_default(1000),
            0,
        )
    }

    #[test]
    fn subscribers_receive_emitted_events() {
        let bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(SchedulerEvent::JobRegistered { job: sample_job() });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(id);

        bus.emit(SchedulerEvent::JobRegistered { job: sample_job() });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multiple_subscribers_all_fire() {
        let bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count_clone = count.clone();
            bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(SchedulerEvent::JobExpired { job: sample_job() });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn job_failed_carries_the_classified_error() {
        let bus = ObserverBus::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        bus.subscribe(move |event| {
            if let SchedulerEvent::JobFailed { error, .. } = event {
                *seen_clone.lock().unwrap() = Some(error.clone());
            }
        });

        bus.emit(SchedulerEvent::JobFailed {
            job: sample_job(),
            error: HandlerError::Permanent("bad job".to_string()),
        });

        assert!(matches!(seen.lock().unwrap().as_ref(), Some(HandlerError::Permanent(_))));
    }
}
