//! Clock abstraction (component A).
//!
//! The scheduler never reads the wall clock directly outside this trait,
//! so a host can swap in a deterministic clock for tests or a monotonic
//! source where available. `now_ms` is milliseconds since the Unix epoch.

use tracing::warn;

/// Supplies current time to the scheduler.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Default clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Detects suspicious jumps between consecutive `now()` reads.
///
/// A suspend/resume cycle (laptop lid closed for a week, host process
/// frozen) looks exactly like a multi-month forward jump; a user turning
/// their system clock back looks like a backward jump. Either direction
/// triggers the expiry sweep (§4.8) before further scheduling.
pub struct ClockJumpDetector {
    max_jump_ms: i64,
    last_observed_ms: Option<i64>,
}

impl ClockJumpDetector {
    pub fn new(max_jump_ms: i64) -> Self {
        Self {
            max_jump_ms,
            last_observed_ms: None,
        }
    }

    /// Record a new `now()` reading and report whether it constitutes a
    /// suspect jump relative to the previous reading.
    pub fn observe(&mut self, now_ms: i64) -> bool {
        let jumped = match self.last_observed_ms {
            Some(prev) => {
                let delta = (now_ms - prev).abs();
                if delta > self.max_jump_ms {
                    warn!(
                        previous_ms = prev,
                        now_ms, delta_ms = delta, "clock jump detected"
                    );
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        self.last_observed_ms = Some(now_ms);
        jumped
    }
}
