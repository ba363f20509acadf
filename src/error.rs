//! Error types for the scheduler.
//!
//! Two distinct taxonomies live here, on purpose:
//! - [`SchedulerError`] is the scheduler's *own* operational failure mode
//!   (storage I/O, a corrupt snapshot, registering a handler twice).
//! - [`HandlerError`] is what a registered handler reports back about a
//!   single job (§7 of the spec): recoverable errors feed the retry
//!   engine, permanent ones don't.

use serde::{Deserialize, Serialize};

/// Result type used by the scheduler's own operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Errors raised by the scheduler itself, as opposed to job outcomes.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("snapshot serialization error: {0}")]
    Serialization(String),

    #[error("snapshot deserialization error: {0}")]
    Deserialization(String),

    #[error("handler already registered for type: {0}")]
    DuplicateHandler(String),

    #[error("scheduler has been unloaded")]
    Unloaded,
}

/// The outcome a [`crate::job::JobHandler`] reports for a single job.
///
/// A successful handler returns the list of jobs it wants spawned
/// (possibly empty). A failing handler tags the error as recoverable or
/// permanent — an unclassified error must be treated as permanent per
/// §7: "Missing marker ⇒ treated as non-recoverable."
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum HandlerError {
    /// Transient failure (network timeout, rate limit, temporary
    /// unavailability). Eligible for the retry engine.
    #[error("recoverable: {0}")]
    Recoverable(String),

    /// Non-recoverable failure (bad job, validation failure, permanent
    /// upstream rejection). Never retried.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Whether this error is eligible for the retry engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HandlerError::Recoverable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Recoverable(msg) | HandlerError::Permanent(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_is_recoverable() {
        let err = HandlerError::Recoverable("timeout".to_string());
        assert!(err.is_recoverable());
        assert_eq!(err.message(), "timeout");
    }

    #[test]
    fn permanent_is_not_recoverable() {
        let err = HandlerError::Permanent("bad job".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn scheduler_error_displays() {
        let err = SchedulerError::DuplicateHandler("ping".to_string());
        assert!(err.to_string().contains("ping"));
    }
}
