//! Ambient scheduler configuration.
//!
//! Mirrors `rcommerce_core::config::Config`'s `#[serde(default =
//! "default_...")]` style and TOML-file loading, narrowed to the knobs
//! the scheduler itself needs (§4.1, §4.4, §4.8, §5).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_global_job_limit")]
    pub global_job_limit: usize,

    /// Two consecutive `now()` readings differing by more than this are
    /// treated as a suspend event (§4.1).
    #[serde(default = "default_max_clock_jump_ms")]
    pub max_clock_jump_ms: i64,

    /// Bound on a legitimate `readyAt`, relative to `now`, used by the
    /// expiry sweep to tell a corrupt timestamp from a distant-future one
    /// (§4.8).
    #[serde(default = "default_max_expire_in_ms")]
    pub max_expire_in_ms: i64,

    /// Upper bound on how long a debounced persistence flush may be
    /// delayed after a mutating batch (§4.3).
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,

    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            global_job_limit: default_global_job_limit(),
            max_clock_jump_ms: default_max_clock_jump_ms(),
            max_expire_in_ms: default_max_expire_in_ms(),
            flush_debounce_ms: default_flush_debounce_ms(),
            storage_key: default_storage_key(),
        }
    }
}

impl SchedulerSettings {
    pub fn load(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SchedulerError::Storage(format!("failed to read config file: {e}")))?;
        let settings: Self = toml::from_str(&contents)
            .map_err(|e| SchedulerError::Deserialization(format!("failed to parse config: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn development() -> Self {
        Self {
            global_job_limit: 200,
            flush_debounce_ms: 250,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.global_job_limit == 0 {
            return Err(SchedulerError::Deserialization(
                "global_job_limit must be > 0".to_string(),
            ));
        }
        if self.max_clock_jump_ms <= 0 {
            return Err(SchedulerError::Deserialization(
                "max_clock_jump_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_global_job_limit() -> usize {
    10_000
}

fn default_max_clock_jump_ms() -> i64 {
    // 6 months, per §4.1's stated default.
    6 * 30 * 24 * 60 * 60 * 1000
}

fn default_max_expire_in_ms() -> i64 {
    365 * 24 * 60 * 60 * 1000
}

fn default_flush_debounce_ms() -> u64 {
    1_000
}

fn default_storage_key() -> String {
    "wtm_job_scheduler.snapshot".to_string()
}
