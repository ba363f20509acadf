//! Serializer (component C).
//!
//! Converts the in-memory scheduler state to/from the single persisted
//! blob (§4.3). Generalizes `Job::to_json`/`from_json`
//! (`rcommerce_core::jobs::job::Job`) from a single job to the whole
//! scheduler state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::Job;
use crate::stats::CountersSnapshot;

/// Current snapshot format. A stored blob tagged with a different
/// version is discarded and counted as corruption (§6).
pub const SNAPSHOT_VERSION: u32 = 1;

/// The persisted shape: `{ version, jobQueues, retryRegistry, stats,
/// lastClock }` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub job_queues: HashMap<String, Vec<Job>>,
    pub retry_registry: HashMap<String, Vec<Job>>,
    pub stats: CountersSnapshot,
    pub last_clock: i64,
}

impl Snapshot {
    pub fn empty(now_ms: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            job_queues: HashMap::new(),
            retry_registry: HashMap::new(),
            stats: CountersSnapshot::default(),
            last_clock: now_ms,
        }
    }

    pub fn serialize(&self) -> SchedulerResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SchedulerError::Serialization(e.to_string()))
    }

    /// Deserialize a stored blob. A malformed payload or a version
    /// mismatch is treated as *missing*, not fatal (§4.2, §6) — callers
    /// should fall back to an empty state and log the corruption rather
    /// than propagate the error.
    pub fn deserialize(bytes: &[u8]) -> SchedulerResult<Self> {
        let raw: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SchedulerError::Deserialization(e.to_string()))?;

        let version = raw
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SchedulerError::Deserialization("missing version tag".to_string()))?;

        if version as u32 != SNAPSHOT_VERSION {
            return Err(SchedulerError::Deserialization(format!(
                "unsupported snapshot version {version}, expected {SNAPSHOT_VERSION}"
            )));
        }

        serde_json::from_value(raw).map_err(|e| SchedulerError::Deserialization(e.to_string()))
    }
}
