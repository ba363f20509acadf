//! Storage adapter (component B).
//!
//! A single key holding an opaque snapshot blob. Generalized from the
//! teacher's Redis-backed `get`/`set` surface (`cache::RedisPool`, as used
//! throughout `jobs::queue::JobQueue`) down to the narrow contract the
//! spec actually needs: async load/store of one blob, nothing else.
//!
//! Concurrent `set` calls must be serialized by the caller — the
//! scheduler enforces this itself via its single-writer flush task
//! (§4.3), so adapter implementations don't need their own locking for
//! the scheduler's usage pattern, only for any other caller they permit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::SchedulerResult;

/// Key/value blob storage the scheduler persists its snapshot into.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> SchedulerResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> SchedulerResult<()>;
    async fn remove(&self, key: &str) -> SchedulerResult<()>;
}

/// In-memory [`StorageAdapter`], useful for tests and for hosts that
/// haven't wired real durable storage yet. Not durable across restarts —
/// a host that needs real persistence supplies its own adapter.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn get(&self, key: &str) -> SchedulerResult<Option<Vec<u8>>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> SchedulerResult<()> {
        self.data.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SchedulerResult<()> {
        self.data.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_a_value() {
        let storage = InMemoryStorage::new();
        storage.set("k", b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_clears_the_key() {
        let storage = InMemoryStorage::new();
        storage.set("k", b"v".to_vec()).await.unwrap();
        storage.remove("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }
}
