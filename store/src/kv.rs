use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("kv request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("kv returned status {0}: {1}")]
    Status(u16, String),
    #[error("kv request timed out")]
    Timeout,
    #[error("invalid kv response: {0}")]
    InvalidResponse(String),
    #[error("invalid kv address: {0}")]
    InvalidAddress(String),
    #[error("invalid kv key `{0}`")]
    InvalidKey(String),
}

/// A stored value with the index of its last modification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Bytes,
    pub modify_index: u64,
}

/// Raw key/value access. Implementations carry no domain knowledge.
///
/// Dropping any returned future abandons the in-flight operation.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError>;

    /// Writes only if the key's modify index still equals `modify_index`.
    /// An index of 0 writes only if the key does not exist. Returns whether the
    /// write happened.
    async fn put_cas(&self, key: &str, value: Bytes, modify_index: u64) -> Result<bool, KvError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// Process local store, for tests and single node deployments.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, KvEntry>>,
    last_index: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn next_index(&self) -> u64 {
        self.last_index.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let modify_index = self.next_index();
        self.entries.write().insert(
            key.to_string(),
            KvEntry {
                value,
                modify_index,
            },
        );
        Ok(())
    }

    async fn put_cas(&self, key: &str, value: Bytes, modify_index: u64) -> Result<bool, KvError> {
        let mut entries = self.entries.write();
        let current = entries.get(key).map(|entry| entry.modify_index).unwrap_or(0);
        if current != modify_index {
            return Ok(false);
        }

        let modify_index = self.next_index();
        entries.insert(
            key.to_string(),
            KvEntry {
                value,
                modify_index,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
