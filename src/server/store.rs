//! Pluggable key/value persistence for room records.
//!
//! The mutation service reads and writes whole JSON documents through
//! [`RecordStore`]; swapping the in-memory implementation for Redis or a
//! database only requires implementing this trait. Key layout is the
//! service's concern (`room:{uuid}`), not the store's.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by a [`RecordStore`] backend.
///
/// These are infrastructure failures; the service maps every one of them to
/// a generic internal error before anything reaches a client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is unreachable or refused the operation.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific failure (I/O, protocol, encoding at the backend).
    #[error("record store backend error: {0}")]
    Backend(String),
}

/// Async key/value document storage.
///
/// Values are opaque strings; the service stores serialized JSON. All
/// methods take `&self` — implementations handle their own interior
/// synchronization.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Fetch the document under `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous document.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove the document under `key`. Deleting a missing key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List every key starting with `prefix`. Order is unspecified but must
    /// be stable between calls while the key set is unchanged.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory [`RecordStore`] backed by a concurrent map.
///
/// The default backend for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        // DashMap iteration order is arbitrary; sort for a stable scan order.
        keys.sort_unstable();
        Ok(keys)
    }
}
