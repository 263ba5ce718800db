//! Key-value store collaborator.
//!
//! The coordinator records connection summaries and final stats through this
//! narrow interface. Failures are logged by the caller and never affect
//! routing.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

/// Key under which a connection summary is stored.
pub fn connection_key(connection_id: &str) -> String {
    format!("swarm/connections/{connection_id}")
}

/// Key under which final coordinator stats are stored on stop.
pub const STATS_KEY: &str = "swarm/coordinator/stats";

/// Store failure.
#[derive(Debug, Error)]
#[error("memory store failure: {0}")]
pub struct StoreError(pub String);

/// Narrow store/retrieve interface to an external memory subsystem.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    async fn store(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Read the value under `key`.
    async fn retrieve(&self, key: &str) -> Result<Option<Value>, StoreError>;
}

/// Process-local store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _ = self.entries.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_and_retrieve() {
        let store = InMemoryStore::new();
        store.store("k", json!({"v": 1})).await.unwrap();
        assert_eq!(store.retrieve("k").await.unwrap(), Some(json!({"v": 1})));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = InMemoryStore::new();
        assert!(store.retrieve("nope").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_overwrites() {
        let store = InMemoryStore::new();
        store.store("k", json!(1)).await.unwrap();
        store.store("k", json!(2)).await.unwrap();
        assert_eq!(store.retrieve("k").await.unwrap(), Some(json!(2)));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn connection_key_format() {
        assert_eq!(connection_key("conn_1"), "swarm/connections/conn_1");
    }
}
