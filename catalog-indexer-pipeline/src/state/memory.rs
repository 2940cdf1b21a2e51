//! In-memory checkpoint store for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CheckpointError, CheckpointStore};

/// Watermarks kept in a map; lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        Ok(self.values.read().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), CheckpointError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_indexer_shared::epoch_min;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);

        store.set("k", epoch_min()).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(epoch_min()));
        assert_eq!(store.get("other").await.unwrap(), None);
        assert_eq!(store.len().await, 1);
    }
}
