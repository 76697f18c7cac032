//! In-memory secret store

use super::{SecretRecord, SecretStore};
use crate::error::BridgeResult;
use crate::field::Fr;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store, lost on exit
#[derive(Default)]
pub struct MemorySecretStore {
    records: RwLock<HashMap<String, SecretRecord>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<SecretRecord>> {
        Ok(self.records.read().await.get(&key.to_ascii_lowercase()).cloned())
    }

    async fn put(&self, mut record: SecretRecord) -> BridgeResult<()> {
        record.key = record.key.to_ascii_lowercase();
        self.records.write().await.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.records.write().await.remove(&key.to_ascii_lowercase());
        Ok(())
    }

    async fn list_all(&self, owner: &Fr) -> BridgeResult<Vec<SecretRecord>> {
        let mut records: Vec<SecretRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner == *owner)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
