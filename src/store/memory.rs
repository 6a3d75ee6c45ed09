//! In-memory conversation store (process lifetime only)

use super::{ConversationRecord, ConversationStore, StoreError};
use crate::event::ConversationKey;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ConversationKey, ConversationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned().unwrap_or_default())
    }

    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError> {
        let mut keys: Vec<_> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
