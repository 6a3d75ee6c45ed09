//! Conversation persistence
//!
//! A store maps a [`ConversationKey`] to its [`ConversationRecord`]. Loading
//! a key that was never committed yields the initial record, so callers
//! never have to special-case new conversations.

mod file;
mod memory;
mod sqlite;

pub use file::{FileStore, FileStoreBuilder};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::event::ConversationKey;
use crate::value::ConversationData;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Label of the initial state: no active dialog
pub const INITIAL_STATE: &str = "";

/// Persisted state and data of one conversation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub state: String,
    #[serde(default)]
    pub data: ConversationData,
}

impl ConversationRecord {
    pub fn new(state: impl Into<String>, data: ConversationData) -> Self {
        Self {
            state: state.into(),
            data,
        }
    }

    /// True when no dialog is active
    pub fn is_initial(&self) -> bool {
        self.state == INITIAL_STATE
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record for {key} is corrupted: {reason}")]
    Corrupted { key: ConversationKey, reason: String },
    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Storage backend for conversation records
///
/// `commit` must be atomic per key: a reader sees either the previous record
/// or the new one, never a mix, and a failed commit leaves the previous
/// record in place.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the record for `key`, or the initial record if none exists
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError>;

    /// Replace the record for `key`
    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError>;

    /// Drop the record for `key`. Never called by the engine; eviction policy
    /// belongs to the integrating application.
    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError>;

    /// Keys with a stored record
    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError>;
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        (**self).load(key).await
    }

    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        (**self).commit(key, record).await
    }

    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError> {
        (**self).evict(key).await
    }

    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError> {
        (**self).keys().await
    }
}
