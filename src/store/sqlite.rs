//! SQLite-backed conversation store

use super::{ConversationRecord, ConversationStore, StoreError};
use crate::event::ConversationKey;
use crate::value::ConversationData;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQL schema for initialization
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversation_records (
    key TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT '',
    data TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_records_updated
    ON conversation_records(updated_at DESC);
";

/// Thread-safe store handle. Every commit is a single upsert, so SQLite's
/// own transaction guarantees make it atomic.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (lost when the handle is dropped)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("sqlite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        let row: Option<(String, String)> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT state, data FROM conversation_records WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((state, data_json)) = row else {
            return Ok(ConversationRecord::default());
        };
        let data: ConversationData =
            serde_json::from_str(&data_json).map_err(|e| StoreError::Corrupted {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        Ok(ConversationRecord::new(state, data))
    }

    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        let data_json = serde_json::to_string(&record.data)?;
        let now = Utc::now();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversation_records (key, state, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                state = excluded.state,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![key.as_str(), record.state, data_json, now.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM conversation_records WHERE key = ?1",
            params![key.as_str()],
        )?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM conversation_records ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|key| key.map(ConversationKey::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = ConversationKey::for_chat(1);
        assert!(store.load(&key).await.unwrap().is_initial());

        let mut data = ConversationData::new();
        data.insert("photoDescription", "Paris trip");
        data.insert("attempts", 2_i64);
        let record = ConversationRecord::new("confirm_submission", data);

        store.commit(&key, &record).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), record);

        let reset = ConversationRecord::default();
        store.commit(&key, &reset).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), reset);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("records.db");
        let key = ConversationKey::for_chat_user(-5, 6);

        let mut data = ConversationData::new();
        data.insert("nested", Value::List(vec![Value::Int(1), Value::Text("x".into())]));
        let record = ConversationRecord::new("upload_photo", data);

        SqliteStore::open(&path)
            .unwrap()
            .commit(&key, &record)
            .await
            .unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load(&key).await.unwrap(), record);
        assert_eq!(reopened.keys().await.unwrap(), vec![key.clone()]);

        reopened.evict(&key).await.unwrap();
        assert!(reopened.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_float_fails_commit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = ConversationKey::for_chat(2);
        let mut data = ConversationData::new();
        data.insert("score", 0.5);
        let first = ConversationRecord::new("rating", data);
        store.commit(&key, &first).await.unwrap();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut data = ConversationData::new();
            data.insert("score", Value::List(vec![Value::Float(bad)]));
            let err = store
                .commit(&key, &ConversationRecord::new("rating", data))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Serialization(_)), "{bad} was accepted");
        }
        assert_eq!(store.load(&key).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_corrupted_data_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO conversation_records (key, state, data, updated_at)
                 VALUES ('1', 'x', 'not json', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let err = store.load(&ConversationKey::for_chat(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}
