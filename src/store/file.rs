//! Durable file-backed conversation store
//!
//! Each conversation lives in its own JSON document inside the store
//! directory. Commits write a uniquely named temp file, sync it, and rename
//! it over the previous document, so a crash mid-commit leaves the last
//! committed record intact and commits for different keys never touch the
//! same file.

use super::{ConversationRecord, ConversationStore, StoreError};
use crate::event::ConversationKey;
use crate::value::ConversationData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const RECORD_EXTENSION: &str = "json";

/// On-disk shape of one record
#[derive(Debug, Serialize, Deserialize)]
struct RecordDocument {
    key: ConversationKey,
    state: String,
    #[serde(default)]
    data: ConversationData,
    updated_at: DateTime<Utc>,
}

pub struct FileStore {
    dir: PathBuf,
    pretty_print: bool,
    #[cfg(test)]
    fail_before_rename: std::sync::atomic::AtomicBool,
}

pub struct FileStoreBuilder {
    dir: PathBuf,
    pretty_print: bool,
}

impl FileStoreBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pretty_print: false,
        }
    }

    /// Write indented JSON (default: compact)
    #[must_use]
    pub fn pretty_print(mut self, enabled: bool) -> Self {
        self.pretty_print = enabled;
        self
    }

    /// Create the directory if needed and return the store
    pub async fn open(self) -> Result<FileStore, StoreError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(FileStore {
            dir: self.dir,
            pretty_print: self.pretty_print,
            #[cfg(test)]
            fail_before_rename: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        FileStoreBuilder::new(dir).open().await
    }

    pub fn builder(dir: impl Into<PathBuf>) -> FileStoreBuilder {
        FileStoreBuilder::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &ConversationKey) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", encode_file_stem(key.as_str())))
    }

    async fn read_document(
        path: &Path,
        key: Option<&ConversationKey>,
    ) -> Result<Option<RecordDocument>, StoreError> {
        let contents = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc: RecordDocument = serde_json::from_slice(&contents).map_err(|e| {
            StoreError::Corrupted {
                key: key.cloned().unwrap_or_else(|| {
                    ConversationKey::new(path.display().to_string())
                }),
                reason: e.to_string(),
            }
        })?;

        if let Some(expected) = key {
            if &doc.key != expected {
                return Err(StoreError::Corrupted {
                    key: expected.clone(),
                    reason: format!("document belongs to {}", doc.key),
                });
            }
        }
        Ok(Some(doc))
    }

    async fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            #[cfg(test)]
            if self
                .fail_before_rename
                .load(std::sync::atomic::Ordering::SeqCst)
            {
                return Err(std::io::Error::other("injected failure before rename"));
            }

            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = result {
            // The previous document is untouched; only the temp file may linger
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // Persist the rename itself
        self.sync_dir().await?;
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<(), StoreError> {
        fs::File::open(&self.dir).await?.sync_all().await?;
        Ok(())
    }

    // Directories cannot be opened as files here; rename durability is left to the OS
    #[cfg(not(unix))]
    #[allow(clippy::unused_async)]
    async fn sync_dir(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        let path = self.record_path(key);
        Ok(Self::read_document(&path, Some(key))
            .await?
            .map(|doc| ConversationRecord::new(doc.state, doc.data))
            .unwrap_or_default())
    }

    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        let doc = RecordDocument {
            key: key.clone(),
            state: record.state.clone(),
            data: record.data.clone(),
            updated_at: Utc::now(),
        };
        let bytes = if self.pretty_print {
            serde_json::to_vec_pretty(&doc)?
        } else {
            serde_json::to_vec(&doc)?
        };

        self.write_atomically(&self.record_path(key), &bytes).await?;
        tracing::trace!(key = %key, state = %record.state, "Committed record to file");
        Ok(())
    }

    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(doc) = Self::read_document(&path, None).await? {
                keys.push(doc.key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Map a key onto a portable file stem: ASCII alphanumerics, `-` and `_`
/// pass through, every other byte becomes `%XX`.
fn encode_file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    if stem.is_empty() {
        stem.push('%');
    }
    stem
}
