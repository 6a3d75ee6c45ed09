//! Environment configuration

use crate::runner::DEFAULT_MAX_IN_FLIGHT;
use crate::store::{ConversationStore, FileStore, MemoryStore, SqliteStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const STORE_VAR: &str = "CHATMUX_STORE";
pub const MAX_IN_FLIGHT_VAR: &str = "CHATMUX_MAX_IN_FLIGHT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var} value {value:?}: expected memory, file:<dir> or sqlite:<path>")]
    InvalidStore { var: &'static str, value: String },

    #[error("invalid {var} value {value:?}: expected an integer of at least 1")]
    InvalidMaxInFlight { var: &'static str, value: String },
}

/// Where conversation records live
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreConfig {
    #[default]
    Memory,
    /// One JSON document per conversation in this directory
    File(PathBuf),
    /// SQLite database at this path
    Sqlite(PathBuf),
}

impl StoreConfig {
    /// Parse `memory`, `file:<dir>` or `sqlite:<path>`
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidStore {
            var: STORE_VAR,
            value: value.to_string(),
        };

        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        let (scheme, path) = trimmed.split_once(':').ok_or_else(invalid)?;
        if path.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "file" => Ok(Self::File(PathBuf::from(path))),
            "sqlite" => Ok(Self::Sqlite(PathBuf::from(path))),
            _ => Err(invalid()),
        }
    }

    pub async fn open(&self) -> Result<Arc<dyn ConversationStore>, StoreError> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStore::new())),
            Self::File(dir) => {
                tracing::info!(dir = %dir.display(), "Opening file store");
                Ok(Arc::new(FileStore::open(dir.clone()).await?))
            }
            Self::Sqlite(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tracing::info!(path = %path.display(), "Opening SQLite store");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store: StoreConfig,
    pub max_in_flight: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(STORE_VAR) {
            config.store = StoreConfig::parse(&value)?;
        }

        if let Some(value) = lookup(MAX_IN_FLIGHT_VAR) {
            config.max_in_flight = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::InvalidMaxInFlight {
                    var: MAX_IN_FLIGHT_VAR,
                    value,
                })?;
        }

        Ok(config)
    }
}
