//! Dispatch errors

use crate::predicate::PredicateError;
use crate::store::StoreError;
use crate::value::DataError;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a handler action
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DataError> for ActionError {
    fn from(e: DataError) -> Self {
        Self::with_source(e.to_string(), e)
    }
}

/// Errors surfaced by [`crate::Mux::dispatch`]
///
/// Every variant means the event was not processed: no state or data change
/// was committed for it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Predicate failed in handler {handler}: {source}")]
    Predicate {
        handler: String,
        source: PredicateError,
    },
    #[error("Action failed in handler {handler} (state {state:?}): {source}")]
    Action {
        handler: String,
        /// Conversation state the action ran in, if any
        state: Option<String>,
        source: ActionError,
    },
    #[error("Action panicked in handler {handler}: {message}")]
    ActionPanicked { handler: String, message: String },
    #[error("Persistence failed in handler {handler}: {source}")]
    Persistence { handler: String, source: StoreError },
}

impl DispatchError {
    /// Name of the handler that failed
    pub fn handler(&self) -> &str {
        match self {
            DispatchError::Predicate { handler, .. }
            | DispatchError::Action { handler, .. }
            | DispatchError::ActionPanicked { handler, .. }
            | DispatchError::Persistence { handler, .. } => handler,
        }
    }
}
