//! chatmux - dispatch engine for chat-bot message streams
//!
//! A [`Mux`] routes each inbound [`Event`] to the first registered handler
//! that claims it. A [`ConversationHandler`] is a handler backed by a
//! per-conversation state machine: its state label and data live in a
//! [`ConversationStore`] and are committed atomically after each claimed
//! event. The [`Runner`] drains an [`EventSource`] into a mux, concurrently
//! across chats and in order within one chat.

pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod event;
pub mod handler;
pub mod mux;
pub mod predicate;
pub mod runner;
pub mod store;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConfigError, StoreConfig};
pub use context::MutationContext;
pub use conversation::{
    ConversationHandler, ConversationHandlerBuilder, Transition, TransitionAction,
};
pub use error::{ActionError, DispatchError};
pub use event::{
    Chat, ChatKind, Command, ConversationKey, Event, KeyStrategy, Media, MediaKind, Payload, User,
};
pub use handler::{Action, Handler, Outcome, SimpleHandler};
pub use mux::Mux;
pub use predicate::{CustomPredicate, Predicate, PredicateError};
pub use runner::{ErrorHook, EventSource, RunStats, Runner};
pub use store::{
    ConversationRecord, ConversationStore, FileStore, FileStoreBuilder, MemoryStore, SqliteStore,
    StoreError, INITIAL_STATE,
};
pub use value::{ConversationData, DataError, Value};
