//! Mock implementations for testing
//!
//! Instrumented stores and handlers that record what the engine did.

use crate::error::{ActionError, DispatchError};
use crate::event::{ConversationKey, Event};
use crate::handler::{Handler, Outcome, SimpleHandler};
use crate::predicate::Predicate;
use crate::store::{ConversationRecord, ConversationStore, MemoryStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Recording Store
// ============================================================================

/// In-memory store that records every call and can be told to fail
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    loads: AtomicUsize,
    commits: Mutex<Vec<(ConversationKey, ConversationRecord)>>,
    fail_loads: AtomicBool,
    fail_commits: AtomicBool,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn recorded_commits(&self) -> Vec<(ConversationKey, ConversationRecord)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Seed a record without it counting as a commit
    pub async fn seed(&self, key: &ConversationKey, record: &ConversationRecord) {
        self.inner.commit(key, record).await.unwrap();
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn load(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("injected load failure".to_string()));
        }
        self.inner.load(key).await
    }

    async fn commit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected commit failure",
            )));
        }
        self.commits
            .lock()
            .unwrap()
            .push((key.clone(), record.clone()));
        self.inner.commit(key, record).await
    }

    async fn evict(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.inner.evict(key).await
    }

    async fn keys(&self) -> Result<Vec<ConversationKey>, StoreError> {
        self.inner.keys().await
    }
}

// ============================================================================
// Counting Handler
// ============================================================================

/// Simple handler that counts how often its action ran
pub struct CountingHandler {
    inner: SimpleHandler,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl CountingHandler {
    pub fn new(name: &str, predicate: Predicate) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = SimpleHandler::new(name, predicate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Self { inner, calls }
    }

    /// Handler whose action always fails
    pub fn failing(name: &str, predicate: Predicate) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = SimpleHandler::new(name, predicate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::new("instrumented failure"))
        });
        Self { inner, calls }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CountingHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, event: &Event) -> Result<Outcome, DispatchError> {
        self.inner.handle(event).await
    }
}
