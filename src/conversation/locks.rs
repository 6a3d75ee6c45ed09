//! Per-key mutual exclusion
//!
//! The table holds weak references, so a key's mutex lives only while some
//! task holds or waits for it. Dead entries are pruned whenever the table
//! doubles past its last live size.

use crate::event::ConversationKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const MIN_PRUNE_AT: usize = 64;

struct Table {
    locks: HashMap<ConversationKey, Weak<AsyncMutex<()>>>,
    prune_at: usize,
}

pub(crate) struct KeyLocks {
    table: Mutex<Table>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                locks: HashMap::new(),
                prune_at: MIN_PRUNE_AT,
            }),
        }
    }

    /// Wait until no other task holds `key`
    pub(crate) async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let lock = self.entry(key);
        lock.lock_owned().await
    }

    fn entry(&self, key: &ConversationKey) -> Arc<AsyncMutex<()>> {
        // The table is consistent after every statement, so a poisoned lock is safe to reuse
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(lock) = table.locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        if table.locks.len() >= table.prune_at {
            table.locks.retain(|_, lock| lock.strong_count() > 0);
            table.prune_at = (table.locks.len() * 2).max(MIN_PRUNE_AT);
        }

        let lock = Arc::new(AsyncMutex::new(()));
        table.locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locks
            .len()
    }
}
