use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-conversation mutual exclusion, so concurrent turns on one
/// conversation cannot each create a provider thread.
#[derive(Default)]
pub struct ConversationLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation_id`.
    pub async fn acquire(&self, conversation_id: &str) -> ConversationGuard<'_> {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Built before waiting so a dropped acquire still prunes its entry;
        // the pending lock future (and its Arc) is dropped before the guard.
        let mut guard = ConversationGuard {
            locks: &self.locks,
            key: conversation_id.to_string(),
            guard: None,
        };
        guard.guard = Some(lock.lock_owned().await);
        debug!("Acquired conversation lock for {}", conversation_id);

        guard
    }

    /// Number of conversations currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct ConversationGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still holds the mutex: nobody is waiting on it.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
