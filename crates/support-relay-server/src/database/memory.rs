use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::TurnStore;
use crate::models::chat::{NewTurn, Turn};
use crate::utils::error::RelayError;

/// Process-local turn store for development and tests.
/// Turns live only as long as the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// conversation_id -> turns in insertion order
    conversations: Arc<DashMap<String, Vec<Turn>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn turn_count(&self) -> usize {
        self.conversations.iter().map(|entry| entry.value().len()).sum()
    }
}

fn chronological(turns: &mut [Turn]) {
    turns.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl TurnStore for InMemoryStore {
    async fn append(&self, turn: NewTurn) -> Result<Turn, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Turn {
            id,
            conversation_id: turn.conversation_id,
            role: turn.role,
            content: turn.content,
            timestamp: turn.timestamp.unwrap_or_else(Utc::now),
            session_handle: turn.session_handle,
        };

        self.conversations
            .entry(stored.conversation_id.clone())
            .or_default()
            .push(stored.clone());

        debug!(
            "Stored {} turn {} for conversation {}",
            stored.role, stored.id, stored.conversation_id
        );
        Ok(stored)
    }

    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Turn>, RelayError> {
        let mut turns = self
            .conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        chronological(&mut turns);
        Ok(turns)
    }

    async fn latest_turn(&self, conversation_id: &str) -> Result<Option<Turn>, RelayError> {
        Ok(self.list_by_conversation(conversation_id).await?.pop())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Turn>, RelayError> {
        let mut turns: Vec<Turn> = self
            .conversations
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        chronological(&mut turns);
        turns.reverse();
        turns.truncate(limit);
        Ok(turns)
    }

    async fn ping(&self) -> Result<(), RelayError> {
        Ok(())
    }
}
