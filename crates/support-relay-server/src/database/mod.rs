pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;

use async_trait::async_trait;

use crate::models::chat::{NewTurn, Turn};
use crate::utils::error::RelayError;

pub use memory::InMemoryStore;
pub use models::TurnRow;
pub use pool::DbPool;
pub use repository::Repository;

/// Append-only log of conversation turns, shared by every request.
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn append(&self, turn: NewTurn) -> Result<Turn, RelayError>;

    /// All turns of one conversation, oldest first.
    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Turn>, RelayError>;

    async fn latest_turn(&self, conversation_id: &str) -> Result<Option<Turn>, RelayError>;

    /// Most recent turns across all conversations, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Turn>, RelayError>;

    async fn ping(&self) -> Result<(), RelayError>;
}
