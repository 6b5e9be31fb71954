use super::{DbPool, TurnRow, TurnStore};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::chat::{NewTurn, Turn};
use crate::utils::error::RelayError;

const TURN_COLUMNS: &str = "id, conversation_id, role, content, session_handle, created_at";

/// Postgres-backed conversation store.
pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the turn table and its lookup index if they are missing.
    pub async fn ensure_chat_tables(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_turns (
                id BIGSERIAL PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                session_handle TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_chat_turns_conversation
               ON chat_turns(conversation_id, created_at, id)"#,
        )
        .execute(pool)
        .await?;

        debug!("Chat turn table ensured");
        Ok(())
    }
}

#[async_trait]
impl TurnStore for Repository {
    async fn append(&self, turn: NewTurn) -> Result<Turn, RelayError> {
        let row = sqlx::query_as::<_, TurnRow>(&format!(
            r#"INSERT INTO chat_turns (conversation_id, role, content, session_handle, created_at)
               VALUES ($1, $2, $3, $4, COALESCE($5, NOW()))
               RETURNING {}"#,
            TURN_COLUMNS
        ))
        .bind(&turn.conversation_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.session_handle)
        .bind(turn.timestamp)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!(
            "Stored {} turn {} for conversation {}",
            row.role, row.id, row.conversation_id
        );
        Turn::try_from(row)
    }

    async fn list_by_conversation(&self, conversation_id: &str) -> Result<Vec<Turn>, RelayError> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            r#"SELECT {} FROM chat_turns
               WHERE conversation_id = $1
               ORDER BY created_at ASC, id ASC"#,
            TURN_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn latest_turn(&self, conversation_id: &str) -> Result<Option<Turn>, RelayError> {
        let row = sqlx::query_as::<_, TurnRow>(&format!(
            r#"SELECT {} FROM chat_turns
               WHERE conversation_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT 1"#,
            TURN_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(Turn::try_from).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Turn>, RelayError> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            r#"SELECT {} FROM chat_turns
               ORDER BY created_at DESC, id DESC
               LIMIT $1"#,
            TURN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(Turn::try_from).collect()
    }

    async fn ping(&self) -> Result<(), RelayError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(())
    }
}
