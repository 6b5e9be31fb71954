use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::models::chat::{Role, Turn};
use crate::utils::error::RelayError;

#[derive(Debug, Clone, FromRow)]
pub struct TurnRow {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub session_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TurnRow> for Turn {
    type Error = RelayError;

    fn try_from(row: TurnRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(RelayError::Store)?;
        Ok(Turn {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            timestamp: row.created_at,
            session_handle: row.session_handle,
        })
    }
}
