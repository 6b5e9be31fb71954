use crate::models::chat::{FinalizeRequest, FinalizeResponse, ListMessagesQuery, MessageView, TurnView};
use crate::services::{ConversationManager, EscalationExporter};
use crate::utils::error::ApiError;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

const DEFAULT_MESSAGE_LIMIT: usize = 50;
const MAX_MESSAGE_LIMIT: usize = 500;

pub async fn get_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<TurnView>>, ApiError> {
    let turns = manager.conversation(&conversation_id).await?;
    Ok(Json(turns.into_iter().map(TurnView::from).collect()))
}

pub async fn finalize_conversation_handler(
    State(exporter): State<Arc<EscalationExporter>>,
    Path(conversation_id): Path<String>,
    body: Bytes,
) -> Result<Json<FinalizeResponse>, ApiError> {
    // The body is optional; only a contact address may be supplied
    let request: FinalizeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        FinalizeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid finalize body: {}", e)))?
    };

    info!("Finalize request for conversation {}", conversation_id);
    let result = exporter
        .export(&conversation_id, request.contact_email.as_deref())
        .await?;

    Ok(Json(FinalizeResponse {
        status: "exported".to_string(),
        message: format!(
            "Conversation {} exported with {} messages",
            result.conversation_id, result.turn_count
        ),
        card_id: result.record.id,
        card_url: result.record.url,
    }))
}

/// Most recent turns across all conversations, newest first.
pub async fn list_messages_handler(
    State(manager): State<Arc<ConversationManager>>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);

    let turns = manager.recent_turns(limit).await?;
    Ok(Json(turns.into_iter().map(MessageView::from).collect()))
}
