use crate::models::chat::{ChatRequest, ChatResponse};
use crate::state::AppState;
use crate::utils::error::{ApiError, RelayError};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::time::Instant;
use tracing::{info, warn};

pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let start_time = Instant::now();

    if request.message.trim().is_empty() {
        return Err(RelayError::Validation("No message provided".to_string()).into());
    }

    let mut conversation_id = request
        .conversation_id
        .filter(|id| !id.trim().is_empty());

    // A continuation closes out the previous conversation and starts a new one
    if request.finalize_previous {
        if let Some(previous) = conversation_id.take() {
            escalate_previous(&state, &previous).await;
        }
    }

    info!(
        "Chat request: conversation={}, message_len={}",
        conversation_id.as_deref().unwrap_or("<new>"),
        request.message.len()
    );

    let cancel = state.shutdown.child_token();
    let reply = state
        .conversation_manager
        .handle_turn(conversation_id, &request.message, &cancel)
        .await?;

    info!(
        "Chat completed for {} in {}ms",
        reply.conversation_id,
        start_time.elapsed().as_millis()
    );

    Ok(Json(ChatResponse {
        message: reply.message,
        conversation_id: reply.conversation_id,
    }))
}

async fn escalate_previous(state: &AppState, previous: &str) {
    match &state.escalation_queue {
        Some(queue) => {
            if queue.enqueue(previous) {
                info!("Queued escalation of previous conversation {}", previous);
            }
        }
        None => match state.exporter.export(previous, None).await {
            Ok(result) => info!(
                "Escalated previous conversation {} as {}",
                previous, result.record.url
            ),
            Err(e) => warn!("Escalation of previous conversation {} failed: {}", previous, e),
        },
    }
}
