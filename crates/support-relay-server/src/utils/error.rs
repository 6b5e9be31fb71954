use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds crossing the conversation core's component boundaries.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Assistant run ended with status '{status}'")]
    RunFailed { status: String },

    #[error("Assistant run still pending after {waited:?}")]
    RunTimedOut { waited: Duration },

    #[error("Request cancelled while waiting for the assistant")]
    Cancelled,

    #[error("Conversation not found: {0}")]
    NoSuchConversation(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Transient provider conditions a caller may reasonably try again.
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::ProviderUnavailable(_) | RelayError::RunTimedOut { .. }
        )
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Store(err.to_string())
    }
}

/// HTTP-facing error; every variant renders as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::Validation(_) => ApiError::BadRequest(message),
            RelayError::NoSuchConversation(_) => ApiError::NotFound(message),
            RelayError::ProviderUnavailable(_) => ApiError::ServiceUnavailable(message),
            RelayError::Provider(_) | RelayError::RunFailed { .. } | RelayError::ExportFailed(_) => {
                ApiError::BadGateway(message)
            }
            RelayError::RunTimedOut { .. } => ApiError::GatewayTimeout(message),
            RelayError::Cancelled | RelayError::Store(_) | RelayError::Config(_) => {
                ApiError::InternalError(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::BadGateway(msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::GatewayTimeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
