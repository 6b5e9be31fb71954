use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

/// Relay routes, served both at the root and under `/api`.
fn relay_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(handlers::chat::chat_handler))
        .route(
            "/conversations/{conversation_id}",
            get(handlers::conversations::get_conversation_handler),
        )
        .route(
            "/conversations/{conversation_id}/finalize",
            post(handlers::conversations::finalize_conversation_handler),
        )
        .route("/messages", get(handlers::conversations::list_messages_handler))
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
}

pub fn build_router(state: AppState) -> Router {
    let cors_permissive = state.settings.server.cors_permissive;

    let mut router = Router::new()
        .merge(relay_routes())
        .nest("/api", relay_routes())
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        );

    if cors_permissive {
        router = router.layer(CorsLayer::permissive());
    }

    router
}
