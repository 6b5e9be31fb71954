use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use support_relay_server::config::{DatabaseBackend, LlmMode, Settings};
use support_relay_server::database::{DbPool, InMemoryStore, Repository, TurnStore};
use support_relay_server::services::conversation::CompletionEngine;
use support_relay_server::services::{LlmService, TicketProvider, TicketService};
use support_relay_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,support_relay_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting support relay server...");

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;
    info!("Configuration loaded");

    let store = build_store(&settings).await?;

    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
    let engine = match settings.llm.mode {
        LlmMode::Stateless => CompletionEngine::Stateless(llm_service),
        LlmMode::Threaded => {
            let assistant_id = llm_service
                .ensure_assistant(&settings.prompts.system_prompt)
                .await?;
            info!("Using assistant {}", assistant_id);
            CompletionEngine::Threaded {
                provider: llm_service,
                assistant_id,
            }
        }
    };

    let tickets: Option<Arc<dyn TicketProvider>> = if settings.ticketing.enabled {
        Some(Arc::new(TicketService::new(settings.ticketing.clone())?))
    } else {
        warn!("Ticketing disabled; finalize requests will fail");
        None
    };

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(settings, store, engine, tickets);
    let shutdown = state.shutdown.clone();
    info!(
        "Conversation mode: {}",
        state.conversation_manager.mode_name()
    );

    let app = build_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");

    Ok(())
}

async fn build_store(settings: &Settings) -> Result<Arc<dyn TurnStore>> {
    match settings.database.backend {
        DatabaseBackend::Memory => {
            info!("Using in-memory turn store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        DatabaseBackend::Postgres => {
            let db_pool = DbPool::new(&settings.database).await?;
            info!("Database connection established");

            let repository = Repository::new(db_pool);
            if settings.database.run_migrations {
                repository.ensure_chat_tables().await?;
            }
            Ok(Arc::new(repository))
        }
    }
}

/// Resolves on ctrl-c or SIGTERM, cancelling `shutdown` so in-flight
/// requests stop polling the provider.
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
