use axum::extract::FromRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{FinalizePreviousMode, Settings};
use crate::database::TurnStore;
use crate::services::conversation::{CompletionEngine, ConversationManager, ConversationOptions};
use crate::services::{EscalationExporter, EscalationQueue, TicketProvider};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn TurnStore>,
    pub conversation_manager: Arc<ConversationManager>,
    pub exporter: Arc<EscalationExporter>,
    pub escalation_queue: Option<EscalationQueue>,
    /// Cancelled on shutdown; requests wait on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the core from explicit collaborators. Must run inside a Tokio
    /// runtime when background escalation is configured.
    pub fn new(
        settings: Settings,
        store: Arc<dyn TurnStore>,
        engine: CompletionEngine,
        tickets: Option<Arc<dyn TicketProvider>>,
    ) -> Self {
        let conversation_manager = Arc::new(ConversationManager::new(
            store.clone(),
            engine,
            ConversationOptions::from_settings(&settings),
        ));
        let exporter = Arc::new(EscalationExporter::new(store.clone(), tickets));

        let escalation_queue = match settings.escalation.finalize_previous {
            FinalizePreviousMode::Background => Some(EscalationQueue::start(
                exporter.clone(),
                settings.escalation.queue_capacity,
                settings.escalation.worker_count,
            )),
            FinalizePreviousMode::Await => None,
        };

        Self {
            settings: Arc::new(settings),
            store,
            conversation_manager,
            exporter,
            escalation_queue,
            shutdown: CancellationToken::new(),
        }
    }
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<EscalationExporter> {
    fn from_ref(state: &AppState) -> Self {
        state.exporter.clone()
    }
}

impl FromRef<AppState> for Arc<dyn TurnStore> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}
