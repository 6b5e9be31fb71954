use std::sync::Arc;
use tracing::{info, warn};

use crate::database::TurnStore;
use crate::models::chat::{Role, Turn};
use crate::utils::error::RelayError;

/// Record created on the external board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    pub id: String,
    pub url: String,
}

/// Trait for the external ticketing system
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TicketProvider: Send + Sync {
    async fn create_record(&self, title: &str, body: &str) -> Result<TicketRecord, RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResult {
    pub conversation_id: String,
    pub record: TicketRecord,
    pub turn_count: usize,
}

/// Exports a finished conversation to the ticketing system as one record.
pub struct EscalationExporter {
    store: Arc<dyn TurnStore>,
    tickets: Option<Arc<dyn TicketProvider>>,
}

impl EscalationExporter {
    pub fn new(store: Arc<dyn TurnStore>, tickets: Option<Arc<dyn TicketProvider>>) -> Self {
        Self { store, tickets }
    }

    pub fn is_enabled(&self) -> bool {
        self.tickets.is_some()
    }

    pub async fn export(
        &self,
        conversation_id: &str,
        contact_email: Option<&str>,
    ) -> Result<ExportResult, RelayError> {
        let turns = self.store.list_by_conversation(conversation_id).await?;
        if turns.is_empty() {
            return Err(RelayError::NoSuchConversation(conversation_id.to_string()));
        }

        let tickets = self
            .tickets
            .as_ref()
            .ok_or_else(|| RelayError::ExportFailed("ticketing is not configured".to_string()))?;

        let title = record_title(conversation_id);
        let body = record_body(&turns, contact_email);

        let record = tickets.create_record(&title, &body).await.map_err(|e| match e {
            RelayError::ExportFailed(msg) => RelayError::ExportFailed(msg),
            other => RelayError::ExportFailed(other.to_string()),
        })?;

        info!(
            "Exported conversation {} ({} turns) as record {}",
            conversation_id,
            turns.len(),
            record.id
        );
        Ok(ExportResult {
            conversation_id: conversation_id.to_string(),
            record,
            turn_count: turns.len(),
        })
    }
}

pub fn record_title(conversation_id: &str) -> String {
    format!("Support conversation {}", conversation_id)
}

pub fn record_body(turns: &[Turn], contact_email: Option<&str>) -> String {
    let mut blocks = Vec::with_capacity(turns.len() + 1);

    if let Some(email) = contact_email.map(str::trim).filter(|e| !e.is_empty()) {
        blocks.push(format!("Customer contact: {}", email));
    }

    blocks.extend(turns.iter().map(|turn| {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        format!("[{}] {}: {}", turn.timestamp.to_rfc3339(), speaker, turn.content)
    }));

    blocks.join("\n\n")
}

/// Background export of previous conversations, drained by worker tasks.
#[derive(Clone)]
pub struct EscalationQueue {
    sender: flume::Sender<String>,
}

impl EscalationQueue {
    /// Spawn `worker_count` workers draining a queue of `capacity` ids.
    /// Workers stop once every queue handle is dropped.
    pub fn start(exporter: Arc<EscalationExporter>, capacity: usize, worker_count: usize) -> Self {
        let (sender, receiver) = flume::bounded::<String>(capacity);

        info!(
            "Starting escalation queue: capacity={}, workers={}",
            capacity, worker_count
        );

        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let exporter = exporter.clone();

            tokio::spawn(async move {
                while let Ok(conversation_id) = receiver.recv_async().await {
                    match exporter.export(&conversation_id, None).await {
                        Ok(result) => info!(
                            "Worker {} escalated conversation {} as {}",
                            worker_id, conversation_id, result.record.url
                        ),
                        Err(e) => warn!(
                            "Worker {} failed to escalate conversation {}: {}",
                            worker_id, conversation_id, e
                        ),
                    }
                }
            });
        }

        Self { sender }
    }

    /// Queue an export without waiting for it. Returns false when the queue
    /// is full or closed; the export is dropped in that case.
    pub fn enqueue(&self, conversation_id: &str) -> bool {
        match self.sender.try_send(conversation_id.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to enqueue escalation for {}: {}", conversation_id, e);
                false
            }
        }
    }
}
