use std::sync::Arc;
use tracing::{debug, info};

use super::manager::ThreadProvider;
use super::types::SessionResolution;
use crate::database::TurnStore;
use crate::utils::error::RelayError;

/// Maps conversation ids onto provider thread handles.
///
/// A handle is created lazily on the first turn and then read back from
/// the most recent stored turn, so a conversation keeps one thread for its
/// lifetime. Callers serialize per conversation id.
pub struct SessionMapper {
    store: Arc<dyn TurnStore>,
    provider: Arc<dyn ThreadProvider>,
}

impl SessionMapper {
    pub fn new(store: Arc<dyn TurnStore>, provider: Arc<dyn ThreadProvider>) -> Self {
        Self { store, provider }
    }

    pub fn mint_conversation_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub async fn resolve_session(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<SessionResolution, RelayError> {
        let conversation_id = match conversation_id {
            Some(id) => id.to_string(),
            None => {
                let id = Self::mint_conversation_id();
                let session_handle = self.provider.create_session().await?;
                info!("New conversation {} bound to thread {}", id, session_handle);
                return Ok(SessionResolution {
                    conversation_id: id,
                    session_handle,
                    is_new: true,
                });
            }
        };

        let existing = self
            .store
            .latest_turn(&conversation_id)
            .await?
            .and_then(|turn| turn.session_handle);

        if let Some(session_handle) = existing {
            debug!("Reusing thread {} for conversation {}", session_handle, conversation_id);
            return Ok(SessionResolution {
                conversation_id,
                session_handle,
                is_new: false,
            });
        }

        // Known id without a bound thread (never started, or partially initialised)
        let session_handle = self.provider.create_session().await?;
        info!(
            "Conversation {} had no thread, bound to new thread {}",
            conversation_id, session_handle
        );
        Ok(SessionResolution {
            conversation_id,
            session_handle,
            is_new: true,
        })
    }
}
