use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::database::TurnStore;
use crate::models::chat::{ChatMessage, NewTurn, Role, Turn};
use crate::utils::error::RelayError;

use super::context_builder::ContextBuilder;
use super::locks::ConversationLocks;
use super::poller::{poll_until, PollConfig};
use super::session::SessionMapper;
use super::types::{AssistantReply, RunHandle, RunStatus};

/// Trait for one-shot chat completion (stateless mode)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError>;
}

/// Trait for provider-side threads driven by runs (threaded mode)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ThreadProvider: Send + Sync {
    async fn create_session(&self) -> Result<String, RelayError>;

    async fn append_message(&self, thread_id: &str, role: Role, text: &str) -> Result<(), RelayError>;

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunHandle, RelayError>;

    async fn get_run_status(&self, run: &RunHandle) -> Result<RunStatus, RelayError>;

    /// Ask the provider to stop a run; threads reject new messages while a
    /// run is active.
    async fn cancel_run(&self, run: &RunHandle) -> Result<(), RelayError>;

    /// Thread messages, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, RelayError>;
}

/// Which provider capability produces replies. Chosen once at startup.
#[derive(Clone)]
pub enum CompletionEngine {
    Stateless(Arc<dyn ChatCompletion>),
    Threaded {
        provider: Arc<dyn ThreadProvider>,
        assistant_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct ConversationOptions {
    pub system_prompt: String,
    pub history_window: usize,
    pub poll: PollConfig,
    pub serialize_per_conversation: bool,
}

impl ConversationOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            system_prompt: settings.prompts.system_prompt.clone(),
            history_window: settings.conversation.history_window,
            poll: PollConfig::new(
                settings.conversation.poll_interval(),
                settings.conversation.poll_max_wait(),
            ),
            serialize_per_conversation: settings.conversation.serialize_per_conversation,
        }
    }
}

enum Engine {
    Stateless {
        completion: Arc<dyn ChatCompletion>,
        context_builder: ContextBuilder,
    },
    Threaded {
        provider: Arc<dyn ThreadProvider>,
        sessions: SessionMapper,
        assistant_id: String,
    },
}

/// Drives one request/response cycle against the provider and commits
/// both turns to the store.
pub struct ConversationManager {
    store: Arc<dyn TurnStore>,
    engine: Engine,
    locks: ConversationLocks,
    poll: PollConfig,
    serialize_per_conversation: bool,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn TurnStore>,
        engine: CompletionEngine,
        options: ConversationOptions,
    ) -> Self {
        let engine = match engine {
            CompletionEngine::Stateless(completion) => Engine::Stateless {
                completion,
                context_builder: ContextBuilder::new(options.system_prompt, options.history_window),
            },
            CompletionEngine::Threaded {
                provider,
                assistant_id,
            } => Engine::Threaded {
                sessions: SessionMapper::new(store.clone(), provider.clone()),
                provider,
                assistant_id,
            },
        };

        Self {
            store,
            engine,
            locks: ConversationLocks::new(),
            poll: options.poll,
            serialize_per_conversation: options.serialize_per_conversation,
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self.engine {
            Engine::Stateless { .. } => "stateless",
            Engine::Threaded { .. } => "threaded",
        }
    }

    /// Answer one inbound user message, minting a conversation id when
    /// `conversation_id` is absent.
    pub async fn handle_turn(
        &self,
        conversation_id: Option<String>,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RelayError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(RelayError::Validation("No message provided".to_string()));
        }

        let _guard = match (&conversation_id, self.serialize_per_conversation) {
            (Some(id), true) => Some(self.locks.acquire(id).await),
            _ => None,
        };

        let reply = match &self.engine {
            Engine::Stateless {
                completion,
                context_builder,
            } => {
                self.complete_stateless(completion.as_ref(), context_builder, conversation_id, text, cancel)
                    .await?
            }
            Engine::Threaded {
                provider,
                sessions,
                assistant_id,
            } => {
                self.complete_threaded(provider.as_ref(), sessions, assistant_id, conversation_id, text, cancel)
                    .await?
            }
        };

        info!(
            "Conversation {} answered ({} mode, reply_len={})",
            reply.conversation_id,
            self.mode_name(),
            reply.message.len()
        );
        Ok(reply)
    }

    async fn complete_stateless(
        &self,
        completion: &dyn ChatCompletion,
        context_builder: &ContextBuilder,
        conversation_id: Option<String>,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RelayError> {
        let conversation_id = conversation_id.unwrap_or_else(SessionMapper::mint_conversation_id);

        let history = self.store.list_by_conversation(&conversation_id).await?;
        let messages = context_builder.build_request(&history, text);
        debug!(
            "Conversation {}: {} stored turns, sending {} messages",
            conversation_id,
            history.len(),
            messages.len()
        );

        self.store
            .append(NewTurn::new(&conversation_id, Role::User, text))
            .await?;

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            reply = completion.complete(&messages) => reply?,
        };

        self.store
            .append(NewTurn::new(&conversation_id, Role::Assistant, &reply))
            .await?;

        Ok(AssistantReply {
            conversation_id,
            message: reply,
            session_handle: None,
        })
    }

    async fn complete_threaded(
        &self,
        provider: &dyn ThreadProvider,
        sessions: &SessionMapper,
        assistant_id: &str,
        conversation_id: Option<String>,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistantReply, RelayError> {
        let session = sessions.resolve_session(conversation_id.as_deref()).await?;
        let handle = session.session_handle;
        let conversation_id = session.conversation_id;

        self.store
            .append(NewTurn::new(&conversation_id, Role::User, text).with_session(Some(handle.clone())))
            .await?;

        provider.append_message(&handle, Role::User, text).await?;
        let run = provider.start_run(&handle, assistant_id).await?;
        debug!("Started run {} on thread {}", run.run_id, handle);

        let status = match poll_until(self.poll, cancel, || provider.get_run_status(&run)).await {
            Ok(status) => status,
            Err(err @ (RelayError::RunTimedOut { .. } | RelayError::Cancelled)) => {
                // Stop waiting locally and free the thread for the next turn
                if let Err(cancel_err) = provider.cancel_run(&run).await {
                    warn!(
                        "Failed to cancel run {} on thread {}: {}",
                        run.run_id, handle, cancel_err
                    );
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        if !status.is_success() {
            warn!(
                "Run {} on thread {} ended as '{}'",
                run.run_id, handle, status
            );
            return Err(RelayError::RunFailed {
                status: status.to_string(),
            });
        }

        let reply = provider
            .list_messages(&handle)
            .await?
            .into_iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content)
            .ok_or_else(|| {
                RelayError::Provider(format!(
                    "run {} completed without an assistant message",
                    run.run_id
                ))
            })?;

        self.store
            .append(
                NewTurn::new(&conversation_id, Role::Assistant, &reply)
                    .with_session(Some(handle.clone())),
            )
            .await?;

        Ok(AssistantReply {
            conversation_id,
            message: reply,
            session_handle: Some(handle),
        })
    }

    /// Full history of a conversation, oldest first.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Vec<Turn>, RelayError> {
        let turns = self.store.list_by_conversation(conversation_id).await?;
        if turns.is_empty() {
            return Err(RelayError::NoSuchConversation(conversation_id.to_string()));
        }
        Ok(turns)
    }

    pub async fn recent_turns(&self, limit: usize) -> Result<Vec<Turn>, RelayError> {
        self.store.list_recent(limit).await
    }
}
