//! Conversation orchestration core
//!
//! - Session mapping: conversation id -> provider thread handle
//! - Context windowing for stateless completions
//! - Completion orchestration with bounded run polling
//! - Per-conversation serialization of turns

mod context_builder;
mod locks;
pub mod manager;
mod poller;
mod session;
pub mod types;

pub use context_builder::{build_context, ContextBuilder, DEFAULT_HISTORY_WINDOW};
pub use locks::{ConversationGuard, ConversationLocks};
pub use manager::{
    ChatCompletion, CompletionEngine, ConversationManager, ConversationOptions, ThreadProvider,
};
pub use poller::{poll_until, PollConfig};
pub use session::SessionMapper;
pub use types::{AssistantReply, RunHandle, RunStatus, SessionResolution};
