use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::error::RelayError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant for an e-commerce website. \
Be concise, friendly, and helpful.";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub ticketing: TicketingConfig,
    pub escalation: EscalationConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_permissive: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Memory,
            url: String::new(),
            pool_max_size: 10,
            pool_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

/// How replies are produced: one stateless completion per turn, or a
/// provider-side thread driven through runs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Stateless,
    Threaded,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub mode: LlmMode,
    pub assistant_id: Option<String>,
    pub assistant_name: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            mode: LlmMode::Stateless,
            assistant_id: None,
            assistant_name: "Customer Support".to_string(),
            timeout_seconds: 60,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    /// Trailing turns sent with each stateless completion
    pub history_window: usize,
    pub poll_interval_ms: u64,
    pub poll_max_wait_seconds: u64,
    pub serialize_per_conversation: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            poll_interval_ms: 500,
            poll_max_wait_seconds: 60,
            serialize_per_conversation: true,
        }
    }
}

impl ConversationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_max_wait(&self) -> Duration {
        Duration::from_secs(self.poll_max_wait_seconds)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TicketingConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub token: String,
    pub list_id: String,
    pub timeout_seconds: u64,
}

impl Default for TicketingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.trello.com".to_string(),
            api_key: String::new(),
            token: String::new(),
            list_id: String::new(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinalizePreviousMode {
    /// Export the previous conversation before minting the new id
    Await,
    /// Hand the export to the background queue
    Background,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EscalationConfig {
    pub finalize_previous: FinalizePreviousMode,
    pub queue_capacity: usize,
    pub worker_count: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            finalize_previous: FinalizePreviousMode::Await,
            queue_capacity: 256,
            worker_count: 1,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(RelayError::Config("llm.api_key must be set".to_string()));
        }
        if self.conversation.history_window == 0 {
            return Err(RelayError::Config(
                "conversation.history_window must be greater than zero".to_string(),
            ));
        }
        if self.conversation.poll_interval_ms == 0 || self.conversation.poll_max_wait_seconds == 0 {
            return Err(RelayError::Config(
                "conversation polling interval and max wait must be greater than zero".to_string(),
            ));
        }
        if self.database.backend == DatabaseBackend::Postgres && self.database.url.trim().is_empty() {
            return Err(RelayError::Config(
                "database.url is required for the postgres backend".to_string(),
            ));
        }
        if self.ticketing.enabled
            && (self.ticketing.api_key.is_empty()
                || self.ticketing.token.is_empty()
                || self.ticketing.list_id.is_empty())
        {
            return Err(RelayError::Config(
                "ticketing.api_key, ticketing.token and ticketing.list_id are required when ticketing is enabled"
                    .to_string(),
            ));
        }
        if self.escalation.worker_count == 0 || self.escalation.queue_capacity == 0 {
            return Err(RelayError::Config(
                "escalation.worker_count and escalation.queue_capacity must be greater than zero"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
