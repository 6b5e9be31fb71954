use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::models::chat::{ChatMessage, Role};
use crate::services::conversation::{ChatCompletion, RunHandle, RunStatus, ThreadProvider};
use crate::utils::error::RelayError;

const ASSISTANTS_BETA: &str = "assistants=v2";
const THREAD_MESSAGE_PAGE: u32 = 20;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateThreadMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRun<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
}

#[derive(Debug, Serialize)]
struct CreateAssistant<'a> {
    model: &'a str,
    name: &'a str,
    instructions: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

impl ThreadMessage {
    fn into_chat_message(self) -> ChatMessage {
        let text = self
            .content
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        ChatMessage::new(self.role, text)
    }
}

/// OpenAI-compatible client covering chat completions and the
/// thread/run API.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create LLM HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }

    fn threads(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authorized(builder).header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = send(
            self.authorized(self.client.post(self.url("/v1/chat/completions")))
                .json(&request),
        )
        .await?;
        let body: ChatCompletionResponse = decode(response).await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RelayError::Provider("No choices returned from LLM".to_string()))
    }

    /// Resolve the assistant used for runs: the configured id, or one created
    /// from the system prompt. Called once during startup.
    pub async fn ensure_assistant(&self, instructions: &str) -> Result<String, RelayError> {
        if let Some(id) = self
            .config
            .assistant_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        {
            info!("Using configured assistant {}", id);
            return Ok(id.to_string());
        }

        let request = CreateAssistant {
            model: &self.config.model,
            name: &self.config.assistant_name,
            instructions,
        };
        let response = send(
            self.threads(self.client.post(self.url("/v1/assistants")))
                .json(&request),
        )
        .await?;
        let created: IdObject = decode(response).await?;

        info!("Created assistant {} ({})", created.id, self.config.model);
        Ok(created.id)
    }
}

async fn send(builder: RequestBuilder) -> Result<Response, RelayError> {
    let response = builder.send().await.map_err(transport_error)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("LLM API error: {} - {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        Err(RelayError::ProviderUnavailable(message))
    } else {
        Err(RelayError::Provider(message))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RelayError> {
    response
        .json::<T>()
        .await
        .map_err(|e| RelayError::Provider(format!("Failed to parse LLM response: {}", e)))
}

fn transport_error(err: reqwest::Error) -> RelayError {
    if err.is_connect() || err.is_timeout() {
        RelayError::ProviderUnavailable(format!("Failed to reach LLM API: {}", err))
    } else {
        RelayError::Provider(format!("Failed to call LLM API: {}", err))
    }
}

#[async_trait::async_trait]
impl ChatCompletion for LlmService {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        self.generate_chat(messages).await
    }
}

#[async_trait::async_trait]
impl ThreadProvider for LlmService {
    async fn create_session(&self) -> Result<String, RelayError> {
        let response = send(
            self.threads(self.client.post(self.url("/v1/threads")))
                .json(&serde_json::json!({})),
        )
        .await?;
        let thread: IdObject = decode(response).await?;
        debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn append_message(&self, thread_id: &str, role: Role, text: &str) -> Result<(), RelayError> {
        send(
            self.threads(
                self.client
                    .post(self.url(&format!("/v1/threads/{}/messages", thread_id))),
            )
            .json(&CreateThreadMessage { role, content: text }),
        )
        .await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunHandle, RelayError> {
        let response = send(
            self.threads(
                self.client
                    .post(self.url(&format!("/v1/threads/{}/runs", thread_id))),
            )
            .json(&CreateRun { assistant_id }),
        )
        .await?;
        let run: RunObject = decode(response).await?;
        debug!("Run {} on thread {} is '{}'", run.id, thread_id, run.status);

        Ok(RunHandle {
            thread_id: thread_id.to_string(),
            run_id: run.id,
        })
    }

    async fn get_run_status(&self, run: &RunHandle) -> Result<RunStatus, RelayError> {
        let response = send(self.threads(self.client.get(self.url(&format!(
            "/v1/threads/{}/runs/{}",
            run.thread_id, run.run_id
        )))))
        .await?;
        let run: RunObject = decode(response).await?;
        Ok(run.status)
    }

    async fn cancel_run(&self, run: &RunHandle) -> Result<(), RelayError> {
        let response = send(self.threads(self.client.post(self.url(&format!(
            "/v1/threads/{}/runs/{}/cancel",
            run.thread_id, run.run_id
        )))))
        .await?;
        let run_state: RunObject = decode(response).await?;
        debug!("Run {} is '{}' after cancel", run_state.id, run_state.status);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, RelayError> {
        let response = send(self.threads(self.client.get(self.url(&format!(
            "/v1/threads/{}/messages?order=desc&limit={}",
            thread_id, THREAD_MESSAGE_PAGE
        )))))
        .await?;
        let page: MessageList = decode(response).await?;

        // Newest first on the wire
        let mut messages: Vec<ChatMessage> = page
            .data
            .into_iter()
            .map(ThreadMessage::into_chat_message)
            .collect();
        messages.reverse();
        Ok(messages)
    }
}
