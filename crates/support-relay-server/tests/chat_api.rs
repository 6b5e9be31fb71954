use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use support_relay_server::config::Settings;
use support_relay_server::database::{InMemoryStore, TurnStore};
use support_relay_server::models::chat::{ChatMessage, Role};
use support_relay_server::services::conversation::{
    ChatCompletion, CompletionEngine, RunHandle, RunStatus, ThreadProvider,
};
use support_relay_server::services::escalation::{TicketProvider, TicketRecord};
use support_relay_server::utils::error::RelayError;
use support_relay_server::{build_router, AppState};

// ===== FAKE COLLABORATORS =====

/// Replies "Echo: <last user message>" and records every request.
#[derive(Default)]
struct RecordingCompletion {
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatCompletion for RecordingCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!("Echo: {}", last))
    }
}

struct UnavailableCompletion;

#[async_trait]
impl ChatCompletion for UnavailableCompletion {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, RelayError> {
        Err(RelayError::ProviderUnavailable("connection refused".to_string()))
    }
}

/// Thread store that finishes every run with `final_status` after one
/// in-progress poll. Like the real provider, a thread with an unfinished run
/// rejects new messages until the run is cancelled.
struct FakeThreads {
    final_status: RunStatus,
    threads: Mutex<HashMap<String, Vec<ChatMessage>>>,
    polls: Mutex<HashMap<String, usize>>,
    active_runs: Mutex<HashSet<String>>,
    created: AtomicUsize,
    cancelled: AtomicUsize,
}

impl FakeThreads {
    fn new(final_status: RunStatus) -> Self {
        Self {
            final_status,
            threads: Mutex::new(HashMap::new()),
            polls: Mutex::new(HashMap::new()),
            active_runs: Mutex::new(HashSet::new()),
            created: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ThreadProvider for FakeThreads {
    async fn create_session(&self) -> Result<String, RelayError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("thread_{}", n);
        self.threads.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn append_message(&self, thread_id: &str, role: Role, text: &str) -> Result<(), RelayError> {
        if self.active_runs.lock().unwrap().contains(thread_id) {
            return Err(RelayError::Provider(
                "400 Can't add messages to thread while a run is active".to_string(),
            ));
        }
        let mut threads = self.threads.lock().unwrap();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| RelayError::Provider(format!("no thread {}", thread_id)))?;
        thread.push(ChatMessage::new(role, text));
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, _assistant_id: &str) -> Result<RunHandle, RelayError> {
        let mut threads = self.threads.lock().unwrap();
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| RelayError::Provider(format!("no thread {}", thread_id)))?;
        if self.final_status.is_pending() {
            self.active_runs.lock().unwrap().insert(thread_id.to_string());
        }
        if self.final_status.is_success() {
            let user_turns = thread.iter().filter(|m| m.role == Role::User).count();
            thread.push(ChatMessage::new(
                Role::Assistant,
                format!("Reply {} on {}", user_turns, thread_id),
            ));
        }
        Ok(RunHandle {
            thread_id: thread_id.to_string(),
            run_id: format!("run_{}", thread.len()),
        })
    }

    async fn get_run_status(&self, run: &RunHandle) -> Result<RunStatus, RelayError> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls
            .entry(format!("{}/{}", run.thread_id, run.run_id))
            .or_insert(0);
        *count += 1;
        if *count == 1 {
            Ok(RunStatus::InProgress)
        } else {
            Ok(self.final_status.clone())
        }
    }

    async fn cancel_run(&self, run: &RunHandle) -> Result<(), RelayError> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.active_runs.lock().unwrap().remove(&run.thread_id);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, RelayError> {
        Ok(self
            .threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct CountingTickets {
    bodies: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TicketProvider for CountingTickets {
    async fn create_record(&self, title: &str, body: &str) -> Result<TicketRecord, RelayError> {
        let mut bodies = self.bodies.lock().unwrap();
        bodies.push((title.to_string(), body.to_string()));
        Ok(TicketRecord {
            id: format!("card_{}", bodies.len()),
            url: format!("https://board.example/c/card_{}", bodies.len()),
        })
    }
}

// ===== HARNESS =====

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.llm.api_key = "test-key".to_string();
    settings.conversation.poll_interval_ms = 5;
    settings.conversation.poll_max_wait_seconds = 2;
    settings
}

fn app(
    store: Arc<InMemoryStore>,
    engine: CompletionEngine,
    tickets: Option<Arc<CountingTickets>>,
) -> Router {
    app_with(test_settings(), store, engine, tickets)
}

fn app_with(
    settings: Settings,
    store: Arc<InMemoryStore>,
    engine: CompletionEngine,
    tickets: Option<Arc<CountingTickets>>,
) -> Router {
    let tickets = tickets.map(|t| t as Arc<dyn TicketProvider>);
    let state = AppState::new(settings, store, engine, tickets);
    build_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// ===== STATELESS MODE =====

#[tokio::test]
async fn test_first_message_creates_conversation_with_two_turns() {
    let store = Arc::new(InMemoryStore::new());
    let completion = Arc::new(RecordingCompletion::default());
    let app = app(store.clone(), CompletionEngine::Stateless(completion), None);

    let (status, body) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Echo: Hi");
    let conversation_id = body["conversation_id"].as_str().unwrap().to_string();
    assert!(!conversation_id.is_empty());

    let turns = store.list_by_conversation(&conversation_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "Hi");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Echo: Hi");
}

#[tokio::test]
async fn test_second_turn_sends_prior_history() {
    let store = Arc::new(InMemoryStore::new());
    let completion = Arc::new(RecordingCompletion::default());
    let app = app(
        store.clone(),
        CompletionEngine::Stateless(completion.clone()),
        None,
    );

    let (_, first) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    let conversation_id = first["conversation_id"].as_str().unwrap();

    let (status, second) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "Where is my order?", "conversation_id": conversation_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["conversation_id"], conversation_id);

    let requests = completion.requests.lock().unwrap();
    let context: Vec<(Role, &str)> = requests[1]
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        &context[1..],
        &[
            (Role::User, "Hi"),
            (Role::Assistant, "Echo: Hi"),
            (Role::User, "Where is my order?"),
        ]
    );
    assert_eq!(context[0].0, Role::System);
    assert_eq!(store.turn_count(), 4);
}

#[tokio::test]
async fn test_conversation_round_trip_is_chronological() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(
        store,
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    let (_, first) = send(&app, "POST", "/chat", Some(json!({ "message": "one" }))).await;
    let conversation_id = first["conversation_id"].as_str().unwrap();
    send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "two", "conversation_id": conversation_id })),
    )
    .await;

    let (status, turns) = send(&app, "GET", &format!("/conversations/{}", conversation_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let contents: Vec<&str> = turns
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "Echo: one", "two", "Echo: two"]);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[1]["role"], "assistant");
}

#[tokio::test]
async fn test_missing_message_is_bad_request() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(
        store.clone(),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    let (status, body) = send(&app, "POST", "/chat", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No message provided");

    let (status, body) = send(&app, "POST", "/chat", Some(json!({ "message": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    assert_eq!(store.turn_count(), 0);
}

#[tokio::test]
async fn test_provider_outage_keeps_user_turn_only() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(
        store.clone(),
        CompletionEngine::Stateless(Arc::new(UnavailableCompletion)),
        None,
    );

    let (status, body) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));

    let recent = store.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].role, Role::User);
}

#[tokio::test]
async fn test_unknown_conversation_is_not_found() {
    let app = app(
        Arc::new(InMemoryStore::new()),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    let (status, body) = send(&app, "GET", "/conversations/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_messages_listing_is_newest_first_and_limited() {
    let app = app(
        Arc::new(InMemoryStore::new()),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    send(&app, "POST", "/chat", Some(json!({ "message": "first" }))).await;
    send(&app, "POST", "/chat", Some(json!({ "message": "second" }))).await;

    let (status, messages) = send(&app, "GET", "/messages?limit=3", None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["content"], "Echo: second");
    assert!(messages[0]["conversation_id"].is_string());

    let (status, _) = send(&app, "GET", "/messages?limit=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===== THREADED MODE =====

fn threaded(provider: Arc<FakeThreads>) -> CompletionEngine {
    CompletionEngine::Threaded {
        provider,
        assistant_id: "asst_test".to_string(),
    }
}

#[tokio::test]
async fn test_threaded_conversation_reuses_thread() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(FakeThreads::new(RunStatus::Completed));
    let app = app(store.clone(), threaded(provider.clone()), None);

    let (status, first) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["message"], "Reply 1 on thread_1");
    let conversation_id = first["conversation_id"].as_str().unwrap();

    let (_, second) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "More", "conversation_id": conversation_id })),
    )
    .await;
    assert_eq!(second["message"], "Reply 2 on thread_1");
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);

    let turns = store.list_by_conversation(conversation_id).await.unwrap();
    assert_eq!(turns.len(), 4);
    assert!(turns
        .iter()
        .all(|t| t.session_handle.as_deref() == Some("thread_1")));
}

#[tokio::test]
async fn test_failed_run_reports_error_without_assistant_turn() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(FakeThreads::new(RunStatus::Failed));
    let app = app(store.clone(), threaded(provider), None);

    let (status, body) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("failed"));

    let recent = store.list_recent(10).await.unwrap();
    assert!(recent.iter().all(|t| t.role == Role::User));
}

#[tokio::test]
async fn test_timed_out_run_does_not_block_next_turn() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(FakeThreads::new(RunStatus::InProgress));
    let mut settings = test_settings();
    settings.conversation.poll_max_wait_seconds = 1;
    let app = app_with(settings, store, threaded(provider.clone()), None);

    let (status, first) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(first["error"].is_string());
    assert_eq!(provider.cancelled.load(Ordering::SeqCst), 1);

    // The same thread accepts the next message once the stale run is cancelled
    let (_, turns) = send(&app, "GET", "/messages", None).await;
    let conversation_id = turns[0]["conversation_id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "Hello?", "conversation_id": conversation_id })),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(provider.created.load(Ordering::SeqCst), 1);
    assert_eq!(provider.cancelled.load(Ordering::SeqCst), 2);
}

// ===== ESCALATION =====

#[tokio::test]
async fn test_finalize_exports_transcript() {
    let store = Arc::new(InMemoryStore::new());
    let tickets = Arc::new(CountingTickets::default());
    let app = app(
        store,
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        Some(tickets.clone()),
    );

    let (_, chat) = send(&app, "POST", "/chat", Some(json!({ "message": "Refund please" }))).await;
    let conversation_id = chat["conversation_id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/conversations/{}/finalize", conversation_id),
        Some(json!({ "contact_email": "jane@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "exported");
    assert_eq!(body["card_id"], "card_1");

    let bodies = tickets.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].0.contains(conversation_id));
    assert!(bodies[0].1.contains("Customer contact: jane@example.com"));
    assert!(bodies[0].1.contains("User: Refund please"));
}

#[tokio::test]
async fn test_finalize_unknown_conversation_makes_no_export() {
    let tickets = Arc::new(CountingTickets::default());
    let app = app(
        Arc::new(InMemoryStore::new()),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        Some(tickets.clone()),
    );

    let (status, body) = send(&app, "POST", "/conversations/ghost/finalize", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert!(tickets.bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_previous_starts_new_conversation() {
    let store = Arc::new(InMemoryStore::new());
    let tickets = Arc::new(CountingTickets::default());
    let app = app(
        store.clone(),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        Some(tickets.clone()),
    );

    let (_, first) = send(&app, "POST", "/chat", Some(json!({ "message": "Hi" }))).await;
    let previous = first["conversation_id"].as_str().unwrap();

    let (status, second) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({
            "message": "Still there?",
            "conversation_id": previous,
            "finalize_previous": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["conversation_id"], previous);
    assert_eq!(tickets.bodies.lock().unwrap().len(), 1);
    assert_eq!(store.list_by_conversation(previous).await.unwrap().len(), 2);
}

// ===== HEALTH & ROUTING =====

#[tokio::test]
async fn test_health_reports_status_and_version() {
    let app = app(
        Arc::new(InMemoryStore::new()),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());

    let (status, _) = send(&app, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_api_prefix_serves_same_routes() {
    let app = app(
        Arc::new(InMemoryStore::new()),
        CompletionEngine::Stateless(Arc::new(RecordingCompletion::default())),
        None,
    );

    let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "Hi" }))).await;
    assert_eq!(status, StatusCode::OK);
    let conversation_id = body["conversation_id"].as_str().unwrap();

    let (status, turns) = send(&app, "GET", &format!("/api/conversations/{}", conversation_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turns.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
