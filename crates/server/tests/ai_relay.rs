//! Assistant relay lifecycle against a stub provider: single-flight,
//! health gating, ordering, timeout and failure synthesis.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use careline_server::ai::health::{spawn_probe, HealthStatus, ProviderHealth};
use careline_server::ai::provider::{
    ChatTurn, InferenceProvider, ModelInfo, ProviderError, ProviderStatus,
};
use careline_server::ai::{AiConfig, AiRelay, AiRequestState};
use careline_server::config::ChatServerConfig;
use careline_server::gateway::ChatService;
use careline_server::models::{MessageKind, Session};
use careline_server::protocol::ServerEvent;
use careline_server::rooms::RoomRegistry;

struct StubProvider {
    online: AtomicBool,
    fail: AtomicBool,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, content: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("model unavailable".into()));
        }
        Ok(format!("You said: {}", content))
    }
}

#[async_trait]
impl InferenceProvider for StubProvider {
    async fn status(&self) -> Result<ProviderStatus, ProviderError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ProviderError::Unreachable("connection refused".into()));
        }
        Ok(ProviderStatus {
            online: true,
            models: vec![ModelInfo {
                name: "llama3".into(),
            }],
        })
    }

    async fn chat(
        &self,
        _model: &str,
        prompt: &str,
        _system: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.respond(prompt).await
    }

    async fn chat_with_context(
        &self,
        _model: &str,
        messages: &[ChatTurn],
        _system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let last = messages.last().map(|t| t.content.as_str()).unwrap_or("");
        self.respond(last).await
    }
}

struct Harness {
    service: Arc<ChatService>,
    provider: Arc<StubProvider>,
    health: Arc<ProviderHealth>,
}

fn harness(provider: Arc<StubProvider>, request_timeout: Duration) -> Harness {
    let config = ChatServerConfig::default();
    let registry = Arc::new(RoomRegistry::new(config.history_retained));

    let ai_config = AiConfig {
        request_timeout,
        ..AiConfig::default()
    };
    let health = Arc::new(ProviderHealth::new());
    let relay = Arc::new(AiRelay::new(
        ai_config,
        provider.clone() as Arc<dyn InferenceProvider>,
        health.clone(),
    ));

    Harness {
        service: Arc::new(ChatService::new(config, registry, Some(relay))),
        provider,
        health,
    }
}

fn connection() -> (UnboundedSender<ServerEvent>, UnboundedReceiver<ServerEvent>) {
    mpsc::unbounded_channel()
}

async fn recv(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("connection channel closed")
}

async fn room_history(service: &ChatService, room: &str) -> Vec<careline_server::models::Message> {
    let room = service
        .registry()
        .get(room)
        .await
        .expect("room should exist");
    let inner = room.inner.lock().await;
    inner.log.history(None).await
}

async fn request_state(service: &ChatService, room: &str) -> Option<AiRequestState> {
    let room = service.registry().get(room).await?;
    let inner = room.inner.lock().await;
    inner.ai.current.as_ref().map(|r| r.state)
}

#[tokio::test]
async fn test_offline_provider_skips_dispatch() {
    let h = harness(StubProvider::new(Duration::ZERO), Duration::from_secs(1));
    h.health.record(HealthStatus::Offline, Vec::new());

    let (tx, mut rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    recv(&mut rx).await; // history

    h.service.send_message(&alice, "anyone there?").await.unwrap();
    recv(&mut rx).await; // the human message

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Only the human message was appended: no request, no error spam.
    let history = room_history(&h.service, "general").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MessageKind::Human);
    assert_eq!(h.provider.calls(), 0);
    assert!(request_state(&h.service, "general").await.is_none());
}

#[tokio::test]
async fn test_response_appended_and_broadcast() {
    let h = harness(
        StubProvider::new(Duration::from_millis(50)),
        Duration::from_secs(1),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx, mut rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    recv(&mut rx).await; // history

    h.service.send_message(&alice, "hello").await.unwrap();

    match recv(&mut rx).await {
        ServerEvent::ReceiveMessage(msg) => {
            assert_eq!(msg.id, 1);
            assert_eq!(msg.kind, MessageKind::Human);
        }
        other => panic!("expected the human message, got {:?}", other),
    }
    match recv(&mut rx).await {
        ServerEvent::ReceiveMessage(msg) => {
            assert_eq!(msg.id, 2);
            assert_eq!(msg.kind, MessageKind::Ai);
            assert_eq!(msg.author, "CareBot");
            assert_eq!(msg.body, "You said: alice: hello");
        }
        other => panic!("expected the assistant message, got {:?}", other),
    }

    assert_eq!(
        request_state(&h.service, "general").await,
        Some(AiRequestState::Completed)
    );
}

#[tokio::test]
async fn test_second_dispatch_rejected_while_pending() {
    let h = harness(
        StubProvider::new(Duration::from_millis(300)),
        Duration::from_secs(2),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx, mut rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    recv(&mut rx).await;

    h.service.send_message(&alice, "first").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        request_state(&h.service, "general").await,
        Some(AiRequestState::Pending)
    );

    // Second send while pending: posted normally, but no second request.
    h.service.send_message(&alice, "second").await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(h.provider.calls(), 1, "assistant must not queue a second request");
    let history = room_history(&h.service, "general").await;
    let humans = history
        .iter()
        .filter(|m| m.kind == MessageKind::Human)
        .count();
    let ai = history.iter().filter(|m| m.kind == MessageKind::Ai).count();
    assert_eq!(humans, 2);
    assert_eq!(ai, 1);
}

#[tokio::test]
async fn test_human_messages_interleave_before_response() {
    let h = harness(
        StubProvider::new(Duration::from_millis(200)),
        Duration::from_secs(2),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx_a, mut rx_a) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx_a, "alice", "general").await.unwrap();
    recv(&mut rx_a).await;
    let (tx_b, mut rx_b) = connection();
    let mut bob = Session::new();
    h.service.join(&mut bob, &tx_b, "bob", "general").await.unwrap();
    recv(&mut rx_b).await;

    h.service.send_message(&alice, "question").await.unwrap();
    // B posts while the assistant call is outstanding; not blocked on it.
    h.service.send_message(&bob, "me too").await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let history = room_history(&h.service, "general").await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].body, "question");
    assert_eq!(history[1].body, "me too");
    assert_eq!(history[2].kind, MessageKind::Ai);
    // The response id lands after every message appended while it was
    // outstanding, and after its trigger in particular.
    assert_eq!(history[2].id, 3);
}

#[tokio::test]
async fn test_timeout_synthesizes_error_message() {
    let h = harness(
        StubProvider::new(Duration::from_secs(30)),
        Duration::from_millis(50),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx, mut rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    recv(&mut rx).await;

    h.service.send_message(&alice, "slow one").await.unwrap();
    recv(&mut rx).await; // the human message

    match recv(&mut rx).await {
        ServerEvent::ReceiveMessage(msg) => {
            assert_eq!(msg.kind, MessageKind::Error);
            assert!(msg.body.contains("too long"));
            assert_eq!(msg.id, 2);
        }
        other => panic!("expected the error message, got {:?}", other),
    }
    assert_eq!(
        request_state(&h.service, "general").await,
        Some(AiRequestState::TimedOut)
    );
}

#[tokio::test]
async fn test_provider_failure_synthesizes_error_message() {
    let provider = StubProvider::new(Duration::ZERO);
    provider.fail.store(true, Ordering::SeqCst);
    let h = harness(provider, Duration::from_secs(1));
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx, mut rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    recv(&mut rx).await;

    h.service.send_message(&alice, "hi").await.unwrap();
    recv(&mut rx).await; // the human message

    match recv(&mut rx).await {
        ServerEvent::ReceiveMessage(msg) => {
            assert_eq!(msg.kind, MessageKind::Error);
            assert_eq!(msg.author, "CareBot");
        }
        other => panic!("expected the error message, got {:?}", other),
    }
    assert_eq!(
        request_state(&h.service, "general").await,
        Some(AiRequestState::Failed)
    );

    // The failed request releases the slot: the next send dispatches again.
    h.provider.fail.store(false, Ordering::SeqCst);
    h.service.send_message(&alice, "retry").await.unwrap();
    recv(&mut rx).await; // the human message
    match recv(&mut rx).await {
        ServerEvent::ReceiveMessage(msg) => assert_eq!(msg.kind, MessageKind::Ai),
        other => panic!("expected the assistant message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_does_not_cancel_inflight_request() {
    let h = harness(
        StubProvider::new(Duration::from_millis(150)),
        Duration::from_secs(2),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx_a, mut rx_a) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx_a, "alice", "general").await.unwrap();
    recv(&mut rx_a).await;
    let (tx_b, mut rx_b) = connection();
    let mut bob = Session::new();
    h.service.join(&mut bob, &tx_b, "bob", "general").await.unwrap();
    recv(&mut rx_b).await;

    h.service.send_message(&alice, "before leaving").await.unwrap();
    h.service.leave(&mut alice).await;

    // B still receives the eventual response.
    loop {
        match recv(&mut rx_b).await {
            ServerEvent::ReceiveMessage(msg) if msg.kind == MessageKind::Ai => break,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_reaping_discards_inflight_response() {
    let h = harness(
        StubProvider::new(Duration::from_millis(100)),
        Duration::from_secs(2),
    );
    h.health.record(HealthStatus::Online, vec!["llama3".into()]);

    let (tx, _rx) = connection();
    let mut alice = Session::new();
    h.service.join(&mut alice, &tx, "alice", "general").await.unwrap();
    h.service.send_message(&alice, "and gone").await.unwrap();

    // Last member leaves: the room is reaped and the pending request with it.
    h.service.leave(&mut alice).await;
    assert!(h.service.registry().get("general").await.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;

    // A new room under the same name starts clean; the old response was
    // discarded, not appended anywhere.
    let (tx2, mut rx2) = connection();
    let mut carol = Session::new();
    h.service.join(&mut carol, &tx2, "carol", "general").await.unwrap();
    match recv(&mut rx2).await {
        ServerEvent::MessageHistory(history) => assert!(history.is_empty()),
        other => panic!("expected empty history, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_probe_tracks_provider() {
    let provider = StubProvider::new(Duration::ZERO);
    provider.online.store(false, Ordering::SeqCst);
    let health = Arc::new(ProviderHealth::new());

    let probe = spawn_probe(
        health.clone(),
        provider.clone() as Arc<dyn InferenceProvider>,
        Duration::from_millis(20),
        "llama3".into(),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(health.snapshot().status, HealthStatus::Offline);

    provider.online.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(health.is_online());
    assert_eq!(health.snapshot().models, vec!["llama3".to_string()]);

    probe.abort();
}
