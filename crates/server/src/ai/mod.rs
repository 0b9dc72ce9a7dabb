//! Assistant relay.
//!
//! Mediates at most one in-flight inference request per room against the
//! external provider. The provider call runs as its own task holding no room
//! lock; only the final append of the assistant (or error) message re-enters
//! the serialized room path. Ordinary human messaging is never blocked on an
//! outstanding request.

pub mod health;
pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::{Message, MessageId, MessageKind};
use crate::protocol::ServerEvent;
use crate::rooms::{Room, RoomInner};
use health::ProviderHealth;
use provider::{ChatTurn, InferenceProvider, ProviderError};

/// Assistant relay configuration.
#[derive(Clone, Debug)]
pub struct AiConfig {
    /// Whether the relay is wired up at all.
    pub enabled: bool,
    /// Base URL of the inference collaborator.
    pub base_url: String,
    /// Model requested from the provider.
    pub model: String,
    /// Display name the assistant posts under.
    pub assistant_name: String,
    /// Fixed preamble constraining the assistant.
    pub system_prompt: String,
    /// Hard deadline for one inference call.
    pub request_timeout: Duration,
    /// How often the status probe runs.
    pub probe_interval: Duration,
    /// How many recent messages accompany a request as context.
    pub context_window: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:5001/api/ai".to_string(),
            model: "llama3".to_string(),
            assistant_name: "CareBot".to_string(),
            system_prompt: "You are CareBot, the clinic's chat assistant. Offer general, \
                            informational health guidance only. Never diagnose conditions, \
                            prescribe treatment, or interpret personal test results; remind \
                            participants to consult a clinician for medical concerns. Keep \
                            responses concise and courteous."
                .to_string(),
            request_timeout: Duration::from_secs(60),
            probe_interval: Duration::from_secs(30),
            context_window: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiRequestState {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

/// One assistant request for a room. At most one may be `Pending` at any
/// instant; finished requests stay in the slot for observability until the
/// next dispatch replaces them.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub correlation_id: Uuid,
    pub model: String,
    pub trigger_id: MessageId,
    pub state: AiRequestState,
}

/// Per-room single-flight slot, owned by the room's lock.
#[derive(Default)]
pub struct AiSlot {
    pub current: Option<AiRequest>,
    /// Abort handle of the in-flight provider task, taken on room teardown.
    pub task: Option<AbortHandle>,
}

impl AiSlot {
    pub fn is_pending(&self) -> bool {
        matches!(
            self.current.as_ref().map(|r| r.state),
            Some(AiRequestState::Pending)
        )
    }
}

/// Outcome of a dispatch attempt that was not a hard rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// Provider health is not `Online`; no request was attempted.
    ProviderUnavailable,
}

pub struct AiRelay {
    config: AiConfig,
    provider: Arc<dyn InferenceProvider>,
    health: Arc<ProviderHealth>,
}

impl AiRelay {
    pub fn new(
        config: AiConfig,
        provider: Arc<dyn InferenceProvider>,
        health: Arc<ProviderHealth>,
    ) -> Self {
        Self {
            config,
            provider,
            health,
        }
    }

    pub fn health(&self) -> Arc<ProviderHealth> {
        self.health.clone()
    }

    pub fn context_window(&self) -> usize {
        self.config.context_window
    }

    /// Attempt to dispatch an assistant response for a freshly appended human
    /// message. Must be called under the room's lock: the single-flight check
    /// and the slot update have to be atomic with respect to other sends.
    ///
    /// Errors with `ConcurrencyConflict` when a request is already pending;
    /// the triggering human message has already been posted and is unaffected.
    pub fn dispatch(
        &self,
        room: Arc<Room>,
        inner: &mut RoomInner,
        trigger: &Message,
        context: Vec<Message>,
    ) -> Result<DispatchOutcome, ChatError> {
        if !self.health.is_online() {
            debug!(
                "[{}] provider not online, skipping dispatch in room {}",
                self.config.assistant_name, room.name
            );
            return Ok(DispatchOutcome::ProviderUnavailable);
        }

        if inner.ai.is_pending() {
            return Err(ChatError::ConcurrencyConflict);
        }

        let request = AiRequest {
            correlation_id: Uuid::new_v4(),
            model: self.config.model.clone(),
            trigger_id: trigger.id,
            state: AiRequestState::Pending,
        };
        let correlation_id = request.correlation_id;
        inner.ai.current = Some(request);

        info!(
            "[{}] dispatching in room {} (trigger id {}, correlation {})",
            self.config.assistant_name, room.name, trigger.id, correlation_id
        );

        let turns = build_turns(&context, &self.config.assistant_name);
        let provider = self.provider.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                config.request_timeout,
                call_provider(provider.as_ref(), &config, &turns),
            )
            .await;

            let mut inner = room.inner.lock().await;
            if inner.closed {
                debug!(
                    "[{}] room {} torn down, discarding response",
                    config.assistant_name, room.name
                );
                return;
            }
            inner.ai.task = None;

            let (state, kind, body) = match outcome {
                Ok(Ok(text)) => (AiRequestState::Completed, MessageKind::Ai, text),
                Ok(Err(err)) => {
                    warn!(
                        "[{}] provider call failed in room {}: {}",
                        config.assistant_name, room.name, err
                    );
                    (
                        AiRequestState::Failed,
                        MessageKind::Error,
                        "Sorry, I couldn't reach the assistant service. Please try again later."
                            .to_string(),
                    )
                }
                Err(_) => {
                    warn!(
                        "[{}] request timed out in room {} (correlation {})",
                        config.assistant_name, room.name, correlation_id
                    );
                    (
                        AiRequestState::TimedOut,
                        MessageKind::Error,
                        "Sorry, the assistant took too long to respond. Please try again."
                            .to_string(),
                    )
                }
            };

            if let Some(current) = inner.ai.current.as_mut() {
                if current.correlation_id == correlation_id {
                    current.state = state;
                }
            }

            let message = inner.log.append(&config.assistant_name, &body, kind).await;
            inner.broadcast(&ServerEvent::ReceiveMessage(message));
        });
        inner.ai.task = Some(handle.abort_handle());

        Ok(DispatchOutcome::Dispatched)
    }
}

async fn call_provider(
    provider: &dyn InferenceProvider,
    config: &AiConfig,
    turns: &[ChatTurn],
) -> Result<String, ProviderError> {
    match turns {
        // A single turn has no accumulated context worth shipping.
        [only] => {
            provider
                .chat(&config.model, &only.content, Some(&config.system_prompt))
                .await
        }
        _ => {
            provider
                .chat_with_context(&config.model, turns, Some(&config.system_prompt))
                .await
        }
    }
}

/// Map recent room history onto provider turns. Assistant messages become
/// `assistant` turns; human messages become `user` turns prefixed with the
/// author so the model can follow a multi-party conversation. System and
/// error messages carry no conversational content and are skipped.
fn build_turns(context: &[Message], assistant_name: &str) -> Vec<ChatTurn> {
    context
        .iter()
        .filter_map(|msg| match msg.kind {
            MessageKind::Ai => Some(ChatTurn::assistant(msg.body.clone())),
            MessageKind::Human => {
                Some(ChatTurn::user(format!("{}: {}", msg.author, msg.body)))
            }
            MessageKind::System | MessageKind::Error => None,
        })
        .collect()
}
