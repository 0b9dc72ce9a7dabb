//! Session gateway: the single entry and exit point clients interact with.
//!
//! `ChatService` is transport-free — a connection is represented by the
//! outbound event sender, and the per-connection `Session` context is passed
//! explicitly through every operation. The WebSocket adapter in `ws` is a
//! thin shell over this, and tests drive it with bare channels.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::ai::{AiRelay, DispatchOutcome};
use crate::config::ChatServerConfig;
use crate::error::ChatError;
use crate::models::{MessageKind, Session};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rooms::{Member, Room, RoomRegistry};

pub struct ChatService {
    config: ChatServerConfig,
    registry: Arc<RoomRegistry>,
    relay: Option<Arc<AiRelay>>,
}

impl ChatService {
    pub fn new(
        config: ChatServerConfig,
        registry: Arc<RoomRegistry>,
        relay: Option<Arc<AiRelay>>,
    ) -> Self {
        Self {
            config,
            registry,
            relay,
        }
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    /// Route one inbound client event. Errors are local to the initiating
    /// session; the adapter surfaces them as `error` events on `conn`.
    pub async fn handle(
        &self,
        session: &mut Session,
        conn: &UnboundedSender<ServerEvent>,
        event: ClientEvent,
    ) -> Result<(), ChatError> {
        match event {
            ClientEvent::JoinRoom { username, room } => {
                self.join(session, conn, &username, &room).await
            }
            ClientEvent::SendMessage { message } => self.send_message(session, &message).await,
            ClientEvent::Typing => {
                self.typing(session).await;
                Ok(())
            }
            ClientEvent::StopTyping => {
                self.stop_typing(session).await;
                Ok(())
            }
        }
    }

    /// Join a room: validate, register membership, replay history to the
    /// joining connection only, then announce to the rest of the room.
    /// A session already in a room leaves it first; reconnection is just a
    /// fresh join with a fresh replay.
    pub async fn join(
        &self,
        session: &mut Session,
        conn: &UnboundedSender<ServerEvent>,
        username: &str,
        room_name: &str,
    ) -> Result<(), ChatError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::Validation("username must not be empty".into()));
        }
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(ChatError::Validation("room name must not be empty".into()));
        }

        if session.room.is_some() {
            self.leave(session).await;
        }

        loop {
            let room = self.registry.get_or_create(room_name).await;
            let mut inner = room.inner.lock().await;
            // Lost a race against reaping; the registry no longer holds this
            // room, so fetch a fresh one.
            if inner.closed {
                continue;
            }

            session.username = username.to_string();
            session.room = Some(room_name.to_string());
            inner.members.insert(
                session.id,
                Member {
                    username: username.to_string(),
                    tx: conn.clone(),
                },
            );

            let history = inner.log.history(None).await;
            let _ = conn.send(ServerEvent::MessageHistory(history));

            inner.broadcast_except(
                session.id,
                &ServerEvent::UserJoined {
                    message: format!("{} has joined the room", username),
                    timestamp: Utc::now(),
                },
            );

            info!("{} joined room {}", username, room_name);
            return Ok(());
        }
    }

    /// Leave the current room. Idempotent: safe on a session that already
    /// left or never joined. Invoked implicitly on transport disconnect.
    pub async fn leave(&self, session: &mut Session) {
        let Some(room_name) = session.room.take() else {
            return;
        };
        let Some(room) = self.registry.get(&room_name).await else {
            return;
        };

        let empty = {
            let mut inner = room.inner.lock().await;
            if inner.members.remove(&session.id).is_none() {
                return;
            }

            if inner.presence.note_idle(&session.username) {
                inner.broadcast(&ServerEvent::UserStopTyping {
                    username: session.username.clone(),
                });
            }

            inner.broadcast(&ServerEvent::UserLeft {
                message: format!("{} has left the room", session.username),
                timestamp: Utc::now(),
            });

            info!("{} left room {}", session.username, room_name);
            inner.members.is_empty()
        };

        if empty && self.config.reap_empty_rooms && self.registry.reap_if_empty(&room_name).await {
            info!("reaped empty room {}", room_name);
        }
    }

    /// Post a human message: append, fan out to every member (sender
    /// included), then offer it to the assistant relay. A sending user in
    /// `Typing` state drops to `Idle` first.
    pub async fn send_message(&self, session: &Session, body: &str) -> Result<(), ChatError> {
        let Some(room_name) = session.room.as_deref() else {
            return Err(ChatError::Validation(
                "join a room before sending messages".into(),
            ));
        };
        let Some(room) = self.registry.get(room_name).await else {
            return Err(ChatError::Transport(format!(
                "room {} no longer exists",
                room_name
            )));
        };

        let mut inner = room.inner.lock().await;
        if inner.presence.note_idle(&session.username) {
            inner.broadcast_except(
                session.id,
                &ServerEvent::UserStopTyping {
                    username: session.username.clone(),
                },
            );
        }

        let message = inner
            .log
            .append(&session.username, body, MessageKind::Human)
            .await;
        inner.broadcast(&ServerEvent::ReceiveMessage(message.clone()));

        if let Some(relay) = &self.relay {
            let context = inner.log.history(Some(relay.context_window())).await;
            match relay.dispatch(room.clone(), &mut inner, &message, context) {
                Ok(DispatchOutcome::Dispatched) | Ok(DispatchOutcome::ProviderUnavailable) => {}
                Err(ChatError::ConcurrencyConflict) => {
                    // Not queued; the human message above was delivered
                    // normally either way.
                    debug!("assistant busy in room {}, request rejected", room_name);
                }
                Err(err) => warn!("assistant dispatch failed in room {}: {}", room_name, err),
            }
        }

        Ok(())
    }

    /// Typing signal. First signal emits `user_typing` to the rest of the
    /// room; repeats just re-arm the expiry timer.
    pub async fn typing(&self, session: &Session) {
        let Some(room_name) = session.room.as_deref() else {
            return;
        };
        let Some(room) = self.registry.get(room_name).await else {
            return;
        };

        let start = {
            let mut inner = room.inner.lock().await;
            let start =
                inner
                    .presence
                    .note_typing(session.id, &session.username, self.config.typing_ttl);
            if start.started {
                inner.broadcast_except(
                    session.id,
                    &ServerEvent::UserTyping {
                        username: session.username.clone(),
                    },
                );
            }
            start
        };

        self.schedule_typing_expiry(room, session.username.clone(), start.generation);
    }

    /// Explicit stop signal.
    pub async fn stop_typing(&self, session: &Session) {
        let Some(room_name) = session.room.as_deref() else {
            return;
        };
        let Some(room) = self.registry.get(room_name).await else {
            return;
        };

        let mut inner = room.inner.lock().await;
        if inner.presence.note_idle(&session.username) {
            inner.broadcast_except(
                session.id,
                &ServerEvent::UserStopTyping {
                    username: session.username.clone(),
                },
            );
        }
    }

    /// Arm the server-side expiry check for a typing entry. The generation
    /// captured here makes the timer self-canceling: if the entry was
    /// refreshed or went idle in the meantime, the wake-up finds a different
    /// generation and does nothing.
    fn schedule_typing_expiry(&self, room: Arc<Room>, username: String, generation: u64) {
        let ttl = self.config.typing_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut inner = room.inner.lock().await;
            if let Some(typer) = inner.presence.expire(&username, generation) {
                inner.broadcast_except(typer, &ServerEvent::UserStopTyping { username });
            }
        });
    }
}
