use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room-scoped message id. Strictly increasing from 1, never reused.
pub type MessageId = u64;

/// What produced a message. A single tagged variant instead of a pile of
/// per-message booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Posted by a human participant.
    Human,
    /// Synthesized by the server (notices, announcements).
    System,
    /// Produced by the assistant relay.
    Ai,
    /// Synthesized in place of a failed assistant response.
    Error,
}

/// A single chat message. Immutable once appended to a room's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room: String,
    pub author: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(
        id: MessageId,
        room: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id,
            room: room.into(),
            author: author.into(),
            body: body.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Per-connection context. Created when a connection is accepted, destroyed
/// on disconnect; never persisted. The username is set on the first
/// successful join.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    /// Room this session currently belongs to, at most one.
    pub room: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            username: String::new(),
            room: None,
            connected_at: Utc::now(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
