//! Wire protocol for the duplex event channel.
//!
//! Events travel as JSON frames shaped `{"event": "...", "data": ...}`.
//! Events without a payload (`typing`, `stop_typing`) omit `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum ClientEvent {
    JoinRoom { username: String, room: String },
    SendMessage { message: String },
    Typing,
    StopTyping,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full history replay. Sent once, on join, to the joining connection only.
    MessageHistory(Vec<Message>),
    ReceiveMessage(Message),
    UserJoined {
        message: String,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        message: String,
        timestamp: DateTime<Utc>,
    },
    UserTyping {
        username: String,
    },
    UserStopTyping {
        username: String,
    },
    Error {
        message: String,
    },
}
