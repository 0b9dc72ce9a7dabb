//! Per-room ordered, append-only message log.
//!
//! The default implementation holds history in memory for the lifetime of
//! the process. A durable collaborator can be substituted behind
//! [`MessageStore`] without touching the rest of the coordinator.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{Message, MessageId, MessageKind};

/// The Message Log contract. Callers must serialize access per room (the
/// room's lock does this), so appends from human sends and assistant
/// responses never collide or duplicate ids.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message, assigning the next room-scoped id.
    async fn append(&mut self, author: &str, body: &str, kind: MessageKind) -> Message;

    /// Retained messages in id order. `limit` keeps only the most recent N.
    async fn history(&self, limit: Option<usize>) -> Vec<Message>;
}

/// Builds the store for a newly created room.
pub type StoreFactory = Arc<dyn Fn(&str) -> Box<dyn MessageStore> + Send + Sync>;

/// In-memory message log with bounded retention. Ids keep increasing past
/// the retention cap, so dropping old messages never reuses an id.
pub struct MemoryLog {
    room: String,
    next_id: MessageId,
    messages: VecDeque<Message>,
    max_retained: usize,
}

impl MemoryLog {
    pub fn new(room: impl Into<String>, max_retained: usize) -> Self {
        Self {
            room: room.into(),
            next_id: 1,
            messages: VecDeque::new(),
            max_retained,
        }
    }

    pub fn factory(max_retained: usize) -> StoreFactory {
        Arc::new(move |room: &str| Box::new(MemoryLog::new(room, max_retained)) as Box<dyn MessageStore>)
    }
}

#[async_trait]
impl MessageStore for MemoryLog {
    async fn append(&mut self, author: &str, body: &str, kind: MessageKind) -> Message {
        let message = Message::new(self.next_id, self.room.clone(), author, body, kind);
        self.next_id += 1;
        self.messages.push_back(message.clone());
        while self.messages.len() > self.max_retained {
            self.messages.pop_front();
        }
        message
    }

    async fn history(&self, limit: Option<usize>) -> Vec<Message> {
        let skip = match limit {
            Some(n) => self.messages.len().saturating_sub(n),
            None => 0,
        };
        self.messages.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_strictly_increasing_from_one() {
        let mut log = MemoryLog::new("general", 100);
        for expected in 1..=5u64 {
            let msg = log.append("ada", "hi", MessageKind::Human).await;
            assert_eq!(msg.id, expected);
        }
        let history = log.history(None).await;
        let ids: Vec<_> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_retention_cap_keeps_ids_monotonic() {
        let mut log = MemoryLog::new("general", 3);
        for _ in 0..5 {
            log.append("ada", "hi", MessageKind::Human).await;
        }
        let history = log.history(None).await;
        assert_eq!(history.len(), 3);
        // Oldest two dropped; ids continue, never reused.
        let ids: Vec<_> = history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let next = log.append("ada", "again", MessageKind::Human).await;
        assert_eq!(next.id, 6);
    }

    #[tokio::test]
    async fn test_history_limit_takes_most_recent() {
        let mut log = MemoryLog::new("general", 100);
        for i in 0..4 {
            log.append("ada", &format!("m{}", i), MessageKind::Human).await;
        }
        let recent = log.history(Some(2)).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, 3);
        assert_eq!(recent[1].id, 4);
    }

    #[tokio::test]
    async fn test_kind_preserved() {
        let mut log = MemoryLog::new("general", 100);
        log.append("ada", "hi", MessageKind::Human).await;
        log.append("CareBot", "hello", MessageKind::Ai).await;
        log.append("server", "maintenance at noon", MessageKind::System).await;

        let history = log.history(None).await;
        assert_eq!(history[0].kind, MessageKind::Human);
        assert_eq!(history[1].kind, MessageKind::Ai);
        assert_eq!(history[2].kind, MessageKind::System);
    }
}
