//! Typing presence, one tracker per room.
//!
//! State machine per user: `Idle -> Typing` on a typing signal,
//! `Typing -> Idle` on an explicit stop, on a message send by that user, or
//! on expiry. The server-side expiry window is independent of the client's
//! quiescence behavior and must exceed it.
//!
//! Expiry is driven by a spawned sleep task armed by the caller. Cancellation
//! is logical: every (re)arm bumps a generation counter, and a waking task
//! only expires the entry whose generation it was armed with. A stale task
//! wakes, sees a newer generation (or no entry), and does nothing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TypingEntry {
    /// Session that owns this entry, so expiry broadcasts can skip the typer.
    pub session: Uuid,
    /// Always in the future while the entry is present.
    pub expires_at: Instant,
    pub generation: u64,
}

/// Result of a typing signal.
#[derive(Debug, Clone, Copy)]
pub struct TypingStart {
    /// True only on the `Idle -> Typing` edge; refreshes stay silent.
    pub started: bool,
    /// Generation to arm the expiry task with.
    pub generation: u64,
}

#[derive(Default)]
pub struct PresenceTracker {
    typing: HashMap<String, TypingEntry>,
    next_generation: u64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a typing signal, re-arming expiry. Returns whether the
    /// `user_typing` event should be emitted.
    pub fn note_typing(&mut self, session: Uuid, username: &str, ttl: Duration) -> TypingStart {
        self.next_generation += 1;
        let generation = self.next_generation;
        let expires_at = Instant::now() + ttl;

        let started = match self.typing.get_mut(username) {
            Some(entry) => {
                entry.session = session;
                entry.expires_at = expires_at;
                entry.generation = generation;
                false
            }
            None => {
                self.typing.insert(
                    username.to_string(),
                    TypingEntry {
                        session,
                        expires_at,
                        generation,
                    },
                );
                true
            }
        };

        TypingStart { started, generation }
    }

    /// Transition to `Idle` (explicit stop, message send, disconnect).
    /// Returns true if the user was typing, i.e. `user_stop_typing` is due.
    pub fn note_idle(&mut self, username: &str) -> bool {
        self.typing.remove(username).is_some()
    }

    /// Expiry check from a timer task. Only fires when the entry still
    /// carries the generation the task was armed with; returns the typer's
    /// session id when the entry expired.
    pub fn expire(&mut self, username: &str, generation: u64) -> Option<Uuid> {
        match self.typing.get(username) {
            Some(entry) if entry.generation == generation => {
                let session = entry.session;
                self.typing.remove(username);
                Some(session)
            }
            _ => None,
        }
    }

    pub fn typing_users(&self) -> Vec<&str> {
        self.typing.keys().map(String::as_str).collect()
    }
}
