//! Room registry and notification fan-out.
//!
//! A room is a named, independently serialized channel: all state affecting
//! it (member set, message log, typing presence, assistant slot) sits behind
//! one `tokio::sync::Mutex`, so concurrent operations on the same room are
//! linearized while different rooms proceed in parallel. Broadcasts happen
//! under that lock, which is what gives members state-change-ordered
//! delivery.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::ai::AiSlot;
use crate::log::{MemoryLog, MessageStore, StoreFactory};
use crate::presence::PresenceTracker;
use crate::protocol::ServerEvent;

/// A registered member connection.
pub struct Member {
    pub username: String,
    pub tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Mutable room state. Only ever touched through `Room::inner`.
pub struct RoomInner {
    pub members: HashMap<Uuid, Member>,
    pub log: Box<dyn MessageStore>,
    pub presence: PresenceTracker,
    pub ai: AiSlot,
    /// Set when the room is reaped; late assistant completions check this
    /// and discard their result instead of appending to a dead log.
    pub closed: bool,
}

impl RoomInner {
    /// Deliver an event to every current member. Sends to a connection that
    /// has gone away are silently dropped; membership is removed on
    /// disconnect before any further broadcast is attempted.
    pub fn broadcast(&self, event: &ServerEvent) {
        for member in self.members.values() {
            let _ = member.tx.send(event.clone());
        }
    }

    /// Deliver to everyone except one session (the actor).
    pub fn broadcast_except(&self, skip: Uuid, event: &ServerEvent) {
        for (id, member) in &self.members {
            if *id != skip {
                let _ = member.tx.send(event.clone());
            }
        }
    }
}

pub struct Room {
    pub name: String,
    pub inner: Mutex<RoomInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub name: String,
    pub members: usize,
    pub messages: usize,
}

/// Registry of live rooms, created lazily on first join and reaped when the
/// last member leaves.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    make_store: StoreFactory,
}

impl RoomRegistry {
    pub fn new(history_retained: usize) -> Self {
        Self::with_store_factory(MemoryLog::factory(history_retained))
    }

    /// Substitute a different Message Log implementation (e.g. a durable
    /// collaborator) for every room created by this registry.
    pub fn with_store_factory(make_store: StoreFactory) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            make_store,
        }
    }

    /// Idempotent: the first call for a name creates an empty room with its
    /// own log and presence tracker, later calls return the same room.
    pub async fn get_or_create(&self, name: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Re-check: another task may have created it between the locks.
        if let Some(room) = rooms.get(name) {
            return room.clone();
        }

        let room = Arc::new(Room {
            name: name.to_string(),
            inner: Mutex::new(RoomInner {
                members: HashMap::new(),
                log: (self.make_store)(name),
                presence: PresenceTracker::new(),
                ai: AiSlot::default(),
                closed: false,
            }),
        });
        rooms.insert(name.to_string(), room.clone());
        info!("created room {}", name);
        room
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Remove a room whose membership has reached zero. Holding the registry
    /// write lock while checking keeps a concurrent join from racing the
    /// removal; joiners that lost the race see `closed` and retry. A pending
    /// assistant request for the room is aborted and its result discarded.
    pub async fn reap_if_empty(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(name).cloned() else {
            return false;
        };

        let mut inner = room.inner.lock().await;
        if !inner.members.is_empty() {
            return false;
        }
        inner.closed = true;
        if let Some(task) = inner.ai.task.take() {
            task.abort();
        }
        drop(inner);

        rooms.remove(name);
        true
    }

    pub async fn summaries(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            let inner = room.inner.lock().await;
            out.push(RoomSummary {
                name: room.name.clone(),
                members: inner.members.len(),
                messages: inner.log.history(None).await.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
