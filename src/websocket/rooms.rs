use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use uuid::Uuid;

use crate::models::message::MessageKind;

use super::events::ServerMessage;

pub type ConnectionId = Uuid;
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// A named publish/subscribe destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Community(String),
}

impl Room {
    /// Where a message of `kind` addressed to `target` is delivered: the
    /// recipient's own room for direct, the community room for group.
    pub fn for_target(kind: MessageKind, target: &str) -> Room {
        match kind {
            MessageKind::Direct => Room::User(target.to_string()),
            MessageKind::Group => Room::Community(target.to_string()),
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(user_id) => write!(f, "{}", user_id),
            Room::Community(community_id) => write!(f, "community_{}", community_id),
        }
    }
}

/// One live connection sitting in a room, and the user it belongs to.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub user_id: String,
    pub outbox: Outbox,
}

/// Process-wide registry of which live connections sit in which room.
/// Built once at startup and shared through `AppState`.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<ConnectionId, Subscriber>>>,
    sequencers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sequencers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn join(
        &self,
        room: &Room,
        connection_id: ConnectionId,
        user_id: &str,
        outbox: Outbox,
    ) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.key()).or_default().insert(
            connection_id,
            Subscriber {
                user_id: user_id.to_string(),
                outbox,
            },
        );
        tracing::debug!("Connection {} ({}) joined room {}", connection_id, user_id, room);
    }

    pub async fn leave(&self, room: &Room, connection_id: ConnectionId) -> bool {
        let key = room.key();
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&key) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            rooms.remove(&key);
        }
        removed
    }

    /// Drops a connection from every room it joined.
    pub async fn leave_all(&self, connection_id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    /// Delivers `message` to every connection in `room` and returns how many
    /// accepted it. Never fails: connections that have gone away are pruned.
    pub async fn publish(&self, room: &Room, message: ServerMessage) -> usize {
        let key = room.key();
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let rooms = self.rooms.read().await;
            if let Some(members) = rooms.get(&key) {
                for (connection_id, subscriber) in members {
                    if subscriber.outbox.send(message.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(*connection_id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            tracing::debug!("Pruning {} closed connection(s) from {}", closed.len(), room);
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get_mut(&key) {
                for connection_id in &closed {
                    members.remove(connection_id);
                }
                if members.is_empty() {
                    rooms.remove(&key);
                }
            }
        }

        delivered
    }

    /// Removes every connection in `room` whose user is not in `allowed`
    /// and tells it so. Returns the evicted users.
    pub async fn retain_users(&self, room: &Room, allowed: &HashSet<String>) -> Vec<String> {
        let key = room.key();
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&key) else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        members.retain(|_, subscriber| {
            if allowed.contains(&subscriber.user_id) {
                return true;
            }
            let _ = subscriber.outbox.send(ServerMessage::Left { room: key.clone() });
            evicted.push(subscriber.user_id.clone());
            false
        });
        if members.is_empty() {
            rooms.remove(&key);
        }

        if !evicted.is_empty() {
            tracing::info!("Evicted {} stale subscriber(s) from {}", evicted.len(), room);
        }
        evicted
    }

    pub async fn subscriber_count(&self, room: &Room) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(&room.key()).map_or(0, HashMap::len)
    }

    /// A user is online while at least one of their sessions sits in their
    /// own room.
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.subscriber_count(&Room::User(user_id.to_string())).await > 0
    }

    /// Serializes store-then-publish for one room so publishes leave in the
    /// same order the messages were appended.
    pub async fn sequence(&self, room: &Room) -> OwnedMutexGuard<()> {
        let lock = {
            let mut sequencers = self.sequencers.lock().await;
            // Guards and waiters hold their own clone, so a count of one
            // means nobody is using that room's lock.
            sequencers.retain(|_, lock| Arc::strong_count(lock) > 1);
            sequencers
                .entry(room.key())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn sequencer_count(&self) -> usize {
        self.sequencers.lock().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
