// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room registry: the fixed path table and each room's live connection set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use crate::config::GatewayConfig;
use crate::connection::{CloseReason, ConnId, Connection};
use crate::events::{GatewayEvent, EVENT_CAPACITY};

#[derive(Clone)]
struct Member {
    conn: Arc<Connection>,
    path: Arc<str>,
}

/// Connections currently held by one or more rooms.
///
/// Every room owns its own set unless `shareRooms` is on, in which case all
/// rooms of a namespace point at the same one.
pub struct ConnectionSet {
    label: String,
    members: RwLock<IndexMap<ConnId, Member>>,
    tracker: TaskTracker,
    events: broadcast::Sender<GatewayEvent>,
}

impl ConnectionSet {
    fn new(label: String, events: broadcast::Sender<GatewayEvent>) -> Self {
        Self { label, members: RwLock::new(IndexMap::new()), tracker: TaskTracker::new(), events }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracks the connection tasks of this set so shutdown can await them.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    fn insert(&self, path: &Arc<str>, conn: Arc<Connection>) {
        let id = conn.id();
        let actor_id = conn.actor_id().to_owned();
        self.members.write().insert(id, Member { conn, path: Arc::clone(path) });
        tracing::debug!(
            set = %self.label,
            path = %path,
            conn_id = %id,
            actor_id = %actor_id,
            "connection registered"
        );
        let _ = self.events.send(GatewayEvent::Connected {
            path: path.to_string(),
            conn_id: id,
            actor_id,
        });
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnId, reason: CloseReason) -> bool {
        let removed = self.members.write().shift_remove(&id);
        let Some(member) = removed else {
            return false;
        };
        let actor_id = member.conn.actor_id().to_owned();
        tracing::debug!(
            set = %self.label,
            path = %member.path,
            conn_id = %id,
            actor_id = %actor_id,
            %reason,
            "connection unregistered"
        );
        let _ = self.events.send(GatewayEvent::Disconnected {
            path: member.path.to_string(),
            conn_id: id,
            actor_id,
            reason,
        });
        true
    }

    /// Point-in-time copy of the members, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.read().values().map(|m| Arc::clone(&m.conn)).collect()
    }

    /// Close every member and wait for their connection tasks to finish.
    pub async fn close(&self) {
        let members = self.snapshot();
        for conn in &members {
            conn.close(CloseReason::Shutdown);
        }
        self.tracker.close();
        self.tracker.wait().await;

        // Members registered without a task (or whose task already exited) are
        // dropped here so the set is empty once shutdown returns.
        for conn in &members {
            self.remove(conn.id(), CloseReason::Shutdown);
        }
        tracing::debug!(set = %self.label, closed = members.len(), "connection set closed");
    }
}

/// A routable destination: one namespace/room pair.
pub struct Room {
    namespace: String,
    name: String,
    path: Arc<str>,
    set: Arc<ConnectionSet>,
}

impl Room {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Control-plane prefix: `<namespace>.<room>`.
    pub fn method_prefix(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.set
    }

    pub fn register(&self, conn: Arc<Connection>) {
        self.set.insert(&self.path, conn);
    }

    pub fn unregister(&self, id: ConnId, reason: CloseReason) -> bool {
        self.set.remove(id, reason)
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.set.snapshot()
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("path", &self.path)
            .field("set", &self.set.label)
            .finish()
    }
}

/// Path table built once from configuration. Never mutated afterwards, so
/// lookups take no lock; only the connection sets are synchronized.
pub struct RoomRegistry {
    by_path: HashMap<String, Arc<Room>>,
    by_method: HashMap<String, Arc<Room>>,
    rooms: Vec<Arc<Room>>,
    sets: Vec<Arc<ConnectionSet>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl RoomRegistry {
    /// Build the namespace × room cross product.
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        if config.namespace.is_empty() {
            anyhow::bail!("at least one namespace must be configured");
        }
        if config.rooms.is_empty() {
            anyhow::bail!("at least one room must be configured");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut by_path = HashMap::new();
        let mut by_method = HashMap::new();
        let mut rooms = Vec::new();
        let mut sets = Vec::new();

        for namespace in &config.namespace {
            let shared = config.share_rooms.then(|| {
                let set = Arc::new(ConnectionSet::new(format!("{namespace}/*"), events.clone()));
                sets.push(Arc::clone(&set));
                set
            });

            for name in &config.rooms {
                let path = config.room_path(namespace, name);
                let set = match shared {
                    Some(ref set) => Arc::clone(set),
                    None => {
                        let set = Arc::new(ConnectionSet::new(
                            format!("{namespace}/{name}"),
                            events.clone(),
                        ));
                        sets.push(Arc::clone(&set));
                        set
                    }
                };
                let room = Arc::new(Room {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    path: Arc::from(path.as_str()),
                    set,
                });
                if by_path.insert(path.clone(), Arc::clone(&room)).is_some() {
                    anyhow::bail!("duplicate room path: {path}");
                }
                let prefix = room.method_prefix();
                if by_method.insert(prefix.clone(), Arc::clone(&room)).is_some() {
                    anyhow::bail!("duplicate room method prefix: {prefix}");
                }
                rooms.push(room);
            }
        }

        Ok(Self { by_path, by_method, rooms, sets, events })
    }

    /// Exact-match lookup of an upgrade path.
    pub fn resolve(&self, path: &str) -> Option<Arc<Room>> {
        self.by_path.get(path).cloned()
    }

    pub fn room(&self, namespace: &str, name: &str) -> Option<Arc<Room>> {
        self.by_method.get(&format!("{namespace}.{name}")).cloned()
    }

    /// Lookup by `<namespace>.<room>` method prefix.
    pub fn room_by_prefix(&self, prefix: &str) -> Option<Arc<Room>> {
        self.by_method.get(prefix).cloned()
    }

    pub fn register(&self, room: &Room, conn: Arc<Connection>) {
        room.register(conn);
    }

    pub fn unregister(&self, room: &Room, id: ConnId, reason: CloseReason) -> bool {
        room.unregister(id, reason)
    }

    pub fn connections_of(&self, room: &Room) -> Vec<Arc<Connection>> {
        room.snapshot()
    }

    /// Rooms in configuration order.
    pub fn rooms(&self) -> &[Arc<Room>] {
        &self.rooms
    }

    /// Distinct connection sets (one per room, or one per namespace when shared).
    pub fn sets(&self) -> &[Arc<ConnectionSet>] {
        &self.sets
    }

    pub fn connection_count(&self) -> usize {
        self.sets.iter().map(|s| s.len()).sum()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "room_tests.rs"]
mod tests;
