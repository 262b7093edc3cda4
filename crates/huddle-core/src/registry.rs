//! Connection registry for Huddle.
//!
//! The registry owns the runtime picture of who is connected: one live
//! connection per user, each connection's outbound queue, and the set of
//! rooms each connection currently receives fan-out for.
//!
//! Locks are always taken in the order users → connections → rooms, and no
//! guard is held across an `.await`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::{ConnectionId, RoomId, ServerEvent, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection for the same user registered.
    Superseded,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Superseded => 4008,
            CloseReason::Shutdown => 1001,
        }
    }

    /// Human-readable close reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Superseded => "Signed in from another connection",
            CloseReason::Shutdown => "Server shutting down",
        }
    }
}

/// An instruction queued for a connection's writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver an event (shared across every recipient of a broadcast).
    Event(Arc<ServerEvent>),
    /// Close the transport.
    Close(CloseReason),
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving half of a connection's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Create an outbound queue for a new connection.
#[must_use]
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A newer connection for the same user replaced this one.
    #[error("Connection superseded: {0}")]
    Superseded(ConnectionId),
}

/// Runtime state of one connection.
struct ConnectionEntry {
    user_id: UserId,
    rooms: HashSet<RoomId>,
    sender: OutboundSender,
    /// Set once a newer connection for the same user registered.
    evicted: bool,
}

/// Tracks live connections and their room subscriptions.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Current connection per user.
    users: DashMap<UserId, ConnectionId>,
    /// Connection state, including evicted connections awaiting close.
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Room fan-out index (room -> joined connections).
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection for a user, seeded with its initial rooms.
    ///
    /// Any previous connection for the same user is evicted without being
    /// notified: it stops receiving room fan-out immediately and its id is
    /// returned so the caller may force-close it.
    pub fn register(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        sender: OutboundSender,
        rooms: impl IntoIterator<Item = RoomId>,
    ) -> Option<ConnectionId> {
        // The user's entry stays locked for the whole registration, which
        // serializes register/unregister for the same user.
        match self.users.entry(user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(connection_id.clone());
                self.finish_register(user_id, connection_id, sender, rooms, Some(previous))
            }
            Entry::Vacant(vacant) => {
                let _guard = vacant.insert(connection_id.clone());
                self.finish_register(user_id, connection_id, sender, rooms, None)
            }
        }
    }

    fn finish_register(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        sender: OutboundSender,
        rooms: impl IntoIterator<Item = RoomId>,
        previous: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        let rooms: HashSet<RoomId> = rooms.into_iter().collect();
        let mut entry = self
            .connections
            .entry(connection_id.clone())
            .or_insert_with(|| ConnectionEntry {
                user_id: user_id.clone(),
                rooms: HashSet::new(),
                sender: sender.clone(),
                evicted: false,
            });
        entry.sender = sender;
        entry.evicted = false;
        for room in &rooms {
            self.rooms
                .entry(room.clone())
                .or_default()
                .insert(connection_id.clone());
        }
        entry.rooms.extend(rooms);
        drop(entry);

        if let Some(previous) = previous.as_ref().filter(|p| *p != connection_id) {
            self.evict(previous);
            info!(user = %user_id, old = %previous, new = %connection_id, "Connection superseded");
        }

        debug!(user = %user_id, connection = %connection_id, "Connection registered");
        previous
    }

    /// Stop fan-out to an evicted connection; its entry stays until unregister.
    fn evict(&self, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.evicted = true;
            for room in std::mem::take(&mut entry.rooms) {
                self.remove_from_room(&room, connection_id);
            }
        }
    }

    /// Remove a connection.
    ///
    /// The connection's runtime state is always dropped. The user mapping is
    /// only removed if it still points at this connection, so a stale
    /// disconnect never unregisters a newer connection.
    ///
    /// Returns `true` if the user mapping was removed (the user went offline).
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let Some(user_id) = self.user_of(connection_id) else {
            return false;
        };

        let removed = self
            .users
            .remove_if(&user_id, |_, current| current == connection_id)
            .is_some();

        if let Some((_, entry)) = self.connections.remove(connection_id) {
            for room in &entry.rooms {
                self.remove_from_room(room, connection_id);
            }
        }

        debug!(
            user = %user_id,
            connection = %connection_id,
            offline = removed,
            "Connection unregistered"
        );
        removed
    }

    fn remove_from_room(&self, room: &RoomId, connection_id: &ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// The current connection for a user.
    #[must_use]
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.users.get(user_id).map(|c| c.value().clone())
    }

    /// Whether a connection is registered and not superseded.
    #[must_use]
    pub fn is_live(&self, connection_id: &ConnectionId) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|e| !e.evicted)
    }

    /// The user owning a connection.
    #[must_use]
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.connections
            .get(connection_id)
            .map(|e| e.user_id.clone())
    }

    /// Every user with a registered connection.
    #[must_use]
    pub fn all_online_user_ids(&self) -> HashSet<UserId> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    /// Add a room to a connection's joined set.
    ///
    /// Returns `true` if the room was newly joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or was superseded.
    pub fn join_room(
        &self,
        connection_id: &ConnectionId,
        room: &RoomId,
    ) -> Result<bool, RegistryError> {
        let mut entry = self.live_entry_mut(connection_id)?;
        if !entry.rooms.insert(room.clone()) {
            return Ok(false);
        }
        // The entry guard is held so a concurrent unregister cannot leave a
        // dangling id in the room index.
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(connection_id.clone());

        debug!(connection = %connection_id, room = %room, "Joined room");
        Ok(true)
    }

    /// Remove a room from a connection's joined set.
    ///
    /// Returns `true` if the connection had joined the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or was superseded.
    pub fn leave_room(
        &self,
        connection_id: &ConnectionId,
        room: &RoomId,
    ) -> Result<bool, RegistryError> {
        let mut entry = self.live_entry_mut(connection_id)?;
        if !entry.rooms.remove(room) {
            return Ok(false);
        }
        self.remove_from_room(room, connection_id);

        debug!(connection = %connection_id, room = %room, "Left room");
        Ok(true)
    }

    fn live_entry_mut(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ConnectionId, ConnectionEntry>, RegistryError>
    {
        let entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::UnknownConnection(connection_id.clone()))?;
        if entry.evicted {
            return Err(RegistryError::Superseded(connection_id.clone()));
        }
        Ok(entry)
    }

    /// Rooms a connection has joined.
    #[must_use]
    pub fn joined_rooms(&self, connection_id: &ConnectionId) -> HashSet<RoomId> {
        self.connections
            .get(connection_id)
            .map(|e| e.rooms.clone())
            .unwrap_or_default()
    }

    /// Connections currently joined to a room.
    #[must_use]
    pub fn room_connections(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue an instruction for one connection.
    ///
    /// Returns `false` if the connection is unknown or its writer is gone.
    pub fn send(&self, connection_id: &ConnectionId, outbound: Outbound) -> bool {
        self.connections
            .get(connection_id)
            .map(|e| e.sender.send(outbound).is_ok())
            .unwrap_or(false)
    }

    /// Visit the sender of every connection that has not been superseded.
    pub fn for_each_live(&self, mut f: impl FnMut(&ConnectionId, &OutboundSender)) {
        for entry in self.connections.iter() {
            if !entry.evicted {
                f(entry.key(), &entry.sender);
            }
        }
    }

    /// Number of users online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            online_users: self.users.len(),
            connection_count: self.connections.len(),
            room_count: self.rooms.len(),
            total_subscriptions: self.rooms.iter().map(|r| r.len()).sum(),
        }
    }

    /// Release every connection.
    ///
    /// Each connection is told to close and all state is cleared. Returns
    /// the number of connections released.
    pub fn shutdown(&self) -> usize {
        let mut released = 0;
        for entry in self.connections.iter() {
            if entry.sender.send(Outbound::Close(CloseReason::Shutdown)).is_ok() {
                released += 1;
            }
        }
        self.users.clear();
        self.connections.clear();
        self.rooms.clear();

        info!(released, "Connection registry shut down");
        released
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of users online.
    pub online_users: usize,
    /// Number of connection entries (including superseded ones awaiting close).
    pub connection_count: usize,
    /// Number of rooms with at least one joined connection.
    pub room_count: usize,
    /// Total room subscriptions.
    pub total_subscriptions: usize,
}
