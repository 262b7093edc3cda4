//! Presence tracking for Huddle.
//!
//! Presence is derived from the registry: a user is online while the
//! registry maps them to a connection. Registration, the snapshot sent to a
//! new connection, and online/offline broadcasts all run under one presence
//! lock, so a client never sees a snapshot that contradicts a transition
//! queued before it.
//!
//! Each user's transitions (persist plus register, or unregister plus
//! persist plus announce) also hold that user's turn, so a reconnect never
//! lands between an unregister and its offline write.

use crate::broadcast::Broadcaster;
use crate::clock::now_millis;
use crate::registry::{ConnectionRegistry, OutboundSender};
use crate::sequencer::UserSequencer;
use crate::store::UserStore;
use huddle_protocol::{ConnectionId, RoomId, ServerEvent, UserId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of a disconnect, as seen by presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The user went offline at the given time (ms since epoch).
    Offline { last_seen: u64 },
    /// The connection had already been replaced or removed.
    Stale,
}

/// Emits online/offline transitions.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    users: Arc<dyn UserStore>,
    sequence: Mutex<()>,
    transitions: UserSequencer,
}

impl PresenceTracker {
    /// Create a presence tracker.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            users,
            sequence: Mutex::new(()),
            transitions: UserSequencer::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection and announce the user.
    ///
    /// The new connection receives the set of other online users once; every
    /// other connection receives `user-online`. Returns the connection this
    /// one superseded, if any.
    pub async fn connect(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        sender: OutboundSender,
        rooms: Vec<RoomId>,
    ) -> Option<ConnectionId> {
        let _turn = self.transitions.acquire(user_id).await;
        if let Err(e) = self.users.set_online(user_id).await {
            warn!(user = %user_id, error = %e, "Failed to persist online status");
        }

        let previous = {
            let _sequence = self.lock();
            let previous = self.registry.register(user_id, connection_id, sender, rooms);

            let mut others: Vec<UserId> = self
                .registry
                .all_online_user_ids()
                .into_iter()
                .filter(|u| u != user_id)
                .collect();
            others.sort();

            self.broadcaster.send_to_connection(
                connection_id,
                ServerEvent::OnlineUsersList { user_ids: others },
            );
            self.broadcaster.broadcast_to_all_except(
                Some(connection_id),
                ServerEvent::UserOnline {
                    user_id: user_id.clone(),
                },
            );
            previous
        };

        info!(user = %user_id, connection = %connection_id, "User online");
        previous
    }

    /// Unregister a connection and, if it was the user's current one,
    /// record and announce the user as offline.
    pub async fn disconnect(&self, user_id: &UserId, connection_id: &ConnectionId) -> Departure {
        let _turn = self.transitions.acquire(user_id).await;
        let removed = {
            let _sequence = self.lock();
            self.registry.unregister(connection_id)
        };
        if !removed {
            debug!(user = %user_id, connection = %connection_id, "Stale disconnect");
            return Departure::Stale;
        }

        let last_seen = now_millis();
        if let Err(e) = self.users.set_offline(user_id, last_seen).await {
            warn!(user = %user_id, error = %e, "Failed to persist offline status");
        }

        {
            let _sequence = self.lock();
            self.broadcaster.broadcast_to_all(ServerEvent::UserOffline {
                user_id: user_id.clone(),
                last_seen,
            });
        }

        info!(user = %user_id, connection = %connection_id, last_seen, "User offline");
        Departure::Offline { last_seen }
    }
}
