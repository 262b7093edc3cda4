//! Ephemeral typing indicators.
//!
//! Indicators are set on typing-start and cleared on typing-stop. The core
//! never expires them on a timer; they are only dropped when the user leaves
//! the room or goes offline.

use dashmap::DashMap;
use huddle_protocol::{RoomId, UserId};
use std::collections::HashSet;

/// Active typing indicators per room.
#[derive(Debug, Default)]
pub struct TypingTracker {
    active: DashMap<RoomId, HashSet<UserId>>,
}

impl TypingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as typing. Returns `true` if they were not already.
    pub fn start(&self, room: &RoomId, user: &UserId) -> bool {
        self.active
            .entry(room.clone())
            .or_default()
            .insert(user.clone())
    }

    /// Clear a user's indicator. Returns `true` if one was set.
    pub fn stop(&self, room: &RoomId, user: &UserId) -> bool {
        let removed = self
            .active
            .get_mut(room)
            .is_some_and(|mut users| users.remove(user));
        self.active.remove_if(room, |_, users| users.is_empty());
        removed
    }

    /// Clear every indicator of a user, returning the rooms affected.
    pub fn clear_user(&self, user: &UserId) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .active
            .iter_mut()
            .filter_map(|mut entry| entry.value_mut().remove(user).then(|| entry.key().clone()))
            .collect();
        self.active.retain(|_, users| !users.is_empty());
        rooms.sort();
        rooms
    }

    /// Users currently typing in a room.
    #[must_use]
    pub fn typing_in(&self, room: &RoomId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .active
            .get(room)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}
