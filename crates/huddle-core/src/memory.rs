//! In-memory collaborators.
//!
//! `MemoryStore` implements every durable store trait over process memory.
//! It backs the development server and the test suites; a database-backed
//! deployment swaps in its own implementations of the same traits.

use crate::clock::now_millis;
use crate::error::StoreError;
use crate::store::{
    AuthError, CredentialVerifier, MembershipStore, MessageStore, NewMessage, Page, PageRequest,
    UserStore,
};
use async_trait::async_trait;
use dashmap::DashMap;
use huddle_protocol::{Message, MessageId, RoomId, RoomKind, RoomSummary, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Persisted presence fields of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserRecord {
    pub is_online: bool,
    pub last_seen: Option<u64>,
}

/// Process-local durable store.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<RoomId, RoomSummary>,
    members: DashMap<RoomId, HashSet<UserId>>,
    /// Per-room logs, kept sorted by (created_at, id).
    messages: Mutex<HashMap<RoomId, Vec<Message>>>,
    next_message_id: AtomicU64,
    users: DashMap<UserId, UserRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a room.
    pub fn insert_room(&self, room: RoomSummary) {
        self.members.entry(room.id.clone()).or_default();
        self.rooms.insert(room.id.clone(), room);
    }

    /// Add a membership without going through the async trait.
    pub fn seed_member(&self, user: &UserId, room: &RoomId) {
        self.members
            .entry(room.clone())
            .or_default()
            .insert(user.clone());
    }

    /// Persisted presence of a user.
    #[must_use]
    pub fn user(&self, user: &UserId) -> Option<UserRecord> {
        self.users.get(user).map(|r| *r)
    }

    /// Number of messages stored for a room.
    #[must_use]
    pub fn message_count(&self, room: &RoomId) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn rooms_for_user(&self, user: &UserId) -> Result<Vec<RoomId>, StoreError> {
        let mut rooms: Vec<RoomId> = self
            .members
            .iter()
            .filter(|entry| entry.value().contains(user))
            .map(|entry| entry.key().clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn is_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError> {
        Ok(self
            .members
            .get(room)
            .is_some_and(|members| members.contains(user)))
    }

    async fn add_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError> {
        if !self.rooms.contains_key(room) {
            return Err(StoreError::NotFound(format!("room {room}")));
        }
        Ok(self
            .members
            .entry(room.clone())
            .or_default()
            .insert(user.clone()))
    }

    async fn remove_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError> {
        Ok(self
            .members
            .get_mut(room)
            .is_some_and(|mut members| members.remove(user)))
    }

    async fn room(&self, room: &RoomId) -> Result<Option<RoomSummary>, StoreError> {
        Ok(self.rooms.get(room).map(|r| r.clone()))
    }

    async fn create_room(
        &self,
        creator: &UserId,
        name: &str,
        kind: RoomKind,
        members: &[UserId],
    ) -> Result<RoomSummary, StoreError> {
        let room = RoomSummary {
            id: RoomId::new(Uuid::new_v4().to_string()),
            name: name.to_string(),
            kind,
            created_at: now_millis(),
        };
        let members: HashSet<UserId> = std::iter::once(creator)
            .chain(members)
            .cloned()
            .collect();

        debug!(room = %room.id, creator = %creator, members = members.len(), "Room created");
        self.members.insert(room.id.clone(), members);
        self.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn members(&self, room: &RoomId) -> Result<Vec<UserId>, StoreError> {
        let mut members: Vec<UserId> = self
            .members
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut logs = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(message.chatroom_id.clone()).or_default();

        // Keep timestamps monotonic within a room even if the clock steps back.
        let floor = log.last().map_or(0, |m| m.created_at);
        let stored = Message {
            id: MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1),
            chatroom_id: message.chatroom_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            is_edited: false,
            created_at: now_millis().max(floor),
        };
        log.push(stored.clone());

        debug!(room = %stored.chatroom_id, id = %stored.id, "Message stored");
        Ok(stored)
    }

    async fn page(&self, room: &RoomId, request: PageRequest) -> Result<Page, StoreError> {
        let logs = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = logs.get(room) else {
            return Ok(Page {
                messages: Vec::new(),
                next_cursor: None,
            });
        };

        let end = match request.before {
            Some(before) => log.partition_point(|m| m.cursor() < before),
            None => log.len(),
        };
        let start = end.saturating_sub(request.limit);
        let messages = log[start..end].to_vec();
        let next_cursor = if start > 0 {
            messages.first().map(Message::cursor)
        } else {
            None
        };

        Ok(Page {
            messages,
            next_cursor,
        })
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn set_online(&self, user: &UserId) -> Result<(), StoreError> {
        self.users.entry(user.clone()).or_default().is_online = true;
        Ok(())
    }

    async fn set_offline(&self, user: &UserId, last_seen: u64) -> Result<(), StoreError> {
        let mut record = self.users.entry(user.clone()).or_default();
        record.is_online = false;
        record.last_seen = Some(last_seen);
        Ok(())
    }
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Default, Clone)]
pub struct StaticVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticVerifier {
    /// Create an empty verifier that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as proof of `user`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), user.into());
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        self.tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::Invalid("unknown token".into()))
    }
}
