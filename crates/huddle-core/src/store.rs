//! Durable collaborators consumed by the coordinator.
//!
//! The coordinator never owns durable state. It verifies credentials, checks
//! and reads memberships, appends messages, and records presence through
//! these traits, and never while holding a registry lock.

use crate::error::StoreError;
use async_trait::async_trait;
use huddle_protocol::{Cursor, Message, MessageKind, RoomId, RoomKind, RoomSummary, UserId};
use serde::Serialize;
use thiserror::Error;

/// Default history page size.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Credential rejection.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Credential required")]
    Missing,

    /// The credential has expired.
    #[error("Credential expired")]
    Expired,

    /// The credential is malformed or its signature does not verify.
    #[error("Invalid credential: {0}")]
    Invalid(String),
}

/// Turns an opaque credential into a verified user identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a credential.
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Durable (user, room) memberships.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Every room the user belongs to.
    async fn rooms_for_user(&self, user: &UserId) -> Result<Vec<RoomId>, StoreError>;

    /// Whether the user belongs to the room.
    async fn is_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError>;

    /// Add a durable membership. Returns `false` if it already existed.
    async fn add_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError>;

    /// Remove a durable membership. Returns `false` if there was none.
    async fn remove_member(&self, user: &UserId, room: &RoomId) -> Result<bool, StoreError>;

    /// Room metadata, if the room exists.
    async fn room(&self, room: &RoomId) -> Result<Option<RoomSummary>, StoreError>;

    /// Create a room. The creator and every listed user become members.
    async fn create_room(
        &self,
        creator: &UserId,
        name: &str,
        kind: RoomKind,
        members: &[UserId],
    ) -> Result<RoomSummary, StoreError>;

    /// Members of a room, sorted.
    async fn members(&self, room: &RoomId) -> Result<Vec<UserId>, StoreError>;
}

/// A message accepted by the dispatcher, before the store assigns its
/// identifier and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chatroom_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
}

/// A history page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of messages to return.
    pub limit: usize,
    /// Only return messages strictly older than this position.
    pub before: Option<Cursor>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            before: None,
        }
    }
}

/// A page of history, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub messages: Vec<Message>,
    /// Cursor for the next (older) page, if there is one.
    pub next_cursor: Option<Cursor>,
}

/// Append-only per-room message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably record a message, assigning its id and creation timestamp.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Read a page of a room's history.
    async fn page(&self, room: &RoomId, request: PageRequest) -> Result<Page, StoreError>;
}

/// The user-record facility used for presence persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Record the user as online.
    async fn set_online(&self, user: &UserId) -> Result<(), StoreError>;

    /// Record the user as offline, last seen at `last_seen` (ms since epoch).
    async fn set_offline(&self, user: &UserId, last_seen: u64) -> Result<(), StoreError>;
}
