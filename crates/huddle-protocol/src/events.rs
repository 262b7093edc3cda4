//! Event types for the Huddle protocol.
//!
//! Every event travels as an adjacently tagged object:
//!
//! ```json
//! {"event": "send-message", "data": {"chatroomId": "general", "content": "hi"}}
//! ```

use crate::model::{ConnectionId, Message, MessageKind, RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Error codes carried by [`ServerEvent::Error`].
pub mod error_codes {
    /// Malformed or oversized event payload.
    pub const VALIDATION: u16 = 4000;
    /// Missing or rejected credential.
    pub const AUTHENTICATION: u16 = 4001;
    /// The sender does not belong to the room.
    pub const NOT_MEMBER: u16 = 4003;
    /// The event is not valid in the connection's current state.
    pub const INVALID_STATE: u16 = 4009;
    /// The durable store rejected or failed the write.
    pub const PERSISTENCE: u16 = 5000;
}

/// Events sent by a client over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Subscribe this connection to a room's fan-out.
    JoinRoom { chatroom_id: RoomId },

    /// Drop this connection's subscription to a room.
    LeaveRoom { chatroom_id: RoomId },

    /// Persist and broadcast a message.
    SendMessage {
        chatroom_id: RoomId,
        content: String,
        #[serde(default)]
        message_type: MessageKind,
    },

    TypingStart { chatroom_id: RoomId },

    TypingStop { chatroom_id: RoomId },

    /// Application-level keepalive.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::LeaveRoom { .. } => "leave-room",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::TypingStart { .. } => "typing-start",
            ClientEvent::TypingStop { .. } => "typing-stop",
            ClientEvent::Ping { .. } => "ping",
        }
    }
}

/// Events sent by the server to one or more connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Handshake completed; sent once, first.
    Connected {
        connection_id: ConnectionId,
        user_id: UserId,
    },

    /// Snapshot of every other user online when this connection registered.
    OnlineUsersList { user_ids: Vec<UserId> },

    UserOnline { user_id: UserId },

    UserOffline { user_id: UserId, last_seen: u64 },

    /// Acknowledges a `join-room` to the requester.
    JoinedRoom { chatroom_id: RoomId },

    UserJoinedRoom { chatroom_id: RoomId, user_id: UserId },

    UserLeftRoom { chatroom_id: RoomId, user_id: UserId },

    /// A persisted message.
    ReceiveMessage(Message),

    UserTyping { chatroom_id: RoomId, user_id: UserId },

    UserStoppedTyping { chatroom_id: RoomId, user_id: UserId },

    /// A per-event failure, delivered only to the originating connection.
    Error { code: u16, message: String },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::OnlineUsersList { .. } => "online-users-list",
            ServerEvent::UserOnline { .. } => "user-online",
            ServerEvent::UserOffline { .. } => "user-offline",
            ServerEvent::JoinedRoom { .. } => "joined-room",
            ServerEvent::UserJoinedRoom { .. } => "user-joined-room",
            ServerEvent::UserLeftRoom { .. } => "user-left-room",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::UserStoppedTyping { .. } => "user-stopped-typing",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}
