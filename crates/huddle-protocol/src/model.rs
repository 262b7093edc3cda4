//! Identifiers and persisted records shared by clients and the server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Maximum message body length in bytes.
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A verified user identifier.
    UserId
);

string_id!(
    /// A room identifier (a "chatroom" in the HTTP layer).
    RoomId
);

string_id!(
    /// Identifier of one live connection.
    ConnectionId
);

/// Server-assigned message identifier.
///
/// Identifiers are handed out in insertion order, so they double as the
/// tie-breaker for messages sharing a creation timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

/// A durably recorded chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chatroom_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub is_edited: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Message {
    /// Position of this message in its room's history.
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Composite history cursor.
///
/// Orders by creation timestamp and then by message id, so pages never skip
/// or repeat messages created in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub created_at: u64,
    pub id: MessageId,
}

/// Room flavour, as created through the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomKind {
    Private,
    #[default]
    Group,
}

/// Room listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
    pub created_at: u64,
}

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_room_id(room: &RoomId) -> Result<(), &'static str> {
    let id = room.as_str();
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Validate a message body.
///
/// # Errors
///
/// Returns an error message if the body is blank or too long.
pub fn validate_content(content: &str) -> Result<(), &'static str> {
    if content.trim().is_empty() {
        return Err("Message content cannot be empty");
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err("Message content too long");
    }
    Ok(())
}
