//! Per-connection session state machine.
//!
//! ```text
//! Unauthenticated ──authenticate──▶ Authenticated ──attach──▶ Joined ──disconnect──▶ Disconnected
//! ```
//!
//! [`SessionState::plan`] is the pure half of every event transition: it
//! checks the state and the payload and returns the [`Action`] the
//! dispatcher should carry out, without touching any shared state.

use crate::error::DispatchError;
use huddle_protocol::{
    validate_content, validate_room_id, ClientEvent, ConnectionId, MessageKind, RoomId, UserId,
};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Transport open, no credential verified yet.
    #[default]
    Unauthenticated,
    /// Credential verified; not yet registered or subscribed.
    Authenticated { user_id: UserId },
    /// Registered, seeded with the user's rooms, accepting events.
    Joined {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    /// Terminal.
    Disconnected,
}

/// A validated client request, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Join(RoomId),
    Leave(RoomId),
    Send {
        room: RoomId,
        content: String,
        kind: MessageKind,
    },
    Typing {
        room: RoomId,
        active: bool,
    },
    Pong(Option<u64>),
}

impl SessionState {
    /// State name, for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated { .. } => "authenticated",
            SessionState::Joined { .. } => "joined",
            SessionState::Disconnected => "disconnected",
        }
    }

    /// The verified user, once authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            SessionState::Authenticated { user_id } | SessionState::Joined { user_id, .. } => {
                Some(user_id)
            }
            _ => None,
        }
    }

    /// The registered connection, once joined.
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            SessionState::Joined { connection_id, .. } => Some(connection_id),
            _ => None,
        }
    }

    /// Validate an inbound event against this state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is joined, and
    /// `Validation` for a malformed room id or message body.
    pub fn plan(&self, event: ClientEvent) -> Result<Action, DispatchError> {
        if !matches!(self, SessionState::Joined { .. }) {
            return Err(DispatchError::InvalidState(self.name()));
        }

        let action = match event {
            ClientEvent::JoinRoom { chatroom_id } => Action::Join(checked_room(chatroom_id)?),
            ClientEvent::LeaveRoom { chatroom_id } => Action::Leave(checked_room(chatroom_id)?),
            ClientEvent::SendMessage {
                chatroom_id,
                content,
                message_type,
            } => {
                let room = checked_room(chatroom_id)?;
                validate_content(&content).map_err(|e| DispatchError::Validation(e.into()))?;
                Action::Send {
                    room,
                    content,
                    kind: message_type,
                }
            }
            ClientEvent::TypingStart { chatroom_id } => Action::Typing {
                room: checked_room(chatroom_id)?,
                active: true,
            },
            ClientEvent::TypingStop { chatroom_id } => Action::Typing {
                room: checked_room(chatroom_id)?,
                active: false,
            },
            ClientEvent::Ping { timestamp } => Action::Pong(timestamp),
        };
        Ok(action)
    }
}

fn checked_room(room: RoomId) -> Result<RoomId, DispatchError> {
    validate_room_id(&room).map_err(|e| DispatchError::Validation(e.into()))?;
    Ok(room)
}
