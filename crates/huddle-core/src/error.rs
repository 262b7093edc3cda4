//! Error types for the coordinator.

use crate::registry::RegistryError;
use huddle_protocol::{error_codes, ProtocolError, RoomId, ServerEvent};
use thiserror::Error;

/// Failures reported by the durable collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Per-event failures.
///
/// These are reported to the originating connection only and never end it.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing or rejected credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The user does not belong to the room.
    #[error("Not a member of room {0}")]
    NotMember(RoomId),

    /// Malformed event payload.
    #[error("Invalid event: {0}")]
    Validation(String),

    /// A durable collaborator failed.
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The event cannot be handled in the session's current state.
    #[error("Event not allowed while {0}")]
    InvalidState(&'static str),
}

impl DispatchError {
    /// Protocol error code for this failure.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            DispatchError::Authentication(_) => error_codes::AUTHENTICATION,
            DispatchError::NotMember(_) => error_codes::NOT_MEMBER,
            DispatchError::Validation(_) => error_codes::VALIDATION,
            DispatchError::Persistence(_) => error_codes::PERSISTENCE,
            DispatchError::InvalidState(_) => error_codes::INVALID_STATE,
        }
    }

    /// Short label, used for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Authentication(_) => "authentication",
            DispatchError::NotMember(_) => "not_member",
            DispatchError::Validation(_) => "validation",
            DispatchError::Persistence(_) => "persistence",
            DispatchError::InvalidState(_) => "invalid_state",
        }
    }

    /// The error event sent back to the originating connection.
    ///
    /// Store internals are not leaked to clients.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        let message = match self {
            DispatchError::NotMember(_) => "Not a member of this chatroom".to_string(),
            DispatchError::Persistence(_) => "Failed to send message".to_string(),
            other => other.to_string(),
        };
        ServerEvent::error(self.code(), message)
    }
}

impl From<ProtocolError> for DispatchError {
    fn from(err: ProtocolError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownConnection(_) => DispatchError::InvalidState("unregistered"),
            RegistryError::Superseded(_) => DispatchError::InvalidState("superseded"),
        }
    }
}
