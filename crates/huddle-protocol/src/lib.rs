//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle realtime chat coordinator.
//!
//! This crate defines everything a client and the server exchange over the
//! persistent connection:
//!
//! - **Model** - identifiers, persisted messages, history cursors
//! - **Events** - `ClientEvent` (inbound) and `ServerEvent` (outbound)
//! - **Codec** - JSON text frames and MessagePack binary frames
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, RoomId, WireFormat};
//!
//! let event = ClientEvent::TypingStart {
//!     chatroom_id: RoomId::from("general"),
//! };
//!
//! let encoded = codec::encode(&event, WireFormat::Json).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod model;

pub use codec::{decode, encode, Encoded, EventCodec, ProtocolError, WireFormat};
pub use events::{error_codes, ClientEvent, ServerEvent};
pub use model::{
    validate_content, validate_room_id, ConnectionId, Cursor, Message, MessageId, MessageKind,
    RoomId, RoomKind, RoomSummary, UserId,
};
