//! # huddle-client
//!
//! Client-side state for a Huddle connection.
//!
//! [`ChatState`] folds the server's event stream into the view a chat UI
//! renders: the room list, the open room's messages, who is online, and who
//! is typing where. Every event is applied idempotently, so redelivery or a
//! replayed snapshot never duplicates state.
//!
//! ## Example
//!
//! ```rust
//! use huddle_client::ChatState;
//! use huddle_protocol::{ServerEvent, UserId};
//!
//! let mut state = ChatState::new(UserId::from("alice"));
//! state.apply(&ServerEvent::UserOnline { user_id: UserId::from("bob") });
//! assert!(state.is_online(&UserId::from("bob")));
//! ```

pub mod state;

pub use state::ChatState;
