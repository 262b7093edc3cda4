//! # huddle-core
//!
//! The realtime presence and message-broadcast coordinator for Huddle.
//!
//! This crate tracks which users are connected, which rooms each connection
//! has joined, and fans out messages, presence transitions, and typing
//! events to the right connections:
//!
//! - **Registry** - one live connection per user, plus each connection's joined rooms
//! - **Presence** - online/offline transitions derived from registry changes
//! - **Broadcast** - room, global, and unicast delivery
//! - **Dispatcher** - per-connection state machine validating and routing client events
//! - **Store** - the durable collaborators the coordinator talks to
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Dispatcher  │────▶│   Stores    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Broadcaster │◀────│  Presence   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod broadcast;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod typing;

pub use broadcast::Broadcaster;
pub use dispatcher::{Collaborators, Dispatcher};
pub use error::{DispatchError, StoreError};
pub use memory::{MemoryStore, StaticVerifier};
pub use presence::{Departure, PresenceTracker};
pub use registry::{
    outbound_channel, CloseReason, ConnectionRegistry, Outbound, OutboundReceiver,
    OutboundSender, RegistryError, RegistryStats,
};
pub use session::{Action, SessionState};
pub use store::{
    AuthError, CredentialVerifier, MembershipStore, MessageStore, NewMessage, Page, PageRequest,
    UserStore,
};
