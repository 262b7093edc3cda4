//! Event dispatcher for Huddle.
//!
//! The dispatcher drives each connection's [`SessionState`] through its
//! transitions. Every event is validated by [`SessionState::plan`] and then
//! executed here: membership checks and persistence go to the collaborators,
//! fan-out goes through the [`Broadcaster`].
//!
//! Failures are returned to the caller and, through [`Dispatcher::dispatch`],
//! reported to the originating connection only.

use crate::broadcast::Broadcaster;
use crate::error::DispatchError;
use crate::presence::{Departure, PresenceTracker};
use crate::registry::{CloseReason, ConnectionRegistry, Outbound, OutboundSender};
use crate::sequencer::RoomSequencer;
use crate::session::{Action, SessionState};
use crate::store::{CredentialVerifier, MembershipStore, MessageStore, NewMessage, UserStore};
use crate::typing::TypingTracker;
use huddle_protocol::{ClientEvent, ConnectionId, MessageKind, RoomId, ServerEvent, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The durable collaborators the dispatcher calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub memberships: Arc<dyn MembershipStore>,
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserStore>,
}

impl Collaborators {
    /// Use one store object for every durable collaborator.
    #[must_use]
    pub fn from_store<S>(verifier: Arc<dyn CredentialVerifier>, store: Arc<S>) -> Self
    where
        S: MembershipStore + MessageStore + UserStore + 'static,
    {
        Self {
            verifier,
            memberships: store.clone(),
            messages: store.clone(),
            users: store,
        }
    }
}

/// Routes client events for every connection.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    presence: PresenceTracker,
    typing: TypingTracker,
    sequencer: RoomSequencer,
    stores: Collaborators,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh registry.
    #[must_use]
    pub fn new(stores: Collaborators) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let presence = PresenceTracker::new(
            Arc::clone(&registry),
            broadcaster.clone(),
            Arc::clone(&stores.users),
        );

        Self {
            registry,
            broadcaster,
            presence,
            typing: TypingTracker::new(),
            sequencer: RoomSequencer::new(),
            stores,
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// The durable collaborators.
    #[must_use]
    pub fn stores(&self) -> &Collaborators {
        &self.stores
    }

    /// Unauthenticated → Authenticated.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` if the credential is missing or rejected.
    /// No state is created in that case.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<SessionState, DispatchError> {
        let credential = credential
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DispatchError::Authentication("Credential required".into()))?;

        let user_id = self
            .stores
            .verifier
            .verify(credential)
            .await
            .map_err(|e| DispatchError::Authentication(e.to_string()))?;

        debug!(user = %user_id, "Credential verified");
        Ok(SessionState::Authenticated { user_id })
    }

    /// Authenticated → Joined.
    ///
    /// Registers a new connection, seeds its joined rooms from the user's
    /// durable memberships, and announces the user. The first event queued
    /// on `sender` is `connected`, followed by the online snapshot. A
    /// connection superseded by this one is told to close.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is authenticated, and
    /// `Persistence` if the memberships cannot be read.
    pub async fn attach(
        &self,
        session: SessionState,
        sender: OutboundSender,
    ) -> Result<SessionState, DispatchError> {
        let user_id = match session {
            SessionState::Authenticated { user_id } => user_id,
            other => return Err(DispatchError::InvalidState(other.name())),
        };

        let rooms = self.stores.memberships.rooms_for_user(&user_id).await?;
        let connection_id = ConnectionId::new(Uuid::new_v4().to_string());

        let connected = ServerEvent::Connected {
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
        };
        if sender.send(Outbound::Event(Arc::new(connected))).is_err() {
            debug!(user = %user_id, "Connection closed before attach");
        }

        debug!(user = %user_id, connection = %connection_id, rooms = rooms.len(), "Auto-joining rooms");
        let previous = self
            .presence
            .connect(&user_id, &connection_id, sender, rooms)
            .await;

        if let Some(previous) = previous.filter(|p| *p != connection_id) {
            self.broadcaster
                .close_connection(&previous, CloseReason::Superseded);
        }

        Ok(SessionState::Joined {
            user_id,
            connection_id,
        })
    }

    /// Authenticate and attach in one step.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::authenticate`] and [`Dispatcher::attach`].
    pub async fn connect(
        &self,
        credential: Option<&str>,
        sender: OutboundSender,
    ) -> Result<SessionState, DispatchError> {
        let session = self.authenticate(credential).await?;
        self.attach(session, sender).await
    }

    /// Handle one client event and report any failure to its sender.
    ///
    /// # Errors
    ///
    /// Returns the failure after it has been reported.
    pub async fn dispatch(&self, session: &SessionState, event: ClientEvent) -> Result<(), DispatchError> {
        let name = event.name();
        let result = self.handle(session, event).await;
        if let Err(e) = &result {
            warn!(
                connection = ?session.connection_id(),
                event = name,
                error = %e,
                "Event rejected"
            );
            self.report(session, e);
        }
        result
    }

    /// Send an error to the session's own connection.
    pub fn report(&self, session: &SessionState, error: &DispatchError) -> bool {
        session
            .connection_id()
            .is_some_and(|c| self.broadcaster.send_to_connection(c, error.to_event()))
    }

    /// Handle one client event.
    ///
    /// # Errors
    ///
    /// Returns the per-event failure; the session stays usable.
    pub async fn handle(&self, session: &SessionState, event: ClientEvent) -> Result<(), DispatchError> {
        let action = session.plan(event)?;
        let (Some(user_id), Some(connection_id)) = (session.user_id(), session.connection_id())
        else {
            return Err(DispatchError::InvalidState(session.name()));
        };
        // A superseded connection may still be draining its close.
        if !self.registry.is_live(connection_id) {
            let state = if self.registry.user_of(connection_id).is_some() {
                "superseded"
            } else {
                "unregistered"
            };
            return Err(DispatchError::InvalidState(state));
        }
        self.execute(user_id, connection_id, action).await
    }

    async fn execute(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        action: Action,
    ) -> Result<(), DispatchError> {
        match action {
            Action::Join(room) => self.join_room(user_id, connection_id, room).await,
            Action::Leave(room) => self.leave_room(user_id, connection_id, room),
            Action::Send {
                room,
                content,
                kind,
            } => self.send_message(user_id, room, content, kind).await,
            Action::Typing { room, active } => {
                self.typing(user_id, connection_id, room, active);
                Ok(())
            }
            Action::Pong(timestamp) => {
                self.broadcaster
                    .send_to_connection(connection_id, ServerEvent::Pong { timestamp });
                Ok(())
            }
        }
    }

    async fn join_room(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        room: RoomId,
    ) -> Result<(), DispatchError> {
        if !self.stores.memberships.is_member(user_id, &room).await? {
            // Dropped without a reply; durable membership is changed elsewhere.
            warn!(user = %user_id, room = %room, "join-room from non-member dropped");
            return Ok(());
        }

        let newly_joined = self.registry.join_room(connection_id, &room)?;
        self.broadcaster.send_to_connection(
            connection_id,
            ServerEvent::JoinedRoom {
                chatroom_id: room.clone(),
            },
        );
        if newly_joined {
            self.broadcaster.broadcast_to_room_except(
                &room,
                Some(connection_id),
                ServerEvent::UserJoinedRoom {
                    chatroom_id: room.clone(),
                    user_id: user_id.clone(),
                },
            );
        }
        Ok(())
    }

    fn leave_room(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        room: RoomId,
    ) -> Result<(), DispatchError> {
        if !self.registry.leave_room(connection_id, &room)? {
            debug!(connection = %connection_id, room = %room, "leave-room for unjoined room");
            return Ok(());
        }

        self.broadcaster.broadcast_to_room(
            &room,
            ServerEvent::UserLeftRoom {
                chatroom_id: room.clone(),
                user_id: user_id.clone(),
            },
        );
        if self.typing.stop(&room, user_id) {
            self.broadcaster.broadcast_to_room(
                &room,
                ServerEvent::UserStoppedTyping {
                    chatroom_id: room.clone(),
                    user_id: user_id.clone(),
                },
            );
        }
        Ok(())
    }

    async fn send_message(
        &self,
        user_id: &UserId,
        room: RoomId,
        content: String,
        kind: MessageKind,
    ) -> Result<(), DispatchError> {
        // Held until the broadcast is queued, so one room's messages go out
        // in the order their sends started.
        let _turn = self.sequencer.acquire(&room).await;

        if !self.stores.memberships.is_member(user_id, &room).await? {
            return Err(DispatchError::NotMember(room));
        }

        let message = self
            .stores
            .messages
            .insert(NewMessage {
                chatroom_id: room.clone(),
                sender_id: user_id.clone(),
                content,
                message_type: kind,
            })
            .await?;

        let id = message.id;
        let recipients = self
            .broadcaster
            .broadcast_to_room(&room, ServerEvent::ReceiveMessage(message));
        debug!(user = %user_id, room = %room, id = %id, recipients, "Message sent");
        Ok(())
    }

    fn typing(&self, user_id: &UserId, connection_id: &ConnectionId, room: RoomId, active: bool) {
        // No membership check: typing is forwarded as-is to the room.
        let event = if active {
            self.typing.start(&room, user_id);
            ServerEvent::UserTyping {
                chatroom_id: room.clone(),
                user_id: user_id.clone(),
            }
        } else {
            self.typing.stop(&room, user_id);
            ServerEvent::UserStoppedTyping {
                chatroom_id: room.clone(),
                user_id: user_id.clone(),
            }
        };
        self.broadcaster
            .broadcast_to_room_except(&room, Some(connection_id), event);
    }

    /// Joined → Disconnected.
    ///
    /// Safe to call more than once; only the first call from the joined
    /// state has any effect. Returns `None` if the session never joined.
    pub async fn disconnect(&self, session: &mut SessionState) -> Option<Departure> {
        let previous = std::mem::replace(session, SessionState::Disconnected);
        let SessionState::Joined {
            user_id,
            connection_id,
        } = previous
        else {
            return None;
        };

        let departure = self.presence.disconnect(&user_id, &connection_id).await;
        if matches!(departure, Departure::Offline { .. }) {
            for room in self.typing.clear_user(&user_id) {
                self.broadcaster.broadcast_to_room(
                    &room,
                    ServerEvent::UserStoppedTyping {
                        chatroom_id: room.clone(),
                        user_id: user_id.clone(),
                    },
                );
            }
        }
        Some(departure)
    }

    /// Release every connection. Called once on process shutdown.
    pub fn shutdown(&self) -> usize {
        let released = self.registry.shutdown();
        info!(released, "Dispatcher shut down");
        released
    }
}
