//! Reconciled chat state.

use huddle_protocol::{ConnectionId, Message, MessageId, RoomId, RoomSummary, ServerEvent, UserId};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// What a chat UI renders, rebuilt from server events.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    self_id: UserId,
    connection_id: Option<ConnectionId>,
    rooms: Vec<RoomSummary>,
    current_room: Option<RoomId>,
    /// Messages of the current room, ordered by (created_at, id).
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    online: HashSet<UserId>,
    typing: HashMap<RoomId, BTreeSet<UserId>>,
}

impl ChatState {
    /// Empty state for the local user.
    #[must_use]
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            ..Self::default()
        }
    }

    /// The local user.
    #[must_use]
    pub fn self_id(&self) -> &UserId {
        &self.self_id
    }

    /// Connection id assigned by the server, once connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// Apply one server event. Returns `true` if anything changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Connected {
                connection_id,
                user_id,
            } => {
                self.connection_id = Some(connection_id.clone());
                self.self_id = user_id.clone();
                self.online.insert(user_id.clone());
                true
            }
            ServerEvent::OnlineUsersList { user_ids } => {
                // The snapshot lists everyone but us.
                self.online = user_ids.iter().cloned().collect();
                if self.connection_id.is_some() {
                    self.online.insert(self.self_id.clone());
                }
                true
            }
            ServerEvent::UserOnline { user_id } => self.set_user_online(user_id),
            ServerEvent::UserOffline { user_id, .. } => self.set_user_offline(user_id),
            ServerEvent::JoinedRoom { chatroom_id } => {
                debug!(room = %chatroom_id, "Joined room");
                false
            }
            ServerEvent::UserJoinedRoom { .. } => false,
            ServerEvent::UserLeftRoom {
                chatroom_id,
                user_id,
            } => self.remove_typing(chatroom_id, user_id),
            ServerEvent::ReceiveMessage(message) => {
                let cleared = self.remove_typing(&message.chatroom_id, &message.sender_id);
                self.add_message(message.clone()) || cleared
            }
            ServerEvent::UserTyping {
                chatroom_id,
                user_id,
            } => self.add_typing(chatroom_id, user_id),
            ServerEvent::UserStoppedTyping {
                chatroom_id,
                user_id,
            } => self.remove_typing(chatroom_id, user_id),
            ServerEvent::Error { code, message } => {
                warn!(code, message = %message, "Server reported an error");
                false
            }
            ServerEvent::Pong { .. } => false,
        }
    }

    // Rooms

    /// Replace the room list.
    pub fn set_rooms(&mut self, rooms: Vec<RoomSummary>) {
        self.rooms = rooms;
    }

    /// Put a newly joined room at the top of the list.
    ///
    /// Returns `false` if the room was already listed.
    pub fn add_room(&mut self, room: RoomSummary) -> bool {
        if self.rooms.iter().any(|r| r.id == room.id) {
            return false;
        }
        self.rooms.insert(0, room);
        true
    }

    /// Drop a room from the list, closing it if it was open.
    pub fn remove_room(&mut self, room: &RoomId) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|r| &r.id != room);
        if self.current_room.as_ref() == Some(room) {
            self.current_room = None;
            self.clear_messages();
        }
        self.typing.remove(room);
        self.rooms.len() != before
    }

    #[must_use]
    pub fn rooms(&self) -> &[RoomSummary] {
        &self.rooms
    }

    /// Open a room. Its message list starts empty until history arrives.
    pub fn select_room(&mut self, room: RoomId) {
        self.current_room = Some(room);
        self.clear_messages();
    }

    #[must_use]
    pub fn current_room(&self) -> Option<&RoomId> {
        self.current_room.as_ref()
    }

    // Messages

    /// Add one message to the open room.
    ///
    /// Returns `false` for duplicates and for messages of other rooms.
    pub fn add_message(&mut self, message: Message) -> bool {
        if self.current_room.as_ref() != Some(&message.chatroom_id) {
            return false;
        }
        if !self.seen.insert(message.id) {
            return false;
        }
        let cursor = message.cursor();
        let position = self.messages.partition_point(|m| m.cursor() < cursor);
        self.messages.insert(position, message);
        true
    }

    /// Merge a page of history into the open room. Returns how many were new.
    pub fn merge_history(&mut self, page: impl IntoIterator<Item = Message>) -> usize {
        page.into_iter()
            .map(|m| self.add_message(m))
            .filter(|added| *added)
            .count()
    }

    /// Messages of the open room, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn clear_messages(&mut self) {
        self.messages.clear();
        self.seen.clear();
    }

    // Presence

    pub fn set_user_online(&mut self, user: &UserId) -> bool {
        self.online.insert(user.clone())
    }

    /// Mark a user offline and drop their typing indicators.
    pub fn set_user_offline(&mut self, user: &UserId) -> bool {
        let was_online = self.online.remove(user);
        self.typing.retain(|_, users| {
            users.remove(user);
            !users.is_empty()
        });
        was_online
    }

    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    /// Online users, sorted.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.online.iter().cloned().collect();
        users.sort();
        users
    }

    // Typing

    /// Show a typing indicator. The local user's own typing is ignored.
    pub fn add_typing(&mut self, room: &RoomId, user: &UserId) -> bool {
        if *user == self.self_id {
            return false;
        }
        self.typing
            .entry(room.clone())
            .or_default()
            .insert(user.clone())
    }

    pub fn remove_typing(&mut self, room: &RoomId, user: &UserId) -> bool {
        let Some(users) = self.typing.get_mut(room) else {
            return false;
        };
        let removed = users.remove(user);
        if users.is_empty() {
            self.typing.remove(room);
        }
        removed
    }

    /// Users typing in a room, sorted.
    #[must_use]
    pub fn typing_in(&self, room: &RoomId) -> Vec<UserId> {
        self.typing
            .get(room)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }
}
