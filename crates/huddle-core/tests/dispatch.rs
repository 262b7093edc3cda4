//! End-to-end dispatcher behaviour over in-memory collaborators.

use async_trait::async_trait;
use huddle_core::{
    outbound_channel, CloseReason, Collaborators, Departure, DispatchError, Dispatcher,
    MemoryStore, MessageStore, NewMessage, Outbound, OutboundReceiver, Page, PageRequest,
    SessionState, StaticVerifier, StoreError,
};
use huddle_protocol::{
    error_codes, ClientEvent, Message, MessageKind, RoomId, RoomKind, RoomSummary, ServerEvent,
    UserId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Client {
    session: SessionState,
    rx: OutboundReceiver,
}

impl Client {
    /// Everything queued so far.
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(outbound) = self.rx.try_recv() {
            if let Outbound::Event(event) = outbound {
                events.push((*event).clone());
            }
        }
        events
    }

    fn messages(&mut self) -> Vec<Message> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

fn room(id: &str) -> RoomSummary {
    RoomSummary {
        id: RoomId::from(id),
        name: id.to_uppercase(),
        kind: RoomKind::Group,
        created_at: 0,
    }
}

/// Rooms r1 and r2; A, B in r1, C in r2.
fn fixture() -> (Dispatcher, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store.insert_room(room("r1"));
    store.insert_room(room("r2"));
    store.seed_member(&UserId::from("A"), &RoomId::from("r1"));
    store.seed_member(&UserId::from("B"), &RoomId::from("r1"));
    store.seed_member(&UserId::from("C"), &RoomId::from("r2"));

    let verifier = StaticVerifier::new()
        .with_token("tok-a", "A")
        .with_token("tok-b", "B")
        .with_token("tok-c", "C");
    let dispatcher = Dispatcher::new(Collaborators::from_store(Arc::new(verifier), store.clone()));
    (dispatcher, store)
}

async fn connect(dispatcher: &Dispatcher, token: &str) -> Client {
    let (tx, rx) = outbound_channel();
    let session = dispatcher.connect(Some(token), tx).await.unwrap();
    Client { session, rx }
}

fn send(room: &str, content: &str) -> ClientEvent {
    ClientEvent::SendMessage {
        chatroom_id: RoomId::from(room),
        content: content.into(),
        message_type: MessageKind::Text,
    }
}

#[tokio::test]
async fn test_connected_is_first_event() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;

    let events = a.drain();
    match &events[0] {
        ServerEvent::Connected { user_id, connection_id } => {
            assert_eq!(user_id, &UserId::from("A"));
            assert_eq!(Some(connection_id), a.session.connection_id());
        }
        other => panic!("Expected connected, got {:?}", other),
    }
    assert_eq!(
        events[1],
        ServerEvent::OnlineUsersList { user_ids: vec![] }
    );
}

#[tokio::test]
async fn test_message_fanout_is_room_scoped() {
    let (dispatcher, store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    let mut c = connect(&dispatcher, "tok-c").await;
    a.drain();
    b.drain();
    c.drain();

    dispatcher.dispatch(&a.session, send("r1", "hello")).await.unwrap();

    let to_a = a.messages();
    let to_b = b.messages();
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a, to_b);
    assert_eq!(to_a[0].content, "hello");
    assert_eq!(to_a[0].sender_id, UserId::from("A"));
    assert!(to_a[0].created_at > 0);
    assert!(c.messages().is_empty());
    assert_eq!(store.message_count(&RoomId::from("r1")), 1);
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (dispatcher, _store) = fixture();
    let a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    b.drain();

    for i in 0..10 {
        dispatcher
            .dispatch(&a.session, send("r1", &format!("m{i}")))
            .await
            .unwrap();
    }

    let received: Vec<String> = b.messages().into_iter().map(|m| m.content).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_non_member_join_is_dropped() {
    let (dispatcher, _store) = fixture();
    let mut c = connect(&dispatcher, "tok-c").await;
    let mut a = connect(&dispatcher, "tok-a").await;
    c.drain();
    a.drain();

    dispatcher
        .dispatch(
            &c.session,
            ClientEvent::JoinRoom {
                chatroom_id: RoomId::from("r1"),
            },
        )
        .await
        .unwrap();

    assert!(c.drain().is_empty());
    assert!(a.drain().is_empty());
    let connection = c.session.connection_id().unwrap();
    assert!(!dispatcher
        .registry()
        .joined_rooms(connection)
        .contains(&RoomId::from("r1")));
}

#[tokio::test]
async fn test_non_member_send_is_rejected() {
    let (dispatcher, store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut c = connect(&dispatcher, "tok-c").await;
    a.drain();
    c.drain();

    let err = dispatcher
        .dispatch(&c.session, send("r1", "sneaky"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotMember(_)));

    assert_eq!(
        c.drain(),
        vec![ServerEvent::error(
            error_codes::NOT_MEMBER,
            "Not a member of this chatroom"
        )]
    );
    assert!(a.drain().is_empty());
    assert_eq!(store.message_count(&RoomId::from("r1")), 0);
}

#[tokio::test]
async fn test_join_ack_and_announcement() {
    let (dispatcher, store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut c = connect(&dispatcher, "tok-c").await;
    a.drain();
    c.drain();

    // Membership granted out of band, e.g. through the HTTP surface.
    store.seed_member(&UserId::from("C"), &RoomId::from("r1"));
    let join = ClientEvent::JoinRoom {
        chatroom_id: RoomId::from("r1"),
    };
    dispatcher.dispatch(&c.session, join.clone()).await.unwrap();

    assert_eq!(
        c.drain(),
        vec![ServerEvent::JoinedRoom {
            chatroom_id: RoomId::from("r1")
        }]
    );
    assert_eq!(
        a.drain(),
        vec![ServerEvent::UserJoinedRoom {
            chatroom_id: RoomId::from("r1"),
            user_id: UserId::from("C"),
        }]
    );

    // Re-joining acknowledges again without a second announcement.
    dispatcher.dispatch(&c.session, join).await.unwrap();
    assert_eq!(c.drain().len(), 1);
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn test_leave_room() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    a.drain();
    b.drain();

    let leave = ClientEvent::LeaveRoom {
        chatroom_id: RoomId::from("r1"),
    };
    dispatcher.dispatch(&b.session, leave.clone()).await.unwrap();
    assert_eq!(
        a.drain(),
        vec![ServerEvent::UserLeftRoom {
            chatroom_id: RoomId::from("r1"),
            user_id: UserId::from("B"),
        }]
    );

    // B no longer receives r1 traffic.
    dispatcher.dispatch(&a.session, send("r1", "still here?")).await.unwrap();
    assert!(b.messages().is_empty());
    a.drain();

    // Leaving again is a silent no-op.
    dispatcher.dispatch(&b.session, leave).await.unwrap();
    assert!(a.drain().is_empty());
    assert!(b.drain().is_empty());
}

#[tokio::test]
async fn test_typing_excludes_sender() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    a.drain();
    b.drain();

    dispatcher
        .dispatch(
            &a.session,
            ClientEvent::TypingStart {
                chatroom_id: RoomId::from("r1"),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        b.drain(),
        vec![ServerEvent::UserTyping {
            chatroom_id: RoomId::from("r1"),
            user_id: UserId::from("A"),
        }]
    );
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn test_typing_is_not_membership_checked() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let c = connect(&dispatcher, "tok-c").await;
    a.drain();

    dispatcher
        .dispatch(
            &c.session,
            ClientEvent::TypingStart {
                chatroom_id: RoomId::from("r1"),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        a.drain(),
        vec![ServerEvent::UserTyping {
            chatroom_id: RoomId::from("r1"),
            user_id: UserId::from("C"),
        }]
    );
}

#[tokio::test]
async fn test_disconnect_clears_typing_and_announces_offline() {
    let (dispatcher, store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    a.drain();

    dispatcher
        .dispatch(
            &b.session,
            ClientEvent::TypingStart {
                chatroom_id: RoomId::from("r1"),
            },
        )
        .await
        .unwrap();
    a.drain();

    let departure = dispatcher.disconnect(&mut b.session).await;
    assert!(matches!(departure, Some(Departure::Offline { .. })));
    assert_eq!(b.session, SessionState::Disconnected);

    let events = a.drain();
    assert!(matches!(
        &events[0],
        ServerEvent::UserOffline { user_id, .. } if user_id == &UserId::from("B")
    ));
    assert_eq!(
        events[1],
        ServerEvent::UserStoppedTyping {
            chatroom_id: RoomId::from("r1"),
            user_id: UserId::from("B"),
        }
    );

    let record = store.user(&UserId::from("B")).unwrap();
    assert!(!record.is_online);
    assert!(record.last_seen.is_some());

    // A second disconnect does nothing.
    assert_eq!(dispatcher.disconnect(&mut b.session).await, None);
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn test_reconnect_supersedes_and_stale_disconnect_is_ignored() {
    let (dispatcher, store) = fixture();
    let mut observer = connect(&dispatcher, "tok-b").await;
    let mut first = connect(&dispatcher, "tok-a").await;
    let mut second = connect(&dispatcher, "tok-a").await;
    observer.drain();
    second.drain();

    // The first connection is told to close.
    let mut closed = false;
    while let Ok(outbound) = first.rx.try_recv() {
        if let Outbound::Close(reason) = outbound {
            assert_eq!(reason, CloseReason::Superseded);
            closed = true;
        }
    }
    assert!(closed);

    // Its late disconnect must not take A offline.
    let departure = dispatcher.disconnect(&mut first.session).await;
    assert_eq!(departure, Some(Departure::Stale));
    assert!(observer.drain().is_empty());
    assert_eq!(
        dispatcher.registry().lookup(&UserId::from("A")).as_ref(),
        second.session.connection_id()
    );
    assert!(store.user(&UserId::from("A")).unwrap().is_online);

    // The new connection still receives room traffic.
    dispatcher.dispatch(&observer.session, send("r1", "hi")).await.unwrap();
    assert_eq!(second.messages().len(), 1);
}

#[tokio::test]
async fn test_superseded_connection_cannot_send() {
    let (dispatcher, store) = fixture();
    let mut observer = connect(&dispatcher, "tok-b").await;
    let mut first = connect(&dispatcher, "tok-a").await;
    let _second = connect(&dispatcher, "tok-a").await;
    observer.drain();
    first.drain();

    let err = dispatcher
        .dispatch(&first.session, send("r1", "ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState("superseded")));

    let err = dispatcher
        .dispatch(
            &first.session,
            ClientEvent::TypingStart {
                chatroom_id: RoomId::from("r1"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState("superseded")));

    assert_eq!(store.message_count(&RoomId::from("r1")), 0);
    assert!(observer.drain().is_empty());
    assert!(first
        .drain()
        .iter()
        .all(|e| matches!(e, ServerEvent::Error { code, .. } if *code == error_codes::INVALID_STATE)));
}

#[tokio::test]
async fn test_online_snapshot_excludes_self() {
    let (dispatcher, _store) = fixture();
    let _a = connect(&dispatcher, "tok-a").await;
    let _b = connect(&dispatcher, "tok-b").await;
    let mut c = connect(&dispatcher, "tok-c").await;

    let events = c.drain();
    assert_eq!(
        events[1],
        ServerEvent::OnlineUsersList {
            user_ids: vec![UserId::from("A"), UserId::from("B")]
        }
    );
}

#[tokio::test]
async fn test_bad_credential_creates_no_state() {
    let (dispatcher, _store) = fixture();
    let (tx, _rx) = outbound_channel();

    let err = dispatcher.connect(Some("forged"), tx.clone()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Authentication(_)));
    let err = dispatcher.connect(None, tx).await.unwrap_err();
    assert!(matches!(err, DispatchError::Authentication(_)));

    assert_eq!(dispatcher.registry().online_count(), 0);
}

#[tokio::test]
async fn test_events_before_join_are_rejected() {
    let (dispatcher, _store) = fixture();
    let session = dispatcher.authenticate(Some("tok-a")).await.unwrap();

    let err = dispatcher
        .handle(&session, send("r1", "too early"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState("authenticated")));
}

#[tokio::test]
async fn test_ping_pong() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    a.drain();

    dispatcher
        .dispatch(&a.session, ClientEvent::Ping { timestamp: Some(42) })
        .await
        .unwrap();
    assert_eq!(a.drain(), vec![ServerEvent::Pong { timestamp: Some(42) }]);
}

struct FailingMessages;

#[async_trait]
impl MessageStore for FailingMessages {
    async fn insert(&self, _message: NewMessage) -> Result<Message, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn page(&self, _room: &RoomId, _request: PageRequest) -> Result<Page, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
}

#[tokio::test]
async fn test_persistence_failure_broadcasts_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert_room(room("r1"));
    store.seed_member(&UserId::from("A"), &RoomId::from("r1"));
    store.seed_member(&UserId::from("B"), &RoomId::from("r1"));
    let verifier = StaticVerifier::new()
        .with_token("tok-a", "A")
        .with_token("tok-b", "B");

    let mut stores = Collaborators::from_store(Arc::new(verifier), store);
    stores.messages = Arc::new(FailingMessages);
    let dispatcher = Dispatcher::new(stores);

    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    a.drain();
    b.drain();

    let err = dispatcher
        .dispatch(&a.session, send("r1", "lost"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Persistence(_)));

    assert_eq!(
        a.drain(),
        vec![ServerEvent::error(error_codes::PERSISTENCE, "Failed to send message")]
    );
    assert!(b.drain().is_empty());

    // The session is still usable.
    dispatcher
        .dispatch(&a.session, ClientEvent::Ping { timestamp: None })
        .await
        .unwrap();
    assert_eq!(a.drain(), vec![ServerEvent::Pong { timestamp: None }]);
}

#[tokio::test]
async fn test_shutdown_closes_everyone() {
    let (dispatcher, _store) = fixture();
    let mut a = connect(&dispatcher, "tok-a").await;
    a.drain();

    assert_eq!(dispatcher.shutdown(), 1);
    assert!(matches!(
        a.rx.try_recv(),
        Ok(Outbound::Close(CloseReason::Shutdown))
    ));
    assert_eq!(dispatcher.registry().online_count(), 0);
}

/// Holds the first insert until released.
struct StallingMessages {
    inner: Arc<MemoryStore>,
    stall_first: AtomicBool,
    release: Notify,
}

#[async_trait]
impl MessageStore for StallingMessages {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.stall_first.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.inner.insert(message).await
    }

    async fn page(&self, room: &RoomId, request: PageRequest) -> Result<Page, StoreError> {
        self.inner.page(room, request).await
    }
}

#[tokio::test]
async fn test_concurrent_sends_keep_dispatch_order() {
    let store = Arc::new(MemoryStore::new());
    store.insert_room(room("r1"));
    store.seed_member(&UserId::from("A"), &RoomId::from("r1"));
    store.seed_member(&UserId::from("B"), &RoomId::from("r1"));
    let verifier = StaticVerifier::new()
        .with_token("tok-a", "A")
        .with_token("tok-b", "B");

    let messages = Arc::new(StallingMessages {
        inner: Arc::clone(&store),
        stall_first: AtomicBool::new(true),
        release: Notify::new(),
    });
    let mut stores = Collaborators::from_store(Arc::new(verifier), store);
    stores.messages = messages.clone();
    let dispatcher = Dispatcher::new(stores);

    let mut a = connect(&dispatcher, "tok-a").await;
    let mut b = connect(&dispatcher, "tok-b").await;
    a.drain();
    b.drain();

    // A's send starts first and stalls in the store while B's send arrives.
    let (first, second, ()) = tokio::join!(
        dispatcher.dispatch(&a.session, send("r1", "from A")),
        dispatcher.dispatch(&b.session, send("r1", "from B")),
        async {
            tokio::task::yield_now().await;
            messages.release.notify_one();
        },
    );
    first.unwrap();
    second.unwrap();

    for client in [&mut a, &mut b] {
        let order: Vec<String> = client.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(order, vec!["from A", "from B"]);
    }
}
