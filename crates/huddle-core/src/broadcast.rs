//! Room broadcaster for Huddle.
//!
//! Delivery is best-effort to the connections registered at the moment of
//! the call. An event is wrapped in one `Arc` and shared by every recipient's
//! queue.

use crate::registry::{CloseReason, ConnectionRegistry, Outbound};
use huddle_protocol::{ConnectionId, RoomId, ServerEvent};
use std::sync::Arc;
use tracing::trace;

/// Fans events out to connections in the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every connection joined to `room`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast_to_room(&self, room: &RoomId, event: ServerEvent) -> usize {
        self.broadcast_to_room_except(room, None, event)
    }

    /// Deliver to every connection joined to `room` except `except`.
    pub fn broadcast_to_room_except(
        &self,
        room: &RoomId,
        except: Option<&ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        // Snapshot the room first so no room guard is held while sending.
        let targets = self.registry.room_connections(room);
        let name = event.name();
        let event = Arc::new(event);

        let delivered = targets
            .iter()
            .filter(|c| Some(*c) != except)
            .filter(|c| self.registry.send(c, Outbound::Event(Arc::clone(&event))))
            .count();

        trace!(room = %room, event = name, recipients = delivered, "Room broadcast");
        delivered
    }

    /// Deliver to every live connection.
    pub fn broadcast_to_all(&self, event: ServerEvent) -> usize {
        self.broadcast_to_all_except(None, event)
    }

    /// Deliver to every live connection except `except`.
    pub fn broadcast_to_all_except(
        &self,
        except: Option<&ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let name = event.name();
        let event = Arc::new(event);
        let mut delivered = 0;

        self.registry.for_each_live(|connection_id, sender| {
            if Some(connection_id) == except {
                return;
            }
            if sender.send(Outbound::Event(Arc::clone(&event))).is_ok() {
                delivered += 1;
            }
        });

        trace!(event = name, recipients = delivered, "Global broadcast");
        delivered
    }

    /// Deliver to a single connection.
    pub fn send_to_connection(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.registry
            .send(connection_id, Outbound::Event(Arc::new(event)))
    }

    /// Ask a connection's writer to close the transport.
    pub fn close_connection(&self, connection_id: &ConnectionId, reason: CloseReason) -> bool {
        self.registry.send(connection_id, Outbound::Close(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{outbound_channel, OutboundReceiver};
    use huddle_protocol::UserId;

    fn setup() -> (Broadcaster, Vec<OutboundReceiver>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for (user, conn, rooms) in [
            ("alice", "c1", vec!["general"]),
            ("bob", "c2", vec!["general", "random"]),
            ("carol", "c3", vec!["random"]),
        ] {
            let (tx, rx) = outbound_channel();
            registry.register(
                &UserId::from(user),
                &ConnectionId::from(conn),
                tx,
                rooms.into_iter().map(RoomId::from),
            );
            receivers.push(rx);
        }
        (Broadcaster::new(registry), receivers)
    }

    fn pong() -> ServerEvent {
        ServerEvent::Pong { timestamp: None }
    }

    #[test]
    fn test_room_broadcast_reaches_only_joined() {
        let (broadcaster, mut rx) = setup();

        let count = broadcaster.broadcast_to_room(&RoomId::from("general"), pong());
        assert_eq!(count, 2);

        assert!(rx[0].try_recv().is_ok());
        assert!(rx[1].try_recv().is_ok());
        assert!(rx[2].try_recv().is_err());
    }

    #[test]
    fn test_room_broadcast_except_sender() {
        let (broadcaster, mut rx) = setup();

        let sender = ConnectionId::from("c1");
        let count =
            broadcaster.broadcast_to_room_except(&RoomId::from("general"), Some(&sender), pong());
        assert_eq!(count, 1);
        assert!(rx[0].try_recv().is_err());
        assert!(rx[1].try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_to_all_shares_event() {
        let (broadcaster, mut rx) = setup();

        assert_eq!(broadcaster.broadcast_to_all(pong()), 3);

        let first = match rx[0].try_recv().unwrap() {
            Outbound::Event(event) => event,
            other => panic!("Expected event, got {:?}", other),
        };
        let second = match rx[2].try_recv().unwrap() {
            Outbound::Event(event) => event,
            other => panic!("Expected event, got {:?}", other),
        };
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unicast_and_close() {
        let (broadcaster, mut rx) = setup();
        let bob = ConnectionId::from("c2");

        assert!(broadcaster.send_to_connection(&bob, pong()));
        assert!(broadcaster.close_connection(&bob, CloseReason::Shutdown));
        assert!(!broadcaster.send_to_connection(&ConnectionId::from("ghost"), pong()));

        assert!(matches!(rx[1].try_recv(), Ok(Outbound::Event(_))));
        assert!(matches!(
            rx[1].try_recv(),
            Ok(Outbound::Close(CloseReason::Shutdown))
        ));
    }

    #[test]
    fn test_broadcast_to_empty_room() {
        let (broadcaster, _rx) = setup();
        assert_eq!(broadcaster.broadcast_to_room(&RoomId::from("empty"), pong()), 0);
    }
}
