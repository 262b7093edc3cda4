//! Fan-out benchmarks for huddle-core.
//!
//! Measures how long it takes to queue one event for every connection in a
//! room, and the cost of registering connections.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use huddle_core::{outbound_channel, Broadcaster, ConnectionRegistry, OutboundReceiver};
use huddle_protocol::{ConnectionId, RoomId, ServerEvent, UserId};
use std::sync::Arc;

fn populated(room: &RoomId, size: usize) -> (Broadcaster, Vec<OutboundReceiver>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let receivers = (0..size)
        .map(|i| {
            let (tx, rx) = outbound_channel();
            registry.register(
                &UserId::new(format!("user-{i}")),
                &ConnectionId::new(format!("conn-{i}")),
                tx,
                [room.clone()],
            );
            rx
        })
        .collect();
    (Broadcaster::new(registry), receivers)
}

fn bench_room_broadcast(c: &mut Criterion) {
    let room = RoomId::from("general");
    let event = ServerEvent::UserTyping {
        chatroom_id: room.clone(),
        user_id: UserId::from("user-0"),
    };

    let mut group = c.benchmark_group("broadcast_to_room");
    for size in [1usize, 100, 1000] {
        let (broadcaster, mut receivers) = populated(&room, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let delivered = broadcaster.broadcast_to_room(&room, black_box(event.clone()));
                // Keep the queues from growing without bound.
                for rx in &mut receivers {
                    while rx.try_recv().is_ok() {}
                }
                delivered
            })
        });
    }
    group.finish();
}

fn bench_register(c: &mut Criterion) {
    c.bench_function("register", |b| {
        let registry = ConnectionRegistry::new();
        let rooms = [RoomId::from("general"), RoomId::from("random")];
        let mut i = 0u64;
        b.iter(|| {
            let (tx, _rx) = outbound_channel();
            registry.register(
                &UserId::new(format!("user-{}", i % 1000)),
                &ConnectionId::new(format!("conn-{i}")),
                tx,
                rooms.clone(),
            );
            i += 1;
        });
    });
}

criterion_group!(benches, bench_room_broadcast, bench_register);
criterion_main!(benches);
