//! Keyed FIFO turns.
//!
//! A send holds its room's turn across membership check, persistence, and
//! broadcast. Turns are granted first-come first-served, so messages for one
//! room are broadcast in the order the dispatcher began processing them.
//! Different keys never wait on each other.
//!
//! Presence uses the same mechanism keyed by user, so one user's connect and
//! disconnect transitions never interleave.
//!
//! An entry only lives while someone holds or waits for its turn.

use dashmap::DashMap;
use huddle_protocol::{RoomId, UserId};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Grants FIFO turns per key.
#[derive(Debug)]
pub struct Sequencer<K: Eq + Hash> {
    turns: DashMap<K, Arc<Mutex<()>>>,
}

/// Per-room send ordering.
pub type RoomSequencer = Sequencer<RoomId>;

/// Per-user presence transitions.
pub type UserSequencer = Sequencer<UserId>;

/// A held turn. Released on drop.
pub struct Turn<'a, K: Eq + Hash> {
    sequencer: &'a Sequencer<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Default for Sequencer<K> {
    fn default() -> Self {
        Self {
            turns: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Sequencer<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this key's turn.
    pub async fn acquire(&self, key: &K) -> Turn<'_, K> {
        // Clone the lock out so the map guard is released before awaiting.
        let lock = Arc::clone(self.turns.entry(key.clone()).or_default().value());
        let guard = lock.lock_owned().await;
        Turn {
            sequencer: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a held or awaited turn.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl<K: Eq + Hash> Drop for Turn<'_, K> {
    fn drop(&mut self) {
        // Release first, then forget the key if nobody else holds its lock.
        drop(self.guard.take());
        self.sequencer
            .turns
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_turns_are_fifo_per_room() {
        let sequencer = Arc::new(RoomSequencer::new());
        let room = RoomId::from("general");
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = sequencer.acquire(&room).await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let sequencer = Arc::clone(&sequencer);
            let order = Arc::clone(&order);
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                let _turn = sequencer.acquire(&room).await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(sequencer.is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let sequencer = RoomSequencer::new();
        let _general = sequencer.acquire(&RoomId::from("general")).await;
        // Would deadlock if rooms shared a lock.
        let _random = sequencer.acquire(&RoomId::from("random")).await;
        assert_eq!(sequencer.len(), 2);
    }

    #[tokio::test]
    async fn test_released_turns_are_forgotten() {
        let sequencer = RoomSequencer::new();
        for i in 0..10_000 {
            let _turn = sequencer.acquire(&RoomId::new(format!("junk-{i}"))).await;
        }
        assert!(sequencer.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let sequencer = Arc::new(UserSequencer::new());
        let alice = UserId::from("alice");

        let held = sequencer.acquire(&alice).await;
        let waiter = {
            let sequencer = Arc::clone(&sequencer);
            let alice = alice.clone();
            tokio::spawn(async move {
                let _turn = sequencer.acquire(&alice).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(held);
        assert_eq!(sequencer.len(), 1);
        waiter.await.unwrap();
        assert!(sequencer.is_empty());
    }
}
