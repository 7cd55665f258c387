//! Opt-in single-flight for cache misses.
//!
//! The first miss on a key becomes the leader and runs populate; concurrent
//! misses on the same key wait for it, then re-read the store. A follower
//! that still misses (leader failed or was cancelled) populates on its own,
//! so correctness never depends on the leader.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Tracks in-flight populates by cache key.
#[derive(Clone, Default)]
pub struct RequestCoalescer {
    in_flight: Arc<DashMap<String, watch::Sender<bool>>>,
}

/// Outcome of [`RequestCoalescer::acquire`].
pub enum CoalescingSlot {
    /// First miss for the key: populate, then drop the guard.
    Leader(LeaderGuard),

    /// Another populate for the key finished; re-read the store.
    Follower,
}

impl CoalescingSlot {
    pub fn is_leader(&self) -> bool {
        matches!(self, CoalescingSlot::Leader(_))
    }
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become leader for `key`, or wait for the current leader to finish.
    pub async fn acquire(&self, key: &str) -> CoalescingSlot {
        let mut rx = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().subscribe(),
            Entry::Vacant(entry) => {
                let (tx, _rx) = watch::channel(false);
                entry.insert(tx.clone());
                return CoalescingSlot::Leader(LeaderGuard {
                    key: key.to_string(),
                    in_flight: Arc::clone(&self.in_flight),
                    sender: tx,
                });
            }
        };

        debug!("Coalescing on in-flight populate for {}", key);
        // Err means the leader is gone without signalling; treat as done.
        let _ = rx.wait_for(|done| *done).await;
        CoalescingSlot::Follower
    }

    /// Number of keys currently being populated.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Held by the leader. Dropping it, on success, failure or cancellation,
/// releases every follower.
pub struct LeaderGuard {
    key: String,
    in_flight: Arc<DashMap<String, watch::Sender<bool>>>,
    sender: watch::Sender<bool>,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        let _ = self.sender.send(true);
        self.in_flight.remove(&self.key);
    }
}
