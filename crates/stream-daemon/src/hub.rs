//! Per-user fanout of status snapshots.
//!
//! Each observer gets its own bounded queue.  Publishing never waits: a full
//! or closed queue loses that message and nothing else.  Observers are only
//! removed through [`BroadcastHub::unsubscribe`], which the transport calls
//! when it closes.

use std::collections::HashMap;
use std::fmt;

use stream_proto::protocol::StatusSnapshot;
use stream_proto::state::UserId;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

pub struct BroadcastHub {
    queue_depth: usize,
    next_id: u64,
    observers: HashMap<UserId, HashMap<ObserverId, mpsc::Sender<StatusSnapshot>>>,
    owners: HashMap<ObserverId, UserId>,
}

impl BroadcastHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
            next_id: 1,
            observers: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, user: &UserId) -> (ObserverId, mpsc::Receiver<StatusSnapshot>) {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.observers
            .entry(user.clone())
            .or_default()
            .insert(id, tx);
        self.owners.insert(id, user.clone());
        debug!(
            "hub: {} subscribed for {} ({} open)",
            id,
            user,
            self.observer_count(user)
        );
        (id, rx)
    }

    /// Remove an observer.  Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let Some(user) = self.owners.remove(&id) else {
            return false;
        };
        if let Some(set) = self.observers.get_mut(&user) {
            set.remove(&id);
            if set.is_empty() {
                self.observers.remove(&user);
            }
        }
        debug!("hub: {} unsubscribed from {}", id, user);
        true
    }

    /// Offer a snapshot to every observer of `user`.  Returns how many
    /// queues accepted it.
    pub fn publish(&self, user: &UserId, snapshot: &StatusSnapshot) -> usize {
        let Some(set) = self.observers.get(user) else {
            return 0;
        };
        let mut delivered = 0;
        for (id, tx) in set {
            match tx.try_send(snapshot.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => trace!("hub: dropped snapshot rev {} for {}: {}", snapshot.rev, id, e),
            }
        }
        delivered
    }

    pub fn observer_count(&self, user: &UserId) -> usize {
        self.observers.get(user).map_or(0, HashMap::len)
    }

    pub fn total_observers(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(rev: u64) -> StatusSnapshot {
        StatusSnapshot {
            rev,
            ..StatusSnapshot::no_session()
        }
    }

    #[test]
    fn publish_reaches_only_that_users_observers() {
        let mut hub = BroadcastHub::new(4);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let (_a1, mut rx_a1) = hub.subscribe(&alice);
        let (_a2, mut rx_a2) = hub.subscribe(&alice);
        let (_b, mut rx_b) = hub.subscribe(&bob);

        assert_eq!(hub.publish(&alice, &snap(1)), 2);
        assert_eq!(rx_a1.try_recv().unwrap().rev, 1);
        assert_eq!(rx_a2.try_recv().unwrap().rev, 1);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(hub.total_observers(), 3);
    }

    #[test]
    fn full_queue_drops_without_affecting_others() {
        let mut hub = BroadcastHub::new(1);
        let user = UserId::from("u");
        let (_slow, mut rx_slow) = hub.subscribe(&user);
        let (_fast, mut rx_fast) = hub.subscribe(&user);

        assert_eq!(hub.publish(&user, &snap(1)), 2);
        rx_fast.try_recv().unwrap();
        assert_eq!(hub.publish(&user, &snap(2)), 1);
        assert_eq!(rx_fast.try_recv().unwrap().rev, 2);
        assert_eq!(rx_slow.try_recv().unwrap().rev, 1);
        assert!(rx_slow.try_recv().is_err(), "dropped message is never retried");
        assert_eq!(hub.observer_count(&user), 2);
    }

    #[test]
    fn closed_observer_stays_until_unsubscribed() {
        let mut hub = BroadcastHub::new(4);
        let user = UserId::from("u");
        let (id, rx) = hub.subscribe(&user);
        drop(rx);
        assert_eq!(hub.publish(&user, &snap(1)), 0);
        assert_eq!(hub.observer_count(&user), 1);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.observer_count(&user), 0);
        assert_eq!(hub.total_observers(), 0);
    }
}
