use settings_loader::BroadcastScope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Outbound queue depth per connection. A listener this far behind is dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// One queued frame. `version` is the mutation counter observed before the
/// payload's snapshot was read; frames without one (errors) always go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub version: Option<u64>,
    pub payload: String,
}

impl Outbound {
    pub fn snapshot(version: u64, payload: impl Into<String>) -> Self {
        Self {
            version: Some(version),
            payload: payload.into(),
        }
    }

    pub fn unversioned(payload: impl Into<String>) -> Self {
        Self {
            version: None,
            payload: payload.into(),
        }
    }
}

struct Listener {
    owner: String,
    sender: mpsc::Sender<Outbound>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// The set of open live-update connections.
///
/// Every access to the set goes through one mutex. Payloads are queued with
/// `try_send`, so the lock is never held across an await; each connection's
/// writer task drains its own queue into the socket.
pub struct Broadcaster {
    scope: BroadcastScope,
    capacity: usize,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ConnectionId, Listener>>,
}

impl Broadcaster {
    pub fn new(scope: BroadcastScope) -> Self {
        Self::with_capacity(scope, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(scope: BroadcastScope, capacity: usize) -> Self {
        Self {
            scope,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> BroadcastScope {
        self.scope
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection for `owner` and returns the receiving end of its queue.
    pub fn register(&self, owner: &str) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.lock().insert(
            id,
            Listener {
                owner: owner.to_string(),
                sender,
            },
        );
        debug!(connection = id, owner, "Registered live connection");
        (id, receiver)
    }

    /// Removes a connection. Dropping its sender ends the writer task.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(connection = id, "Unregistered live connection");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Queues a payload for a single connection, dropping it on failure.
    pub fn send_to(&self, id: ConnectionId, frame: Outbound) -> bool {
        let mut listeners = self.lock();
        let Some(listener) = listeners.get(&id) else {
            return false;
        };
        if listener.sender.try_send(frame).is_err() {
            warn!(connection = id, "Live connection is gone, dropping it");
            listeners.remove(&id);
            return false;
        }
        true
    }

    /// Queues `payload` for every connection in scope of `owner`. Failing
    /// connections are removed; the others still receive the payload.
    pub fn broadcast(&self, owner: &str, frame: &Outbound) -> BroadcastReport {
        let mut listeners = self.lock();
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (id, listener) in listeners.iter() {
            if self.scope == BroadcastScope::Owner && listener.owner != owner {
                continue;
            }
            match listener.sender.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(connection = id, owner = %listener.owner, error = %err, "Broadcast failed, dropping connection");
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            listeners.remove(id);
        }
        report.dropped = failed.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> Outbound {
        Outbound::snapshot(1, payload)
    }

    async fn next(receiver: &mut mpsc::Receiver<Outbound>) -> Option<String> {
        receiver.recv().await.map(|frame| frame.payload)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection_of_owner() {
        let broadcaster = Broadcaster::new(BroadcastScope::Owner);
        let mut receivers: Vec<_> = (0..3).map(|_| broadcaster.register("u1").1).collect();
        let (_, mut other) = broadcaster.register("u2");

        let report = broadcaster.broadcast("u1", &frame("[]"));
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 0 });

        for receiver in receivers.iter_mut() {
            assert_eq!(next(receiver).await.as_deref(), Some("[]"));
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_global_scope_reaches_everyone() {
        let broadcaster = Broadcaster::new(BroadcastScope::Global);
        let (_, mut a) = broadcaster.register("u1");
        let (_, mut b) = broadcaster.register("u2");

        let report = broadcaster.broadcast("u1", &frame("snapshot"));
        assert_eq!(report.delivered, 2);
        assert_eq!(next(&mut a).await.as_deref(), Some("snapshot"));
        assert_eq!(next(&mut b).await.as_deref(), Some("snapshot"));
    }

    #[tokio::test]
    async fn test_failed_connection_is_removed_and_others_still_receive() {
        let broadcaster = Broadcaster::new(BroadcastScope::Owner);
        let (_, mut first) = broadcaster.register("u1");
        let (_, closed) = broadcaster.register("u1");
        let (_, mut third) = broadcaster.register("u1");
        drop(closed);

        let report = broadcaster.broadcast("u1", &frame("update"));
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 1 });
        assert_eq!(broadcaster.connection_count(), 2);
        assert_eq!(next(&mut first).await.as_deref(), Some("update"));
        assert_eq!(next(&mut third).await.as_deref(), Some("update"));

        // The dropped connection is not retried
        let report = broadcaster.broadcast("u1", &frame("again"));
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failure() {
        let broadcaster = Broadcaster::with_capacity(BroadcastScope::Owner, 1);
        let (_, _slow) = broadcaster.register("u1");
        let (_, mut fast) = broadcaster.register("u1");

        assert_eq!(broadcaster.broadcast("u1", &frame("one")).delivered, 2);
        assert_eq!(next(&mut fast).await.as_deref(), Some("one"));

        let report = broadcaster.broadcast("u1", &frame("two"));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(next(&mut fast).await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_unregister_closes_queue() {
        let broadcaster = Broadcaster::new(BroadcastScope::Owner);
        let (id, mut receiver) = broadcaster.register("u1");

        assert!(broadcaster.send_to(id, frame("hello")));
        assert!(broadcaster.unregister(id));
        assert!(!broadcaster.unregister(id));
        assert!(!broadcaster.send_to(id, frame("late")));

        assert_eq!(next(&mut receiver).await.as_deref(), Some("hello"));
        assert_eq!(next(&mut receiver).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_broadcast() {
        let broadcaster = std::sync::Arc::new(Broadcaster::new(BroadcastScope::Global));
        let mut handles = Vec::new();
        for i in 0..16 {
            let broadcaster = broadcaster.clone();
            handles.push(tokio::spawn(async move {
                let (id, receiver) = broadcaster.register(&format!("u{}", i % 4));
                broadcaster.broadcast("u0", &frame("tick"));
                (id, receiver)
            }));
        }

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.unwrap());
        }
        assert_eq!(broadcaster.connection_count(), 16);

        for (id, _) in &connections {
            assert!(broadcaster.unregister(*id));
        }
        assert_eq!(broadcaster.connection_count(), 0);
    }
}
