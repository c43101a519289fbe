//! WebSocket connection manager.
//!
//! Tracks one connection per observer and remembers the last batch handed to
//! each, so the replication tick can skip repeats until they are due for a
//! resend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use replimap_engine::{DeltaBatch, ObserverId, Version};
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// The last batch handed to a connection.
///
/// A batch recomputed from the same baseline with the same target carries
/// the same changes; only its added/updated tags may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentBatch {
    pub target_version: Version,
    pub full_resync: bool,
    pub at: Instant,
}

impl SentBatch {
    fn repeats(&self, batch: &DeltaBatch) -> bool {
        self.target_version == batch.target_version && self.full_resync == batch.full_resync
    }
}

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Observer this connection replicates to
    pub observer_id: ObserverId,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    pub connected_at: DateTime<Utc>,
    pub last_sent: Option<SentBatch>,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by observer ID.
    connections: DashMap<ObserverId, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID, or `None` if the observer is already
    /// connected.
    pub fn register(&self, observer_id: ObserverId, sender: MessageSender) -> Option<String> {
        use dashmap::mapref::entry::Entry;

        match self.connections.entry(observer_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(observer_id = %observer_id, "Observer already connected");
                None
            }
            Entry::Vacant(slot) => {
                let conn_id = uuid::Uuid::new_v4().to_string();
                slot.insert(Connection {
                    id: conn_id.clone(),
                    observer_id: observer_id.clone(),
                    sender,
                    connected_at: Utc::now(),
                    last_sent: None,
                });
                tracing::info!(conn_id = %conn_id, observer_id = %observer_id, "WebSocket connection registered");
                Some(conn_id)
            }
        }
    }

    /// Unregister a connection. Only the connection that registered the
    /// observer can remove it.
    pub fn unregister(&self, observer_id: &str, conn_id: &str) -> bool {
        let removed = self
            .connections
            .remove_if(observer_id, |_, conn| conn.id == conn_id)
            .is_some();
        if removed {
            tracing::info!(conn_id = %conn_id, observer_id = %observer_id, "WebSocket connection unregistered");
        }
        removed
    }

    /// Whether `batch` should go out to `observer_id` now.
    ///
    /// Empty batches never do. A repeat of the last batch sent waits until
    /// `resend_interval` has passed.
    pub fn should_send(
        &self,
        observer_id: &str,
        batch: &DeltaBatch,
        resend_interval: Duration,
        now: Instant,
    ) -> bool {
        if batch.is_empty() {
            return false;
        }
        let Some(conn) = self.connections.get(observer_id) else {
            return false;
        };
        match &conn.last_sent {
            None => true,
            Some(sent) => {
                !sent.repeats(batch) || now.saturating_duration_since(sent.at) >= resend_interval
            }
        }
    }

    /// Hand a batch to the connection and remember it.
    pub fn send_delta(&self, observer_id: &str, batch: DeltaBatch, now: Instant) -> bool {
        let Some(mut conn) = self.connections.get_mut(observer_id) else {
            return false;
        };
        let sent = SentBatch {
            target_version: batch.target_version,
            full_resync: batch.full_resync,
            at: now,
        };
        if conn.sender.send(ServerMessage::delta(batch)).is_err() {
            return false;
        }
        conn.last_sent = Some(sent);
        true
    }

    /// Forget the last batch so the next one goes out immediately.
    pub fn clear_last_sent(&self, observer_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(observer_id) {
            conn.last_sent = None;
        }
    }

    /// Send a message to a specific observer.
    pub fn send_to(&self, observer_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(observer_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Connected observers, sorted.
    pub fn observer_ids(&self) -> Vec<ObserverId> {
        let mut ids: Vec<_> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_connected(&self, observer_id: &str) -> bool {
        self.connections.contains_key(observer_id)
    }

    pub fn connected_at(&self, observer_id: &str) -> Option<DateTime<Utc>> {
        self.connections.get(observer_id).map(|c| c.connected_at)
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replimap_engine::{ChangeKind, ChangedEntry, RecordKey, RecordValue};

    fn batch(target: u64) -> DeltaBatch {
        DeltaBatch {
            target_version: target,
            full_resync: false,
            removed: vec![],
            changed: vec![ChangedEntry {
                key: RecordKey::new("k"),
                value: RecordValue::new(target as i64),
                kind: ChangeKind::Added,
                version: target,
            }],
        }
    }

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("observer-1".to_string(), tx).unwrap();
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.is_connected("observer-1"));
        assert!(manager.connected_at("observer-1").is_some());

        assert!(!manager.unregister("observer-1", "someone-else"));
        assert!(manager.unregister("observer-1", &conn_id));
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_duplicate_observer_rejected() {
        let manager = ConnectionManager::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(manager.register("observer-1".to_string(), tx1).is_some());
        assert!(manager.register("observer-1".to_string(), tx2).is_none());
        assert_eq!(manager.connection_count(), 1);
    }

    #[test]
    fn test_resend_policy() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register("observer-1".to_string(), tx).unwrap();

        let resend = Duration::from_secs(1);
        let start = Instant::now();

        assert!(!manager.should_send("observer-1", &DeltaBatch::empty(0), resend, start));
        assert!(manager.should_send("observer-1", &batch(1), resend, start));
        assert!(manager.send_delta("observer-1", batch(1), start));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::delta(batch(1)));

        // Same batch waits for the resend interval
        assert!(!manager.should_send("observer-1", &batch(1), resend, start));
        assert!(manager.should_send("observer-1", &batch(1), resend, start + resend));

        // A different batch goes out immediately
        assert!(manager.should_send("observer-1", &batch(2), resend, start));

        manager.clear_last_sent("observer-1");
        assert!(manager.should_send("observer-1", &batch(1), resend, start));
    }

    #[test]
    fn test_unknown_observer() {
        let manager = ConnectionManager::new();
        assert!(!manager.should_send("ghost", &batch(1), Duration::ZERO, Instant::now()));
        assert!(!manager.send_delta("ghost", batch(1), Instant::now()));
        assert!(!manager.send_to("ghost", ServerMessage::Pong));
    }

    #[test]
    fn test_observer_ids_sorted() {
        let manager = ConnectionManager::new();
        for id in ["b", "c", "a"] {
            let (tx, _rx) = mpsc::unbounded_channel();
            manager.register(id.to_string(), tx);
        }
        assert_eq!(manager.observer_ids(), vec!["a", "b", "c"]);
    }
}
