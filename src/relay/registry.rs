// Connection registry.
//
// The one shared mutable structure in the relay. Each open connection is an
// entry holding its liveness flag and the sender side of its bounded
// outbound queue (the writer task drains the other side into the socket).
//
// Locking discipline: every method takes the mutex briefly and never sends
// while holding it. `broadcast` snapshots the recipient senders under the
// lock, releases it, then delivers with `try_send` -- a recipient whose
// queue is full is a failed delivery, not a stall for everyone else.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::{info, warn};

/// Identifier assigned to a connection for its lifetime in the registry.
pub type ConnectionId = u64;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A relayed payload, forwarded verbatim.
    Relay(Utf8Bytes),
    /// Close the socket and stop writing.
    Close,
}

struct ConnectionHandle {
    /// Reset to `true` by any inbound frame; examined and cleared once per
    /// heartbeat sweep.
    alive: bool,
    outbound: mpsc::Sender<Outbound>,
}

/// The set of all open connections.
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a newly accepted connection, initially alive.
    pub fn insert(&self, outbound: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(
            id,
            ConnectionHandle {
                alive: true,
                outbound,
            },
        );
        id
    }

    /// Drop a connection from the registry. Returns `false` if it was
    /// already gone (e.g. evicted by a sweep before the reader noticed).
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(&id).is_some()
    }

    /// Record inbound activity, re-arming the liveness flag.
    pub fn mark_alive(&self, id: ConnectionId) {
        if let Some(handle) = self.connections.lock().get_mut(&id) {
            handle.alive = true;
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Relay a payload to every other open connection. A failed delivery is
    /// logged and the failing connection is closed and removed; delivery to
    /// the rest continues. Returns the number of successful deliveries.
    pub fn broadcast(&self, from: ConnectionId, payload: Utf8Bytes) -> usize {
        let recipients: Vec<(ConnectionId, mpsc::Sender<Outbound>)> = self
            .connections
            .lock()
            .iter()
            .filter(|(&id, _)| id != from)
            .map(|(&id, handle)| (id, handle.outbound.clone()))
            .collect();

        let mut delivered = 0;
        for (id, outbound) in recipients {
            match outbound.try_send(Outbound::Relay(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Delivery to connection {} failed ({}), removing it", id, e);
                    self.evict(id);
                }
            }
        }
        delivered
    }

    /// One heartbeat pass: evict every connection whose flag is still down,
    /// clear the flag on the rest. A connection is therefore terminated only
    /// after two consecutive sweeps with no inbound activity in between.
    /// Returns the evicted ids.
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let stale: Vec<(ConnectionId, mpsc::Sender<Outbound>)> = {
            let mut connections = self.connections.lock();
            let stale: Vec<_> = connections
                .iter_mut()
                .filter_map(|(&id, handle)| {
                    if handle.alive {
                        handle.alive = false;
                        None
                    } else {
                        Some((id, handle.outbound.clone()))
                    }
                })
                .collect();
            for (id, _) in &stale {
                connections.remove(id);
            }
            stale
        };

        stale
            .into_iter()
            .map(|(id, outbound)| {
                info!("Terminating connection {} after heartbeat timeout", id);
                let _ = outbound.try_send(Outbound::Close);
                id
            })
            .collect()
    }

    /// Close every connection and empty the registry. Returns how many were
    /// open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.lock().drain().collect();
        for (_, handle) in &drained {
            let _ = handle.outbound.try_send(Outbound::Close);
        }
        drained.len()
    }

    /// Forcibly close one connection and drop it from the registry.
    fn evict(&self, id: ConnectionId) {
        if let Some(handle) = self.connections.lock().remove(&id) {
            let _ = handle.outbound.try_send(Outbound::Close);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &str) -> Utf8Bytes {
        s.into()
    }

    /// Insert a connection with the given queue capacity, returning its id
    /// and the receiver a writer task would drain.
    fn add(registry: &Registry, capacity: usize) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (registry.insert(tx), rx)
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let registry = Registry::new();
        let (a, mut rx_a) = add(&registry, 8);
        let (_b, mut rx_b) = add(&registry, 8);
        let (_c, mut rx_c) = add(&registry, 8);

        let delivered = registry.broadcast(a, frame(r#"{"id":1,"coordinate":[10,20]}"#));

        assert_eq!(delivered, 2);
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Relay(_))));
        assert!(matches!(rx_c.try_recv(), Ok(Outbound::Relay(_))));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn broadcast_payload_is_verbatim() {
        let registry = Registry::new();
        let (a, _rx_a) = add(&registry, 8);
        let (_b, mut rx_b) = add(&registry, 8);

        registry.broadcast(a, frame("definitely not json"));

        match rx_b.try_recv() {
            Ok(Outbound::Relay(payload)) => assert_eq!(payload.as_str(), "definitely not json"),
            other => panic!("expected relayed payload, got {other:?}"),
        }
    }

    #[test]
    fn failed_delivery_removes_only_the_failing_connection() {
        let registry = Registry::new();
        let (a, _rx_a) = add(&registry, 8);
        let (_b, mut rx_b) = add(&registry, 8);

        // A connection whose queue is already full.
        let (tx_full, _rx_full) = mpsc::channel(1);
        tx_full
            .try_send(Outbound::Relay(frame("backlog")))
            .unwrap();
        registry.insert(tx_full);
        assert_eq!(registry.len(), 3);

        let delivered = registry.broadcast(a, frame("payload"));

        assert_eq!(delivered, 1);
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Relay(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn sweep_evicts_only_after_two_silent_passes() {
        let registry = Registry::new();
        let (a, mut rx_a) = add(&registry, 8);

        // First pass: the flag set on insert is cleared, nothing evicted.
        assert!(registry.sweep().is_empty());
        assert_eq!(registry.len(), 1);

        // Second pass with no activity: evicted and told to close.
        assert_eq!(registry.sweep(), vec![a]);
        assert!(registry.is_empty());
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn any_inbound_activity_rearms_liveness() {
        let registry = Registry::new();
        let (a, _rx_a) = add(&registry, 8);

        assert!(registry.sweep().is_empty());
        registry.mark_alive(a);
        assert!(registry.sweep().is_empty());
        assert_eq!(registry.len(), 1);

        // Silence again: gone on the pass after next.
        assert_eq!(registry.sweep(), vec![a]);
    }

    #[test]
    fn close_all_drains_the_registry() {
        let registry = Registry::new();
        let (_a, mut rx_a) = add(&registry, 8);
        let (_b, mut rx_b) = add(&registry, 8);

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Close)));
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new();
        let (a, _rx_a) = add(&registry, 8);
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
    }
}
