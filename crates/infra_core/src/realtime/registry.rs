//! Live peer connections on the relay server, keyed by server id.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

/// Outcome of handing a frame to a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The peer's write queue is full.
    Backpressure,
    /// The connection task has gone away.
    Closed,
    /// No connection is registered for the target.
    NoPeer,
    /// The frame could not be encoded.
    Rejected,
}

/// Sending side of one peer connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: u64,
    sender: mpsc::Sender<Bytes>,
    closer: Arc<Notify>,
}

impl PeerHandle {
    pub fn new(conn_id: u64, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            conn_id,
            sender,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Queues encoded frame bytes without waiting.
    pub fn send(&self, encoded: Bytes) -> Delivery {
        match self.sender.try_send(encoded) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Backpressure,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Asks the connection task to shut down.
    pub fn close(&self) {
        self.closer.notify_one();
    }

    /// Resolves once [`PeerHandle::close`] has been called.
    pub async fn closed(&self) {
        self.closer.notified().await
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerHandle>,
    next_conn_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `handle` for `server_id`, closing any other connection it replaces.
    pub fn register(&self, server_id: &str, handle: PeerHandle) -> Option<PeerHandle> {
        let conn_id = handle.conn_id();
        let previous = self.peers.insert(server_id.to_string(), handle)?;
        if previous.conn_id() != conn_id {
            previous.close();
        }
        Some(previous)
    }

    pub fn find(&self, server_id: &str) -> Option<PeerHandle> {
        self.peers.get(server_id).map(|entry| entry.clone())
    }

    /// Whether `conn_id` is still the registered connection for `server_id`.
    pub fn is_current(&self, server_id: &str, conn_id: u64) -> bool {
        self.peers
            .get(server_id)
            .is_some_and(|entry| entry.conn_id() == conn_id)
    }

    /// Removes `server_id` only if it still maps to `conn_id`.
    pub fn remove(&self, server_id: &str, conn_id: u64) -> bool {
        self.peers
            .remove_if(server_id, |_, handle| handle.conn_id() == conn_id)
            .is_some()
    }

    pub fn close_all(&self) {
        for entry in self.peers.iter() {
            entry.value().close();
        }
        self.peers.clear();
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(registry: &PeerRegistry) -> (PeerHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        (PeerHandle::new(registry.next_conn_id(), tx), rx)
    }

    #[tokio::test]
    async fn test_replacing_closes_previous_connection() {
        let registry = PeerRegistry::new();
        let (first, _rx1) = handle(&registry);
        let (second, _rx2) = handle(&registry);

        assert!(registry.register("village-1", first.clone()).is_none());
        let replaced = registry.register("village-1", second.clone()).unwrap();
        assert_eq!(replaced.conn_id(), first.conn_id());

        tokio::time::timeout(Duration::from_secs(1), first.closed())
            .await
            .expect("previous connection should be closed");
        assert!(registry.is_current("village-1", second.conn_id()));
    }

    #[tokio::test]
    async fn test_stale_connection_cannot_evict_successor() {
        let registry = PeerRegistry::new();
        let (first, _rx1) = handle(&registry);
        let (second, _rx2) = handle(&registry);
        registry.register("village-1", first.clone());
        registry.register("village-1", second.clone());

        assert!(!registry.remove("village-1", first.conn_id()));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("village-1", second.conn_id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_reaches_connection() {
        let registry = PeerRegistry::new();
        let (peer, mut rx) = handle(&registry);
        registry.register("dungeon-2", peer);

        let peer = registry.find("dungeon-2").unwrap();
        assert_eq!(peer.send(Bytes::from_static(b"hi")), Delivery::Queued);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hi"));
        assert!(registry.find("village-1").is_none());
    }

    #[tokio::test]
    async fn test_send_reports_backpressure_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let peer = PeerHandle::new(0, tx);
        assert_eq!(peer.send(Bytes::from_static(b"1")), Delivery::Queued);
        assert_eq!(peer.send(Bytes::from_static(b"2")), Delivery::Backpressure);

        drop(rx);
        assert_eq!(peer.send(Bytes::from_static(b"3")), Delivery::Closed);
        assert!(!peer.is_open());
    }
}
