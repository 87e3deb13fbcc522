//! Low-latency point-to-point channel between nodes.
//!
//! Unlike the message bus, the realtime channel carries raw bytes addressed to
//! a single node id. The proxy relays traffic between game servers.

use crate::ServiceState;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Callback invoked with the sender's server id and the payload.
pub type RealtimeHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("target node id must not be blank")]
    BlankTarget,

    #[error("realtime channel is not started")]
    NotStarted,

    #[error("realtime channel is not available")]
    Unavailable,

    #[error("realtime channel has been stopped and cannot be restarted")]
    Terminated,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn start(&self) -> Result<(), RealtimeError>;

    async fn stop(&self);

    /// Sends `payload` to `target_node_id`.
    ///
    /// Delivery is best effort: a queued message can still be dropped when
    /// the queue overflows or the target disconnects.
    async fn send(&self, target_node_id: &str, payload: Bytes) -> Result<(), RealtimeError>;

    /// Whether messages can currently be sent.
    fn is_available(&self) -> bool;

    fn state(&self) -> ServiceState;

    fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    fn is_degraded(&self) -> bool {
        self.state() == ServiceState::Degraded
    }
}
