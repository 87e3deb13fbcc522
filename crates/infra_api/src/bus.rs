//! The publish/subscribe bus contract.

use crate::{InfraMessage, ServiceState};
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked with the channel name and the decoded message.
///
/// Handlers run on the bus worker pool, never on the connection reader.
pub type MessageHandler = Arc<dyn Fn(&str, &InfraMessage) + Send + Sync>;

/// Handle returned by [`MessageBus::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    channel: String,
    id: u64,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, id: u64) -> Self {
        Self {
            channel: channel.into(),
            id,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("message bus is not started")]
    NotStarted,

    #[error("message bus has been stopped and cannot be restarted")]
    Terminated,

    #[error("channel must not be blank")]
    BlankChannel,

    #[error("failed to connect to message broker: {0}")]
    Connect(String),

    #[error("failed to encode or decode message: {0}")]
    Codec(String),

    #[error("message broker error: {0}")]
    Backend(String),
}

/// A channel-based message bus.
///
/// A bus is started once. After [`MessageBus::stop`] it is terminal and every
/// further `start` fails with [`BusError::Terminated`].
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn start(&self) -> Result<(), BusError>;

    async fn stop(&self);

    /// Registers `handler` for `channel`. Several handlers may share a channel.
    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError>;

    /// Removes one handler. Unknown subscriptions are ignored.
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), BusError>;

    async fn publish(&self, channel: &str, message: &InfraMessage) -> Result<(), BusError>;

    fn state(&self) -> ServiceState;

    fn is_started(&self) -> bool {
        matches!(self.state(), ServiceState::Running | ServiceState::Degraded)
    }
}
