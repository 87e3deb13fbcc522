//! In-process bus used by unit tests.

use async_trait::async_trait;
use infra_api::{
    AtomicServiceState, BusError, InfraMessage, MessageBus, MessageHandler, ServiceState,
    Subscription,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Delivers published messages synchronously to the handlers of the channel.
#[derive(Default)]
pub struct LocalBus {
    state: AtomicServiceState,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(Subscription, MessageHandler)>>,
    published: Mutex<Vec<(String, InfraMessage)>>,
}

impl LocalBus {
    pub fn running() -> Self {
        let bus = Self::default();
        bus.state.store(ServiceState::Running);
        bus
    }

    pub fn published(&self) -> Vec<(String, InfraMessage)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.channel().to_string())
            .collect()
    }

    /// Simulates a message arriving from another node.
    pub fn inject(&self, channel: &str, message: &InfraMessage) {
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s.channel() == channel)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(channel, message);
        }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn start(&self) -> Result<(), BusError> {
        self.state.store(ServiceState::Running);
        Ok(())
    }

    async fn stop(&self) {
        self.state.store(ServiceState::Stopped);
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError> {
        if channel.trim().is_empty() {
            return Err(BusError::BlankChannel);
        }
        let subscription = Subscription::new(channel, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap()
            .push((subscription.clone(), handler));
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), BusError> {
        self.handlers
            .lock()
            .unwrap()
            .retain(|(s, _)| s != subscription);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &InfraMessage) -> Result<(), BusError> {
        if !self.is_started() {
            return Err(BusError::NotStarted);
        }
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), message.clone()));
        self.inject(channel, message);
        Ok(())
    }

    fn state(&self) -> ServiceState {
        self.state.load()
    }
}
