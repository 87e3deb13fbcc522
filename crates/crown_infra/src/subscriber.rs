use crate::dispatcher::MessageDispatcher;
use crate::error::NodeError;
use infra_api::{rules, InfraContext, InfraMessage, MessageBus, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Subscribes to bus channels and forwards the messages this node should act on.
///
/// Every message passes [`rules::should_process`] before it reaches the
/// dispatcher, so foreign environments and this node's own messages never
/// trigger handlers.
pub struct BusSubscriber {
    bus: Arc<dyn MessageBus>,
    context: InfraContext,
    dispatcher: Arc<MessageDispatcher>,
    active: Arc<AtomicBool>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl BusSubscriber {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        context: InfraContext,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        Self {
            bus,
            context,
            dispatcher,
            active: Arc::new(AtomicBool::new(false)),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to every channel in `channels`. Calling it again while active is a no-op.
    pub async fn start(&self, channels: &[String]) -> Result<(), NodeError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if self.active.load(Ordering::Acquire) {
            return Ok(());
        }
        if channels.is_empty() {
            return Err(NodeError::NoChannels);
        }

        self.active.store(true, Ordering::Release);
        for channel in channels {
            match self.bus.subscribe(channel, self.handler()).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    self.active.store(false, Ordering::Release);
                    for subscription in subscriptions.drain(..) {
                        let _ = self.bus.unsubscribe(&subscription).await;
                    }
                    return Err(e.into());
                }
            }
        }

        info!("📥 Subscribed to {}", channels.join(", "));
        Ok(())
    }

    /// Stops delivery and drops the bus subscriptions.
    pub async fn stop(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        self.active.store(false, Ordering::Release);
        for subscription in subscriptions.drain(..) {
            if let Err(e) = self.bus.unsubscribe(&subscription).await {
                warn!("Failed to unsubscribe from {}: {}", subscription.channel(), e);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn handler(&self) -> infra_api::MessageHandler {
        let active = self.active.clone();
        let dispatcher = self.dispatcher.clone();
        let environment = self.context.environment().to_string();
        let server_id = self.context.server_id().to_string();

        Arc::new(move |_channel: &str, message: &InfraMessage| {
            if !active.load(Ordering::Acquire) {
                return;
            }
            match rules::should_process(message, &environment, &server_id) {
                Ok(true) => dispatcher.dispatch(Arc::new(message.clone())),
                Ok(false) => {}
                Err(e) => warn!("Dropping message, consumer rules failed: {}", e),
            }
        })
    }
}
