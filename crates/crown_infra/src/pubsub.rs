use crate::dispatcher::{DispatchHandler, MessageDispatcher};
use crate::error::NodeError;
use crate::lifecycle::Closeable;
use crate::subscriber::BusSubscriber;
use async_trait::async_trait;
use infra_api::{channels, message_types, InfraContext, InfraMessage, MessageBus, TaskExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wires the node's bus subscriptions and the built-in heartbeat and notice messages.
///
/// Paper nodes listen on `paper` and `broadcast` and send heartbeats towards
/// the proxy. Velocity nodes listen on `proxy` and `broadcast` and send
/// heartbeats towards the game servers.
pub struct PubSubBootstrap {
    bus: Arc<dyn MessageBus>,
    context: InfraContext,
    dispatcher: Arc<MessageDispatcher>,
    subscriber: BusSubscriber,
    heartbeat_interval: Option<Duration>,
    started: AtomicBool,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl PubSubBootstrap {
    /// # Arguments
    ///
    /// * `bus` - A started bus
    /// * `context` - Identity of this node
    /// * `executor` - Where dispatched handlers run
    /// * `heartbeat_interval` - Period of automatic heartbeats, `None` to send them manually only
    pub fn new(
        bus: Arc<dyn MessageBus>,
        context: InfraContext,
        executor: Arc<dyn TaskExecutor>,
        heartbeat_interval: Option<Duration>,
    ) -> Self {
        let dispatcher = Arc::new(MessageDispatcher::new(executor));
        register_builtin_handlers(&dispatcher);
        let subscriber = BusSubscriber::new(bus.clone(), context.clone(), dispatcher.clone());
        Self {
            bus,
            context,
            dispatcher,
            subscriber,
            heartbeat_interval,
            started: AtomicBool::new(false),
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Registers an application handler next to the built-in ones.
    pub fn register(&self, message_type: &str, handler: DispatchHandler) -> Result<(), NodeError> {
        Ok(self.dispatcher.register(message_type, handler)?)
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub async fn start(&self) -> Result<(), NodeError> {
        let mut heartbeat_task = self.heartbeat_task.lock().await;
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let inbound = channels::inbound_for(self.context.kind(), self.context.environment())?;
        self.subscriber.start(&inbound).await?;
        self.started.store(true, Ordering::Release);

        if let Some(interval) = self.heartbeat_interval {
            *heartbeat_task = Some(spawn_heartbeat(
                self.bus.clone(),
                self.context.clone(),
                interval,
            )?);
        }
        info!("📡 Pub/Sub started for {}", self.context);
        Ok(())
    }

    pub async fn stop(&self) {
        let mut heartbeat_task = self.heartbeat_task.lock().await;
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = heartbeat_task.take() {
            task.abort();
        }
        self.subscriber.stop().await;
        info!("🛑 Pub/Sub stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Publishes an empty heartbeat on this node's outbound channel.
    pub async fn publish_heartbeat(&self) -> Result<(), NodeError> {
        self.ensure_started()?;
        let (channel, message) = heartbeat(&self.context)?;
        self.bus.publish(&channel, &message).await?;
        Ok(())
    }

    /// Publishes `notice` as text on the broadcast channel.
    pub async fn publish_notice(&self, notice: &str) -> Result<(), NodeError> {
        self.ensure_started()?;
        let message = InfraMessage::text(
            self.context.environment(),
            self.context.server_id(),
            message_types::BROADCAST_NOTICE,
            notice,
        )?;
        let channel = channels::for_broadcast(self.context.environment())?;
        self.bus.publish(&channel, &message).await?;
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), NodeError> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(NodeError::PubSubNotStarted)
        }
    }
}

#[async_trait]
impl Closeable for PubSubBootstrap {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.stop().await;
        Ok(())
    }
}

fn register_builtin_handlers(dispatcher: &MessageDispatcher) {
    let heartbeat: DispatchHandler = Arc::new(|message: &InfraMessage| {
        info!(
            "💓 Heartbeat from {} ({})",
            message.from_server_id(),
            message.meta().message_id()
        );
    });
    let notice: DispatchHandler = Arc::new(|message: &InfraMessage| {
        info!("📢 Notice from {}: {}", message.from_server_id(), message.payload());
    });

    for (message_type, handler) in [
        (message_types::SERVER_HEARTBEAT, heartbeat),
        (message_types::BROADCAST_NOTICE, notice),
    ] {
        if let Err(e) = dispatcher.register(message_type, handler) {
            warn!("Failed to register {} handler: {}", message_type, e);
        }
    }
}

fn heartbeat(context: &InfraContext) -> Result<(String, InfraMessage), NodeError> {
    let channel = channels::outbound_for(context.kind(), context.environment())?;
    let message = InfraMessage::text(
        context.environment(),
        context.server_id(),
        message_types::SERVER_HEARTBEAT,
        "",
    )?;
    Ok((channel, message))
}

fn spawn_heartbeat(
    bus: Arc<dyn MessageBus>,
    context: InfraContext,
    interval: Duration,
) -> Result<JoinHandle<()>, NodeError> {
    // Validate once so the loop only sees bus errors.
    heartbeat(&context)?;
    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Ok((channel, message)) = heartbeat(&context) else {
                return;
            };
            if let Err(e) = bus.publish(&channel, &message).await {
                warn!("Heartbeat publish failed: {}", e);
            }
        }
    }))
}
