//! [`MessageBus`] backed by Redis pub/sub.

use super::handlers::{HandlerTable, Removal};
use super::settings::{BusSettings, RedisSettings};
use super::workers::{Job, WorkerPool};
use crate::codec::MessageCodec;
use async_trait::async_trait;
use futures::StreamExt;
use infra_api::{
    AtomicServiceState, BusError, InfraMessage, MessageBus, MessageHandler, ServiceState,
    Subscription,
};
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Message bus over Redis pub/sub.
///
/// Uses one connection for PUBLISH and a dedicated one for subscriptions.
/// Inbound messages are decoded on the reader task and handed to a bounded
/// worker pool, so a slow handler never stalls the connection.
///
/// # Lifecycle
///
/// `Stopped` → `Connecting` → `Running`, with `Degraded` while the
/// subscribe connection is being re-established. After [`MessageBus::stop`]
/// the bus is terminal.
pub struct RedisBus {
    inner: Arc<Inner>,
}

struct Inner {
    redis: RedisSettings,
    settings: BusSettings,
    codec: MessageCodec,
    state: AtomicServiceState,
    terminated: AtomicBool,
    handlers: HandlerTable,
    publisher: RwLock<Option<ConnectionManager>>,
    sink: Mutex<Option<PubSubSink>>,
    running: Mutex<Option<Running>>,
}

/// Resources owned while the bus is started.
struct Running {
    reader: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    pool: Arc<WorkerPool>,
}

impl RedisBus {
    pub fn new(redis: RedisSettings, settings: BusSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                redis,
                settings,
                codec: MessageCodec,
                state: AtomicServiceState::default(),
                terminated: AtomicBool::new(false),
                handlers: HandlerTable::new(),
                publisher: RwLock::new(None),
                sink: Mutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &BusSettings {
        &self.inner.settings
    }

    fn ensure_started(&self) -> Result<(), BusError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(BusError::Terminated);
        }
        if !self.is_started() {
            return Err(BusError::NotStarted);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn start(&self) -> Result<(), BusError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(BusError::Terminated);
        }
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.inner.state.store(ServiceState::Connecting);
        info!(
            "🔌 Connecting message bus to {}:{}",
            self.inner.redis.host, self.inner.redis.port
        );

        match self.inner.clone().connect().await {
            Ok(started) => {
                *running = Some(started);
                self.inner.state.store(ServiceState::Running);
                info!("✅ Message bus running");
                Ok(())
            }
            Err(e) => {
                *self.inner.publisher.write().await = None;
                *self.inner.sink.lock().await = None;
                self.inner.state.store(ServiceState::Stopped);
                error!("Failed to start message bus: {}", e);
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.state.store(ServiceState::Stopped);

        if let Some(running) = self.inner.running.lock().await.take() {
            let _ = running.shutdown.send(true);
            running.reader.abort();
            running.pool.shutdown();
        }
        *self.inner.publisher.write().await = None;
        *self.inner.sink.lock().await = None;
        info!("🛑 Message bus stopped");
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError> {
        self.ensure_started()?;
        if channel.trim().is_empty() {
            return Err(BusError::BlankChannel);
        }

        let (subscription, first) = self.inner.handlers.add(channel, handler);
        if first {
            if let Err(e) = self.inner.subscribe_channel(channel).await {
                self.inner.handlers.remove(&subscription);
                return Err(e);
            }
            debug!("Subscribed to {}", channel);
        }
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), BusError> {
        if self.inner.handlers.remove(subscription) != Removal::LastRemoved {
            return Ok(());
        }
        let sink = self.inner.sink.lock().await.clone();
        if let Some(mut sink) = sink {
            sink.unsubscribe(subscription.channel())
                .await
                .map_err(|e| BusError::Backend(e.to_string()))?;
            debug!("Unsubscribed from {}", subscription.channel());
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &InfraMessage) -> Result<(), BusError> {
        self.ensure_started()?;
        if channel.trim().is_empty() {
            return Err(BusError::BlankChannel);
        }
        let payload = self.inner.codec.encode(message)?;

        let mut conn = self
            .inner
            .publisher
            .read()
            .await
            .clone()
            .ok_or(BusError::NotStarted)?;
        let _receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Backend(e.to_string()))?;
        Ok(())
    }

    fn state(&self) -> ServiceState {
        self.inner.state.load()
    }
}

impl Inner {
    async fn connect(self: Arc<Self>) -> Result<Running, BusError> {
        let client = self.redis.client()?;
        let timeout = self.redis.timeout;

        let publisher = with_timeout(timeout, ConnectionManager::new(client.clone())).await?;
        *self.publisher.write().await = Some(publisher);

        let stream = self.open_subscriber(&client).await?;

        let pool = Arc::new(
            WorkerPool::start(self.settings.worker_count(), self.settings.queue_capacity())
                .map_err(|e| BusError::Backend(format!("failed to spawn bus workers: {e}")))?,
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(self.clone().read_loop(client, stream, pool.clone(), shutdown_rx));

        Ok(Running {
            reader,
            shutdown,
            pool,
        })
    }

    /// Opens a fresh subscribe connection and re-subscribes every known channel.
    async fn open_subscriber(&self, client: &redis::Client) -> Result<PubSubStream, BusError> {
        let pubsub = with_timeout(self.redis.timeout, client.get_async_pubsub()).await?;
        let (sink, stream) = pubsub.split();
        *self.sink.lock().await = Some(sink);

        for channel in self.handlers.channels() {
            self.subscribe_channel(&channel).await?;
        }
        Ok(stream)
    }

    async fn subscribe_channel(&self, channel: &str) -> Result<(), BusError> {
        let attempts = self.settings.subscribe_retry_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let sink = self.sink.lock().await.clone();
            let Some(mut sink) = sink else {
                return Err(BusError::NotStarted);
            };
            match sink.subscribe(channel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Subscribe to {} failed (attempt {}/{}): {}",
                        channel, attempt, attempts, e
                    );
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.subscribe_retry_delay()).await;
            }
        }
        Err(BusError::Backend(format!(
            "failed to subscribe to {channel}: {last_error}"
        )))
    }

    async fn read_loop(
        self: Arc<Self>,
        client: redis::Client,
        mut stream: PubSubStream,
        pool: Arc<WorkerPool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                next = stream.next() => match next {
                    Some(msg) => self.dispatch(&msg, &pool),
                    None => {
                        if self.terminated.load(Ordering::Acquire) {
                            return;
                        }
                        warn!("⚠️ Subscribe connection lost, message bus degraded");
                        self.state.store(ServiceState::Degraded);
                        match self.reconnect(&client, &mut shutdown).await {
                            Some(fresh) => {
                                stream = fresh;
                                self.state.store(ServiceState::Running);
                                info!("✅ Subscribe connection restored");
                            }
                            None => return,
                        }
                    }
                }
            }
        }
    }

    /// Retries with exponential backoff until connected or shut down.
    async fn reconnect(
        &self,
        client: &redis::Client,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<PubSubStream> {
        let mut delay = self.settings.subscribe_retry_delay().max(Duration::from_millis(1));
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.terminated.load(Ordering::Acquire) {
                return None;
            }
            attempt += 1;
            match self.open_subscriber(client).await {
                Ok(stream) => return Some(stream),
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    fn dispatch(&self, msg: &redis::Msg, pool: &WorkerPool) {
        let channel = msg.get_channel_name();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping non-text payload on {}: {}", channel, e);
                return;
            }
        };
        self.route(channel, &payload, pool);
    }

    /// Decodes `payload` and queues one job per handler of `channel`.
    ///
    /// Returns how many jobs were accepted by the pool.
    fn route(&self, channel: &str, payload: &str, pool: &WorkerPool) -> usize {
        let message = match self.codec.decode(payload) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!("Dropping undecodable message on {}: {}", channel, e);
                return 0;
            }
        };

        let channel: Arc<str> = Arc::from(channel);
        self.handlers
            .handlers_for(&channel)
            .into_iter()
            .filter(|handler| {
                pool.submit(Job {
                    channel: channel.clone(),
                    message: message.clone(),
                    handler: handler.clone(),
                })
            })
            .count()
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, BusError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BusError::Connect(e.to_string())),
        Err(_) => Err(BusError::Connect(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
