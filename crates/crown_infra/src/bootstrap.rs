//! Startup and shutdown of a complete node.

use crate::binder::{DatabaseBinder, RealtimeBinder, RedisBinder};
use crate::config::AppConfig;
use crate::error::NodeError;
use crate::lifecycle::CloseableRegistry;
use crate::pubsub::PubSubBootstrap;
use crate::services::ServiceRegistry;
use bytes::Bytes;
use infra_api::{
    InfraContext, MessageBus, RealtimeChannel, RealtimeHandler, TaskExecutor, TokioExecutor,
};
use infra_core::DatabaseService;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Brings up every service of a node in dependency order.
///
/// # Start order
///
/// 1. Context from `infra`
/// 2. Redis bus
/// 3. Database pool
/// 4. Realtime channel, when enabled
/// 5. Pub/Sub subscriptions and heartbeats
/// 6. Service registration
///
/// A failure at any step closes what was already started, newest first, and
/// returns the error.
pub struct InfraBootstrap {
    config: AppConfig,
    services: Arc<ServiceRegistry>,
    closeables: CloseableRegistry,
    realtime_handler: RealtimeHandler,
    context: Option<InfraContext>,
    pubsub: Option<Arc<PubSubBootstrap>>,
    started: bool,
}

impl InfraBootstrap {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            services: Arc::new(ServiceRegistry::new()),
            closeables: CloseableRegistry::new(),
            realtime_handler: Arc::new(|from: &str, payload: Bytes| {
                debug!("Realtime payload from {} ({} bytes)", from, payload.len());
            }),
            context: None,
            pubsub: None,
            started: false,
        }
    }

    /// Replaces the handler that receives realtime payloads addressed to this node.
    pub fn with_realtime_handler(mut self, handler: RealtimeHandler) -> Self {
        self.realtime_handler = handler;
        self
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn context(&self) -> Option<&InfraContext> {
        self.context.as_ref()
    }

    pub fn pubsub(&self) -> Option<&Arc<PubSubBootstrap>> {
        self.pubsub.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.started {
            return Ok(());
        }

        match self.start_services().await {
            Ok(context) => {
                info!("✅ Crown infra started for {}", context);
                self.context = Some(context);
                self.started = true;
                Ok(())
            }
            Err(e) => {
                error!("❌ Crown infra failed to start: {}", e);
                self.closeables.close_all().await;
                self.services.clear();
                self.pubsub = None;
                Err(e)
            }
        }
    }

    async fn start_services(&mut self) -> Result<InfraContext, NodeError> {
        let config = &self.config;
        let context = config.to_context()?;
        info!("🚀 Starting Crown infra for {}", context);

        let redis = Arc::new(RedisBinder::new(config));
        redis.start().await?;
        self.closeables.register(redis.clone()).await;

        let database = Arc::new(DatabaseBinder::new(config));
        database.start().await?;
        self.closeables.register(database.clone()).await;

        let realtime = if config.realtime.enabled {
            let binder = Arc::new(RealtimeBinder::new(
                config,
                &context,
                self.realtime_handler.clone(),
            ));
            binder.start().await?;
            self.closeables.register(binder.clone()).await;
            Some(binder)
        } else {
            info!("Realtime channel disabled");
            None
        };

        let executor: Arc<dyn TaskExecutor> = Arc::new(TokioExecutor::current());
        let pubsub = Arc::new(PubSubBootstrap::new(
            redis.bus(),
            context.clone(),
            executor,
            config.heartbeat_interval(),
        ));
        pubsub.start().await?;
        self.closeables.register(pubsub.clone()).await;

        self.services.register::<Arc<dyn MessageBus>>(redis.bus())?;
        self.services.register::<DatabaseService>(database.service())?;
        self.services.register::<Arc<PubSubBootstrap>>(pubsub.clone())?;
        if let Some(realtime) = realtime {
            self.services
                .register::<Arc<dyn RealtimeChannel>>(realtime.channel())?;
        }
        self.pubsub = Some(pubsub);

        Ok(context)
    }

    /// Closes every started service, newest first. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if !self.started {
            return;
        }
        info!("🛑 Stopping Crown infra");
        self.closeables.close_all().await;
        self.services.clear();
        self.pubsub = None;
        self.started = false;
        info!("👋 Crown infra stopped");
    }
}
