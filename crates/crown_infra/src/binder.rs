//! Binders build one core service from configuration and own its lifecycle.

use crate::config::AppConfig;
use crate::error::NodeError;
use crate::lifecycle::Closeable;
use async_trait::async_trait;
use infra_api::{InfraContext, MessageBus, RealtimeChannel, RealtimeHandler, ServiceState};
use infra_core::{DatabaseService, RedisBus, TcpRealtimeChannel};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RedisBinder {
    bus: Arc<RedisBus>,
}

impl RedisBinder {
    pub fn new(config: &AppConfig) -> Self {
        let redis = config.to_redis_settings();
        info!("🔌 Redis at {}:{} (ssl: {})", redis.host, redis.port, redis.ssl);
        Self {
            bus: Arc::new(RedisBus::new(redis, config.to_bus_settings())),
        }
    }

    /// Connects the bus. Fails if Redis cannot be reached.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.bus.start().await?;
        Ok(())
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }
}

#[async_trait]
impl Closeable for RedisBinder {
    fn name(&self) -> &str {
        "redis"
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.bus.stop().await;
        Ok(())
    }
}

pub struct DatabaseBinder {
    service: DatabaseService,
}

impl DatabaseBinder {
    pub fn new(config: &AppConfig) -> Self {
        info!("🗄️ Database config: {:?}", config.database);
        Self {
            service: DatabaseService::new(config.database.clone()),
        }
    }

    /// Starts the pool. An unreachable database leaves the service degraded
    /// and recovering in the background instead of failing the node.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.service.start().await;
        if self.service.state() != ServiceState::Running {
            warn!(
                "⚠️ Database started in {} state, recovery is running",
                self.service.state()
            );
        }
        Ok(())
    }

    pub fn service(&self) -> DatabaseService {
        self.service.clone()
    }
}

#[async_trait]
impl Closeable for DatabaseBinder {
    fn name(&self) -> &str {
        "database"
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.service.stop().await;
        Ok(())
    }
}

pub struct RealtimeBinder {
    channel: Arc<TcpRealtimeChannel>,
}

impl RealtimeBinder {
    pub fn new(config: &AppConfig, context: &InfraContext, handler: RealtimeHandler) -> Self {
        let options = config.to_realtime_options();
        info!(
            "⚡ Realtime {:?} on {}:{}",
            options.role, options.host, options.port
        );
        Self {
            channel: Arc::new(TcpRealtimeChannel::new(
                context,
                options,
                Arc::new(config.to_realtime_settings()),
                handler,
            )),
        }
    }

    pub async fn start(&self) -> Result<(), NodeError> {
        self.channel.start().await?;
        Ok(())
    }

    pub fn channel(&self) -> Arc<dyn RealtimeChannel> {
        self.channel.clone()
    }

    pub fn tcp_channel(&self) -> &Arc<TcpRealtimeChannel> {
        &self.channel
    }
}

#[async_trait]
impl Closeable for RealtimeBinder {
    fn name(&self) -> &str {
        "realtime"
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.channel.stop().await;
        Ok(())
    }
}
