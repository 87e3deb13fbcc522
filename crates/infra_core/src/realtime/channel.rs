use super::client::{self, ClientContext, OutboundQueue};
use super::registry::{Delivery, PeerRegistry};
use super::server::{self, ServerContext};
use super::settings::RealtimeSettings;
use async_trait::async_trait;
use bytes::Bytes;
use infra_api::{
    AtomicServiceState, InfraContext, RealtimeChannel, RealtimeError, RealtimeHandler,
    ServiceState,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which side of the relay this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeRole {
    /// Accepts peers and relays between them (proxy).
    Server,
    /// Connects to the relay (game server).
    Client,
}

/// Endpoint and credentials of the relay.
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub role: RealtimeRole,
    /// Bind address for the server role, relay address for the client role.
    pub host: String,
    pub port: u16,
    pub token: String,
}

/// [`RealtimeChannel`] over TCP using the length-prefixed relay protocol.
///
/// # Server role
///
/// Binds `host:port`, authenticates peers and relays their data frames.
/// `send` requires the listener to be up and loops back messages addressed to
/// this node.
///
/// # Client role
///
/// Maintains a session with the relay in the background. `send` only needs a
/// started channel: messages wait in a drop-oldest queue until a session is
/// available.
pub struct TcpRealtimeChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    environment: String,
    server_id: String,
    options: RealtimeOptions,
    settings: Arc<RealtimeSettings>,
    handler: RealtimeHandler,
    registry: Arc<PeerRegistry>,
    queue: Arc<OutboundQueue>,
    state: Arc<AtomicServiceState>,
    started: AtomicBool,
    terminated: AtomicBool,
    running: Mutex<Option<Running>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

struct Running {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    server: Option<Arc<ServerContext>>,
}

impl TcpRealtimeChannel {
    pub fn new(
        context: &InfraContext,
        options: RealtimeOptions,
        settings: Arc<RealtimeSettings>,
        handler: RealtimeHandler,
    ) -> Self {
        let queue = Arc::new(OutboundQueue::new(
            settings.outbound_queue_capacity(),
            settings.drop_warn_threshold(),
        ));
        Self {
            inner: Arc::new(ChannelInner {
                environment: context.environment().to_string(),
                server_id: context.server_id().to_string(),
                options,
                settings,
                handler,
                registry: Arc::new(PeerRegistry::new()),
                queue,
                state: Arc::new(AtomicServiceState::default()),
                started: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                running: Mutex::new(None),
                local_addr: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn role(&self) -> RealtimeRole {
        self.inner.options.role
    }

    pub fn settings(&self) -> &Arc<RealtimeSettings> {
        &self.inner.settings
    }

    /// Address the server role is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Server ids of the currently connected peers (server role).
    pub fn connected_peers(&self) -> Vec<String> {
        self.inner.registry.server_ids()
    }

    /// Messages evicted from the outbound queue so far (client role).
    pub fn dropped_messages(&self) -> u64 {
        self.inner.queue.dropped()
    }

    async fn start_server(&self) -> Result<Running, RealtimeError> {
        let inner = &self.inner;
        let listener = server::bind(&inner.options.host, inner.options.port)?;
        if let Ok(addr) = listener.local_addr() {
            if let Ok(mut slot) = inner.local_addr.lock() {
                *slot = Some(addr);
            }
            info!("📡 Realtime relay listening on {}", addr);
        }

        let ctx = Arc::new(ServerContext {
            environment: inner.environment.clone(),
            server_id: inner.server_id.clone(),
            token: inner.options.token.clone(),
            settings: inner.settings.clone(),
            registry: inner.registry.clone(),
            handler: inner.handler.clone(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = server::spawn_accept_loop(listener, ctx.clone(), shutdown_rx);
        inner.state.store(ServiceState::Running);

        Ok(Running {
            task,
            shutdown,
            server: Some(ctx),
        })
    }

    fn start_client(&self) -> Running {
        let inner = &self.inner;
        let ctx = Arc::new(ClientContext {
            host: inner.options.host.clone(),
            port: inner.options.port,
            environment: inner.environment.clone(),
            server_id: inner.server_id.clone(),
            token: inner.options.token.clone(),
            settings: inner.settings.clone(),
            handler: inner.handler.clone(),
            queue: inner.queue.clone(),
            state: inner.state.clone(),
        });
        inner.state.store(ServiceState::Connecting);
        info!(
            "🔌 Realtime client connecting to {}:{}",
            inner.options.host, inner.options.port
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client::run(ctx, shutdown_rx));
        Running {
            task,
            shutdown,
            server: None,
        }
    }
}

#[async_trait]
impl RealtimeChannel for TcpRealtimeChannel {
    async fn start(&self) -> Result<(), RealtimeError> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(RealtimeError::Terminated);
        }
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let started = match self.inner.options.role {
            RealtimeRole::Server => self.start_server().await,
            RealtimeRole::Client => Ok(self.start_client()),
        };
        match started {
            Ok(started) => {
                *running = Some(started);
                self.inner.started.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.inner.state.store(ServiceState::Stopped);
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(running) = self.inner.running.lock().await.take() {
            let _ = running.shutdown.send(true);
            running.task.abort();
        }
        self.inner.registry.close_all();
        self.inner.started.store(false, Ordering::Release);
        self.inner.state.store(ServiceState::Stopped);
        info!("🛑 Realtime channel stopped");
    }

    async fn send(&self, target_node_id: &str, payload: Bytes) -> Result<(), RealtimeError> {
        if target_node_id.trim().is_empty() {
            return Err(RealtimeError::BlankTarget);
        }
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(RealtimeError::Terminated);
        }

        match self.inner.options.role {
            RealtimeRole::Server => {
                if !self.is_available() {
                    return Err(RealtimeError::Unavailable);
                }
                let server = self
                    .inner
                    .running
                    .lock()
                    .await
                    .as_ref()
                    .and_then(|running| running.server.clone())
                    .ok_or(RealtimeError::Unavailable)?;
                match server.deliver_local(target_node_id, payload) {
                    Delivery::Queued | Delivery::Rejected => {}
                    Delivery::Backpressure => warn!(
                        "⚠️ Write queue of {} is full, dropping realtime send",
                        target_node_id
                    ),
                    Delivery::Closed | Delivery::NoPeer => warn!(
                        "Dropping realtime send to unregistered peer {}",
                        target_node_id
                    ),
                }
                Ok(())
            }
            RealtimeRole::Client => {
                if !self.inner.started.load(Ordering::Acquire) {
                    return Err(RealtimeError::NotStarted);
                }
                self.inner.queue.push(target_node_id, payload);
                Ok(())
            }
        }
    }

    fn is_available(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
            && !self.inner.terminated.load(Ordering::Acquire)
            && self.inner.state.load() == ServiceState::Running
    }

    fn state(&self) -> ServiceState {
        self.inner.state.load()
    }
}
