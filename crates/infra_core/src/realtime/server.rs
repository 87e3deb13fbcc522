//! Relay server role, run by the proxy.
//!
//! Game servers connect, authenticate with a handshake and then exchange data
//! frames. Frames addressed to the proxy are handed to the local handler and
//! everything else is forwarded to the target peer.

use super::protocol::{read_frame, read_frames, write_encoded, Activity, Frame};
use super::registry::{Delivery, PeerHandle, PeerRegistry};
use super::settings::RealtimeSettings;
use bytes::Bytes;
use infra_api::{RealtimeError, RealtimeHandler};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything a connection task needs to authenticate and route frames.
pub struct ServerContext {
    pub environment: String,
    pub server_id: String,
    pub token: String,
    pub settings: Arc<RealtimeSettings>,
    pub registry: Arc<PeerRegistry>,
    pub handler: RealtimeHandler,
}

impl ServerContext {
    /// Sends a payload from this server to `target`, looping back when it is addressed to itself.
    pub fn deliver_local(&self, target: &str, payload: Bytes) -> Delivery {
        if target == self.server_id {
            invoke(&self.handler, &self.server_id, payload);
            return Delivery::Queued;
        }
        forward(&self.registry, target, &self.server_id, payload)
    }
}

/// Binds a listening socket the same way for every platform.
pub fn bind(host: &str, port: u16) -> Result<TcpListener, RealtimeError> {
    let addr_text = format!("{host}:{port}");
    let bind_err = |source: std::io::Error| RealtimeError::Bind {
        addr: addr_text.clone(),
        source,
    };

    let addr: SocketAddr = addr_text
        .to_socket_addrs()
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| {
            bind_err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address did not resolve",
            ))
        })?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).ok();
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    TcpListener::from_std(std_listener).map_err(bind_err)
}

/// Accepts connections until `shutdown` flips.
pub fn spawn_accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stop = shutdown.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, ctx, shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept realtime connection: {}", e);
                    }
                }
            }
        }
        debug!("Realtime accept loop finished");
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    stream.set_nodelay(true).ok();
    let (mut reader, writer) = stream.into_split();

    let peer_id = match tokio::time::timeout(
        ctx.settings.handshake_timeout(),
        read_frame(&mut reader),
    )
    .await
    {
        Ok(Ok(Some(Frame::Handshake {
            environment,
            server_id,
            token,
        }))) => {
            if let Err(reason) = authorize(&ctx, &environment, &server_id, &token) {
                warn!("🚫 Rejected realtime handshake from {} ({}): {}", addr, server_id, reason);
                return;
            }
            server_id
        }
        Ok(Ok(Some(_))) => {
            warn!("🚫 {} sent data before handshaking, closing", addr);
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            warn!("Realtime handshake from {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("Realtime handshake from {} timed out", addr);
            return;
        }
    };

    let activity = Arc::new(Activity::new());
    let (tx, rx) = mpsc::channel(ctx.settings.outbound_queue_capacity());
    let conn_id = ctx.registry.next_conn_id();
    let handle = PeerHandle::new(conn_id, tx);

    let ack = match (Frame::HandshakeAck {
        server_id: ctx.server_id.clone(),
    })
    .encode()
    {
        Ok(ack) => ack,
        Err(e) => {
            error!("Failed to encode handshake ack: {}", e);
            return;
        }
    };
    handle.send(ack);
    let writer_task = tokio::spawn(write_loop(writer, rx, activity.clone()));

    if ctx.registry.register(&peer_id, handle.clone()).is_some() {
        info!("🔁 Peer {} reconnected, replaced previous connection", peer_id);
    }
    let (frames_tx, mut frames) = mpsc::channel(64);
    let reader_task = tokio::spawn(read_frames(reader, frames_tx, activity.clone()));
    info!("🤝 Realtime peer {} connected from {}", peer_id, addr);

    loop {
        tokio::select! {
            _ = handle.closed() => {
                debug!("Connection for {} closed by registry", peer_id);
                break;
            }
            _ = shutdown.changed() => break,
            _ = activity.expired(ctx.settings.idle_timeout()) => {
                info!("⏱️ Realtime peer {} idle, closing", peer_id);
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => route(&ctx, &peer_id, conn_id, frame),
                None => break,
            },
        }
    }

    ctx.registry.remove(&peer_id, conn_id);
    drop(handle);
    reader_task.abort();
    writer_task.abort();
    info!("👋 Realtime peer {} disconnected", peer_id);
}

fn authorize(
    ctx: &ServerContext,
    environment: &str,
    server_id: &str,
    token: &str,
) -> Result<(), &'static str> {
    if environment != ctx.environment {
        return Err("environment mismatch");
    }
    if token != ctx.token {
        return Err("invalid token");
    }
    if server_id.trim().is_empty() || server_id == ctx.server_id {
        return Err("invalid server id");
    }
    if !ctx.settings.is_allowed_peer(server_id) {
        return Err("peer not allowed");
    }
    Ok(())
}

fn route(ctx: &ServerContext, peer_id: &str, conn_id: u64, frame: Frame) {
    if !ctx.registry.is_current(peer_id, conn_id) {
        warn!("Dropping frame from stale connection of {}", peer_id);
        return;
    }
    let Frame::Data {
        target,
        source,
        payload,
    } = frame
    else {
        debug!("Ignoring non-data frame from {}", peer_id);
        return;
    };

    if source != peer_id {
        warn!("🚫 Dropping spoofed frame from {} claiming to be {}", peer_id, source);
        return;
    }
    if target == ctx.server_id {
        invoke(&ctx.handler, peer_id, payload);
        return;
    }
    match forward(&ctx.registry, &target, peer_id, payload) {
        Delivery::Queued | Delivery::Rejected => {}
        Delivery::Backpressure => {
            warn!("⚠️ Write queue of {} is full, dropping frame from {}", target, peer_id)
        }
        Delivery::Closed | Delivery::NoPeer => {
            warn!("Dropping realtime forward to unavailable target {}", target)
        }
    }
}

fn forward(registry: &PeerRegistry, target: &str, source: &str, payload: Bytes) -> Delivery {
    let Some(peer) = registry.find(target) else {
        return Delivery::NoPeer;
    };
    let frame = Frame::Data {
        target: target.to_string(),
        source: source.to_string(),
        payload,
    };
    match frame.encode() {
        Ok(encoded) => peer.send(encoded),
        Err(e) => {
            warn!("Failed to encode frame for {}: {}", target, e);
            Delivery::Rejected
        }
    }
}

pub(crate) fn invoke(handler: &RealtimeHandler, from: &str, payload: Bytes) {
    if catch_unwind(AssertUnwindSafe(|| handler(from, payload))).is_err() {
        error!("❌ Realtime handler panicked on message from {}", from);
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    activity: Arc<Activity>,
) {
    while let Some(encoded) = rx.recv().await {
        if let Err(e) = write_encoded(&mut writer, &encoded).await {
            debug!("Realtime write failed: {}", e);
            break;
        }
        activity.touch();
    }
}
