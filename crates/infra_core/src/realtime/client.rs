//! Relay client role, run by game servers.

use super::protocol::{
    read_frame, read_frames, write_encoded, write_frame, Activity, Frame, ProtocolError,
};
use super::server::invoke;
use super::settings::RealtimeSettings;
use bytes::Bytes;
use infra_api::{AtomicServiceState, RealtimeError, RealtimeHandler, ServiceState};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

/// Bounded outbound queue that evicts the oldest message when full.
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<(String, Bytes)>>,
    capacity: usize,
    drop_warn_threshold: u64,
    dropped: AtomicU64,
    ready: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize, drop_warn_threshold: u64) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            drop_warn_threshold: drop_warn_threshold.max(1),
            dropped: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    pub fn push(&self, target: &str, payload: Bytes) {
        let evicted = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back((target.to_string(), payload));
            evicted
        };

        if let Some((evicted_target, _)) = evicted {
            self.record_drop(&evicted_target);
        }
        self.ready.notify_one();
    }

    /// Takes the oldest queued message.
    pub fn pop(&self) -> Option<(String, Bytes)> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.pop_front()
    }

    /// Puts a message that could not be written back at the head of the queue.
    ///
    /// If newer messages filled the queue meanwhile, the restored message is
    /// the oldest one and is dropped instead.
    pub fn restore(&self, target: String, payload: Bytes) {
        let restored = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if items.len() < self.capacity {
                items.push_front((target.clone(), payload));
                true
            } else {
                false
            }
        };
        if !restored {
            self.record_drop(&target);
        }
    }

    pub fn drain(&self) -> Vec<(String, Bytes)> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, target: &str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if (dropped - 1) % self.drop_warn_threshold == 0 {
            warn!(
                "⚠️ Realtime outbound queue full, dropped oldest message for {} ({} dropped so far)",
                target, dropped
            );
        }
    }

    async fn wait_ready(&self) {
        self.ready.notified().await
    }
}

/// Everything the client loop needs to reach the relay.
pub struct ClientContext {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub server_id: String,
    pub token: String,
    pub settings: Arc<RealtimeSettings>,
    pub handler: RealtimeHandler,
    pub queue: Arc<OutboundQueue>,
    pub state: Arc<AtomicServiceState>,
}

/// Keeps a session with the relay alive until `shutdown` flips.
///
/// The state is `Running` while a handshaken session is open. After
/// `max_reconnect_attempts` consecutive failures it turns `Degraded` and the
/// loop keeps retrying at the max delay.
pub async fn run(ctx: Arc<ClientContext>, mut shutdown: watch::Receiver<bool>) {
    let settings = ctx.settings.clone();
    let mut failures: u32 = 0;

    loop {
        let delay = if failures >= settings.max_reconnect_attempts() {
            if ctx.state.load() != ServiceState::Degraded {
                warn!(
                    "⚠️ Realtime relay unreachable after {} attempts, channel degraded",
                    failures
                );
                ctx.state.store(ServiceState::Degraded);
            }
            settings.max_reconnect_delay()
        } else {
            settings.reconnect_delay(failures)
        };
        if !delay.is_zero() {
            info!(
                "Realtime client reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                failures
            );
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => return,
            connected = connect(&ctx) => connected,
        };
        match connected {
            Ok((reader, writer, relay_id)) => {
                ctx.state.store(ServiceState::Running);
                info!("🔗 Realtime session established with {}", relay_id);

                let stopped = session(&ctx, reader, writer, &mut shutdown).await;
                if stopped {
                    return;
                }
                ctx.state.store(ServiceState::Connecting);
                warn!("Realtime session with {} lost", relay_id);
                failures = 1;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!("Realtime connection failed (attempt {}): {}", failures, e);
            }
        }
    }
}

async fn connect(ctx: &ClientContext) -> Result<(OwnedReadHalf, OwnedWriteHalf, String), RealtimeError> {
    let addr = format!("{}:{}", ctx.host, ctx.port);
    let handshake = async {
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RealtimeError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &Frame::Handshake {
                environment: ctx.environment.clone(),
                server_id: ctx.server_id.clone(),
                token: ctx.token.clone(),
            },
        )
        .await?;

        match read_frame(&mut reader).await? {
            Some(Frame::HandshakeAck { server_id }) => {
                Ok::<_, RealtimeError>((reader, writer, server_id))
            }
            Some(_) => Err(RealtimeError::Protocol(
                "expected handshake ack".to_string(),
            )),
            None => Err(RealtimeError::Protocol(
                "relay closed the connection during handshake".to_string(),
            )),
        }
    };

    match tokio::time::timeout(ctx.settings.handshake_timeout(), handshake).await {
        Ok(result) => result,
        Err(_) => Err(RealtimeError::Protocol(format!(
            "handshake with {addr} timed out"
        ))),
    }
}

/// Runs one session. Returns `true` when it ended because of shutdown.
///
/// The session closes once nothing has been read or written for the idle timeout.
async fn session(
    ctx: &ClientContext,
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let activity = Arc::new(Activity::new());
    let (frames_tx, mut frames) = mpsc::channel(64);
    let reader_task = tokio::spawn(read_frames(reader, frames_tx, activity.clone()));

    let stopped = match flush(&ctx.queue, &ctx.server_id, &mut writer, &activity).await {
        Ok(()) => pump(ctx, &mut writer, &mut frames, &activity, shutdown).await,
        Err(e) => {
            debug!("Realtime write failed: {}", e);
            false
        }
    };

    reader_task.abort();
    stopped
}

async fn pump(
    ctx: &ClientContext,
    writer: &mut OwnedWriteHalf,
    frames: &mut mpsc::Receiver<Frame>,
    activity: &Activity,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return true,
            _ = activity.expired(ctx.settings.idle_timeout()) => {
                info!("⏱️ Realtime session idle, closing");
                return false;
            }
            _ = ctx.queue.wait_ready() => {
                if let Err(e) = flush(&ctx.queue, &ctx.server_id, writer, activity).await {
                    debug!("Realtime write failed: {}", e);
                    return false;
                }
            }
            frame = frames.recv() => match frame {
                Some(Frame::Data { target, source, payload }) => {
                    if target == ctx.server_id {
                        invoke(&ctx.handler, &source, payload);
                    }
                }
                Some(_) => {}
                None => return false,
            },
        }
    }
}

/// Writes queued messages one at a time. A message whose write fails goes
/// back to the head of the queue for the next session.
async fn flush<W>(
    queue: &OutboundQueue,
    source: &str,
    writer: &mut W,
    activity: &Activity,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    while let Some((target, payload)) = queue.pop() {
        let frame = Frame::Data {
            target,
            source: source.to_string(),
            payload,
        };
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Dropping unencodable realtime message: {}", e);
                continue;
            }
        };
        if let Err(e) = write_encoded(writer, &encoded).await {
            if let Frame::Data {
                target, payload, ..
            } = frame
            {
                queue.restore(target, payload);
            }
            return Err(e);
        }
        activity.touch();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts `budget` bytes, then fails every write.
    struct BrokenAfter {
        budget: usize,
    }

    impl AsyncWrite for BrokenAfter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn data_len(target: &str, source: &str, payload: &'static [u8]) -> usize {
        Frame::Data {
            target: target.to_string(),
            source: source.to_string(),
            payload: Bytes::from_static(payload),
        }
        .encode()
        .unwrap()
        .len()
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_unwritten_messages() {
        let queue = OutboundQueue::new(8, 10);
        queue.push("proxy-1", Bytes::from_static(b"1"));
        queue.push("mines-1", Bytes::from_static(b"2"));
        queue.push("proxy-1", Bytes::from_static(b"3"));

        // The first frame fits, the second breaks off halfway.
        let mut broken = BrokenAfter {
            budget: data_len("proxy-1", "village-1", b"1") + 3,
        };
        let activity = Activity::new();
        assert!(flush(&queue, "village-1", &mut broken, &activity).await.is_err());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 0);

        let mut healthy: Vec<u8> = Vec::new();
        flush(&queue, "village-1", &mut healthy, &activity).await.unwrap();
        assert!(queue.is_empty());

        let mut written = &healthy[..];
        let mut payloads = Vec::new();
        while let Some(Frame::Data { target, payload, .. }) = read_frame(&mut written).await.unwrap() {
            payloads.push((target, payload));
        }
        assert_eq!(
            payloads,
            vec![
                ("mines-1".to_string(), Bytes::from_static(b"2")),
                ("proxy-1".to_string(), Bytes::from_static(b"3")),
            ]
        );
    }

    #[test]
    fn test_restore_into_full_queue_drops_the_restored_message() {
        let queue = OutboundQueue::new(1, 10);
        queue.push("a", Bytes::from_static(b"1"));
        let (target, payload) = queue.pop().unwrap();
        queue.push("b", Bytes::from_static(b"2"));

        queue.restore(target, payload);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().map(|(t, _)| t), Some("b".to_string()));
    }

    #[test]
    fn test_queue_drops_oldest() {
        let queue = OutboundQueue::new(2, 10);
        queue.push("a", Bytes::from_static(b"1"));
        queue.push("b", Bytes::from_static(b"2"));
        queue.push("c", Bytes::from_static(b"3"));

        assert_eq!(queue.dropped(), 1);
        let drained: Vec<String> = queue.drain().into_iter().map(|(t, _)| t).collect();
        assert_eq!(drained, vec!["b", "c"]);
        assert!(queue.is_empty());
    }
}
