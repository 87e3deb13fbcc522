use bytes::Bytes;
use infra_api::{InfraContext, RealtimeChannel, RealtimeHandler, ServerKind, ServiceState};
use infra_core::realtime::protocol::{read_frame, write_frame};
use infra_core::realtime::{
    Frame, RealtimeOptions, RealtimeRole, RealtimeSettings, TcpRealtimeChannel,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const TOKEN: &str = "relay-secret";

fn fast_settings() -> Arc<RealtimeSettings> {
    relay_settings(Vec::new(), Duration::from_secs(5))
}

fn relay_settings(allowed_peers: Vec<String>, idle_timeout: Duration) -> Arc<RealtimeSettings> {
    Arc::new(RealtimeSettings::new(
        allowed_peers,
        64,
        2,
        Duration::from_millis(10),
        Duration::from_millis(50),
        10,
        idle_timeout,
        Duration::from_secs(2),
    ))
}

fn recording_handler() -> (RealtimeHandler, mpsc::UnboundedReceiver<(String, Bytes)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: RealtimeHandler = Arc::new(move |from: &str, payload: Bytes| {
        let _ = tx.send((from.to_string(), payload));
    });
    (handler, rx)
}

async fn start_proxy() -> (TcpRealtimeChannel, mpsc::UnboundedReceiver<(String, Bytes)>, u16) {
    start_proxy_with(fast_settings()).await
}

async fn start_proxy_with(
    settings: Arc<RealtimeSettings>,
) -> (TcpRealtimeChannel, mpsc::UnboundedReceiver<(String, Bytes)>, u16) {
    let ctx = InfraContext::new("test", "proxy-1", ServerKind::Velocity).unwrap();
    let (handler, rx) = recording_handler();
    let proxy = TcpRealtimeChannel::new(
        &ctx,
        RealtimeOptions {
            role: RealtimeRole::Server,
            host: "127.0.0.1".to_string(),
            port: 0,
            token: TOKEN.to_string(),
        },
        settings,
        handler,
    );
    proxy.start().await.unwrap();
    let port = proxy.local_addr().unwrap().port();
    (proxy, rx, port)
}

async fn start_paper(
    server_id: &str,
    port: u16,
    token: &str,
) -> (TcpRealtimeChannel, mpsc::UnboundedReceiver<(String, Bytes)>) {
    start_paper_with(server_id, port, token, fast_settings()).await
}

async fn start_paper_with(
    server_id: &str,
    port: u16,
    token: &str,
    settings: Arc<RealtimeSettings>,
) -> (TcpRealtimeChannel, mpsc::UnboundedReceiver<(String, Bytes)>) {
    let ctx = InfraContext::new("test", server_id, ServerKind::Paper).unwrap();
    let (handler, rx) = recording_handler();
    let paper = TcpRealtimeChannel::new(
        &ctx,
        RealtimeOptions {
            role: RealtimeRole::Client,
            host: "127.0.0.1".to_string(),
            port,
            token: token.to_string(),
        },
        settings,
        handler,
    );
    paper.start().await.unwrap();
    (paper, rx)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Opens a bare protocol connection and sends a handshake.
///
/// Returns the stream and whether the relay acknowledged it.
async fn raw_peer(port: u16, environment: &str, server_id: &str) -> (TcpStream, bool) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    write_frame(
        &mut stream,
        &Frame::Handshake {
            environment: environment.to_string(),
            server_id: server_id.to_string(),
            token: TOKEN.to_string(),
        },
    )
    .await
    .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
        .await
        .expect("relay neither answered nor closed the handshake");
    let acked = matches!(reply, Ok(Some(Frame::HandshakeAck { .. })));
    (stream, acked)
}

async fn send_raw(stream: &mut TcpStream, target: &str, source: &str, payload: &'static [u8]) {
    let frame = Frame::Data {
        target: target.to_string(),
        source: source.to_string(),
        payload: Bytes::from_static(payload),
    };
    let _ = write_frame(stream, &frame).await;
}

/// Waits until the relay closes `stream`.
async fn closed_by_relay(stream: &mut TcpStream, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        match tokio::time::timeout(within, read_frame(stream)).await {
            Ok(Ok(None)) | Ok(Err(_)) => return true,
            Ok(Ok(Some(_))) => continue,
            Err(_) => return false,
        }
    }
    false
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Bytes)>) -> (String, Bytes) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a realtime message")
        .expect("handler channel closed")
}

#[tokio::test]
async fn test_relay_forwards_between_game_servers() {
    let (proxy, mut proxy_rx, port) = start_proxy().await;
    let (village, _village_rx) = start_paper("village-1", port, TOKEN).await;
    let (mines, mut mines_rx) = start_paper("mines-1", port, TOKEN).await;

    assert!(wait_until(|| proxy.connected_peers().len() == 2).await);
    assert!(wait_until(|| village.is_running() && mines.is_running()).await);

    village
        .send("mines-1", Bytes::from_static(b"transfer:steve"))
        .await
        .unwrap();
    let (from, payload) = recv(&mut mines_rx).await;
    assert_eq!(from, "village-1");
    assert_eq!(&payload[..], b"transfer:steve");

    mines
        .send("proxy-1", Bytes::from_static(b"ready"))
        .await
        .unwrap();
    let (from, payload) = recv(&mut proxy_rx).await;
    assert_eq!(from, "mines-1");
    assert_eq!(&payload[..], b"ready");

    village.stop().await;
    mines.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_proxy_sends_to_connected_peer_and_loops_back() {
    let (proxy, mut proxy_rx, port) = start_proxy().await;
    let (village, mut village_rx) = start_paper("village-1", port, TOKEN).await;
    assert!(wait_until(|| proxy.connected_peers() == vec!["village-1".to_string()]).await);

    proxy
        .send("village-1", Bytes::from_static(b"hello"))
        .await
        .unwrap();
    let (from, payload) = recv(&mut village_rx).await;
    assert_eq!(from, "proxy-1");
    assert_eq!(&payload[..], b"hello");

    proxy
        .send("proxy-1", Bytes::from_static(b"self"))
        .await
        .unwrap();
    let (from, _) = recv(&mut proxy_rx).await;
    assert_eq!(from, "proxy-1");

    // Unknown targets are dropped without failing the caller.
    proxy
        .send("nether-9", Bytes::from_static(b"lost"))
        .await
        .unwrap();

    village.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let (proxy, _proxy_rx, port) = start_proxy().await;
    let (intruder, _rx) = start_paper("village-1", port, "wrong").await;

    assert!(wait_until(|| intruder.state() == ServiceState::Degraded).await);
    assert!(proxy.connected_peers().is_empty());

    // Client sends still queue while the relay is unreachable.
    intruder
        .send("proxy-1", Bytes::from_static(b"queued"))
        .await
        .unwrap();

    intruder.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_stopped_channel_rejects_sends() {
    let (proxy, _rx, _port) = start_proxy().await;
    assert!(proxy.is_available());
    proxy.stop().await;

    assert_eq!(proxy.state(), ServiceState::Stopped);
    assert!(proxy
        .send("village-1", Bytes::from_static(b"late"))
        .await
        .is_err());
    assert!(proxy
        .send(" ", Bytes::from_static(b"blank"))
        .await
        .is_err());
    assert!(proxy.start().await.is_err());
}

#[tokio::test]
async fn test_handshake_checks_environment_and_allowed_peers() {
    let settings = relay_settings(vec!["village-1".to_string()], Duration::from_secs(5));
    let (proxy, _rx, port) = start_proxy_with(settings).await;

    let (_foreign, acked) = raw_peer(port, "prod", "village-1").await;
    assert!(!acked);
    let (_unlisted, acked) = raw_peer(port, "test", "nether-9").await;
    assert!(!acked);
    let (_listed, acked) = raw_peer(port, "test", "village-1").await;
    assert!(acked);

    proxy.settings().update_allowed_peers(vec!["nether-9".to_string()]);
    let (_late, acked) = raw_peer(port, "test", "nether-9").await;
    assert!(acked);
    let (_dropped, acked) = raw_peer(port, "test", "mines-1").await;
    assert!(!acked);

    proxy.stop().await;
}

#[tokio::test]
async fn test_spoofed_source_is_dropped() {
    let (proxy, _proxy_rx, port) = start_proxy().await;
    let (mines, mut mines_rx) = start_paper("mines-1", port, TOKEN).await;
    let (mut village, acked) = raw_peer(port, "test", "village-1").await;
    assert!(acked);
    assert!(wait_until(|| proxy.connected_peers().len() == 2).await);

    send_raw(&mut village, "mines-1", "proxy-1", b"forged").await;
    send_raw(&mut village, "mines-1", "village-1", b"honest").await;

    let (from, payload) = recv(&mut mines_rx).await;
    assert_eq!(from, "village-1");
    assert_eq!(&payload[..], b"honest");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(mines_rx.try_recv().is_err());

    mines.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_reconnect_replaces_and_silences_previous_connection() {
    let (proxy, mut proxy_rx, port) = start_proxy().await;
    let (mut old, acked) = raw_peer(port, "test", "village-1").await;
    assert!(acked);
    let (mut new, acked) = raw_peer(port, "test", "village-1").await;
    assert!(acked);

    assert!(closed_by_relay(&mut old, Duration::from_secs(2)).await);
    assert_eq!(proxy.connected_peers(), vec!["village-1".to_string()]);

    send_raw(&mut old, "proxy-1", "village-1", b"stale").await;
    send_raw(&mut new, "proxy-1", "village-1", b"fresh").await;
    let (_, payload) = recv(&mut proxy_rx).await;
    assert_eq!(&payload[..], b"fresh");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(proxy_rx.try_recv().is_err());

    proxy.send("village-1", Bytes::from_static(b"hi")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut new))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reply, Some(Frame::Data { payload, .. }) if &payload[..] == b"hi"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_silent_peer_is_closed_after_idle_timeout() {
    let idle = Duration::from_millis(200);
    let (proxy, _rx, port) = start_proxy_with(relay_settings(Vec::new(), idle)).await;
    let (mut silent, acked) = raw_peer(port, "test", "village-1").await;
    assert!(acked);

    let started = Instant::now();
    assert!(closed_by_relay(&mut silent, Duration::from_secs(2)).await);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(wait_until(|| proxy.connected_peers().is_empty()).await);

    proxy.stop().await;
}

#[tokio::test]
async fn test_one_way_traffic_keeps_sessions_open() {
    let idle = Duration::from_millis(300);
    let (proxy, _proxy_rx, port) = start_proxy_with(relay_settings(Vec::new(), idle)).await;
    let (village, _village_rx) =
        start_paper_with("village-1", port, TOKEN, relay_settings(Vec::new(), idle)).await;
    let (mines, mut mines_rx) =
        start_paper_with("mines-1", port, TOKEN, relay_settings(Vec::new(), idle)).await;
    assert!(wait_until(|| village.is_running() && mines.is_running()).await);
    assert!(wait_until(|| proxy.connected_peers().len() == 2).await);

    // village only writes and mines only reads, for several idle periods.
    let mut interrupted = 0;
    for _ in 0..40 {
        village
            .send("mines-1", Bytes::from_static(b"tick"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !village.is_running() || !mines.is_running() {
            interrupted += 1;
        }
    }
    assert_eq!(interrupted, 0);

    let mut received = 0;
    while tokio::time::timeout(Duration::from_millis(500), mines_rx.recv())
        .await
        .is_ok_and(|msg| msg.is_some())
    {
        received += 1;
        if received == 40 {
            break;
        }
    }
    assert_eq!(received, 40);

    village.stop().await;
    mines.stop().await;
    proxy.stop().await;
}
