//! End-to-end tests over real TCP sockets.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use multiroom_chat::{ChatServer, Listener, ServerConfig, ShutdownHandle, StatsSnapshot};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A listener running in the background on an ephemeral port
struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<StatsSnapshot>,
}

impl TestServer {
    async fn start(history_dir: &Path, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            accept_poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        config.history.dir = history_dir.to_path_buf();
        tweak(&mut config);

        let server = Arc::new(ChatServer::open(&config.history));
        let listener = Listener::bind(config, server).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(listener.run());

        TestServer { addr, shutdown, task }
    }

    async fn stop(self) -> StatsSnapshot {
        self.shutdown.trigger();
        timeout(Duration::from_secs(10), self.task)
            .await
            .expect("listener did not stop")
            .expect("listener task panicked")
    }
}

/// A raw line-protocol client
struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        TestClient {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{}\n", line).as_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write");
    }

    /// Next line, or None on EOF
    async fn recv(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .ok()
            .flatten()
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.recv().await.as_deref(), Some(expected));
    }

    /// Join a room and wait for the roster that confirms it
    async fn join(&mut self, user: &str, room: &str, roster: &str) {
        self.send(&format!("[JOIN_ROOM] {} {}", user, room)).await;
        self.expect(roster).await;
    }
}

#[tokio::test]
async fn test_chat_reaches_every_member_and_is_persisted() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    alice.join("alice", "Sun Squad", "[USERS] alice").await;
    bob.join("bob", "Sun Squad", "[USERS] alice bob").await;
    alice.expect("[USERS] alice bob").await;

    alice.send("[Sun Squad] alice: hi").await;
    alice.expect("[Sun Squad] alice: hi").await;
    bob.expect("[Sun Squad] alice: hi").await;

    let log = std::fs::read_to_string(dir.path().join("Sun_Squad.log")).unwrap();
    assert_eq!(log, "[Sun Squad] alice: hi\n");

    let stats = server.stop().await;
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.rejected_connections, 0);
}

#[tokio::test]
async fn test_disconnect_refreshes_remaining_roster() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;
    bob.join("bob", "lobby", "[USERS] alice bob").await;

    alice.send("[DISCONNECT]").await;
    bob.expect("[USERS] bob").await;
    // Alice only had her roster update queued, then EOF.
    alice.expect("[USERS] alice bob").await;
    assert_eq!(alice.recv().await, None);

    server.stop().await;
}

#[tokio::test]
async fn test_dropped_socket_is_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;
    bob.join("bob", "lobby", "[USERS] alice bob").await;

    drop(alice);
    bob.expect("[USERS] bob").await;

    bob.send("[GET_USERS]").await;
    bob.expect("[USERS] bob").await;

    server.stop().await;
}

#[tokio::test]
async fn test_server_at_capacity_rejects_without_affecting_others() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |c| c.max_connections = 1).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;

    let mut late = TestClient::connect(server.addr).await;
    late.expect("[ERROR] Server at capacity").await;
    assert_eq!(late.recv().await, None);

    alice.send("[GET_USERS]").await;
    alice.expect("[USERS] alice").await;

    let stats = server.stop().await;
    assert_eq!(stats.rejected_connections, 1);
    assert_eq!(stats.total_connections, 1);
}

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |c| {
        c.rate_limit.max_admissions = 2;
        c.rate_limit.window = Duration::from_secs(60);
    })
    .await;

    let mut first = TestClient::connect(server.addr).await;
    let mut second = TestClient::connect(server.addr).await;
    let mut third = TestClient::connect(server.addr).await;

    third.expect("[ERROR] Connection rate limit exceeded").await;
    assert_eq!(third.recv().await, None);

    first.join("a", "lobby", "[USERS] a").await;
    second.join("b", "lobby", "[USERS] a b").await;

    let stats = server.stop().await;
    assert_eq!(stats.rejected_connections, 1);
}

#[tokio::test]
async fn test_history_replayed_after_restart() {
    let dir = TempDir::new().unwrap();

    let server = TestServer::start(dir.path(), |_| {}).await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.join("alice", "Night Owls", "[USERS] alice").await;
    for i in 0..3 {
        let line = format!("[Night Owls] alice: message {}", i);
        alice.send(&line).await;
        alice.expect(&line).await;
    }
    server.stop().await;
    assert_eq!(alice.recv().await, None);

    let server = TestServer::start(dir.path(), |_| {}).await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.send("[JOIN_ROOM] bob Night Owls").await;
    bob.expect("[Night Owls] alice: message 0").await;
    bob.expect("[Night Owls] alice: message 1").await;
    bob.expect("[Night Owls] alice: message 2").await;
    bob.expect("[USERS] bob").await;

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;

    alice.send("complete nonsense").await;
    alice.send("[lobby] no sender here").await;
    alice.send("").await;
    alice.send("PING").await;
    alice.send("[GET_USERS]").await;
    alice.expect("[USERS] alice").await;

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_utf8_frame_is_skipped() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;

    alice.send_raw(b"[lobby] alice: \xff\xfe bad\n").await;
    alice.send("[GET_USERS]").await;
    alice.expect("[USERS] alice").await;

    alice.send("[lobby] alice: still here").await;
    alice.expect("[lobby] alice: still here").await;
    let log = std::fs::read_to_string(dir.path().join("lobby.log")).unwrap();
    assert_eq!(log, "[lobby] alice: still here\n");

    server.stop().await;
}

#[tokio::test]
async fn test_idle_connection_times_out_but_heartbeat_keeps_it_alive() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |c| {
        c.socket_timeout = Duration::from_millis(300);
    })
    .await;

    let mut chatty = TestClient::connect(server.addr).await;
    let mut idle = TestClient::connect(server.addr).await;
    chatty.join("chatty", "lobby", "[USERS] chatty").await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        chatty.send("PING").await;
    }
    assert_eq!(idle.recv().await, None);

    chatty.send("[GET_USERS]").await;
    chatty.expect("[USERS] chatty").await;

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |_| {}).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;

    let stats = server.stop().await;
    assert_eq!(alice.recv().await, None);
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.active_rooms, 0);
    assert_eq!(stats.online_users, 0);
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_socket_timeout() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path(), |c| {
        c.socket_timeout = Duration::from_secs(30);
        c.shutdown_grace = Duration::from_secs(1);
    })
    .await;

    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    alice.join("alice", "lobby", "[USERS] alice").await;
    bob.join("bob", "lobby", "[USERS] alice bob").await;
    alice.expect("[USERS] alice bob").await;

    let started = std::time::Instant::now();
    let stats = server.stop().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(stats.active_connections, 0);

    assert_eq!(alice.recv().await, None);
    assert_eq!(bob.recv().await, None);
}
