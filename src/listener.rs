//! Accept loop and connection lifecycle
//!
//! The listener owns the listening socket, the admission gates, the set of
//! active connections and the tasks serving them. Shutdown is cooperative:
//! a flag stops the accept loop, a watch channel tells every handler to
//! close its socket, handlers get a grace period, stragglers are aborted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::error::{AdmissionRejected, AppError};
use crate::handler::{handle_connection, reject};
use crate::server::ChatServer;
use crate::types::ClientId;

/// Connection counters
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    active: AtomicUsize,
    total: AtomicU64,
    rejected: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the server, logged as JSON
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub active_connections: usize,
    pub total_connections: u64,
    pub rejected_connections: u64,
    pub online_users: usize,
    pub active_rooms: usize,
}

/// Requests a running listener to stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutting down server...");
        }
        self.signal.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Removes a connection from the active set when its task ends, including
/// when the task is aborted
struct ActiveGuard {
    id: ClientId,
    active: Arc<DashMap<ClientId, SocketAddr>>,
    stats: Arc<ServerStats>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Listening endpoint plus everything needed to serve it
pub struct Listener {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    server: Arc<ChatServer>,
    admission: AdmissionController,
    stats: Arc<ServerStats>,
    active: Arc<DashMap<ClientId, SocketAddr>>,
    shutdown: ShutdownHandle,
    tasks: JoinSet<()>,
}

impl Listener {
    /// Bind the configured address
    pub async fn bind(config: ServerConfig, server: Arc<ChatServer>) -> Result<Self, AppError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })?;
        let (signal, _) = watch::channel(false);

        Ok(Self {
            listener,
            admission: AdmissionController::new(config.max_connections, &config.rate_limit),
            config: Arc::new(config),
            server,
            stats: Arc::new(ServerStats::new()),
            active: Arc::new(DashMap::new()),
            shutdown: ShutdownHandle {
                running: Arc::new(AtomicBool::new(true)),
                signal: Arc::new(signal),
            },
            tasks: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        snapshot(&self.stats, &self.server)
    }

    /// Run the accept loop until shutdown, then drain handlers
    ///
    /// Returns the final statistics.
    pub async fn run(mut self) -> StatsSnapshot {
        info!(
            "Server info: max connections {}, connection timeout {}s",
            self.config.max_connections,
            self.config.socket_timeout.as_secs()
        );

        while self.shutdown.is_running() {
            match timeout(self.config.accept_poll_interval, self.listener.accept()).await {
                // Periodic wake-up to observe the shutdown flag
                Err(_) => {}
                Ok(Ok((stream, peer))) => self.admit(stream, peer).await,
                Ok(Err(e)) => {
                    if self.shutdown.is_running() {
                        error!("Error accepting client connection: {}", e);
                    }
                }
            }
            while self.tasks.try_join_next().is_some() {}
        }

        self.drain().await;
        let stats = self.stats();
        info!("Server shutdown complete");
        stats
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(reason) = self.admission.check(self.stats.active()) {
            self.reject(stream, peer, reason).await;
            return;
        }

        let client_id = ClientId::new();
        self.active.insert(client_id, peer);
        self.stats.active.fetch_add(1, Ordering::SeqCst);
        self.stats.total.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard {
            id: client_id,
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };

        info!(
            "New client connected: {} (Active: {}, Total: {})",
            peer,
            self.stats.active(),
            self.stats.total()
        );

        let server = Arc::clone(&self.server);
        let config = Arc::clone(&self.config);
        let shutdown = self.shutdown.signal.subscribe();
        self.tasks.spawn(async move {
            let _guard = guard;
            if let Err(e) = handle_connection(stream, peer, client_id, server, config, shutdown).await {
                warn!("Connection {} ended: {}", client_id, e);
            }
        });
    }

    async fn reject(&self, stream: TcpStream, peer: SocketAddr, reason: AdmissionRejected) {
        self.stats.rejected.fetch_add(1, Ordering::SeqCst);
        warn!("Connection rejected: {} from {}", reason, peer);
        if let Err(e) = reject(stream, &reason.to_string(), self.config.socket_timeout).await {
            debug!("Error sending rejection to {}: {}", peer, e);
        }
    }

    /// Close every tracked connection and wait (bounded) for handlers
    async fn drain(&mut self) {
        // Make sure handlers see the signal even if the loop ended some other way.
        self.shutdown.signal.send_replace(true);

        let open = self.active.len();
        info!("Closing {} client connection(s)...", open);

        let tasks = &mut self.tasks;
        let drained = timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} handler(s) still running after {:?}, aborting",
                self.tasks.len(),
                self.config.shutdown_grace
            );
            self.tasks.shutdown().await;
        }
        info!("Closed {} client connection(s)", open);
    }
}

fn snapshot(stats: &ServerStats, server: &ChatServer) -> StatsSnapshot {
    StatsSnapshot {
        uptime_secs: stats.started_at.elapsed().as_secs(),
        active_connections: stats.active(),
        total_connections: stats.total(),
        rejected_connections: stats.rejected(),
        online_users: server.presence().count(),
        active_rooms: server.rooms().room_count(),
    }
}
