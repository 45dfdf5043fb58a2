//! Server configuration
//!
//! Defaults mirror the production constants; the binary only overrides the
//! port, tests override whatever they need.

use std::path::PathBuf;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8888;

/// Top-level server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum simultaneously active connections
    pub max_connections: usize,
    pub rate_limit: RateLimitConfig,
    /// Read and write timeout applied to every admitted socket
    pub socket_timeout: Duration,
    /// How often the accept loop wakes up to observe shutdown
    pub accept_poll_interval: Duration,
    /// How long running handlers get to exit after shutdown is requested
    pub shutdown_grace: Duration,
    /// Per-connection outbound queue depth
    pub outbound_buffer: usize,
    pub history: HistoryConfig,
}

/// Sliding-window admission limit
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_admissions: usize,
    pub window: Duration,
}

/// History store settings
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub dir: PathBuf,
    /// Entries kept per room before the oldest is evicted
    pub max_entries: usize,
    /// Entries replayed to a newly joined connection
    pub replay_limit: usize,
}

impl ServerConfig {
    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 1000,
            rate_limit: RateLimitConfig::default(),
            socket_timeout: Duration::from_secs(30),
            accept_poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            outbound_buffer: 256,
            history: HistoryConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_admissions: 10,
            window: Duration::from_millis(1000),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("chat_history"),
            max_entries: 1000,
            replay_limit: 100,
        }
    }
}
