//! Multi-room TCP Chat Server Library
//!
//! A line-oriented chat server built on tokio. Clients connect over plain
//! TCP, join named rooms, exchange chat lines, and receive room rosters and
//! recent history on join.
//!
//! # Features
//! - Connection admission: capacity cap plus sliding-window rate limit
//! - Named rooms, created on first join and removed when empty
//! - Chat relay to every room member, verbatim
//! - Per-room history capped at 1000 lines, mirrored to disk, last 100 replayed on join
//! - Typing indicators, room changes, roster queries
//! - Read/write timeouts, `PING` heartbeat
//! - Graceful shutdown with a bounded drain
//!
//! # Architecture
//! - `ChatServer` owns the room registry, presence directory and history
//!   store; handlers share it through an `Arc`
//! - Rooms and presence live in sharded `DashMap`s, so operations on
//!   different rooms never contend on one global lock
//! - Each connection has a read loop and a writer task fed by a bounded
//!   `mpsc` queue; broadcast only enqueues
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use multiroom_chat::{ChatServer, Listener, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Arc::new(ChatServer::open(&config.history));
//!     let listener = Listener::bind(config, server).await?;
//!
//!     let shutdown = listener.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.trigger();
//!     });
//!
//!     listener.run().await;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod history;
pub mod listener;
pub mod message;
pub mod presence;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use admission::{AdmissionController, RateLimiter};
pub use client::{Client, Connection};
pub use config::{HistoryConfig, RateLimitConfig, ServerConfig};
pub use error::{AdmissionRejected, AppError, HistoryError, ProtocolError, SendError};
pub use handler::handle_connection;
pub use history::{HistoryStore, PendingWrite};
pub use listener::{Listener, ShutdownHandle, StatsSnapshot};
pub use message::{ClientFrame, Line, ServerFrame};
pub use presence::PresenceDirectory;
pub use room::{BroadcastReport, Room, RoomRegistry};
pub use server::ChatServer;
pub use types::{ClientId, ConnectionState};
