//! Basic type definitions for the chat server
//!
//! Provides:
//! - `ClientId`: UUID-based unique connection identifier
//! - `ConnectionState`: lifecycle of a single accepted socket

use uuid::Uuid;

/// Unique client identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe connection identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness state of a connection
///
/// `Disconnected` is terminal: once reached, cleanup has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet in a room
    Connected,
    /// Member of exactly one room
    InRoom,
    /// Torn down
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self != ConnectionState::Disconnected
    }
}
