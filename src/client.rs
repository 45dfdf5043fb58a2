//! Client handle and per-connection state
//!
//! `Client` is the cheap, cloneable view of a connection that the room
//! registry stores. `Connection` is the state owned by the connection's
//! handler task.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::message::Line;
use crate::types::{ClientId, ConnectionState};

/// Room member entry
///
/// Holds the connection's ID, the username it joined with, the sending
/// half of its outbound queue and the signal that ends its handler.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Username (None if the room was entered by a bare chat frame)
    pub username: Option<String>,
    /// Server → Client line queue
    pub sender: mpsc::Sender<Line>,
    evicted: Arc<Notify>,
}

impl Client {
    pub fn new(id: ClientId, username: Option<String>, sender: mpsc::Sender<Line>) -> Self {
        Self {
            id,
            username,
            sender,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Queue a line without waiting
    ///
    /// Used for fan-out, where one slow reader must not hold up the rest.
    pub fn try_deliver(&self, line: &Line) -> Result<(), SendError> {
        self.sender.try_send(line.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Tell the owning handler this connection was dropped from its room
    ///
    /// The permit is stored if the handler is not waiting yet.
    pub fn evict(&self) {
        self.evicted.notify_one();
    }

    /// Get the display name for this client
    ///
    /// Returns the username if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }
}

/// Per-connection protocol state, owned by its handler
#[derive(Debug)]
pub struct Connection {
    pub id: ClientId,
    pub username: Option<String>,
    pub room: Option<String>,
    pub state: ConnectionState,
    sender: mpsc::Sender<Line>,
    evicted: Arc<Notify>,
}

impl Connection {
    pub fn new(id: ClientId, sender: mpsc::Sender<Line>) -> Self {
        Self {
            id,
            username: None,
            room: None,
            state: ConnectionState::Connected,
            sender,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// The registry-side handle for this connection
    pub fn client(&self) -> Client {
        Client {
            id: self.id,
            username: self.username.clone(),
            sender: self.sender.clone(),
            evicted: Arc::clone(&self.evicted),
        }
    }

    /// Signal raised when a room drops this connection after a failed delivery
    pub fn eviction(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }

    /// Send a line to this connection only, waiting for queue space
    pub async fn send(&self, line: Line) -> Result<(), SendError> {
        self.sender
            .send(line)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_in(&self, room: &str) -> bool {
        self.room.as_deref() == Some(room)
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }
}
