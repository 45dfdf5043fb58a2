//! Error types for the chat server
//!
//! Defines application-level errors plus the narrower errors raised by
//! admission, frame parsing, history persistence and outbound queues.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level errors
///
/// Only `Bind` is fatal to the process. Everything else is scoped to one
/// connection or one operation and is logged where it happens.
#[derive(Debug, Error)]
pub enum AppError {
    /// Listening socket could not be bound (fatal at startup)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accept/read/write failure on a connection
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// No frame arrived within the socket timeout
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Connection turned away at the door
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionRejected),

    /// Unparseable frame
    #[error("Malformed frame: {0}")]
    Protocol(#[from] ProtocolError),

    /// History file read/write failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] HistoryError),
}

/// Reasons a new connection is refused
///
/// The `Display` text is the reason sent to the client in `[ERROR] <reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    /// Active connection count reached the configured cap
    #[error("Server at capacity")]
    AtCapacity,
    /// Too many admissions inside the sliding window
    #[error("Connection rate limit exceeded")]
    RateLimited,
}

/// Frame parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Blank line
    #[error("empty frame")]
    Empty,

    /// Frame does not match any known shape
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),

    /// Command tag present but arguments missing
    #[error("{0} requires <user> <room>")]
    MissingArguments(&'static str),

    /// Room name is empty
    #[error("empty room name")]
    EmptyRoom,

    /// Bracketed frame whose body is not `<sender>: <text>`
    #[error("chat frame without sender: {0}")]
    MissingSender(String),

    /// Line bytes are not valid UTF-8
    #[error("frame is not valid UTF-8 (bad byte at offset {0})")]
    InvalidUtf8(usize),
}

/// History persistence errors
#[derive(Debug, Error)]
#[error("history for room '{room}' at {}: {source}", .path.display())]
pub struct HistoryError {
    pub room: String,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Message send errors
///
/// Occurs when attempting to queue a line for a connection's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
    /// The outbound queue is full (slow reader)
    #[error("Channel full")]
    ChannelFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_reasons_match_wire_text() {
        assert_eq!(AdmissionRejected::AtCapacity.to_string(), "Server at capacity");
        assert_eq!(
            AdmissionRejected::RateLimited.to_string(),
            "Connection rate limit exceeded"
        );
    }

    #[test]
    fn test_history_error_mentions_room() {
        let err = HistoryError {
            room: "lobby".to_string(),
            path: PathBuf::from("chat_history/lobby.log"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = AppError::from(err).to_string();
        assert!(text.contains("lobby"));
        assert!(text.contains("denied"));
    }
}
