//! Line protocol definitions
//!
//! UTF-8 text, one frame per line. Client frames are parsed into
//! `ClientFrame`; server-generated frames are rendered from `ServerFrame`.
//! Chat frames are never re-rendered: the received line is relayed as is.

use std::fmt;
use std::sync::Arc;

use crate::error::ProtocolError;

/// One outbound line, shared between every recipient of a broadcast
pub type Line = Arc<str>;

const JOIN_ROOM: &str = "[JOIN_ROOM]";
const ROOM_CHANGE: &str = "[ROOM_CHANGE]";
const TYPING: &str = "[TYPING]";
const GET_USERS: &str = "[GET_USERS]";
const DISCONNECT: &str = "[DISCONNECT]";
const USERS: &str = "[USERS]";
const ERROR: &str = "[ERROR]";
const PING: &str = "PING";

/// Client → Server frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `[JOIN_ROOM] <user> <room>`
    JoinRoom { username: String, room: String },
    /// `[ROOM_CHANGE] <user> <room>`
    RoomChange { username: String, room: String },
    /// `[TYPING] <payload>`, relayed verbatim
    Typing { line: String },
    /// `[GET_USERS]`
    GetUsers,
    /// `[DISCONNECT]`
    Disconnect,
    /// `PING` heartbeat
    Ping,
    /// `[<room>] <sender>: <text>`, relayed and persisted verbatim
    Chat {
        room: String,
        sender: String,
        line: String,
    },
}

impl ClientFrame {
    /// Parse one received line
    ///
    /// Surrounding whitespace is trimmed first; the trimmed text is what a
    /// chat or typing frame carries forward.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let line = raw.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if line == PING {
            return Ok(ClientFrame::Ping);
        }
        if line.starts_with(DISCONNECT) {
            return Ok(ClientFrame::Disconnect);
        }
        if line == GET_USERS {
            return Ok(ClientFrame::GetUsers);
        }
        if let Some(rest) = tagged(line, JOIN_ROOM) {
            let (username, room) = user_and_room(rest, "JOIN_ROOM")?;
            return Ok(ClientFrame::JoinRoom { username, room });
        }
        if let Some(rest) = tagged(line, ROOM_CHANGE) {
            let (username, room) = user_and_room(rest, "ROOM_CHANGE")?;
            return Ok(ClientFrame::RoomChange { username, room });
        }
        if tagged(line, TYPING).is_some() {
            return Ok(ClientFrame::Typing {
                line: line.to_string(),
            });
        }
        if tagged(line, USERS).is_some() || tagged(line, ERROR).is_some() {
            return Err(ProtocolError::Unrecognized(line.to_string()));
        }
        parse_chat(line)
    }
}

/// Strip the `\n` or `\r\n` terminator from one received line and decode it
pub fn decode_line(raw: &[u8]) -> Result<&str, ProtocolError> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|e| ProtocolError::InvalidUtf8(e.valid_up_to()))
}

/// Strip a command tag that must be followed by whitespace or end of line
fn tagged<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(tag)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Split `<user> <room...>`; the room keeps any inner spaces
fn user_and_room(rest: &str, tag: &'static str) -> Result<(String, String), ProtocolError> {
    let (username, room) = rest
        .split_once(char::is_whitespace)
        .ok_or(ProtocolError::MissingArguments(tag))?;
    let room = room.trim();
    if username.is_empty() || room.is_empty() {
        return Err(ProtocolError::MissingArguments(tag));
    }
    Ok((username.to_string(), room.to_string()))
}

fn parse_chat(line: &str) -> Result<ClientFrame, ProtocolError> {
    let body = line
        .strip_prefix('[')
        .ok_or_else(|| ProtocolError::Unrecognized(line.to_string()))?;
    let (room, content) = body
        .split_once(']')
        .ok_or_else(|| ProtocolError::Unrecognized(line.to_string()))?;
    let room = room.trim();
    if room.is_empty() {
        return Err(ProtocolError::EmptyRoom);
    }
    let sender = content
        .split_once(':')
        .map(|(sender, _)| sender.trim())
        .filter(|sender| !sender.is_empty())
        .ok_or_else(|| ProtocolError::MissingSender(line.to_string()))?;

    Ok(ClientFrame::Chat {
        room: room.to_string(),
        sender: sender.to_string(),
        line: line.to_string(),
    })
}

/// Server → Client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Membership snapshot, names in the order given
    Users(Vec<String>),
    /// Admission rejection
    Error(String),
    /// A member left the room after a room change
    Left { room: String, username: String },
    /// A member arrived after a room change
    Joined { room: String, username: String },
}

impl ServerFrame {
    /// Render once into a shareable line
    pub fn to_line(&self) -> Line {
        Arc::from(self.to_string())
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Users(names) => {
                f.write_str(USERS)?;
                for name in names {
                    write!(f, " {}", name)?;
                }
                Ok(())
            }
            ServerFrame::Error(reason) => write!(f, "{} {}", ERROR, reason),
            ServerFrame::Left { room, username } => {
                write!(f, "[{}] {} has left the room", room, username)
            }
            ServerFrame::Joined { room, username } => {
                write!(f, "[{}] {} has joined the room", room, username)
            }
        }
    }
}
