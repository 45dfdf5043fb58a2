//! ChatServer service
//!
//! Owns the room registry, presence directory and history store, and
//! implements every protocol transition against a handler-owned
//! `Connection`. One instance is shared by all handlers through an `Arc`;
//! it holds no global lock, all shared state is sharded per room or per user.

use tracing::{debug, info, warn};

use crate::client::Connection;
use crate::config::HistoryConfig;
use crate::history::HistoryStore;
use crate::message::{ClientFrame, Line, ServerFrame};
use crate::presence::PresenceDirectory;
use crate::room::RoomRegistry;
use crate::types::ConnectionState;

/// Shared chat state and the operations handlers perform on it
#[derive(Debug)]
pub struct ChatServer {
    rooms: RoomRegistry,
    presence: PresenceDirectory,
    history: HistoryStore,
    replay_limit: usize,
}

impl ChatServer {
    /// Create a server over an already opened history store
    pub fn new(history: HistoryStore, replay_limit: usize) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            presence: PresenceDirectory::new(),
            history,
            replay_limit,
        }
    }

    /// Open the history directory and create a server over it
    pub fn open(config: &HistoryConfig) -> Self {
        Self::new(HistoryStore::open(config), config.replay_limit)
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Process a single parsed frame
    ///
    /// `Disconnect` is handled by the caller, which owns the socket.
    pub async fn handle_frame(&self, conn: &mut Connection, frame: ClientFrame) {
        match frame {
            ClientFrame::JoinRoom { username, room } => {
                self.join_room(conn, username, room);
            }
            ClientFrame::RoomChange { username, room } => {
                self.change_room(conn, username, room);
            }
            ClientFrame::Chat { room, line, .. } => {
                self.post_chat(conn, room, line).await;
            }
            ClientFrame::Typing { line } => {
                self.typing(conn, line);
            }
            ClientFrame::GetUsers => {
                self.send_users(conn).await;
            }
            ClientFrame::Ping => {
                debug!(client_id = %conn.id, "Heartbeat");
            }
            ClientFrame::Disconnect => {
                self.disconnect(conn);
            }
        }
    }

    /// Handle `[JOIN_ROOM] <user> <room>`
    pub fn join_room(&self, conn: &mut Connection, username: String, room: String) {
        if !conn.is_connected() {
            return;
        }
        self.set_username(conn, username);
        self.enter_room(conn, room);
    }

    /// Handle `[ROOM_CHANGE] <user> <room>`
    ///
    /// The old room's remaining members get a leave notice and the refreshed
    /// roster; the new room gets a join notice and its roster. No history
    /// replay.
    pub fn change_room(&self, conn: &mut Connection, username: String, room: String) {
        if !conn.is_connected() {
            return;
        }
        self.set_username(conn, username.clone());

        if let Some(old_room) = conn.room.take() {
            info!(user = %username, from = %old_room, to = %room, "Room change");
            let notice = ServerFrame::Left {
                room: old_room.clone(),
                username: username.clone(),
            }
            .to_line();
            self.rooms.leave(&old_room, conn.id, Some(notice));
        }

        let notice = ServerFrame::Joined {
            room: room.clone(),
            username: username.clone(),
        }
        .to_line();
        self.rooms.join(&room, conn.client(), Some(notice));
        self.presence.set_room(&username, &room);
        conn.room = Some(room);
        conn.state = ConnectionState::InRoom;
    }

    /// Handle `[<room>] <sender>: <text>`
    ///
    /// Joins the bracketed room first when it differs from the current one,
    /// then records and relays the line verbatim to every member, sender
    /// included. Recording and relaying happen under the room's lock; only
    /// the file rewrite runs after it is released.
    pub async fn post_chat(&self, conn: &mut Connection, room: String, line: String) {
        if !conn.is_connected() {
            return;
        }
        if !conn.is_in(&room) {
            self.enter_room(conn, room.clone());
        }

        let line: Line = line.into();
        let (report, pending) = self
            .rooms
            .broadcast_recorded(&room, &line, None, || self.history.record(&room, &line));
        debug!(
            room = %room,
            delivered = report.delivered,
            "Chat message relayed"
        );

        if let Err(e) = self.history.persist(pending).await {
            warn!("Failed to persist message: {}", e);
        }
    }

    /// Handle `[TYPING] ...`: relay to the other members, never persisted
    pub fn typing(&self, conn: &Connection, line: String) {
        let Some(room) = conn.room.as_deref() else {
            debug!(client_id = %conn.id, "Typing outside a room ignored");
            return;
        };
        let line: Line = line.into();
        self.rooms.broadcast(room, &line, Some(conn.id));
    }

    /// Handle `[GET_USERS]`: reply to this connection only
    pub async fn send_users(&self, conn: &Connection) {
        let names = match conn.room.as_deref() {
            Some(room) => self.rooms.member_names(room),
            None => Vec::new(),
        };
        if conn.send(ServerFrame::Users(names).to_line()).await.is_err() {
            debug!(client_id = %conn.id, "User list reply dropped, connection closing");
        }
    }

    /// Tear down a connection's room membership and presence
    ///
    /// Idempotent: only the first call after the connection went live has
    /// any effect. Releasing the socket itself is left to the owner of the
    /// stream.
    pub fn disconnect(&self, conn: &mut Connection) {
        if !conn.is_connected() {
            return;
        }
        conn.state = ConnectionState::Disconnected;

        if let Some(room) = conn.room.take() {
            self.rooms.leave(&room, conn.id, None);
        }
        if let Some(username) = conn.username.as_deref() {
            if let Some(room) = self.presence.remove(username) {
                info!(user = %username, room = %room, "User left");
            }
        }
        debug!(client_id = %conn.id, "Cleanup completed for {}", conn.display_name());
    }

    /// Adopt a username, dropping the presence entry of the previous one
    fn set_username(&self, conn: &mut Connection, username: String) {
        if let Some(previous) = conn.username.as_deref() {
            if previous != username && self.presence.remove(previous).is_some() {
                debug!(from = %previous, to = %username, "Username changed");
            }
        }
        conn.username = Some(username);
    }

    /// Leave the current room (if any), replay history, join `room`
    ///
    /// The history snapshot is taken and queued under the room's lock, ahead
    /// of the membership insert, so replay precedes live traffic and no
    /// recorded line is missed or repeated.
    fn enter_room(&self, conn: &mut Connection, room: String) {
        if !conn.is_connected() {
            return;
        }
        if let Some(old_room) = conn.room.take() {
            self.rooms.leave(&old_room, conn.id, None);
        }

        let members = self.rooms.join_with_replay(&room, conn.client(), None, || {
            self.history.recent(&room, self.replay_limit)
        });
        if let Some(username) = conn.username.as_deref() {
            self.presence.set_room(username, &room);
        }
        info!(
            user = %conn.display_name(),
            room = %room,
            members,
            "Joined room"
        );
        conn.room = Some(room);
        conn.state = ConnectionState::InRoom;
    }
}
