//! Room membership and broadcast
//!
//! A room exists in the registry exactly while it has members. Each
//! membership change and the roster broadcast it triggers run under the
//! room's map entry lock, so mutations on one room are serialized while
//! unrelated rooms proceed independently. The history snapshot a joiner
//! replays and the history record a chat line adds are taken under the same
//! lock. Fan-out only queues lines (`try_send`), so no lock is ever held
//! across an await.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::SendError;
use crate::message::{Line, ServerFrame};
use crate::types::ClientId;

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the line was queued for
    pub delivered: usize,
    /// Members whose queue was full or closed; removed from the room
    pub evicted: Vec<ClientId>,
}

/// A named room and its current members
#[derive(Debug, Default)]
pub struct Room {
    members: HashMap<ClientId, Client>,
}

impl Room {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains_key(&client_id)
    }

    /// Known member names, sorted
    pub fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .values()
            .filter_map(|c| c.username.clone())
            .collect();
        names.sort();
        names
    }

    fn roster_line(&self) -> Line {
        ServerFrame::Users(self.member_names()).to_line()
    }

    /// Deliver a line, then keep the roster current if anyone was evicted
    fn publish(&mut self, line: &Line, except: Option<ClientId>) -> BroadcastReport {
        let mut report = self.fan_out(line, except);
        let mut evicted = report.evicted.len();
        while evicted > 0 && !self.is_empty() {
            let roster = self.roster_line();
            let follow_up = self.fan_out(&roster, None);
            evicted = follow_up.evicted.len();
            report.evicted.extend(follow_up.evicted);
        }
        report
    }

    /// Queue a line for every member except `except`
    ///
    /// A member that cannot take the line is removed and its handler told to
    /// close; delivery to the rest continues regardless.
    fn fan_out(&mut self, line: &Line, except: Option<ClientId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for client in self.members.values() {
            if Some(client.id) == except {
                continue;
            }
            match client.try_deliver(line) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let reason = match e {
                        SendError::ChannelFull => "outbound queue full",
                        SendError::ChannelClosed => "connection gone",
                    };
                    warn!(
                        client_id = %client.id,
                        user = %client.display_name(),
                        reason,
                        "Send failed, removing member"
                    );
                    client.evict();
                    report.evicted.push(client.id);
                }
            }
        }
        for id in &report.evicted {
            self.members.remove(id);
        }
        report
    }
}

/// Room name → room
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, optionally announce it, then broadcast the roster
    ///
    /// Creates the room on first join. Returns the member count afterwards.
    pub fn join(&self, room: &str, client: Client, announce: Option<Line>) -> usize {
        self.join_with_replay(room, client, announce, Vec::<String>::new)
    }

    /// Queue `replay()` to the joiner, then add it as in [`join`](Self::join)
    ///
    /// `replay` runs under the room's lock, so every line recorded through
    /// [`broadcast_recorded`](Self::broadcast_recorded) reaches the joiner
    /// exactly once: in the replay or live. A joiner whose queue cannot take
    /// the replay is not added and is told to close.
    pub fn join_with_replay<I>(
        &self,
        room: &str,
        client: Client,
        announce: Option<Line>,
        replay: impl FnOnce() -> I,
    ) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut slot = match self.rooms.entry(room.to_string()) {
            Entry::Occupied(slot) => slot,
            Entry::Vacant(slot) => {
                debug!(room = %room, "Room created");
                slot.insert_entry(Room::default())
            }
        };

        let replayed = replay()
            .into_iter()
            .try_for_each(|line| client.try_deliver(&Line::from(line)));

        let room_state = slot.get_mut();
        match replayed {
            Ok(()) => {
                room_state.members.insert(client.id, client);
                if let Some(line) = announce {
                    room_state.publish(&line, None);
                }
                let roster = room_state.roster_line();
                room_state.publish(&roster, None);
            }
            Err(e) => {
                warn!(
                    client_id = %client.id,
                    room = %room,
                    "History replay failed ({}), not joining",
                    e
                );
                client.evict();
            }
        }

        let count = room_state.len();
        if count == 0 {
            slot.remove();
            debug!(room = %room, "Room deleted (empty)");
        }
        count
    }

    /// Remove a member; the remaining members get `announce` (if any) and the
    /// refreshed roster, or the room is deleted when it empties
    ///
    /// Returns the removed member, or None if it was not in the room.
    pub fn leave(&self, room: &str, client_id: ClientId, announce: Option<Line>) -> Option<Client> {
        let Entry::Occupied(mut slot) = self.rooms.entry(room.to_string()) else {
            return None;
        };

        let room_state = slot.get_mut();
        let removed = room_state.members.remove(&client_id)?;
        if !room_state.is_empty() {
            if let Some(line) = announce {
                room_state.publish(&line, None);
            }
            let roster = room_state.roster_line();
            room_state.publish(&roster, None);
        }

        if slot.get().is_empty() {
            slot.remove();
            debug!(room = %room, "Room deleted (empty)");
        }
        Some(removed)
    }

    /// Queue a line for every member of a room except `except`
    pub fn broadcast(&self, room: &str, line: &Line, except: Option<ClientId>) -> BroadcastReport {
        self.broadcast_recorded(room, line, except, || ()).0
    }

    /// Run `record`, then fan the line out, both under the room's lock
    ///
    /// `record` runs even when the room has no members.
    pub fn broadcast_recorded<R>(
        &self,
        room: &str,
        line: &Line,
        except: Option<ClientId>,
        record: impl FnOnce() -> R,
    ) -> (BroadcastReport, R) {
        let mut slot = match self.rooms.entry(room.to_string()) {
            Entry::Occupied(slot) => slot,
            Entry::Vacant(_slot) => return (BroadcastReport::default(), record()),
        };

        let recorded = record();
        let report = slot.get_mut().publish(line, except);
        if slot.get().is_empty() {
            slot.remove();
            debug!(room = %room, "Room deleted (empty)");
        }
        if !report.evicted.is_empty() {
            warn!(
                room = %room,
                evicted = report.evicted.len(),
                delivered = report.delivered,
                "Partial broadcast failure"
            );
        }
        (report, recorded)
    }

    /// Snapshot of a room's member names, sorted
    pub fn member_names(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|r| r.member_names())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|r| r.len()).unwrap_or(0)
    }

    pub fn contains(&self, room: &str, client_id: ClientId) -> bool {
        self.rooms
            .get(room)
            .map(|r| r.contains(client_id))
            .unwrap_or(false)
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Names of all live rooms, sorted
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
