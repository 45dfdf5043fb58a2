//! Presence directory: username → current room
//!
//! Trusts client-asserted usernames. The last join or room change for a name
//! overwrites whatever was there.

use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PresenceDirectory {
    users: DashMap<String, String>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `username` is now in `room`
    pub fn set_room(&self, username: &str, room: &str) {
        if username.trim().is_empty() || room.trim().is_empty() {
            return;
        }
        self.users.insert(username.to_string(), room.to_string());
        debug!(user = %username, room = %room, "Presence updated");
    }

    /// Forget a user; returns the room they were last seen in
    pub fn remove(&self, username: &str) -> Option<String> {
        self.users.remove(username).map(|(_, room)| room)
    }

    pub fn room_of(&self, username: &str) -> Option<String> {
        self.users.get(username).map(|room| room.value().clone())
    }

    /// All online usernames, sorted
    pub fn online_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Users whose current room is `room`, sorted
    pub fn users_in_room(&self, room: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .users
            .iter()
            .filter(|e| e.value() == room)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_query() {
        let presence = PresenceDirectory::new();
        presence.set_room("alice", "Sun Squad");
        presence.set_room("bob", "Sun Squad");
        presence.set_room("carol", "lobby");

        assert_eq!(presence.count(), 3);
        assert_eq!(presence.room_of("alice").as_deref(), Some("Sun Squad"));
        assert_eq!(presence.online_users(), vec!["alice", "bob", "carol"]);
        assert_eq!(presence.users_in_room("Sun Squad"), vec!["alice", "bob"]);
        assert!(presence.users_in_room("empty").is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let presence = PresenceDirectory::new();
        presence.set_room("alice", "lobby");
        presence.set_room("alice", "Night Owls");

        assert_eq!(presence.count(), 1);
        assert_eq!(presence.room_of("alice").as_deref(), Some("Night Owls"));
    }

    #[test]
    fn test_remove() {
        let presence = PresenceDirectory::new();
        presence.set_room("alice", "lobby");

        assert_eq!(presence.remove("alice").as_deref(), Some("lobby"));
        assert_eq!(presence.remove("alice"), None);
        assert_eq!(presence.count(), 0);
    }

    #[test]
    fn test_blank_entries_ignored() {
        let presence = PresenceDirectory::new();
        presence.set_room("  ", "lobby");
        presence.set_room("alice", "");
        assert_eq!(presence.count(), 0);
    }
}
