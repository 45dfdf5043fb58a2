//! Per-room message history
//!
//! Each room keeps a capped, ordered list of raw chat lines in memory and
//! mirrors it to `<dir>/<sanitized room>.log`. Every append rewrites the
//! room's file with the full current list. The in-memory list stays
//! authoritative when a write fails.
//!
//! Appending is split in two: [`HistoryStore::record`] updates memory
//! synchronously and captures the file contents, [`HistoryStore::persist`]
//! writes them. Captures carry a revision number and a stale capture never
//! overwrites a newer one, so the file ends up matching memory whatever
//! order concurrent writers finish in.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::error::HistoryError;

const FILE_EXTENSION: &str = "log";

#[derive(Debug, Default)]
struct Entries {
    lines: VecDeque<String>,
    revision: u64,
}

/// One room's lines plus the revision last written to disk
#[derive(Debug, Default)]
struct RoomLog {
    entries: Mutex<Entries>,
    written: tokio::sync::Mutex<u64>,
}

/// File contents captured by [`HistoryStore::record`], waiting to be written
#[derive(Debug)]
pub struct PendingWrite {
    room: String,
    revision: u64,
    contents: String,
    log: Arc<RoomLog>,
}

/// Bounded, persisted history for every room
///
/// Rooms are keyed by their sanitized file stem so that logs loaded from disk
/// line up with the names clients join with.
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    max_entries: usize,
    rooms: DashMap<String, Arc<RoomLog>>,
}

impl HistoryStore {
    /// Open the history directory, creating it if needed, and load every
    /// mirrored room log
    ///
    /// Failures are logged; the store still works in memory.
    pub fn open(config: &HistoryConfig) -> Self {
        let store = Self {
            dir: config.dir.clone(),
            max_entries: config.max_entries,
            rooms: DashMap::new(),
        };

        if let Err(e) = std::fs::create_dir_all(&store.dir) {
            warn!(
                "Failed to create history directory {}: {}",
                store.dir.display(),
                e
            );
            return store;
        }

        match store.load_all() {
            Ok(count) => info!(
                "Loaded history for {} room(s) from {}",
                count,
                store.dir.display()
            ),
            Err(e) => warn!("Failed to scan history directory: {}", e),
        }
        store
    }

    /// Append a raw line to a room's history and rewrite its file
    pub async fn append(&self, room: &str, line: &str) -> Result<(), HistoryError> {
        let pending = self.record(room, line);
        self.persist(pending).await
    }

    /// Append a raw line in memory, evicting the oldest entries while over
    /// the cap, and capture the file contents for [`persist`](Self::persist)
    pub fn record(&self, room: &str, line: &str) -> PendingWrite {
        let log = self.room_log(room);
        let (revision, contents) = {
            let mut entries = log.entries.lock();
            entries.lines.push_back(line.to_string());
            while entries.lines.len() > self.max_entries {
                entries.lines.pop_front();
            }
            entries.revision += 1;

            let mut contents = String::new();
            for entry in entries.lines.iter() {
                contents.push_str(entry);
                contents.push('\n');
            }
            (entries.revision, contents)
        };

        PendingWrite {
            room: room.to_string(),
            revision,
            contents,
            log,
        }
    }

    /// Rewrite a room's file with captured contents
    ///
    /// Skipped when a later capture of the same room already reached disk.
    pub async fn persist(&self, pending: PendingWrite) -> Result<(), HistoryError> {
        let mut written = pending.log.written.lock().await;
        if *written >= pending.revision {
            debug!(room = %pending.room, "Newer history already on disk");
            return Ok(());
        }
        self.write_file(&pending.room, pending.contents).await?;
        *written = pending.revision;
        Ok(())
    }

    /// The most recent `limit` entries of a room, oldest first
    pub fn recent(&self, room: &str, limit: usize) -> Vec<String> {
        let Some(log) = self.existing(room) else {
            return Vec::new();
        };
        let entries = log.entries.lock();
        let skip = entries.lines.len().saturating_sub(limit);
        entries.lines.iter().skip(skip).cloned().collect()
    }

    /// Number of entries currently held for a room
    pub fn len(&self, room: &str) -> usize {
        match self.existing(room) {
            Some(log) => log.entries.lock().lines.len(),
            None => 0,
        }
    }

    /// Number of rooms with any history
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Path of the mirror file for a room
    pub fn file_path(&self, room: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_room_name(room), FILE_EXTENSION))
    }

    fn existing(&self, room: &str) -> Option<Arc<RoomLog>> {
        self.rooms
            .get(&sanitize_room_name(room))
            .map(|log| Arc::clone(log.value()))
    }

    fn room_log(&self, room: &str) -> Arc<RoomLog> {
        // Clone the Arc out so the shard lock is released before the room lock is taken.
        Arc::clone(
            self.rooms
                .entry(sanitize_room_name(room))
                .or_default()
                .value(),
        )
    }

    async fn write_file(&self, room: &str, contents: String) -> Result<(), HistoryError> {
        let path = self.file_path(room);
        let tmp = path.with_extension("log.tmp");
        let to_error = |source: std::io::Error| HistoryError {
            room: room.to_string(),
            path: path.clone(),
            source,
        };

        tokio::fs::write(&tmp, contents).await.map_err(to_error)?;
        tokio::fs::rename(&tmp, &path).await.map_err(to_error)?;
        debug!("Rewrote history file {}", path.display());
        Ok(())
    }

    fn load_all(&self) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match read_log(&path) {
                Ok(entries) if entries.is_empty() => {}
                Ok(mut entries) => {
                    while entries.len() > self.max_entries {
                        entries.pop_front();
                    }
                    let log = RoomLog {
                        entries: Mutex::new(Entries {
                            lines: entries,
                            revision: 0,
                        }),
                        written: tokio::sync::Mutex::new(0),
                    };
                    self.rooms.insert(stem.to_string(), Arc::new(log));
                    loaded += 1;
                }
                Err(e) => warn!("Failed to load history from {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }
}

/// Non-blank lines of a log file, in order
fn read_log(path: &Path) -> std::io::Result<VecDeque<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Replace every run of characters outside `[A-Za-z0-9.-]` with `_`
pub fn sanitize_room_name(room: &str) -> String {
    let mut out = String::with_capacity(room.len());
    let mut in_run = false;
    for c in room.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}
