//! Settle tracking for files that may still be written to.
//!
//! A file is only handed over for organizing once its size and modification time have
//! stayed the same for at least the settle delay. Every decision re-stats the file
//! through a caller-supplied probe, and a file that vanished is simply dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// The parts of a file's metadata that change while it is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Tracking state for one not-yet-settled file.
#[derive(Debug, Clone)]
pub struct DebounceEntry {
    pub snapshot: FileSnapshot,
    pub first_seen: Instant,
    pub last_change: Instant,
}

/// What an observation revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Changed,
    Unchanged,
}

/// Pending files keyed by path.
#[derive(Debug, Default)]
pub struct DebounceTable {
    entries: HashMap<PathBuf, DebounceEntry>,
}

impl DebounceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation of `path`. A changed snapshot restarts the quiet period.
    pub fn observe(&mut self, path: &Path, snapshot: FileSnapshot, now: Instant) -> Observation {
        match self.entries.get_mut(path) {
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    DebounceEntry {
                        snapshot,
                        first_seen: now,
                        last_change: now,
                    },
                );
                Observation::New
            }
            Some(entry) if entry.snapshot != snapshot => {
                entry.snapshot = snapshot;
                entry.last_change = now;
                Observation::Changed
            }
            Some(_) => Observation::Unchanged,
        }
    }

    /// Drops `path`, returning whether it was pending.
    pub fn forget(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &Path) -> Option<&DebounceEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is waiting to settle.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-checks every pending file and removes and returns those that have been
    /// unchanged for at least `settle_delay`, sorted by path.
    ///
    /// `probe` returns the current snapshot of a path, or `None` if it is gone (or no
    /// longer eligible); such entries are dropped without being returned.
    pub fn take_settled<F>(&mut self, now: Instant, settle_delay: Duration, mut probe: F) -> Vec<PathBuf>
    where
        F: FnMut(&Path) -> Option<FileSnapshot>,
    {
        let mut pending: Vec<PathBuf> = self.entries.keys().cloned().collect();
        pending.sort();

        let mut settled = Vec::new();
        for path in pending {
            let Some(snapshot) = probe(&path) else {
                self.entries.remove(&path);
                continue;
            };

            if self.observe(&path, snapshot, now) != Observation::Unchanged {
                continue;
            }

            let quiet_for = self
                .entries
                .get(&path)
                .map(|entry| now.saturating_duration_since(entry.last_change))
                .unwrap_or_default();
            if quiet_for >= settle_delay {
                self.entries.remove(&path);
                settled.push(path);
            }
        }
        settled
    }
}
