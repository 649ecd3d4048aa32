//! Outcome of a sweep or a watch session.
//!
//! A [`Report`] lists every file that was moved (or, in a dry run, would have been) and
//! every file that could not be moved. Per-file failures never abort a run; they end up
//! here for the caller to render.

use crate::file_organizer::MoveError;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

/// How the organizer was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One sweep, then exit.
    Once,
    /// Initial sweep followed by watching.
    Watch,
}

/// A single relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    /// Where the file was found.
    pub source: PathBuf,
    /// Where it ended up, after collision suffixes.
    pub destination: PathBuf,
    /// Bucket the file was classified into.
    pub bucket: String,
}

/// A file that could not be moved.
#[derive(Debug, Serialize)]
pub struct MoveFailure {
    pub source: PathBuf,
    #[serde(serialize_with = "serialize_display")]
    pub error: MoveError,
}

fn serialize_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Result of `run_once`, a sweep, or a watch session.
#[derive(Debug, Serialize)]
pub struct Report {
    pub mode: RunMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub moved: Vec<MoveRecord>,
    pub failures: Vec<MoveFailure>,
}

impl Report {
    /// Starts an empty report, stamped with the current time.
    pub fn new(mode: RunMode, dry_run: bool) -> Self {
        Self {
            mode,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            moved: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Number of files moved (or planned, for dry runs).
    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }

    /// True if no file failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_move(&mut self, record: MoveRecord) {
        self.moved.push(record);
    }

    pub fn record_failure(&mut self, source: PathBuf, error: MoveError) {
        self.failures.push(MoveFailure { source, error });
    }

    /// Appends the entries of another report (e.g. one sweep of a watch session).
    pub fn absorb(&mut self, other: Report) {
        self.moved.extend(other.moved);
        self.failures.extend(other.failures);
    }

    /// Stamps the finish time.
    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Moved files per bucket, sorted by bucket name.
    pub fn bucket_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.moved {
            *counts.entry(record.bucket.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
