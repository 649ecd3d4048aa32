//! One pass over the watched directory.
//!
//! The sweeper lists the direct entries of the watched directory, keeps the files that
//! may be organized, classifies each one and hands it to [`FileOrganizer`]. A file that
//! fails to move is recorded in the [`Report`] and the pass carries on with the rest.

use crate::config::Config;
use crate::file_category::{Classifier, extension_of};
use crate::file_organizer::{FileOrganizer, MoveError};
use crate::report::{MoveRecord, Report, RunMode};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure to enumerate the watched directory itself. Fatal for the run.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("cannot list {}: {source}", path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A file found directly inside the watched directory during one enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub name: String,
    pub extension: Option<String>,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Classifies and moves the files of one directory.
#[derive(Debug, Clone)]
pub struct Sweeper {
    config: Config,
    classifier: Classifier,
}

impl Sweeper {
    pub fn new(config: Config) -> Self {
        let classifier = config.classifier();
        Self { config, classifier }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one full pass: every eligible file present right now is organized. No
    /// settle wait happens here.
    ///
    /// # Errors
    ///
    /// Only a failure to list the watched directory is returned as an error. Per-file
    /// problems are collected in the report.
    pub fn sweep(&self) -> Result<Report, SweepError> {
        let mut report = Report::new(RunMode::Once, self.config.dry_run);

        for candidate in self.candidates(&mut report)? {
            self.organize_into(&candidate, &mut report);
        }

        debug!(
            moved = report.moved_count(),
            failed = report.failures.len(),
            "sweep finished"
        );
        Ok(report)
    }

    /// Lists eligible files, sorted by name. Entries that cannot be inspected are
    /// recorded as failures in `report` and skipped.
    pub fn candidates(&self, report: &mut Report) -> Result<Vec<CandidateFile>, SweepError> {
        let watched_dir = &self.config.watched_dir;
        let entries = fs::read_dir(watched_dir).map_err(|source| SweepError::ListDirectory {
            path: watched_dir.clone(),
            source,
        })?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %watched_dir.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let path = entry.path();
            match self.inspect(&path) {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "cannot inspect file");
                    report.record_failure(path, error);
                }
            }
        }

        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }

    /// Stats `path` and decides whether it is an organizable file.
    ///
    /// Returns `Ok(None)` for paths that vanished, live outside the watched directory,
    /// are directories (or symlinks to them), or are filtered out by name.
    pub fn inspect(&self, path: &Path) -> Result<Option<CandidateFile>, MoveError> {
        if path.parent() != Some(self.config.watched_dir.as_path()) {
            return Ok(None);
        }

        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(None);
        };
        if !self.config.should_include(&name) {
            return Ok(None);
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(MoveError::Access {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(CandidateFile {
            path: path.to_path_buf(),
            extension: extension_of(&name),
            name,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }))
    }

    /// Organizes a single path, re-checking that it is still an eligible file.
    ///
    /// Returns `None` when there was nothing to do (vanished, filtered out, not a file).
    pub fn process_file(&self, path: &Path) -> Option<Result<MoveRecord, MoveError>> {
        match self.inspect(path) {
            Ok(Some(candidate)) => Some(self.organize(&candidate)),
            Ok(None) => None,
            Err(error) => Some(Err(error)),
        }
    }

    /// Classifies `candidate` and moves it into its bucket (or plans the move when
    /// running dry).
    pub fn organize(&self, candidate: &CandidateFile) -> Result<MoveRecord, MoveError> {
        let bucket = self.classifier.classify(&candidate.name);
        let bucket_dir = self.config.bucket_dir(bucket);

        let destination = if self.config.dry_run {
            FileOrganizer::plan(&candidate.path, &bucket_dir)?
        } else {
            FileOrganizer::move_into(&candidate.path, &bucket_dir)?
        };

        info!(
            file = %candidate.name,
            bucket,
            destination = %destination.display(),
            dry_run = self.config.dry_run,
            "organized"
        );

        Ok(MoveRecord {
            source: candidate.path.clone(),
            destination,
            bucket: bucket.to_string(),
        })
    }

    fn organize_into(&self, candidate: &CandidateFile, report: &mut Report) {
        match self.organize(candidate) {
            Ok(record) => report.record_move(record),
            Err(error) => {
                warn!(file = %candidate.name, %error, "could not organize file");
                report.record_failure(candidate.path.clone(), error);
            }
        }
    }
}
