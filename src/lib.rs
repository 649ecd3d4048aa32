//! downtidy - keep a downloads folder sorted
//!
//! This library moves the files at the top level of a directory into bucket subfolders
//! chosen by file extension. It never overwrites (same-named files get ` (n)` suffixes),
//! never touches in-progress downloads, and can either sweep once or keep watching the
//! directory, waiting for new files to stop changing before moving them.

pub mod cli;
pub mod config;
pub mod error;
pub mod file_category;
pub mod file_organizer;
pub mod output;
pub mod report;
pub mod sweeper;
pub mod watcher;

pub use config::{Config, ConfigError, ConfigFile};
pub use error::{Error, Result};
pub use file_category::{Bucket, Classifier};
pub use file_organizer::{FileOrganizer, MoveError};
pub use report::{MoveFailure, MoveRecord, Report, RunMode};
pub use sweeper::{CandidateFile, SweepError, Sweeper};
pub use watcher::{DriverState, StopHandle, WatchDriver, WatchError};

/// Sweeps `config.watched_dir` once and reports what was moved.
///
/// # Errors
///
/// Fails only if the watched directory cannot be listed.
pub fn run_once(config: &Config) -> Result<Report> {
    let report = Sweeper::new(config.clone()).sweep()?;
    Ok(report.finish())
}

/// Watches `config.watched_dir` until stopped, blocking the calling thread.
///
/// `on_start` receives the driver's [`StopHandle`] before watching begins; hand it to
/// whatever should end the session (a signal handler, another thread, a timer).
pub fn run_watch<F>(config: &Config, on_start: F) -> Result<Report>
where
    F: FnOnce(StopHandle),
{
    let mut driver = WatchDriver::new(config.clone());
    on_start(driver.stop_handle());
    Ok(driver.run()?)
}
