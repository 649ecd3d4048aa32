//! Continuous organizing of a watched directory.
//!
//! [`WatchDriver`] subscribes to an [`EventSource`], sweeps once, then turns the
//! source's events into observations of individual files. Observed files wait in a [`DebounceTable`]
//! until they stop changing for the settle delay, and are then classified and moved.
//! Everything happens on the thread that calls [`WatchDriver::run`]: native events,
//! poll wake-ups and stop requests arrive through one queue and are handled one at a
//! time.

pub mod debounce;
pub mod source;

pub use debounce::{DebounceEntry, DebounceTable, FileSnapshot, Observation};
pub use source::{EventSource, NativeSource, PollingSource, Signal, SourceEvent, WatchMode};

use crate::config::Config;
use crate::report::{Report, RunMode};
use crate::sweeper::{SweepError, Sweeper};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const MIN_RECHECK: Duration = Duration::from_millis(25);
const MAX_RECHECK: Duration = Duration::from_millis(500);

/// Errors that stop the driver.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("native watch failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("cannot list {}: {source}", path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("watched directory {} was removed or moved away", .0.display())]
    DirectoryGone(PathBuf),

    #[error(transparent)]
    Sweep(#[from] SweepError),
}

/// Lifecycle of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Stopped,
    Running,
}

/// Requests a running driver to stop. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Sender<Signal>,
}

impl StopHandle {
    /// Asks the driver to stop. The move in progress, if any, completes first. Calling
    /// this on a driver that already returned is a no-op.
    pub fn stop(&self) {
        let _ = self.sender.send(Signal::Stop);
    }
}

/// Owns the watch loop and its debounce state for one watched directory.
pub struct WatchDriver {
    sweeper: Sweeper,
    pending: DebounceTable,
    state: DriverState,
    sender: Sender<Signal>,
    inbox: Receiver<Signal>,
}

impl WatchDriver {
    pub fn new(config: Config) -> Self {
        let (sender, inbox) = mpsc::channel();
        Self {
            sweeper: Sweeper::new(config),
            pending: DebounceTable::new(),
            state: DriverState::Stopped,
            sender,
            inbox,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Runs until stopped or until the event source fails for good.
    ///
    /// A failing native source is replaced by a polling source once; a second source
    /// failure ends the run with that error. Per-file failures never end the run and
    /// are collected in the returned report.
    pub fn run(&mut self) -> Result<Report, WatchError> {
        self.state = DriverState::Running;
        let result = self.watch();
        self.state = DriverState::Stopped;

        if let Err(e) = &result {
            error!(error = %e, "watcher stopped");
        }
        result
    }

    fn watch(&mut self) -> Result<Report, WatchError> {
        let config = self.sweeper.config().clone();
        let mut report = Report::new(RunMode::Watch, config.dry_run);

        // subscribe before sweeping so files arriving mid-sweep are still seen
        let mut source = source::open(
            &config.watched_dir,
            config.poll_interval,
            config.force_polling,
            self.sender.clone(),
        )?;

        if config.scan_existing {
            report.absorb(self.sweeper.sweep()?);
        }

        let mut fell_back = source.mode() == WatchMode::Polling;
        info!(
            dir = %config.watched_dir.display(),
            mode = ?source.mode(),
            "watching for new files"
        );

        loop {
            let recheck = (!self.pending.is_empty()).then(|| recheck_interval(config.settle_delay));

            match source.next_event(&self.inbox, recheck) {
                Ok(SourceEvent::Stop) => {
                    info!("stop requested");
                    break;
                }
                Ok(SourceEvent::Paths(paths)) => {
                    let now = Instant::now();
                    for path in paths {
                        self.observe(&path, now);
                    }
                }
                Ok(SourceEvent::Tick) => {}
                Err(e) if !fell_back => {
                    warn!(error = %e, "native watch failed, switching to polling");
                    fell_back = true;
                    source = Box::new(PollingSource::without_baseline(
                        &config.watched_dir,
                        config.poll_interval,
                    )?);
                    continue;
                }
                Err(e) => return Err(e),
            }

            self.dispatch_settled(&mut report);
        }

        Ok(report.finish())
    }

    /// Records one sighting of `path`. Paths that are gone or not eligible (directories,
    /// hidden, ignored, in-progress download extensions) never enter the table.
    fn observe(&mut self, path: &Path, now: Instant) {
        match self.sweeper.inspect(path) {
            Ok(Some(candidate)) => {
                let snapshot = FileSnapshot {
                    size: candidate.size,
                    modified: candidate.modified,
                };
                if self.pending.observe(path, snapshot, now) == Observation::New {
                    debug!(file = %candidate.name, "waiting for file to settle");
                }
            }
            Ok(None) => {
                self.pending.forget(path);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat observed path");
                self.pending.forget(path);
            }
        }
    }

    fn dispatch_settled(&mut self, report: &mut Report) {
        if self.pending.is_empty() {
            return;
        }

        let settle_delay = self.sweeper.config().settle_delay;
        let sweeper = &self.sweeper;
        let settled = self
            .pending
            .take_settled(Instant::now(), settle_delay, |path| {
                sweeper
                    .inspect(path)
                    .ok()
                    .flatten()
                    .map(|candidate| FileSnapshot {
                        size: candidate.size,
                        modified: candidate.modified,
                    })
            });

        for path in settled {
            match self.sweeper.process_file(&path) {
                Some(Ok(record)) => report.record_move(record),
                Some(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "could not organize file");
                    report.record_failure(path, e);
                }
                None => debug!(path = %path.display(), "settled file vanished before moving"),
            }
        }
    }
}

/// How often pending files are re-checked when native events are quiet.
fn recheck_interval(settle_delay: Duration) -> Duration {
    (settle_delay / 4).clamp(MIN_RECHECK, MAX_RECHECK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn polling_config(dir: &Path) -> Config {
        let mut config = Config::new(dir).unwrap();
        config.force_polling = true;
        config.poll_interval = Duration::from_millis(20);
        config.settle_delay = Duration::from_millis(100);
        config
    }

    #[test]
    fn test_recheck_interval_bounds() {
        assert_eq!(recheck_interval(Duration::ZERO), MIN_RECHECK);
        assert_eq!(recheck_interval(Duration::from_secs(1)), Duration::from_millis(250));
        assert_eq!(recheck_interval(Duration::from_secs(60)), MAX_RECHECK);
    }

    #[test]
    fn test_driver_starts_and_ends_stopped() {
        let temp_dir = TempDir::new().unwrap();
        let mut driver = WatchDriver::new(polling_config(temp_dir.path()));
        assert_eq!(driver.state(), DriverState::Stopped);

        driver.stop_handle().stop();
        let report = driver.run().unwrap();

        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(report.mode, RunMode::Watch);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_observe_skips_excluded_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let base = &temp_dir.path().canonicalize().unwrap();
        fs::write(base.join("movie.mkv.part"), "partial").unwrap();
        fs::create_dir(base.join("folder")).unwrap();
        fs::write(base.join("photo.png"), "png").unwrap();

        let mut driver = WatchDriver::new(polling_config(base));
        let now = Instant::now();
        driver.observe(&base.join("movie.mkv.part"), now);
        driver.observe(&base.join("folder"), now);
        driver.observe(&base.join("photo.png"), now);

        assert_eq!(driver.pending.len(), 1);
        assert!(driver.pending.get(&base.join("photo.png")).is_some());
    }

    #[test]
    fn test_dispatch_moves_settled_file() {
        let temp_dir = TempDir::new().unwrap();
        let base = &temp_dir.path().canonicalize().unwrap();
        fs::write(base.join("photo.png"), "png").unwrap();
        let mut config = polling_config(base);
        config.settle_delay = Duration::ZERO;

        let mut driver = WatchDriver::new(config);
        let mut report = Report::new(RunMode::Watch, false);
        driver.observe(&base.join("photo.png"), Instant::now());
        driver.dispatch_settled(&mut report);

        assert_eq!(report.moved_count(), 1);
        assert!(base.join("Images/photo.png").exists());
        assert!(driver.pending.is_empty());
    }

    #[test]
    fn test_stop_from_another_thread() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = polling_config(temp_dir.path());
        config.poll_interval = Duration::from_secs(30);

        let mut driver = WatchDriver::new(config);
        let stop = driver.stop_handle();
        let worker = thread::spawn(move || driver.run());

        thread::sleep(Duration::from_millis(100));
        let asked = Instant::now();
        stop.stop();
        let report = worker.join().unwrap().unwrap();

        assert!(asked.elapsed() < Duration::from_secs(5));
        assert_eq!(report.moved_count(), 0);
    }

    #[test]
    fn test_source_failure_falls_back_to_polling_once() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("dl");
        fs::create_dir(&base).unwrap();
        let mut config = Config::new(&base).unwrap();
        config.poll_interval = Duration::from_millis(20);
        config.settle_delay = Duration::from_millis(50);

        let mut driver = WatchDriver::new(config);
        let signals = driver.sender.clone();
        let worker = thread::spawn(move || driver.run());

        thread::sleep(Duration::from_millis(200));
        signals
            .send(Signal::Fs(Err(notify::Error::generic("backend died"))))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        fs::write(base.join("photo.png"), "png").unwrap();
        thread::sleep(Duration::from_millis(800));

        assert!(base.join("Images/photo.png").exists());
        assert!(!worker.is_finished());

        // polling cannot recover from a vanished directory
        fs::remove_dir_all(&base).unwrap();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(WatchError::ListDirectory { .. })));
    }
}
