//! Where watch events come from.
//!
//! [`NativeSource`] subscribes to filesystem notifications through `notify`;
//! [`PollingSource`] lists the directory on an interval and diffs the listings. Both
//! read from the same queue as the driver's stop handle, so a stop request wakes either
//! of them immediately.

use super::WatchError;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace, warn};

/// Messages on the driver's queue.
#[derive(Debug)]
pub enum Signal {
    /// Raw result from the native notification backend.
    Fs(notify::Result<Event>),
    /// Stop request from a [`super::StopHandle`].
    Stop,
}

/// What a source produced on one wake-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Paths that appeared or changed.
    Paths(Vec<PathBuf>),
    /// Nothing new; pending files should be re-checked.
    Tick,
    /// Stop was requested.
    Stop,
}

/// Which kind of source is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Native,
    Polling,
}

/// A blocking, cancellable stream of watch events.
pub trait EventSource {
    fn mode(&self) -> WatchMode;

    /// Blocks until an event arrives, a stop is requested, or `recheck` elapses (if
    /// given; sources with their own cadence may ignore it).
    fn next_event(
        &mut self,
        inbox: &Receiver<Signal>,
        recheck: Option<Duration>,
    ) -> Result<SourceEvent, WatchError>;
}

/// Native filesystem notifications for one directory, non-recursive.
pub struct NativeSource {
    dir: PathBuf,
    // dropping the watcher tears down the subscription
    _watcher: RecommendedWatcher,
}

impl NativeSource {
    /// Subscribes to changes in `dir`, forwarding raw results into `sender`.
    pub fn new(dir: &Path, sender: Sender<Signal>) -> Result<Self, WatchError> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = sender.send(Signal::Fs(result));
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// Direct children of the watched directory touched by `event`. A dropped-events
    /// marker yields the whole listing; losing the directory itself is an error.
    fn relevant_paths(&self, event: Event) -> Result<Vec<PathBuf>, WatchError> {
        if event.need_rescan() {
            debug!(dir = %self.dir.display(), "native backend lost events, rescanning");
            let mut paths: Vec<PathBuf> = list(&self.dir)?.into_keys().collect();
            paths.sort();
            return Ok(paths);
        }

        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
                if event.paths.iter().any(|path| path == &self.dir) =>
            {
                Err(WatchError::DirectoryGone(self.dir.clone()))
            }
            EventKind::Create(_) | EventKind::Modify(_) => Ok(event
                .paths
                .into_iter()
                .filter(|path| path.parent() == Some(self.dir.as_path()))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

impl EventSource for NativeSource {
    fn mode(&self) -> WatchMode {
        WatchMode::Native
    }

    fn next_event(
        &mut self,
        inbox: &Receiver<Signal>,
        recheck: Option<Duration>,
    ) -> Result<SourceEvent, WatchError> {
        let signal = match recheck {
            Some(timeout) => match inbox.recv_timeout(timeout) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) => return Ok(SourceEvent::Tick),
                Err(RecvTimeoutError::Disconnected) => return Ok(SourceEvent::Stop),
            },
            None => match inbox.recv() {
                Ok(signal) => signal,
                Err(_) => return Ok(SourceEvent::Stop),
            },
        };

        match signal {
            Signal::Stop => Ok(SourceEvent::Stop),
            Signal::Fs(Ok(event)) => {
                trace!(?event, "native event");
                let paths = self.relevant_paths(event)?;
                if paths.is_empty() {
                    Ok(SourceEvent::Tick)
                } else {
                    Ok(SourceEvent::Paths(paths))
                }
            }
            Signal::Fs(Err(error)) => Err(WatchError::Notify(error)),
        }
    }
}

type Listing = HashMap<PathBuf, (u64, Option<SystemTime>)>;

/// Periodic listing of one directory, reporting new or changed entries.
pub struct PollingSource {
    dir: PathBuf,
    interval: Duration,
    previous: Listing,
    next_poll: Instant,
}

impl PollingSource {
    /// Starts polling with the current listing as baseline, so only later arrivals and
    /// changes are reported.
    pub fn new(dir: &Path, interval: Duration) -> Result<Self, WatchError> {
        let previous = list(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            interval,
            previous,
            next_poll: Instant::now() + interval,
        })
    }

    /// Starts polling with an empty baseline: the first poll reports every file present.
    pub fn without_baseline(dir: &Path, interval: Duration) -> Result<Self, WatchError> {
        // fail now rather than on the first poll
        list(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            interval,
            previous: Listing::new(),
            next_poll: Instant::now(),
        })
    }

    fn poll(&mut self) -> Result<Vec<PathBuf>, WatchError> {
        let current = list(&self.dir)?;
        let mut changed: Vec<PathBuf> = current
            .iter()
            .filter(|(path, state)| self.previous.get(*path) != Some(*state))
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();

        trace!(entries = current.len(), changed = changed.len(), "polled");
        self.previous = current;
        Ok(changed)
    }
}

impl EventSource for PollingSource {
    fn mode(&self) -> WatchMode {
        WatchMode::Polling
    }

    fn next_event(
        &mut self,
        inbox: &Receiver<Signal>,
        _recheck: Option<Duration>,
    ) -> Result<SourceEvent, WatchError> {
        loop {
            let now = Instant::now();
            if now >= self.next_poll {
                self.next_poll = now + self.interval;
                return self.poll().map(SourceEvent::Paths);
            }

            match inbox.recv_timeout(self.next_poll - now) {
                Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    return Ok(SourceEvent::Stop);
                }
                // leftovers from a torn-down native subscription
                Ok(Signal::Fs(_)) => continue,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}

fn list(dir: &Path) -> Result<Listing, WatchError> {
    let entries = fs::read_dir(dir).map_err(|source| WatchError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut listing = Listing::new();
    for entry in entries.flatten() {
        let path = entry.path();
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => {
                listing.insert(path, (metadata.len(), metadata.modified().ok()));
            }
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "skipping entry during poll"),
        }
    }
    Ok(listing)
}

/// Opens the preferred source for `dir`: native notifications unless `force_polling`
/// is set or the native backend is unavailable.
pub fn open(
    dir: &Path,
    poll_interval: Duration,
    force_polling: bool,
    sender: Sender<Signal>,
) -> Result<Box<dyn EventSource>, WatchError> {
    if !force_polling {
        match NativeSource::new(dir, sender) {
            Ok(source) => return Ok(Box::new(source)),
            Err(error) => {
                warn!(%error, "native notifications unavailable, falling back to polling");
            }
        }
    }
    Ok(Box::new(PollingSource::new(dir, poll_interval)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{Flag, RemoveKind};
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_polling_reports_new_and_changed_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("old.txt"), "old").unwrap();
        let (_tx, rx) = mpsc::channel();

        let mut source = PollingSource::new(dir, Duration::from_millis(10)).unwrap();
        fs::write(dir.join("new.txt"), "new").unwrap();
        fs::create_dir(dir.join("Images")).unwrap();

        let event = source.next_event(&rx, None).unwrap();
        assert_eq!(event, SourceEvent::Paths(vec![dir.join("new.txt")]));

        fs::write(dir.join("new.txt"), "grown bigger").unwrap();
        let event = source.next_event(&rx, None).unwrap();
        assert_eq!(event, SourceEvent::Paths(vec![dir.join("new.txt")]));

        let event = source.next_event(&rx, None).unwrap();
        assert_eq!(event, SourceEvent::Paths(Vec::new()));
    }

    #[test]
    fn test_polling_without_baseline_reports_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("a.txt"), "a").unwrap();
        let (_tx, rx) = mpsc::channel();

        let mut source = PollingSource::without_baseline(dir, Duration::from_secs(60)).unwrap();
        let event = source.next_event(&rx, None).unwrap();
        assert_eq!(event, SourceEvent::Paths(vec![dir.join("a.txt")]));
    }

    #[test]
    fn test_polling_stops_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut source = PollingSource::new(temp_dir.path(), Duration::from_secs(60)).unwrap();

        tx.send(Signal::Stop).unwrap();
        let started = Instant::now();
        assert_eq!(source.next_event(&rx, None).unwrap(), SourceEvent::Stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_polling_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            PollingSource::new(&missing, Duration::from_secs(1)),
            Err(WatchError::ListDirectory { .. })
        ));
    }

    #[test]
    fn test_native_errors_surface_as_watch_errors() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let Ok(mut source) = NativeSource::new(temp_dir.path(), tx.clone()) else {
            // no native backend on this host
            return;
        };

        tx.send(Signal::Fs(Err(notify::Error::generic("backend died"))))
            .unwrap();
        let result = source.next_event(&rx, Some(Duration::from_secs(5)));
        assert!(matches!(result, Err(WatchError::Notify(_))));
    }

    #[test]
    fn test_native_removal_of_watched_dir_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let (tx, rx) = mpsc::channel();
        let Ok(mut source) = NativeSource::new(&dir, tx.clone()) else {
            return;
        };

        let event = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(dir.clone());
        tx.send(Signal::Fs(Ok(event))).unwrap();

        let result = source.next_event(&rx, Some(Duration::from_secs(5)));
        assert!(matches!(result, Err(WatchError::DirectoryGone(path)) if path == dir));
    }

    #[test]
    fn test_native_rescan_reports_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("b.pdf"), "b").unwrap();
        fs::write(dir.join("a.png"), "a").unwrap();
        fs::create_dir(dir.join("Images")).unwrap();
        let (tx, rx) = mpsc::channel();
        let Ok(mut source) = NativeSource::new(dir, tx.clone()) else {
            return;
        };

        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        tx.send(Signal::Fs(Ok(event))).unwrap();

        let event = source
            .next_event(&rx, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(
            event,
            SourceEvent::Paths(vec![dir.join("a.png"), dir.join("b.pdf")])
        );
    }

    #[test]
    fn test_native_tick_on_recheck_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        let Ok(mut source) = NativeSource::new(temp_dir.path(), tx) else {
            return;
        };

        let event = source
            .next_event(&rx, Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(event, SourceEvent::Tick);
    }
}
