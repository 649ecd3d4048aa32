//! Top-level error type for the library entry points.

use crate::config::ConfigError;
use crate::sweeper::SweepError;
use crate::watcher::WatchError;
use thiserror::Error;

/// Fatal errors of [`crate::run_once`] and [`crate::run_watch`]. Per-file failures are
/// never reported here; they are part of the [`crate::Report`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sweep(#[from] SweepError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Result type for the library entry points.
pub type Result<T> = std::result::Result<T, Error>;
