//! Safe relocation of single files into bucket directories.
//!
//! A move never overwrites anything. Candidate names are tried in order
//! (`name.ext`, `name (1).ext`, `name (2).ext`, ...) and every attempt is published with
//! a rename that refuses to replace an existing target, so a file created under the same
//! name by another process between our check and our rename is detected and skipped
//! instead of clobbered.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on suffixed names tried for one file.
pub const MAX_COLLISION_ATTEMPTS: u32 = 500;

/// Errors that can occur while moving one file.
#[derive(Debug, Error)]
pub enum MoveError {
    /// The source disappeared before it could be moved.
    #[error("{} vanished before it could be moved", .0.display())]
    SourceVanished(PathBuf),

    /// The source could not be inspected.
    #[error("cannot access {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source path has no final component.
    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),

    /// The bucket directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The filesystem refused the move (permissions, disk full, ...).
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every suffixed candidate name was taken.
    #[error("no free name for {name:?} in {} after {attempts} attempts", dir.display())]
    CollisionExhausted {
        dir: PathBuf,
        name: OsString,
        attempts: u32,
    },
}

/// Result type for file moves.
pub type MoveResult<T> = Result<T, MoveError>;

/// Moves files into bucket directories without ever overwriting.
pub struct FileOrganizer;

impl FileOrganizer {
    /// Moves `source` into `destination_dir`, creating the directory if needed.
    ///
    /// Returns the final path, which carries a ` (n)` suffix if the plain name was
    /// already taken.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use downtidy::file_organizer::FileOrganizer;
    /// use std::path::Path;
    ///
    /// let moved = FileOrganizer::move_into(
    ///     Path::new("/home/me/Downloads/report.pdf"),
    ///     Path::new("/home/me/Downloads/Documents"),
    /// );
    ///
    /// match moved {
    ///     Ok(path) => println!("moved to {}", path.display()),
    ///     Err(e) => eprintln!("move failed: {}", e),
    /// }
    /// ```
    pub fn move_into(source: &Path, destination_dir: &Path) -> MoveResult<PathBuf> {
        Self::move_into_with(source, destination_dir, MAX_COLLISION_ATTEMPTS, publish)
    }

    fn move_into_with<P>(
        source: &Path,
        destination_dir: &Path,
        max_attempts: u32,
        mut publish: P,
    ) -> MoveResult<PathBuf>
    where
        P: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let file_name = source
            .file_name()
            .ok_or_else(|| MoveError::NoFileName(source.to_path_buf()))?;

        if !exists_no_follow(source) {
            return Err(MoveError::SourceVanished(source.to_path_buf()));
        }

        ensure_dir(destination_dir)?;

        for attempt in 0..max_attempts {
            let candidate = destination_dir.join(candidate_name(file_name, attempt));
            if exists_no_follow(&candidate) {
                continue;
            }

            match publish(source, &candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(candidate = %candidate.display(), "name taken during move, trying next suffix");
                }
                Err(_) if !exists_no_follow(source) => {
                    return Err(MoveError::SourceVanished(source.to_path_buf()));
                }
                Err(e) => {
                    return Err(MoveError::Io {
                        from: source.to_path_buf(),
                        to: candidate,
                        source: e,
                    });
                }
            }
        }

        Err(MoveError::CollisionExhausted {
            dir: destination_dir.to_path_buf(),
            name: file_name.to_os_string(),
            attempts: max_attempts,
        })
    }

    /// Resolves where `source` would land in `destination_dir` without moving anything.
    ///
    /// Used for dry runs. The answer is only a prediction: another process may take the
    /// name before a real move happens.
    pub fn plan(source: &Path, destination_dir: &Path) -> MoveResult<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| MoveError::NoFileName(source.to_path_buf()))?;

        (0..MAX_COLLISION_ATTEMPTS)
            .map(|attempt| destination_dir.join(candidate_name(file_name, attempt)))
            .find(|candidate| !exists_no_follow(candidate))
            .ok_or_else(|| MoveError::CollisionExhausted {
                dir: destination_dir.to_path_buf(),
                name: file_name.to_os_string(),
                attempts: MAX_COLLISION_ATTEMPTS,
            })
    }
}

/// Builds the `attempt`-th candidate name: the name itself for 0, otherwise
/// `stem (attempt).ext`.
///
/// ```
/// use downtidy::file_organizer::candidate_name;
/// use std::ffi::OsStr;
///
/// assert_eq!(candidate_name(OsStr::new("a.txt"), 0), "a.txt");
/// assert_eq!(candidate_name(OsStr::new("a.txt"), 2), "a (2).txt");
/// assert_eq!(candidate_name(OsStr::new("notes"), 1), "notes (1)");
/// ```
pub fn candidate_name(file_name: &OsStr, attempt: u32) -> OsString {
    if attempt == 0 {
        return file_name.to_os_string();
    }

    let path = Path::new(file_name);
    let mut name = path.file_stem().unwrap_or(file_name).to_os_string();
    name.push(format!(" ({attempt})"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Creates `dir` (and parents). An existing directory is fine; an existing
/// non-directory is an error.
fn ensure_dir(dir: &Path) -> MoveResult<()> {
    fs::create_dir_all(dir).map_err(|source| MoveError::DirectoryCreation {
        path: dir.to_path_buf(),
        source,
    })
}

/// Moves `from` to `to`, failing with `AlreadyExists` instead of replacing `to`.
fn publish(from: &Path, to: &Path) -> io::Result<()> {
    match rename_noreplace(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_then_publish(from, to),
        result => result,
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{RenameFlags, renameat2};

    match renameat2(None, from, None, to, RenameFlags::RENAME_NOREPLACE) {
        Ok(()) => Ok(()),
        // filesystem or kernel without RENAME_NOREPLACE
        Err(Errno::EINVAL) | Err(Errno::ENOSYS) => link_then_unlink(from, to),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    link_then_unlink(from, to)
}

/// Publishes through a hard link, which fails if `to` exists, then drops the old name.
fn link_then_unlink(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
            ) =>
        {
            // no hard links here; best effort check-then-rename
            if exists_no_follow(to) {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            return fs::rename(from, to);
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn staging_path(to: &Path) -> PathBuf {
    let name = to.file_name().unwrap_or_else(|| OsStr::new("file"));
    let mut staged = OsString::from(".downtidy-");
    staged.push(name);
    staged.push(format!(
        ".{}.{}.partial",
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    to.with_file_name(staged)
}

/// Cross-filesystem move: copy into a hidden staging file next to `to`, publish it with a
/// same-filesystem no-clobber rename, then remove the source.
fn copy_then_publish(from: &Path, to: &Path) -> io::Result<()> {
    let staging = staging_path(to);
    debug!(from = %from.display(), staging = %staging.display(), "copying across filesystems");

    let staged = (|| {
        let mut reader = File::open(from)?;
        let mut writer = File::create_new(&staging)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        fs::set_permissions(&staging, reader.metadata()?.permissions())?;
        rename_noreplace(&staging, to)
    })();

    if let Err(e) = staged {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    if let Err(e) = fs::remove_file(from) {
        warn!(source = %from.display(), "copied but could not remove source, rolling back");
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}
