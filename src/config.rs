//! Configuration loading and validation.
//!
//! The on-disk format is TOML. A raw [`ConfigFile`] is deserialized first, command-line
//! overrides are applied to it, and [`ConfigFile::resolve`] then validates everything and
//! produces the immutable [`Config`] the organizer runs with.
//!
//! # Configuration File Format
//!
//! ```toml
//! downloads_dir = "~/Downloads"
//! other_folder = "Other"
//! scan_existing = true
//! watch = true
//! poll_interval_seconds = 3.0
//! settle_seconds = 3.0
//! ignore_hidden = true
//! dry_run = false
//! force_polling = false
//! excluded_suffixes = ["download", "crdownload", "part", "partial", "tmp"]
//! ignore_patterns = [".DS_Store", "Thumbs.db", "desktop.ini"]
//!
//! [mappings]
//! Images = ["jpg", "png"]
//! Documents = ["pdf", "txt"]
//! ```
//!
//! Buckets are tried in the order they appear under `[mappings]`.

use crate::file_category::{Bucket, Classifier, default_buckets, extension_of, normalize_extension};
use glob::Pattern;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// File name looked up in the current directory when no config path is given.
pub const LOCAL_CONFIG_FILE: &str = "downtidy.toml";

const DEFAULT_FALLBACK_BUCKET: &str = "Other";
const DEFAULT_POLL_SECONDS: f64 = 3.0;
const DEFAULT_SETTLE_SECONDS: f64 = 3.0;
const DEFAULT_EXCLUDED_SUFFIXES: &[&str] = &["download", "crdownload", "part", "partial", "tmp"];
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Errors raised while loading or validating configuration. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("downloads directory {} does not exist", .0.display())]
    MissingWatchedDir(PathBuf),

    #[error("downloads path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot resolve downloads directory {}: {source}", path.display())]
    WatchedDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bucket name '{name}': {reason}")]
    InvalidBucketName { name: String, reason: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidDuration { field: &'static str, reason: String },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Configuration as written on disk. Every field is optional; missing values fall back
/// to built-in defaults in [`ConfigFile::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub downloads_dir: Option<PathBuf>,
    pub other_folder: Option<String>,
    #[serde(default, deserialize_with = "ordered_mappings")]
    pub mappings: Option<Vec<(String, Vec<String>)>>,
    pub excluded_suffixes: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
    pub ignore_hidden: Option<bool>,
    pub poll_interval_seconds: Option<f64>,
    #[serde(alias = "min_age_seconds")]
    pub settle_seconds: Option<f64>,
    pub scan_existing: Option<bool>,
    pub watch: Option<bool>,
    pub dry_run: Option<bool>,
    pub force_polling: Option<bool>,
}

/// Deserializes `[mappings]` into a list that keeps document order.
fn ordered_mappings<'de, D>(deserializer: D) -> Result<Option<Vec<(String, Vec<String>)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedMappings;

    impl<'de> Visitor<'de> for OrderedMappings {
        type Value = Vec<(String, Vec<String>)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of bucket names to extension lists")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut buckets = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, extensions)) = map.next_entry::<String, Vec<String>>()? {
                buckets.push((name, extensions));
            }
            Ok(buckets)
        }
    }

    deserializer.deserialize_map(OrderedMappings).map(Some)
}

impl ConfigFile {
    /// Loads configuration, trying in order:
    /// 1. `config_path`, if given (it must exist)
    /// 2. `downtidy.toml` in the current directory
    /// 3. `$XDG_CONFIG_HOME/downtidy/config.toml`, then `~/.config/downtidy/config.toml`
    /// 4. built-in defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            return Self::load_from_file(&user_config);
        }

        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Loads configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "loaded configuration file");
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validates the file and turns it into a runnable [`Config`].
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let watched_dir = match self.downloads_dir {
            Some(dir) => expand_home(&dir),
            None => home_dir()
                .map(|home| home.join("Downloads"))
                .unwrap_or_else(|| PathBuf::from("Downloads")),
        };

        let mut config = Config::new(watched_dir)?;

        if let Some(fallback) = self.other_folder {
            config.fallback_bucket = fallback;
        }
        if let Some(mappings) = self.mappings {
            config.buckets = mappings
                .into_iter()
                .map(|(name, extensions)| Bucket::new(name, extensions))
                .collect();
        }
        if let Some(suffixes) = self.excluded_suffixes {
            config.excluded_suffixes = suffixes
                .iter()
                .map(|suffix| normalize_extension(suffix))
                .filter(|suffix| !suffix.is_empty())
                .collect();
        }
        if let Some(patterns) = self.ignore_patterns {
            config.ignore_patterns = compile_patterns(&patterns)?;
        }
        if let Some(ignore_hidden) = self.ignore_hidden {
            config.ignore_hidden = ignore_hidden;
        }
        if let Some(seconds) = self.poll_interval_seconds {
            config.poll_interval = seconds_to_duration("poll_interval_seconds", seconds)?;
        }
        if let Some(seconds) = self.settle_seconds {
            config.settle_delay = seconds_to_duration("settle_seconds", seconds)?;
        }
        config.scan_existing = self.scan_existing.unwrap_or(config.scan_existing);
        config.watch = self.watch.unwrap_or(config.watch);
        config.dry_run = self.dry_run.unwrap_or(config.dry_run);
        config.force_polling = self.force_polling.unwrap_or(config.force_polling);

        config.validate()?;
        Ok(config)
    }
}

/// Validated, immutable settings for one organizer run.
///
/// Construct with [`Config::new`] (defaults) or [`ConfigFile::resolve`]. Fields are public
/// so callers can adjust them before handing the config to the organizer; call
/// [`Config::validate`] again after doing so.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory whose top-level files get organized.
    pub watched_dir: PathBuf,
    /// Bucket for files no mapping claims.
    pub fallback_bucket: String,
    /// Buckets in priority order.
    pub buckets: Vec<Bucket>,
    /// Extensions of in-progress downloads. Such files are never touched.
    pub excluded_suffixes: HashSet<String>,
    /// Glob patterns matched against file names; matches are never touched.
    pub ignore_patterns: Vec<Pattern>,
    /// Skip dot-files.
    pub ignore_hidden: bool,
    /// Listing interval of the polling watcher.
    pub poll_interval: Duration,
    /// Quiet period a new file must stay unchanged before it is moved.
    pub settle_delay: Duration,
    /// Sweep existing files when watching starts.
    pub scan_existing: bool,
    /// Default run mode: keep watching after the initial sweep.
    pub watch: bool,
    /// Report planned moves without touching anything.
    pub dry_run: bool,
    /// Skip native notifications and poll right away.
    pub force_polling: bool,
}

impl Config {
    /// Creates a configuration with default settings for `watched_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `watched_dir` does not exist or is not a directory.
    ///
    /// The directory is stored in canonical form, so paths reported by the event
    /// sources compare equal to it whatever form the caller passed in.
    pub fn new(watched_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let watched_dir = watched_dir.into();
        check_watched_dir(&watched_dir)?;
        let watched_dir =
            fs::canonicalize(&watched_dir).map_err(|source| ConfigError::WatchedDir {
                path: watched_dir.clone(),
                source,
            })?;

        Ok(Self {
            watched_dir,
            fallback_bucket: DEFAULT_FALLBACK_BUCKET.to_string(),
            buckets: default_buckets(),
            excluded_suffixes: DEFAULT_EXCLUDED_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
            ignore_patterns: compile_patterns(DEFAULT_IGNORE_PATTERNS)?,
            ignore_hidden: true,
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_SECONDS),
            settle_delay: Duration::from_secs_f64(DEFAULT_SETTLE_SECONDS),
            scan_existing: true,
            watch: true,
            dry_run: false,
            force_polling: false,
        })
    }

    /// Checks the invariants the organizer relies on.
    ///
    /// Duplicate extensions across buckets are not an error: they are logged and the
    /// earlier bucket wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_watched_dir(&self.watched_dir)?;

        check_bucket_name(&self.fallback_bucket)?;
        for bucket in &self.buckets {
            check_bucket_name(bucket.name())?;
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "poll_interval_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for bucket in &self.buckets {
            for ext in bucket.extensions() {
                if let Some(first) = owners.get(ext) {
                    if *first != bucket.name() {
                        warn!(
                            extension = ext,
                            kept = *first,
                            ignored = bucket.name(),
                            "extension mapped to more than one bucket, first mapping wins"
                        );
                    }
                } else {
                    owners.insert(ext, bucket.name());
                }
                if self.excluded_suffixes.contains(ext) {
                    warn!(
                        extension = ext,
                        bucket = bucket.name(),
                        "extension is both mapped and excluded, files with it are never moved"
                    );
                }
            }
        }

        Ok(())
    }

    /// Builds the classifier for this configuration.
    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.buckets.clone(), self.fallback_bucket.clone())
    }

    /// Returns true if `file_name` carries an in-progress download extension.
    pub fn is_excluded(&self, file_name: &str) -> bool {
        extension_of(file_name).is_some_and(|ext| self.excluded_suffixes.contains(&ext))
    }

    /// Returns true if a file with this name may be organized at all.
    ///
    /// Checks, in order: hidden files, ignore patterns, excluded suffixes. Exclusion
    /// takes precedence over any bucket mapping.
    pub fn should_include(&self, file_name: &str) -> bool {
        if self.ignore_hidden && file_name.starts_with('.') {
            return false;
        }

        if self
            .ignore_patterns
            .iter()
            .any(|pattern| pattern.matches(file_name))
        {
            return false;
        }

        !self.is_excluded(file_name)
    }

    /// The directory files of `bucket` are moved into.
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.watched_dir.join(bucket)
    }
}

fn check_watched_dir(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingWatchedDir(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

fn check_bucket_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name == "." || name == ".." {
        "must not refer to the current or parent directory"
    } else if name.contains('/') || name.contains('\\') {
        "must be a single folder name"
    } else {
        return Ok(());
    };

    Err(ConfigError::InvalidBucketName {
        name: name.to_string(),
        reason,
    })
}

fn seconds_to_duration(field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(seconds).map_err(|e| ConfigError::InvalidDuration {
        field,
        reason: format!("{seconds}: {e}"),
    })
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.msg.to_string(),
            })
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn user_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".config")))?;
    Some(base.join("downtidy").join("config.toml"))
}

/// Expands a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_for(dir: &Path, extra: &str) -> ConfigFile {
        let content = format!("downloads_dir = {:?}\n{}", dir.display().to_string(), extra);
        ConfigFile::from_toml(&content).expect("valid toml")
    }

    #[test]
    fn test_defaults_for_existing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path()).unwrap();

        assert_eq!(config.fallback_bucket, "Other");
        assert!(config.ignore_hidden);
        assert!(config.excluded_suffixes.contains("crdownload"));
        assert_eq!(config.buckets[0].name(), "Images");
        assert_eq!(config.settle_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_dir_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            Config::new(&missing),
            Err(ConfigError::MissingWatchedDir(_))
        ));
    }

    #[test]
    fn test_file_as_watched_dir_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            Config::new(&file),
            Err(ConfigError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_mappings_keep_document_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = file_for(
            temp_dir.path(),
            r#"
[mappings]
Zeta = ["z", "shared"]
Alpha = ["a", "shared"]
"#,
        )
        .resolve()
        .unwrap();

        let names: Vec<_> = config.buckets.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(config.classifier().classify("x.shared"), "Zeta");
    }

    #[test]
    fn test_file_values_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = file_for(
            temp_dir.path(),
            r#"
other_folder = "Misc"
excluded_suffixes = [".PART"]
poll_interval_seconds = 0.5
settle_seconds = 0
dry_run = true
"#,
        )
        .resolve()
        .unwrap();

        assert_eq!(config.fallback_bucket, "Misc");
        assert!(config.is_excluded("movie.part"));
        assert!(!config.is_excluded("movie.crdownload"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert!(config.dry_run);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();

        let zero_poll = file_for(temp_dir.path(), "poll_interval_seconds = 0").resolve();
        assert!(matches!(zero_poll, Err(ConfigError::InvalidDuration { .. })));

        let negative = file_for(temp_dir.path(), "settle_seconds = -1.0").resolve();
        assert!(matches!(negative, Err(ConfigError::InvalidDuration { .. })));

        let bad_bucket = file_for(temp_dir.path(), "[mappings]\n\"a/b\" = [\"x\"]").resolve();
        assert!(matches!(bad_bucket, Err(ConfigError::InvalidBucketName { .. })));

        let bad_glob = file_for(temp_dir.path(), "ignore_patterns = [\"[oops\"]").resolve();
        assert!(matches!(bad_glob, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_min_age_seconds_is_accepted_for_settle_time() {
        let temp_dir = TempDir::new().unwrap();
        let config = file_for(temp_dir.path(), "min_age_seconds = 1.5")
            .resolve()
            .unwrap();

        assert_eq!(config.settle_delay, Duration::from_millis(1500));
    }

    #[test]
    fn test_watched_dir_is_stored_canonical() {
        let temp_dir = TempDir::new().unwrap();
        let dl = temp_dir.path().join("dl");
        fs::create_dir(&dl).unwrap();

        let config = Config::new(dl.join("..").join("dl")).unwrap();

        assert_eq!(config.watched_dir, dl.canonicalize().unwrap());
        assert!(config.watched_dir.is_absolute());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            ConfigFile::from_toml("colour = \"blue\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConfigFile::load(Some(&temp_dir.path().join("missing.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_should_include_rules() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path()).unwrap();

        assert!(config.should_include("photo.png"));
        assert!(!config.should_include(".hidden.png"));
        assert!(!config.should_include("Thumbs.db"));
        assert!(!config.should_include("movie.mkv.crdownload"));
        assert!(!config.should_include("movie.PART"));
    }

    #[test]
    fn test_exclusion_beats_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(temp_dir.path()).unwrap();
        config.buckets = vec![Bucket::new("Temp", ["tmp"])];

        assert!(config.validate().is_ok());
        assert!(!config.should_include("scratch.tmp"));
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_home(Path::new("~/Downloads")), home.join("Downloads"));
        }
        assert_eq!(expand_home(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
