//! Command-line interface for downtidy.
//!
//! Parses arguments, merges them over the configuration file and decides whether to
//! sweep once or keep watching.

use crate::config::{Config, ConfigError, ConfigFile};
use clap::Parser;
use std::path::PathBuf;

/// Sort a downloads folder into type-based subfolders.
#[derive(Debug, Clone, Parser)]
#[command(name = "downtidy", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to organize (overrides `downloads_dir`)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Sweep once and exit
    #[arg(long, conflicts_with = "watch")]
    pub once: bool,

    /// Keep watching for new files after the initial sweep
    #[arg(long)]
    pub watch: bool,

    /// Show what would be moved without moving anything
    #[arg(long)]
    pub dry_run: bool,

    /// Poll the directory instead of using native notifications
    #[arg(long)]
    pub poll: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the binary should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizeCommand {
    /// One sweep, then exit.
    Once,
    /// Sweep, then watch until interrupted.
    Watch,
}

impl Cli {
    /// Loads the configuration file (see [`ConfigFile::load`]) and applies the
    /// command-line overrides on top of it.
    pub fn resolve_config(&self) -> Result<Config, ConfigError> {
        let file = ConfigFile::load(self.config.as_deref())?;
        self.apply(file).resolve()
    }

    fn apply(&self, mut file: ConfigFile) -> ConfigFile {
        if let Some(dir) = &self.dir {
            file.downloads_dir = Some(dir.clone());
        }
        if self.once {
            file.watch = Some(false);
        }
        if self.watch {
            file.watch = Some(true);
        }
        if self.dry_run {
            file.dry_run = Some(true);
        }
        if self.poll {
            file.force_polling = Some(true);
        }
        file
    }

    /// Picks the run mode from the resolved configuration.
    pub fn organize_command(config: &Config) -> OrganizeCommand {
        if config.watch {
            OrganizeCommand::Watch
        } else {
            OrganizeCommand::Once
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_once_and_watch_conflict() {
        assert!(Cli::try_parse_from(["downtidy", "--once", "--watch"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from(["downtidy", "--dir", &dir, "--once", "--dry-run", "--poll"])
            .unwrap();

        let file = ConfigFile::from_toml("watch = true\ndry_run = false").unwrap();
        let config = cli.apply(file).resolve().unwrap();

        assert_eq!(config.watched_dir, temp_dir.path().canonicalize().unwrap());
        assert!(!config.watch);
        assert!(config.dry_run);
        assert!(config.force_polling);
        assert_eq!(Cli::organize_command(&config), OrganizeCommand::Once);
    }

    #[test]
    fn test_defaults_to_watch() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path()).unwrap();
        assert_eq!(Cli::organize_command(&config), OrganizeCommand::Watch);
    }
}
