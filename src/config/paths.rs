//! Path resolution for caresync configuration and data files.
//!
//! All caresync data is stored in `~/.caresync/` unless `CARESYNC_HOME`
//! points somewhere else:
//! - `config.yaml` - Main configuration file
//! - `queue.db` - SQLite database holding the offline mutation queue

use std::path::PathBuf;

use crate::error::SyncError;

/// Environment variable overriding the data root.
pub const HOME_ENV: &str = "CARESYNC_HOME";

/// Paths to caresync configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.caresync/`
    pub root: PathBuf,
    /// Config file: `~/.caresync/config.yaml`
    pub config_file: PathBuf,
    /// Queue database: `~/.caresync/queue.db`
    pub database: PathBuf,
}

impl Paths {
    /// Resolve paths from `CARESYNC_HOME`, falling back to `~/.caresync`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable can be read.
    pub fn new() -> Result<Self, SyncError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }

        let home = std::env::var("HOME")
            .map_err(|_| SyncError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".caresync")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("queue.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
