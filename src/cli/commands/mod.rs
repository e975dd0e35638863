//! Command implementations for caresync.
//!
//! This module contains the implementation of all CLI commands.

mod completions;
mod daemon;
mod queue;
mod sync;

pub use completions::completions;
pub use daemon::daemon;
pub use queue::{cleanup, clear, enqueue, list, remove, retry};
pub use sync::{status, sync};

use std::path::PathBuf;
use std::sync::Arc;

use crate::adapter::CommandApplyPort;
use crate::cli::args::OutputFormat;
use crate::clock::SystemClock;
use crate::config::{Config, Paths};
use crate::error::SyncError;
use crate::storage::Database;
use crate::sync::{NetworkState, OperationQueue, SyncCoordinator};

/// Resolved paths, configuration and output format for one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub format: OutputFormat,
}

impl Context {
    /// Resolve the data root and load its configuration.
    ///
    /// An explicit `format` overrides `general.default_output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be resolved or the
    /// config file is invalid.
    pub fn load(home: Option<PathBuf>, format: Option<OutputFormat>) -> Result<Self, SyncError> {
        let paths = match home {
            Some(root) => Paths::with_root(root),
            None => Paths::new()?,
        };
        let config = Config::load_from_path(&paths.config_file)?;
        let format = format.unwrap_or(config.general.default_output);

        Ok(Self {
            paths,
            config,
            format,
        })
    }

    /// Open the durable queue, recovering interrupted items.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_queue(&self) -> Result<Arc<OperationQueue>, SyncError> {
        self.paths.ensure_dirs()?;
        let db = Database::open_at(&self.paths.database)?;
        Ok(Arc::new(OperationQueue::open(
            Box::new(db),
            Arc::new(SystemClock),
            &self.config.sync,
        )?))
    }

    /// Build a coordinator over the durable queue and the configured adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter command is configured or the
    /// database cannot be opened.
    pub fn coordinator(&self, online: bool) -> Result<SyncCoordinator, SyncError> {
        let port = CommandApplyPort::from_config(&self.config.adapter).map_err(|e| match e {
            SyncError::Adapter(msg) => SyncError::Adapter(format!(
                "{msg}; set adapter.command in {}",
                self.paths.config_file.display()
            )),
            other => other,
        })?;

        Ok(SyncCoordinator::new(
            self.open_queue()?,
            Arc::new(port),
            NetworkState::new(online),
            Arc::new(SystemClock),
            self.config.sync.clone(),
        ))
    }
}
