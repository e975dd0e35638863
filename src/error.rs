//! Error types for caresync.

use thiserror::Error;

/// Errors raised by the queue, the store and the coordinator.
///
/// Per-item apply failures are not errors: they are recorded on the
/// queue item and reported through status notifications.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable store rejected a read or write.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration could not be loaded, saved or resolved.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A queue item or resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON encoding or decoding failed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The resource apply adapter is misconfigured or unusable.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Caller supplied an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Wrap a rusqlite error with a short description of what was attempted.
    #[must_use]
    pub fn database(context: &str, err: &rusqlite::Error) -> Self {
        Self::Database(format!("{context}: {err}"))
    }
}
