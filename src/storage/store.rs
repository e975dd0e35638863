//! Durable queue store contract.

use crate::error::SyncError;
use crate::sync::QueueRecord;

/// Keyed, durable storage for queue records.
///
/// Every method commits before returning. The operation queue is the
/// only caller; nothing else touches the store directly.
#[cfg_attr(test, mockall::automock)]
pub trait QueueStore: Send {
    /// Load every persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load_all(&self) -> Result<Vec<QueueRecord>, SyncError>;

    /// Insert or replace one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not commit.
    fn put(&self, record: &QueueRecord) -> Result<(), SyncError>;

    /// Remove one record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not commit.
    fn remove(&self, id: &str) -> Result<bool, SyncError>;

    /// Remove several records atomically. Returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not commit; no record is removed.
    fn remove_many(&self, ids: &[String]) -> Result<usize, SyncError>;

    /// Drop every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not commit.
    fn clear(&self) -> Result<(), SyncError>;
}
