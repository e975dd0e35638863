//! Coarse sync status and change suppression.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::StatusChanged;

/// Coarse status shown to the rest of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Online and nothing left to send
    Synced,
    /// Online with writes waiting
    Pending,
    /// No connectivity
    Offline,
    /// Online, nothing pending, but dead-lettered items remain
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Offline => "offline",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Derive the status from connectivity and queue counts.
#[must_use]
pub const fn compute_status(online: bool, pending_count: usize, failed_count: usize) -> SyncStatus {
    if !online {
        SyncStatus::Offline
    } else if pending_count > 0 {
        SyncStatus::Pending
    } else if failed_count > 0 {
        SyncStatus::Error
    } else {
        SyncStatus::Synced
    }
}

type Snapshot = (SyncStatus, usize, usize);

/// Remembers the last notified `(status, pending, failed)` tuple and only
/// reports changes.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Mutex<Option<Snapshot>>,
}

impl StatusTracker {
    /// Create a tracker that has notified nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the status; returns a notification only if the tuple changed.
    pub fn observe(
        &self,
        online: bool,
        pending_count: usize,
        failed_count: usize,
        timestamp: DateTime<Utc>,
    ) -> Option<StatusChanged> {
        let status = compute_status(online, pending_count, failed_count);
        let snapshot = (status, pending_count, failed_count);

        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last == Some(snapshot) {
            return None;
        }
        *last = Some(snapshot);

        Some(StatusChanged {
            status,
            pending_count,
            failed_count,
            timestamp,
        })
    }

    /// Forget the last tuple so the next observation always notifies.
    pub fn reset(&self) {
        *self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
