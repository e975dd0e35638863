//! Operation and queue item types.
//!
//! An [`Operation`] is the immutable record of a local write. A
//! [`QueueItem`] wraps it with the retry and status metadata the queue
//! tracks, and [`QueueRecord`] is the flat shape persisted to the store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Kind of write an operation performs against the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
}

impl OperationKind {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Get the display name for this kind.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(SyncError::InvalidInput(format!(
                "Unknown operation kind: {other}"
            ))),
        }
    }
}

/// Status of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for the next pass
    Pending,
    /// Handed to the apply port
    Processing,
    /// Dead-lettered; needs an explicit retry
    Failed,
    /// Applied remotely
    Completed,
}

impl ItemStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Whether `mark` may move an item from `self` to `next`.
    ///
    /// `Failed -> Pending` is deliberately absent: only an explicit
    /// retry request re-opens a dead-lettered item.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Pending | Self::Failed)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" | "in_progress" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(SyncError::InvalidInput(format!("Unknown status: {other}"))),
        }
    }
}

/// An immutable record of intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, shared with the wrapping queue item
    pub id: String,
    /// Kind of write
    pub kind: OperationKind,
    /// Remote resource type, e.g. `Patient`
    pub resource_type: String,
    /// Opaque payload handed to the apply port
    pub payload: serde_json::Value,
    /// When the operation was enqueued
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// Create an operation with a fresh identifier.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        resource_type: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            resource_type: resource_type.into(),
            payload,
            created_at,
        }
    }

    /// Short label for logs and listings, e.g. `Create Patient`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.resource_type)
    }
}

/// The queue's tracking record for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Same as `operation.id`
    pub id: String,
    /// Persisted insertion sequence, breaks `created_at` ties
    pub seq: i64,
    /// The wrapped operation
    pub operation: Operation,
    /// Times the item entered `Processing`
    pub attempts: u32,
    /// Higher is more urgent
    pub priority: i32,
    /// Current status
    pub status: ItemStatus,
    /// Last failure reason
    pub last_error: Option<String>,
    /// When the item last left `Processing`
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Wrap a freshly created operation.
    #[must_use]
    pub fn new(operation: Operation, priority: i32, seq: i64) -> Self {
        Self {
            id: operation.id.clone(),
            seq,
            operation,
            attempts: 0,
            priority,
            status: ItemStatus::Pending,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Timestamp the failed-item retention window is measured from.
    #[must_use]
    pub fn failed_since(&self) -> DateTime<Utc> {
        self.last_attempt_at.unwrap_or(self.operation.created_at)
    }
}

/// Dequeue order: priority descending, then `created_at` ascending,
/// then insertion sequence.
#[must_use]
pub fn dequeue_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.operation.created_at.cmp(&b.operation.created_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Flat persisted form of a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: String,
    pub seq: i64,
    pub kind: OperationKind,
    pub resource_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub priority: i32,
    pub status: ItemStatus,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl From<&QueueItem> for QueueRecord {
    fn from(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            seq: item.seq,
            kind: item.operation.kind,
            resource_type: item.operation.resource_type.clone(),
            payload: item.operation.payload.clone(),
            created_at: item.operation.created_at,
            attempts: item.attempts,
            priority: item.priority,
            status: item.status,
            last_error: item.last_error.clone(),
            last_attempt_at: item.last_attempt_at,
        }
    }
}

impl From<QueueRecord> for QueueItem {
    fn from(record: QueueRecord) -> Self {
        Self {
            id: record.id.clone(),
            seq: record.seq,
            operation: Operation {
                id: record.id,
                kind: record.kind,
                resource_type: record.resource_type,
                payload: record.payload,
                created_at: record.created_at,
            },
            attempts: record.attempts,
            priority: record.priority,
            status: record.status,
            last_error: record.last_error,
            last_attempt_at: record.last_attempt_at,
        }
    }
}
