//! JSON output formatting for caresync.
//!
//! This module provides functions for formatting queue data as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::SyncError;
use crate::sync::{FlushReport, QueueItem, StatusSnapshot, SyncEvent};

/// Format queue items as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_items_json(items: &[QueueItem], title: &str) -> Result<String, SyncError> {
    let output = json!({
        "list": title,
        "count": items.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format a status snapshot as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_status_json(
    status: &StatusSnapshot,
    oldest_pending: Option<DateTime<Utc>>,
) -> Result<String, SyncError> {
    let mut value = serde_json::to_value(status)?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "oldest_pending".to_string(),
            json!(oldest_pending.map(|t| t.to_rfc3339())),
        );
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Format a flush report as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_report_json(report: &FlushReport) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Format an event as a single JSON line
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_event_json(event: &SyncEvent) -> Result<String, SyncError> {
    Ok(serde_json::to_string(event)?)
}

/// Format any serializable value as pretty JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
