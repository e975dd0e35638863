//! Output formatting for caresync.
//!
//! This module provides formatters for displaying queue data in various formats.

mod json;
mod pretty;

use chrono::{DateTime, Utc};

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::sync::{FlushReport, QueueItem, StatusSnapshot, SyncEvent};

pub use json::*;
pub use pretty::*;

/// Format queue items based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_items(
    items: &[QueueItem],
    title: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_items_pretty(items, title)),
        OutputFormat::Json => format_items_json(items, title),
    }
}

/// Format a status snapshot based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_status(
    status: &StatusSnapshot,
    oldest_pending: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_status_pretty(status, oldest_pending, Utc::now())),
        OutputFormat::Json => format_status_json(status, oldest_pending),
    }
}

/// Format a flush report based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_report(report: &FlushReport, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_report_pretty(report)),
        OutputFormat::Json => format_report_json(report),
    }
}

/// Format an event based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_event(event: &SyncEvent, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_event_pretty(event)),
        OutputFormat::Json => format_event_json(event),
    }
}
