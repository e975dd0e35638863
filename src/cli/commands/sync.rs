//! Status and flush commands.

use colored::Colorize;
use serde_json::json;

use super::Context;
use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::output::{format_report, format_status, to_json};
use crate::sync::{compute_status, StatusSnapshot};

/// Show the sync status without contacting the adapter.
///
/// # Errors
///
/// Returns an error if the queue cannot be opened or formatting fails.
pub fn status(ctx: &Context, offline: bool) -> Result<String, SyncError> {
    let queue = ctx.open_queue()?;
    let counts = queue.counts();
    let online = !offline;
    let pending_count = counts.pending + counts.processing;

    let snapshot = StatusSnapshot {
        status: compute_status(online, pending_count, counts.failed),
        online,
        flushing: false,
        pending_count,
        failed_count: counts.failed,
        completed_count: counts.completed,
    };

    format_status(&snapshot, counts.oldest_pending, ctx.format)
}

/// Run one flush pass through the configured adapter.
///
/// # Errors
///
/// Returns an error if no adapter is configured or a queue write fails.
pub fn sync(ctx: &Context, offline: bool) -> Result<String, SyncError> {
    let coordinator = ctx.coordinator(!offline)?;

    match coordinator.force_sync()? {
        Some(report) => format_report(&report, ctx.format),
        None => {
            let pending = coordinator.get_status().pending_count;
            match ctx.format {
                OutputFormat::Json => to_json(&json!({
                    "skipped": "offline",
                    "pending_count": pending,
                })),
                OutputFormat::Pretty => Ok(format!(
                    "{} Offline; {pending} write(s) left queued",
                    "○".yellow()
                )),
            }
        },
    }
}
