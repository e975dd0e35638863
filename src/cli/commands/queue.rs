//! Queue management commands.
//!
//! These work directly on the durable queue and never contact the adapter.

use std::io::Read;

use colored::Colorize;
use serde_json::json;

use super::Context;
use crate::cli::args::{KindArg, OutputFormat, StatusArg};
use crate::error::SyncError;
use crate::output::{format_items, to_json};
use crate::sync::ItemStatus;

/// Read a payload argument: literal JSON, `@path`, or `-` for stdin.
fn read_payload(arg: &str) -> Result<serde_json::Value, SyncError> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).map_err(|e| {
            SyncError::InvalidInput(format!("Failed to read payload file {path}: {e}"))
        })?
    } else {
        arg.to_string()
    };

    serde_json::from_str(&text)
        .map_err(|e| SyncError::InvalidInput(format!("Payload is not valid JSON: {e}")))
}

/// Queue a write.
///
/// # Errors
///
/// Returns an error if the payload is invalid or the write cannot be persisted.
pub fn enqueue(
    ctx: &Context,
    kind: KindArg,
    resource_type: &str,
    payload: &str,
    priority: Option<i32>,
) -> Result<String, SyncError> {
    let payload = read_payload(payload)?;
    let queue = ctx.open_queue()?;
    let id = queue.enqueue(kind.into(), resource_type, payload, priority)?;

    match ctx.format {
        OutputFormat::Json => {
            let item = queue
                .get(&id)
                .ok_or_else(|| SyncError::NotFound(format!("Queued item {id}")))?;
            to_json(&item)
        },
        OutputFormat::Pretty => Ok(format!(
            "{} Queued {} {} ({})",
            "✓".green(),
            crate::sync::OperationKind::from(kind),
            resource_type.bold(),
            id.dimmed()
        )),
    }
}

/// List queued items in dequeue order.
///
/// # Errors
///
/// Returns an error if the queue cannot be opened or formatting fails.
pub fn list(ctx: &Context, status: Option<StatusArg>, limit: Option<usize>) -> Result<String, SyncError> {
    let queue = ctx.open_queue()?;

    let (items, title) = match status.map(ItemStatus::from) {
        Some(ItemStatus::Pending) => (queue.pending(), "Pending"),
        Some(ItemStatus::Failed) => (queue.failed(), "Failed"),
        Some(status) => (
            queue
                .items()
                .into_iter()
                .filter(|item| item.status == status)
                .collect(),
            "Processing",
        ),
        None => (queue.items(), "Queue"),
    };

    let items = match limit {
        Some(limit) => items.into_iter().take(limit).collect(),
        None => items,
    };

    format_items(&items, title, ctx.format)
}

/// Re-queue one failed item, or all of them.
///
/// # Errors
///
/// Returns an error if the item is not failed or the write fails.
pub fn retry(ctx: &Context, id: Option<&str>, all: bool) -> Result<String, SyncError> {
    let queue = ctx.open_queue()?;

    let count = if all {
        queue.retry_all_failed()?
    } else {
        let id = id.ok_or_else(|| SyncError::InvalidInput("Specify an item id or --all".to_string()))?;
        if !queue.retry(id)? {
            return Err(SyncError::NotFound(format!("No failed item with id {id}")));
        }
        1
    };

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "requeued": count })),
        OutputFormat::Pretty => Ok(if count == 0 {
            "No failed items to retry".to_string()
        } else {
            format!("{} Re-queued {count} item(s)", "✓".green())
        }),
    }
}

/// Remove failed items past the retention window.
///
/// # Errors
///
/// Returns an error if the store write fails.
pub fn cleanup(ctx: &Context, older_than_hours: Option<u64>) -> Result<String, SyncError> {
    let mut sync_config = ctx.config.sync.clone();
    if let Some(hours) = older_than_hours {
        sync_config.failed_retention_hours = hours;
    }

    let queue = ctx.open_queue()?;
    let removed = queue.cleanup(sync_config.failed_retention())?;

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "removed": removed })),
        OutputFormat::Pretty => Ok(format!("Removed {removed} item(s)")),
    }
}

/// Discard one item.
///
/// # Errors
///
/// Returns an error if the item does not exist or the write fails.
pub fn remove(ctx: &Context, id: &str) -> Result<String, SyncError> {
    let queue = ctx.open_queue()?;
    if !queue.remove(id)? {
        return Err(SyncError::NotFound(format!("No queued item with id {id}")));
    }

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "removed": id })),
        OutputFormat::Pretty => Ok(format!("{} Removed {}", "✓".green(), id.dimmed())),
    }
}

/// Discard every item.
///
/// # Errors
///
/// Returns an error without `--force`, or if the store cannot be cleared.
pub fn clear(ctx: &Context, force: bool) -> Result<String, SyncError> {
    if !force {
        return Err(SyncError::InvalidInput(
            "Refusing to discard unsent writes without --force".to_string(),
        ));
    }

    let queue = ctx.open_queue()?;
    let discarded = queue.items().len();
    queue.clear()?;

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "discarded": discarded })),
        OutputFormat::Pretty => Ok(format!("Discarded {discarded} item(s)")),
    }
}
