use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::sync::{FlushReport, ItemStatus, QueueItem, StatusSnapshot, SyncEvent, SyncStatus};

/// Errors shown in a report before eliding the rest.
const MAX_REPORTED_ERRORS: usize = 3;

fn status_icon(status: ItemStatus) -> colored::ColoredString {
    match status {
        ItemStatus::Pending => "○".white(),
        ItemStatus::Processing => "◐".cyan(),
        ItemStatus::Failed => "✗".red(),
        ItemStatus::Completed => "✓".green(),
    }
}

fn sync_status_label(status: SyncStatus) -> colored::ColoredString {
    match status {
        SyncStatus::Synced => "synced".green(),
        SyncStatus::Pending => "pending".yellow(),
        SyncStatus::Offline => "offline".dimmed(),
        SyncStatus::Error => "error".red(),
    }
}

/// Human age of `then` relative to `now`.
fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(then);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

/// Format queue items as a list
pub fn format_items_pretty(items: &[QueueItem], title: &str) -> String {
    if items.is_empty() {
        return format!("{title} (0 items)\n  No items");
    }

    let mut output = format!("{} ({} items)\n", title, items.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for item in items {
        let short_id: String = item.id.chars().take(8).collect();
        let mut line = format!(
            "{} {} {}",
            status_icon(item.status),
            short_id.dimmed(),
            item.operation.label().bold()
        );

        if item.priority != 0 {
            line.push_str(&format!("  {}", format!("p{}", item.priority).cyan()));
        }

        if item.attempts > 0 {
            line.push_str(&format!("  {}", format!("{} attempts", item.attempts).yellow()));
        }

        line.push_str(&format!(
            "  {}",
            item.operation.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        ));

        if let Some(error) = &item.last_error {
            line.push_str(&format!("\n    {}", error.red()));
        }

        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format the coordinator status
pub fn format_status_pretty(
    status: &StatusSnapshot,
    oldest_pending: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    let mut lines = Vec::new();

    lines.push(format!("{} {}", "Sync Status:".bold(), sync_status_label(status.status)));
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Network:    {}",
        if status.online { "online".green() } else { "offline".dimmed() }
    ));
    lines.push(format!(
        "  Pending:    {} {}",
        status.pending_count,
        if status.pending_count > 0 { "writes waiting".dimmed() } else { "".dimmed() }
    ));
    lines.push(format!(
        "  Failed:     {} {}",
        status.failed_count,
        if status.failed_count > 0 { "writes need attention".red() } else { "".normal() }
    ));
    lines.push(format!("  Completed:  {} {}", status.completed_count, "this session".dimmed()));

    if let Some(oldest) = oldest_pending {
        lines.push(format!("  Oldest:     {}", format_age(oldest, now).dimmed()));
    }

    if status.failed_count > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'caresync retry --all' to re-queue failed writes"
                .dimmed()
                .to_string(),
        );
    } else if status.pending_count > 0 {
        lines.push(String::new());
        lines.push("Run 'caresync sync' to apply pending writes".dimmed().to_string());
    }

    lines.join("\n")
}

/// Format a flush report
pub fn format_report_pretty(report: &FlushReport) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "Sync completed: {} operations ({})",
        report.attempted, report.trigger
    ));
    lines.push("─".repeat(40));

    if report.succeeded > 0 {
        lines.push(format!("  {} {}", "✓".green(), format!("{} succeeded", report.succeeded).green()));
    }
    if report.retried > 0 {
        lines.push(format!("  {} {}", "↻".yellow(), format!("{} will retry", report.retried).yellow()));
    }
    if report.failed > 0 {
        lines.push(format!("  {} {}", "✗".red(), format!("{} failed", report.failed).red()));
    }
    if report.skipped > 0 {
        lines.push(format!("  {} {}", "○".yellow(), format!("{} skipped", report.skipped).yellow()));
    }
    if report.interrupted {
        lines.push(format!("  {} {}", "!".yellow(), "interrupted: connectivity lost".yellow()));
    }

    if !report.failures.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for failure in report.failures.iter().take(MAX_REPORTED_ERRORS) {
            lines.push(format!(
                "  - {} {}: {}",
                failure.kind, failure.resource_type, failure.error
            ));
        }
        if report.failures.len() > MAX_REPORTED_ERRORS {
            lines.push(format!(
                "  ... and {} more",
                report.failures.len() - MAX_REPORTED_ERRORS
            ));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "{} pending, {} failed",
        report.remaining_pending, report.remaining_failed
    ));

    lines.join("\n")
}

/// Format an event as one line
pub fn format_event_pretty(event: &SyncEvent) -> String {
    match event {
        SyncEvent::StatusChanged(changed) => format!(
            "{} {} {} pending, {} failed",
            changed.timestamp.format("%H:%M:%S").to_string().dimmed(),
            sync_status_label(changed.status),
            changed.pending_count,
            changed.failed_count
        ),
        SyncEvent::SyncCompleted(done) => {
            let head = if done.success { "✓ sync completed".green() } else { "✗ sync incomplete".red() };
            let mut line = format!("{head} {} pending, {} failed", done.pending_count, done.failed_count);
            if let Some(error) = &done.error {
                line.push_str(&format!(": {error}"));
            }
            line
        },
    }
}
