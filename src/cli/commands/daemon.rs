//! Foreground coordinator driven by control lines on stdin.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde_json::json;
use tracing::{info, warn};

use super::Context;
use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::output::{format_event, format_report, format_status, to_json};
use crate::sync::{OperationKind, SyncCoordinator};

/// Run the coordinator until `quit` or end of input.
///
/// # Errors
///
/// Returns an error if no adapter is configured, the scheduler cannot
/// start, or output cannot be written.
pub fn daemon(ctx: &Context, offline: bool) -> Result<String, SyncError> {
    let coordinator = ctx.coordinator(!offline)?;
    let out = Arc::new(Mutex::new(io::stdout()));
    serve(coordinator, io::stdin().lock(), &out, ctx.format)?;
    Ok(String::new())
}

fn emit<W: Write>(out: &Mutex<W>, text: &str) -> io::Result<()> {
    let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{text}")?;
    out.flush()
}

/// Serve control lines from `input`, writing events and replies to `out`.
fn serve<R, W>(
    coordinator: SyncCoordinator,
    input: R,
    out: &Arc<Mutex<W>>,
    format: OutputFormat,
) -> Result<(), SyncError>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let events = coordinator.subscribe();
    let printer = {
        let out = Arc::clone(out);
        thread::spawn(move || {
            for event in events {
                match format_event(&event, format) {
                    Ok(line) => {
                        let _ = emit(&out, &line);
                    },
                    Err(e) => warn!(error = %e, "Failed to format event"),
                }
            }
        })
    };

    coordinator.start()?;
    info!(online = coordinator.network().is_online(), "Daemon started");

    // Kick the scheduler so items left from earlier runs go out promptly.
    coordinator.wake();

    let result = control_loop(&coordinator, input, out, format);

    coordinator.shutdown();
    drop(coordinator);
    let _ = printer.join();
    info!("Daemon stopped");

    result
}

fn control_loop<R, W>(
    coordinator: &SyncCoordinator,
    input: R,
    out: &Mutex<W>,
    format: OutputFormat,
) -> Result<(), SyncError>
where
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let line = line?;
        let (command, rest) = line
            .trim()
            .split_once(char::is_whitespace)
            .map_or((line.trim(), ""), |(c, r)| (c, r.trim()));

        let reply = match command {
            "" => continue,
            "online" => {
                coordinator.set_online(true);
                continue;
            },
            "offline" => {
                coordinator.set_online(false);
                continue;
            },
            "wake" => {
                coordinator.wake();
                continue;
            },
            "sync" => match coordinator.force_sync()? {
                Some(report) => format_report(&report, format),
                None => Ok("sync skipped: offline or already running".to_string()),
            },
            "status" => {
                let counts = coordinator.queue().counts();
                format_status(&coordinator.get_status(), counts.oldest_pending, format)
            },
            "enqueue" => enqueue(coordinator, rest, format),
            "retry" => retry(coordinator, rest, format),
            "quit" | "exit" => break,
            other => Ok(format!("unknown command: {other}")),
        };

        match reply {
            Ok(text) => emit(out, &text)?,
            Err(e @ (SyncError::InvalidInput(_) | SyncError::NotFound(_))) => {
                emit(out, &format!("error: {e}"))?;
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// `enqueue <kind> <resource-type> [priority] [payload-json]`
fn enqueue(coordinator: &SyncCoordinator, args: &str, format: OutputFormat) -> Result<String, SyncError> {
    let mut parts = args.splitn(3, char::is_whitespace);
    let kind: OperationKind = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::InvalidInput("usage: enqueue <kind> <resource-type> [priority] [payload]".to_string()))?
        .parse()?;
    let resource_type = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::InvalidInput("enqueue needs a resource type".to_string()))?;

    let rest = parts.next().unwrap_or("").trim();
    let (priority, payload) = if rest.is_empty() || rest.starts_with(['{', '[']) {
        (None, rest)
    } else {
        let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let priority = first.parse::<i32>().map_err(|_| {
            SyncError::InvalidInput(format!("Priority must be an integer, got {first}"))
        })?;
        (Some(priority), tail.trim())
    };

    let payload = if payload.is_empty() {
        json!({})
    } else {
        serde_json::from_str(payload)
            .map_err(|e| SyncError::InvalidInput(format!("Payload is not valid JSON: {e}")))?
    };

    let id = coordinator.enqueue(kind, resource_type, payload, priority)?;
    match format {
        OutputFormat::Json => to_json(&json!({ "queued": id })),
        OutputFormat::Pretty => Ok(format!("queued {kind} {resource_type} ({id})")),
    }
}

/// `retry <id>` or `retry all`
fn retry(coordinator: &SyncCoordinator, args: &str, format: OutputFormat) -> Result<String, SyncError> {
    let count = match args {
        "" => return Err(SyncError::InvalidInput("usage: retry <id> | retry all".to_string())),
        "all" => coordinator.retry_all_failed()?,
        id => {
            if !coordinator.retry(id)? {
                return Err(SyncError::NotFound(format!("No failed item with id {id}")));
            }
            1
        },
    };

    match format {
        OutputFormat::Json => to_json(&json!({ "requeued": count })),
        OutputFormat::Pretty => Ok(format!("re-queued {count} item(s)")),
    }
}
