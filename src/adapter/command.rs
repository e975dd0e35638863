//! Apply port backed by an external command.
//!
//! The command is run once per operation with the operation JSON on
//! stdin. Exit status 0 means the remote accepted the write; exit codes
//! listed in the failure policy are permanent rejections; anything else,
//! including a timeout or a spawn failure, is retryable.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::AdapterConfig;
use crate::error::SyncError;
use crate::sync::{ApplyOutcome, FailurePolicy, Operation, ResourceApplyPort};

/// Environment variable carrying the operation id.
pub const ENV_OPERATION_ID: &str = "CARESYNC_OPERATION_ID";
/// Environment variable carrying the operation kind.
pub const ENV_KIND: &str = "CARESYNC_KIND";
/// Environment variable carrying the resource type.
pub const ENV_RESOURCE_TYPE: &str = "CARESYNC_RESOURCE_TYPE";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const MAX_REASON_LEN: usize = 500;

/// Runs a configured program for each operation.
#[derive(Debug, Clone)]
pub struct CommandApplyPort {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    policy: FailurePolicy,
}

impl CommandApplyPort {
    /// Build a port from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `command` is empty.
    pub fn new(
        command: &[String],
        timeout: Duration,
        policy: FailurePolicy,
    ) -> Result<Self, SyncError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SyncError::Adapter("No adapter command configured".to_string()))?;

        if program.trim().is_empty() {
            return Err(SyncError::Adapter("Adapter program name is empty".to_string()));
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            policy,
        })
    }

    /// Build a port from the `adapter` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if no command is configured.
    pub fn from_config(config: &AdapterConfig) -> Result<Self, SyncError> {
        Self::new(
            &config.command,
            config.timeout(),
            FailurePolicy::with_permanent_codes(config.permanent_exit_codes.iter().copied()),
        )
    }

    fn spawn(&self, operation: &Operation) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .env(ENV_OPERATION_ID, &operation.id)
            .env(ENV_KIND, operation.kind.as_str())
            .env(ENV_RESOURCE_TYPE, &operation.resource_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
    }

    /// Poll until the child exits or the timeout elapses.
    fn wait(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn classify(&self, status: ExitStatus, stderr: &str) -> ApplyOutcome {
        if status.success() {
            return ApplyOutcome::Success;
        }

        let Some(code) = status.code() else {
            return ApplyOutcome::RetryableFailure(with_stderr("adapter killed by signal", stderr));
        };

        self.policy
            .classify(code, with_stderr(&format!("adapter exited with code {code}"), stderr))
    }
}

fn with_stderr(summary: &str, stderr: &str) -> String {
    let detail = stderr.trim();
    if detail.is_empty() {
        return summary.to_string();
    }

    let detail: String = detail.chars().take(MAX_REASON_LEN).collect();
    format!("{summary}: {detail}")
}

impl ResourceApplyPort for CommandApplyPort {
    fn apply(&self, operation: &Operation) -> ApplyOutcome {
        let input = match serde_json::to_vec(operation) {
            Ok(input) => input,
            Err(e) => return ApplyOutcome::PermanentFailure(format!("Failed to encode operation: {e}")),
        };

        let mut child = match self.spawn(operation) {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to start adapter");
                return ApplyOutcome::RetryableFailure(format!(
                    "Failed to start adapter {}: {e}",
                    self.program
                ));
            },
        };

        // Feed stdin and drain stderr off-thread so a chatty or
        // non-reading child cannot block on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(&input) {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        debug!(error = %e, "Failed to write adapter stdin");
                    }
                }
            })
        });
        let reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let waited = self.wait(&mut child);

        let outcome = match waited {
            Ok(Some(status)) => {
                let stderr = reader
                    .and_then(|handle| handle.join().ok())
                    .unwrap_or_default();
                self.classify(status, &stderr)
            },
            Ok(None) => {
                warn!(id = %operation.id, timeout_secs = self.timeout.as_secs(), "Adapter timed out; killing");
                let _ = child.kill();
                let _ = child.wait();
                ApplyOutcome::RetryableFailure(format!(
                    "adapter timed out after {}s",
                    self.timeout.as_secs()
                ))
            },
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                ApplyOutcome::RetryableFailure(format!("Failed to wait for adapter: {e}"))
            },
        };

        if let Some(handle) = writer {
            let _ = handle.join();
        }

        debug!(id = %operation.id, resource_type = %operation.resource_type, success = outcome.is_success(), "Adapter finished");
        outcome
    }
}
