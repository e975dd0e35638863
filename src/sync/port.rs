//! Resource apply port.
//!
//! The coordinator never talks to the remote server itself. It hands each
//! operation to a [`ResourceApplyPort`] and records the classified
//! outcome on the queue item.
//!
//! Implementations must be idempotent per operation id: delivery is
//! at-least-once, so the same operation can be applied again after a
//! call that timed out locally but succeeded remotely. The queue does not
//! deduplicate by content.

use std::collections::BTreeSet;

use serde::Serialize;

use super::operation::Operation;

/// Result of applying one operation remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The remote accepted the write
    Success,
    /// Transient failure (timeout, 5xx, connection lost); retry later
    RetryableFailure(String),
    /// The remote rejected the write (validation, authorization); never retried automatically
    PermanentFailure(String),
}

impl ApplyOutcome {
    /// Whether the outcome is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::RetryableFailure(reason) | Self::PermanentFailure(reason) => Some(reason),
        }
    }
}

/// Applies operations to the remote endpoint.
///
/// Implementations own their per-call timeout and report it as
/// [`ApplyOutcome::RetryableFailure`].
#[cfg_attr(test, mockall::automock)]
pub trait ResourceApplyPort: Send + Sync {
    /// Attempt to apply `operation` remotely.
    fn apply(&self, operation: &Operation) -> ApplyOutcome;
}

impl<F> ResourceApplyPort for F
where
    F: Fn(&Operation) -> ApplyOutcome + Send + Sync,
{
    fn apply(&self, operation: &Operation) -> ApplyOutcome {
        self(operation)
    }
}

/// Maps adapter status codes to retryable or permanent failures.
///
/// Which codes count as permanent is adapter policy, so it is data here
/// rather than a fixed rule in the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    permanent: BTreeSet<i32>,
}

impl FailurePolicy {
    /// Policy with an explicit set of permanent codes.
    #[must_use]
    pub fn with_permanent_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            permanent: codes.into_iter().collect(),
        }
    }

    /// HTTP-style default: client errors are permanent except request
    /// timeout (408) and rate limiting (429); everything else retries.
    #[must_use]
    pub fn http() -> Self {
        Self::with_permanent_codes(
            (400..500).filter(|code| *code != 408 && *code != 429),
        )
    }

    /// Whether `code` is classified as permanent.
    #[must_use]
    pub fn is_permanent(&self, code: i32) -> bool {
        self.permanent.contains(&code)
    }

    /// Classify a failed call with status `code`.
    #[must_use]
    pub fn classify(&self, code: i32, reason: impl Into<String>) -> ApplyOutcome {
        if self.is_permanent(code) {
            ApplyOutcome::PermanentFailure(reason.into())
        } else {
            ApplyOutcome::RetryableFailure(reason.into())
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::http()
    }
}
