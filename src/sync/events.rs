//! Notifications emitted by the coordinator.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::status::SyncStatus;

/// The coarse status or one of its counts changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChanged {
    pub status: SyncStatus,
    pub pending_count: usize,
    pub failed_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A flush pass finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncCompleted {
    /// No item failed, retried or was left behind by a disconnect
    pub success: bool,
    pub pending_count: usize,
    pub failed_count: usize,
    /// Last error seen during the pass
    pub error: Option<String>,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SyncEvent {
    StatusChanged(StatusChanged),
    SyncCompleted(SyncCompleted),
}

/// Fan-out of events to channel subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping dead ones.
    pub fn publish(&self, event: &SyncEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
