//! Offline mutation queue and sync coordinator.
//!
//! Local writes are recorded as [`Operation`]s and persisted before the
//! call returns. The [`SyncCoordinator`] drains them through a
//! [`ResourceApplyPort`] whenever connectivity allows.
//!
//! Features:
//! - Priority ordering with FIFO within a priority level
//! - Retry cap with dead-lettering and explicit retry
//! - Single-flight flush passes driven by several triggers
//! - Deduplicated status notifications

pub mod coordinator;
pub mod events;
pub mod network;
pub mod operation;
pub mod port;
pub mod queue;
pub mod status;

pub use coordinator::{FlushReport, ItemFailure, PostFlushHook, StatusSnapshot, SyncCoordinator, Trigger};
pub use events::{EventBus, StatusChanged, SyncCompleted, SyncEvent};
pub use network::NetworkState;
pub use operation::{ItemStatus, Operation, OperationKind, QueueItem, QueueRecord};
pub use port::{ApplyOutcome, FailurePolicy, ResourceApplyPort};
pub use queue::{ChangeListener, OperationQueue, QueueCounts, INTERRUPTED_ERROR};
pub use status::{compute_status, StatusTracker, SyncStatus};
