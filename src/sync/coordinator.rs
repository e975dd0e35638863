//! Sync coordinator.
//!
//! Owns the flush cycle: drains pending queue items through the
//! [`ResourceApplyPort`], one single-flight pass at a time, triggered by
//! connectivity changes, a periodic timer, backoff retries, external wake
//! signals and explicit force-sync calls.
//!
//! Without a running scheduler every trigger executes inline on the
//! caller's thread. After [`SyncCoordinator::start`] triggers are handed
//! to a background thread that also drives the timer and backoff.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, SyncCompleted, SyncEvent};
use super::network::NetworkState;
use super::operation::{ItemStatus, OperationKind, QueueItem};
use super::port::{ApplyOutcome, ResourceApplyPort};
use super::queue::{OperationQueue, QueueCounts};
use super::status::{compute_status, StatusTracker, SyncStatus};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Callback run after a pass that leaves nothing pending.
pub type PostFlushHook = Box<dyn Fn() + Send + Sync>;

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Connectivity went from offline to online
    Connectivity,
    /// Periodic timer while online with pending work
    Timer,
    /// Backoff retry after an unfinished pass
    Retry,
    /// External wake signal, e.g. a background task runner
    Wake,
    /// A write was enqueued or re-queued
    QueueChanged,
    /// Explicit force-sync call
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connectivity => "connectivity",
            Self::Timer => "timer",
            Self::Retry => "retry",
            Self::Wake => "wake",
            Self::QueueChanged => "queue_changed",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// One item's failure during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub resource_type: String,
    pub kind: OperationKind,
    pub attempts: u32,
    pub error: String,
    /// Whether the item was dead-lettered
    pub dead_lettered: bool,
}

/// Summary of one flush pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub trigger: Trigger,
    /// Items handed to the apply port
    pub attempted: usize,
    pub succeeded: usize,
    /// Items returned to pending after a retryable failure
    pub retried: usize,
    /// Items dead-lettered during this pass
    pub failed: usize,
    /// Snapshot items whose state changed before their turn
    pub skipped: usize,
    /// Connectivity was lost before the snapshot was exhausted
    pub interrupted: bool,
    pub remaining_pending: usize,
    pub remaining_failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl FlushReport {
    fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            attempted: 0,
            succeeded: 0,
            retried: 0,
            failed: 0,
            skipped: 0,
            interrupted: false,
            remaining_pending: 0,
            remaining_failed: 0,
            failures: Vec::new(),
        }
    }

    /// Nothing failed, retried, or was left behind by a disconnect.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.retried == 0 && !self.interrupted
    }
}

/// Point-in-time view for `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: SyncStatus,
    pub online: bool,
    pub flushing: bool,
    pub pending_count: usize,
    pub failed_count: usize,
    pub completed_count: u64,
}

#[derive(Debug, Default)]
struct Backoff {
    consecutive: u32,
    next_retry: Option<Instant>,
}

/// Clears the single-flight flag when a pass ends, even by panic.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    queue: Arc<OperationQueue>,
    port: Arc<dyn ResourceApplyPort>,
    network: NetworkState,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    flushing: AtomicBool,
    tracker: StatusTracker,
    events: EventBus,
    hooks: RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>,
    backoff: Mutex<Backoff>,
    publish_lock: Mutex<()>,
}

impl Shared {
    fn publish_status(&self) {
        let _serialized = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let counts = self.queue.counts();
        let changed = self.tracker.observe(
            self.network.is_online(),
            counts.pending + counts.processing,
            counts.failed,
            self.clock.now(),
        );

        if let Some(changed) = changed {
            debug!(status = %changed.status, pending = changed.pending_count, failed = changed.failed_count, "Status changed");
            self.events.publish(&SyncEvent::StatusChanged(changed));
        }
    }

    fn flush(&self, trigger: Trigger) -> Result<Option<FlushReport>, SyncError> {
        if !self.network.is_online() {
            debug!(%trigger, "Offline; flush skipped");
            return Ok(None);
        }

        let Some(_flight) = FlightGuard::acquire(&self.flushing) else {
            debug!(%trigger, "Flush already running; trigger ignored");
            return Ok(None);
        };

        info!(%trigger, "Flush started");
        let result = self.run_pass(trigger);

        match &result {
            Ok(report) => info!(
                %trigger,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                remaining = report.remaining_pending,
                interrupted = report.interrupted,
                "Flush finished"
            ),
            Err(e) => error!(%trigger, error = %e, "Flush aborted"),
        }

        result.map(Some)
    }

    fn run_pass(&self, trigger: Trigger) -> Result<FlushReport, SyncError> {
        // Snapshot: writes enqueued from here on wait for the next pass.
        let snapshot = self.queue.pending();
        let mut report = FlushReport::new(trigger);
        let mut aborted = None;

        for item in &snapshot {
            if !self.network.is_online() {
                info!(remaining = snapshot.len() - report.attempted - report.skipped, "Connectivity lost; stopping pass");
                report.interrupted = true;
                break;
            }

            if let Err(e) = self.process_item(item, &mut report) {
                aborted = Some(e);
                break;
            }
        }

        if let Err(e) = self.queue.cleanup(self.config.failed_retention()) {
            warn!(error = %e, "Queue cleanup failed");
        }

        let counts = self.queue.counts();
        report.remaining_pending = counts.pending;
        report.remaining_failed = counts.failed;

        if counts.pending == 0 && aborted.is_none() {
            self.reset_backoff();
            self.run_hooks();
        } else {
            self.schedule_backoff();
        }

        let error = aborted
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| report.failures.last().map(|f| f.error.clone()));

        self.events.publish(&SyncEvent::SyncCompleted(SyncCompleted {
            success: aborted.is_none() && report.is_clean(),
            pending_count: counts.pending,
            failed_count: counts.failed,
            error,
        }));

        match aborted {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn process_item(&self, item: &QueueItem, report: &mut FlushReport) -> Result<(), SyncError> {
        if !self.queue.mark(&item.id, ItemStatus::Processing, None)? {
            debug!(id = %item.id, "Item changed since snapshot; skipped");
            report.skipped += 1;
            return Ok(());
        }
        report.attempted += 1;

        let attempts = self
            .queue
            .get(&item.id)
            .map_or(item.attempts + 1, |current| current.attempts);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.port.apply(&item.operation)))
            .unwrap_or_else(|panic| {
                ApplyOutcome::RetryableFailure(format!("apply panicked: {}", panic_message(&*panic)))
            });

        let op = &item.operation;
        match outcome {
            ApplyOutcome::Success => {
                self.queue.mark(&item.id, ItemStatus::Completed, None)?;
                report.succeeded += 1;
                debug!(id = %item.id, resource_type = %op.resource_type, attempts, "Operation applied");
            },
            ApplyOutcome::RetryableFailure(reason) => {
                let dead_lettered = attempts >= self.queue.max_retries();
                if dead_lettered {
                    self.queue.mark(&item.id, ItemStatus::Failed, Some(&reason))?;
                    report.failed += 1;
                    error!(id = %item.id, resource_type = %op.resource_type, attempts, error = %reason, "Retries exhausted; item dead-lettered");
                } else {
                    self.queue.mark(&item.id, ItemStatus::Pending, Some(&reason))?;
                    report.retried += 1;
                    warn!(id = %item.id, resource_type = %op.resource_type, attempts, error = %reason, "Retryable failure");
                }
                report.failures.push(item_failure(item, attempts, reason, dead_lettered));
            },
            ApplyOutcome::PermanentFailure(reason) => {
                self.queue.mark(&item.id, ItemStatus::Failed, Some(&reason))?;
                report.failed += 1;
                error!(id = %item.id, resource_type = %op.resource_type, attempts, error = %reason, "Permanent failure; item dead-lettered");
                report.failures.push(item_failure(item, attempts, reason, true));
            },
        }

        Ok(())
    }

    fn run_hooks(&self) {
        // Released before running so a hook may register another.
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
        for hook in &hooks {
            if catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                warn!("Post-flush hook panicked");
            }
        }
    }

    fn schedule_backoff(&self) {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        backoff.consecutive = backoff.consecutive.saturating_add(1);
        let delay = self.config.retry_delay(backoff.consecutive);
        backoff.next_retry = Some(Instant::now() + delay);
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), consecutive = backoff.consecutive, "Retry scheduled");
    }

    fn reset_backoff(&self) {
        *self.backoff.lock().unwrap_or_else(PoisonError::into_inner) = Backoff::default();
    }

    /// Take the retry deadline if it has passed.
    fn take_due_retry(&self, now: Instant) -> bool {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        match backoff.next_retry {
            Some(at) if at <= now => {
                backoff.next_retry = None;
                true
            },
            _ => false,
        }
    }

    fn next_retry(&self) -> Option<Instant> {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_retry
    }

    fn run_logged(&self, trigger: Trigger) {
        if let Err(e) = self.flush(trigger) {
            error!(%trigger, error = %e, "Scheduled flush failed");
        }
    }
}

fn item_failure(item: &QueueItem, attempts: u32, error: String, dead_lettered: bool) -> ItemFailure {
    ItemFailure {
        id: item.id.clone(),
        resource_type: item.operation.resource_type.clone(),
        kind: item.operation.kind,
        attempts,
        error,
        dead_lettered,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

enum Signal {
    Trigger(Trigger),
    Shutdown,
}

struct Scheduler {
    tx: Sender<Signal>,
    handle: JoinHandle<()>,
}

fn scheduler_loop(shared: &Shared, rx: &Receiver<Signal>) {
    const IDLE_WAIT: Duration = Duration::from_secs(3600);

    let poll = shared.config.poll_interval();
    let timer_enabled = !poll.is_zero();
    let mut next_poll = Instant::now() + poll;

    loop {
        let now = Instant::now();
        let mut deadline = now + IDLE_WAIT;
        if timer_enabled {
            deadline = deadline.min(next_poll);
        }
        if let Some(retry) = shared.next_retry() {
            deadline = deadline.min(retry);
        }

        match rx.recv_timeout(deadline.saturating_duration_since(now)) {
            Ok(Signal::Trigger(trigger)) => shared.run_logged(trigger),
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                if shared.take_due_retry(now) {
                    shared.run_logged(Trigger::Retry);
                }
                if timer_enabled && next_poll <= now {
                    next_poll = now + poll;
                    if shared.queue.pending_count() > 0 {
                        shared.run_logged(Trigger::Timer);
                    }
                }
            },
        }
    }

    debug!("Sync scheduler stopped");
}

/// Coordinates flushing the operation queue to the remote endpoint.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl SyncCoordinator {
    /// Build a coordinator over `queue`, applying through `port`.
    ///
    /// The initial status is published immediately.
    #[must_use]
    pub fn new(
        queue: Arc<OperationQueue>,
        port: Arc<dyn ResourceApplyPort>,
        network: NetworkState,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue,
            port,
            network,
            clock,
            config,
            flushing: AtomicBool::new(false),
            tracker: StatusTracker::new(),
            events: EventBus::new(),
            hooks: RwLock::new(Vec::new()),
            backoff: Mutex::new(Backoff::default()),
            publish_lock: Mutex::new(()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        shared.queue.on_change(Arc::new(move |_: QueueCounts| {
            if let Some(shared) = weak.upgrade() {
                shared.publish_status();
            }
        }));
        shared.publish_status();

        Self {
            shared,
            scheduler: Mutex::new(None),
        }
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.shared.queue
    }

    /// Shared connectivity flag.
    #[must_use]
    pub fn network(&self) -> &NetworkState {
        &self.shared.network
    }

    /// Subscribe to status and completion events.
    ///
    /// The current status is not replayed; call [`Self::get_status`] for it.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Register a hook run after each pass that drains the queue.
    pub fn add_post_flush_hook(&self, hook: PostFlushHook) {
        self.shared
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::from(hook));
    }

    /// Start the background scheduler. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), SyncError> {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("caresync-scheduler".to_string())
            .spawn(move || scheduler_loop(&shared, &rx))?;

        info!("Sync scheduler started");
        *scheduler = Some(Scheduler { tx, handle });
        Ok(())
    }

    /// Stop the background scheduler and wait for the current pass.
    pub fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(scheduler) = scheduler {
            let _ = scheduler.tx.send(Signal::Shutdown);
            if scheduler.handle.join().is_err() {
                error!("Sync scheduler thread panicked");
            }
        }
    }

    /// Whether the background scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether a pass is in progress.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.shared.flushing.load(Ordering::Acquire)
    }

    /// Route a trigger to the scheduler, or run it inline without one.
    ///
    /// Queue-change triggers are only honored by the scheduler so that
    /// writes never wait on the network.
    fn trigger(&self, trigger: Trigger) {
        let sent = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| s.tx.send(Signal::Trigger(trigger)).is_ok());

        if !sent && trigger != Trigger::QueueChanged {
            self.shared.run_logged(trigger);
        }
    }

    /// Persist a new write and nudge the scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be persisted.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        resource_type: &str,
        payload: serde_json::Value,
        priority: Option<i32>,
    ) -> Result<String, SyncError> {
        let id = self.shared.queue.enqueue(kind, resource_type, payload, priority)?;
        self.trigger(Trigger::QueueChanged);
        Ok(id)
    }

    /// Run one pass now on the calling thread.
    ///
    /// Returns `Ok(None)` when offline or when another pass is running.
    ///
    /// # Errors
    ///
    /// Returns an error if a queue write fails mid-pass.
    pub fn force_sync(&self) -> Result<Option<FlushReport>, SyncError> {
        self.shared.flush(Trigger::Manual)
    }

    /// External wake signal; handled like a timer tick.
    pub fn wake(&self) {
        self.trigger(Trigger::Wake);
    }

    /// Report connectivity from the network-state provider.
    ///
    /// An offline-to-online transition triggers a flush. Going offline
    /// stops a running pass before its next item.
    pub fn set_online(&self, online: bool) {
        let was_online = self.shared.network.set(online);
        if was_online != online {
            info!(online, "Connectivity changed");
        }
        self.shared.publish_status();

        if online && !was_online {
            self.trigger(Trigger::Connectivity);
        }
    }

    /// Re-queue one failed item.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be persisted.
    pub fn retry(&self, id: &str) -> Result<bool, SyncError> {
        let moved = self.shared.queue.retry(id)?;
        if moved {
            self.trigger(Trigger::QueueChanged);
        }
        Ok(moved)
    }

    /// Re-queue every failed item.
    ///
    /// # Errors
    ///
    /// Returns an error if a write cannot be persisted.
    pub fn retry_all_failed(&self) -> Result<usize, SyncError> {
        let count = self.shared.queue.retry_all_failed()?;
        if count > 0 {
            self.trigger(Trigger::QueueChanged);
        }
        Ok(count)
    }

    /// Current status, computed fresh.
    #[must_use]
    pub fn get_status(&self) -> StatusSnapshot {
        let counts = self.shared.queue.counts();
        let online = self.shared.network.is_online();
        let pending_count = counts.pending + counts.processing;

        StatusSnapshot {
            status: compute_status(online, pending_count, counts.failed),
            online,
            flushing: self.is_flushing(),
            pending_count,
            failed_count: counts.failed,
            completed_count: counts.completed,
        }
    }

    /// Hard reset: drop every queued item and forget backoff state.
    ///
    /// Subscribers always receive a fresh status afterwards, even if it
    /// matches the last one they saw.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub fn clear_all(&self) -> Result<(), SyncError> {
        self.shared.tracker.reset();
        self.shared.queue.clear()?;
        self.shared.reset_backoff();
        Ok(())
    }

    /// Pending items in dequeue order, for diagnostics.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<QueueItem> {
        self.shared.queue.pending()
    }

    /// Dead-lettered items.
    #[must_use]
    pub fn failed_operations(&self) -> Vec<QueueItem> {
        self.shared.queue.failed()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::Database;
    use crate::sync::port::MockResourceApplyPort;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn queue_with(config: &SyncConfig) -> Arc<OperationQueue> {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
        Arc::new(
            OperationQueue::open(Box::new(Database::open_in_memory().unwrap()), clock, config)
                .unwrap(),
        )
    }

    fn coordinator(port: MockResourceApplyPort, online: bool) -> SyncCoordinator {
        let config = SyncConfig::default();
        SyncCoordinator::new(
            queue_with(&config),
            Arc::new(port),
            NetworkState::new(online),
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())),
            config,
        )
    }

    fn drain(rx: &Receiver<SyncEvent>) -> Vec<SyncEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_force_sync_applies_in_order() {
        let mut port = MockResourceApplyPort::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        port.expect_apply().times(2).returning(move |op| {
            record.lock().unwrap().push(op.kind);
            ApplyOutcome::Success
        });

        let sync = coordinator(port, false);
        sync.enqueue(OperationKind::Create, "Patient", json!({"id": "P1"}), Some(5)).unwrap();
        sync.enqueue(OperationKind::Update, "Patient", json!({"id": "P1"}), Some(5)).unwrap();

        sync.set_online(true);

        assert_eq!(*seen.lock().unwrap(), vec![OperationKind::Create, OperationKind::Update]);
        let status = sync.get_status();
        assert_eq!(status.status, SyncStatus::Synced);
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.completed_count, 2);
    }

    #[test]
    fn test_offline_force_sync_is_noop() {
        let mut port = MockResourceApplyPort::new();
        port.expect_apply().never();

        let sync = coordinator(port, false);
        sync.enqueue(OperationKind::Create, "Patient", json!({}), None).unwrap();

        assert!(sync.force_sync().unwrap().is_none());
        assert_eq!(sync.get_status().status, SyncStatus::Offline);
    }

    #[test]
    fn test_permanent_failure_dead_letters_immediately() {
        let mut port = MockResourceApplyPort::new();
        port.expect_apply()
            .returning(|_| ApplyOutcome::PermanentFailure("HTTP 422: invalid birthDate".to_string()));

        let sync = coordinator(port, true);
        let id = sync.enqueue(OperationKind::Create, "Patient", json!({}), None).unwrap();

        let report = sync.force_sync().unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].dead_lettered);

        let item = sync.queue().get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 1);
        assert_eq!(sync.get_status().status, SyncStatus::Error);
    }

    #[test]
    fn test_retryable_failure_until_cap() {
        let mut port = MockResourceApplyPort::new();
        port.expect_apply()
            .times(4)
            .returning(|_| ApplyOutcome::RetryableFailure("timeout".to_string()));

        let sync = coordinator(port, true);
        let id = sync.enqueue(OperationKind::Delete, "Patient", json!({"id": "P2"}), None).unwrap();

        for expected_attempts in 1..=2 {
            let report = sync.force_sync().unwrap().unwrap();
            assert_eq!(report.retried, 1);
            let item = sync.queue().get(&id).unwrap();
            assert_eq!(item.status, ItemStatus::Pending);
            assert_eq!(item.attempts, expected_attempts);
        }

        let report = sync.force_sync().unwrap().unwrap();
        assert_eq!(report.failed, 1);
        let item = sync.queue().get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 3);

        // Nothing pending: the next pass does not touch the failed item.
        let report = sync.force_sync().unwrap().unwrap();
        assert_eq!(report.attempted, 0);

        assert_eq!(sync.retry_all_failed().unwrap(), 1);
        let item = sync.queue().get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 3);

        sync.force_sync().unwrap();
        let item = sync.queue().get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 4);
    }

    #[test]
    fn test_panic_in_port_is_retryable() {
        let port = |_: &crate::sync::Operation| -> ApplyOutcome { panic!("adapter bug") };
        let config = SyncConfig::default();
        let sync = SyncCoordinator::new(
            queue_with(&config),
            Arc::new(port),
            NetworkState::new(true),
            Arc::new(crate::clock::SystemClock),
            config,
        );
        let id = sync.enqueue(OperationKind::Update, "Encounter", json!({}), None).unwrap();

        let report = sync.force_sync().unwrap().unwrap();
        assert_eq!(report.retried, 1);
        assert!(report.failures[0].error.contains("adapter bug"));

        let item = sync.queue().get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(!sync.is_flushing());
    }

    #[test]
    fn test_one_failure_does_not_abort_pass() {
        let mut port = MockResourceApplyPort::new();
        port.expect_apply().returning(|op| {
            if op.resource_type == "Observation" {
                ApplyOutcome::PermanentFailure("HTTP 400".to_string())
            } else {
                ApplyOutcome::Success
            }
        });

        let sync = coordinator(port, true);
        sync.enqueue(OperationKind::Create, "Observation", json!({}), Some(9)).unwrap();
        sync.enqueue(OperationKind::Create, "Patient", json!({}), Some(1)).unwrap();

        let report = sync.force_sync().unwrap().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_going_offline_stops_remaining_items() {
        let network = NetworkState::new(true);
        let link = network.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let port = move |_: &crate::sync::Operation| {
            counter.fetch_add(1, Ordering::SeqCst);
            link.set(false);
            ApplyOutcome::Success
        };

        let config = SyncConfig::default();
        let sync = SyncCoordinator::new(
            queue_with(&config),
            Arc::new(port),
            network,
            Arc::new(crate::clock::SystemClock),
            config,
        );
        let first = sync.enqueue(OperationKind::Create, "Patient", json!({}), Some(2)).unwrap();
        let second = sync.enqueue(OperationKind::Create, "Patient", json!({}), Some(1)).unwrap();

        let report = sync.force_sync().unwrap().unwrap();

        assert!(report.interrupted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // In-flight item still gets its outcome recorded.
        assert!(sync.queue().get(&first).is_none());
        let second = sync.queue().get(&second).unwrap();
        assert_eq!(second.status, ItemStatus::Pending);
        assert_eq!(second.attempts, 0);
    }

    #[test]
    fn test_post_flush_hook_only_when_drained() {
        let mut port = MockResourceApplyPort::new();
        let mut outcomes = vec![
            ApplyOutcome::Success,
            ApplyOutcome::RetryableFailure("503".to_string()),
        ];
        port.expect_apply()
            .returning(move |_| outcomes.pop().unwrap_or(ApplyOutcome::Success));

        let sync = coordinator(port, true);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        sync.add_post_flush_hook(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sync.enqueue(OperationKind::Update, "Patient", json!({}), None).unwrap();

        sync.force_sync().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sync.force_sync().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_are_deduplicated() {
        let mut port = MockResourceApplyPort::new();
        port.expect_apply().returning(|_| ApplyOutcome::Success);

        let sync = coordinator(port, false);
        let rx = sync.subscribe();

        let id = sync.enqueue(OperationKind::Create, "Patient", json!({}), None).unwrap();
        // Illegal marks must not produce notifications.
        assert!(!sync.queue().mark(&id, ItemStatus::Pending, None).unwrap());
        assert!(!sync.queue().mark(&id, ItemStatus::Failed, None).unwrap());
        sync.set_online(false);

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SyncEvent::StatusChanged(changed) => {
                assert_eq!(changed.status, SyncStatus::Offline);
                assert_eq!(changed.pending_count, 1);
            },
            SyncEvent::SyncCompleted(_) => panic!("unexpected completion"),
        }

        sync.set_online(true);
        let events = drain(&rx);
        let statuses: Vec<SyncStatus> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::StatusChanged(c) => Some(c.status),
                SyncEvent::SyncCompleted(_) => None,
            })
            .collect();
        assert_eq!(statuses, vec![SyncStatus::Pending, SyncStatus::Synced]);

        let completed: Vec<&SyncCompleted> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::SyncCompleted(c) => Some(c),
                SyncEvent::StatusChanged(_) => None,
            })
            .collect();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].success);
        assert_eq!(completed[0].pending_count, 0);
    }

    #[test]
    fn test_clear_all() {
        let port = MockResourceApplyPort::new();
        let sync = coordinator(port, false);
        sync.enqueue(OperationKind::Create, "Patient", json!({}), None).unwrap();

        sync.clear_all().unwrap();
        assert!(sync.pending_operations().is_empty());
        assert_eq!(sync.get_status().pending_count, 0);
    }

    #[test]
    fn test_clear_all_renotifies_status() {
        let sync = coordinator(MockResourceApplyPort::new(), false);
        let rx = sync.subscribe();

        // Same (offline, 0, 0) tuple as the initial status.
        sync.clear_all().unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SyncEvent::StatusChanged(changed)
                if changed.status == SyncStatus::Offline && changed.pending_count == 0
        ));
    }

    #[test]
    fn test_hook_can_register_hooks() {
        let sync = Arc::new(coordinator(MockResourceApplyPort::new(), true));
        let runs = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&sync);
        let counter = runs.clone();
        sync.add_post_flush_hook(Box::new(move || {
            if let Some(sync) = weak.upgrade() {
                let counter = counter.clone();
                sync.add_post_flush_hook(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }));

        sync.force_sync().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sync.force_sync().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flight_guard() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag).unwrap();
        assert!(FlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
