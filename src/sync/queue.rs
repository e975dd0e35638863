//! The operation queue.
//!
//! Orders pending items, enforces the status transition table and the
//! retry cap, and writes every mutation through to the durable store
//! before touching the in-memory view. A single mutex guards both; it is
//! held only for the duration of one call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::operation::{dequeue_order, ItemStatus, Operation, OperationKind, QueueItem, QueueRecord};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::storage::QueueStore;

/// Error recorded on items that were mid-apply when the process stopped
/// and had no attempts left.
pub const INTERRUPTED_ERROR: &str = "interrupted after final attempt";

/// Callback invoked after every successful mutation.
pub type ChangeListener = Arc<dyn Fn(QueueCounts) + Send + Sync>;

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Items waiting for a pass
    pub pending: usize,
    /// Items currently handed to the apply port
    pub processing: usize,
    /// Dead-lettered items
    pub failed: usize,
    /// Items completed since the queue was opened
    pub completed: u64,
    /// Creation time of the oldest pending item
    pub oldest_pending: Option<DateTime<Utc>>,
}

struct QueueState {
    store: Box<dyn QueueStore>,
    items: HashMap<String, QueueItem>,
    next_seq: i64,
    completed: u64,
}

impl QueueState {
    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            completed: self.completed,
            ..QueueCounts::default()
        };

        for item in self.items.values() {
            match item.status {
                ItemStatus::Pending => {
                    counts.pending += 1;
                    let created = item.operation.created_at;
                    if counts.oldest_pending.map_or(true, |oldest| created < oldest) {
                        counts.oldest_pending = Some(created);
                    }
                },
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Completed => counts.completed += 1,
            }
        }

        counts
    }

    fn sorted(&self, status: Option<ItemStatus>) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .items
            .values()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .cloned()
            .collect();
        items.sort_by(dequeue_order);
        items
    }

    /// Persist `item`, then replace the in-memory copy.
    fn commit(&mut self, item: QueueItem) -> Result<(), SyncError> {
        self.store.put(&QueueRecord::from(&item))?;
        self.items.insert(item.id.clone(), item);
        Ok(())
    }
}

/// Durable, ordered queue of local mutations.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    default_priority: i32,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl OperationQueue {
    /// Load the queue from `store`.
    ///
    /// Items left in `Processing` by a previous process are returned to
    /// `Pending`, or dead-lettered if they had used their last attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or recovery writes fail.
    pub fn open(
        store: Box<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        let records = store.load_all()?;
        let next_seq = records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;

        let mut state = QueueState {
            store,
            items: HashMap::with_capacity(records.len()),
            next_seq,
            completed: 0,
        };

        let now = clock.now();
        for record in records {
            let mut item = QueueItem::from(record);

            if item.status == ItemStatus::Processing {
                item.last_attempt_at = Some(now);
                if item.attempts >= config.max_retries {
                    item.status = ItemStatus::Failed;
                    item.last_error = Some(INTERRUPTED_ERROR.to_string());
                } else {
                    item.status = ItemStatus::Pending;
                }
                warn!(
                    id = %item.id,
                    resource_type = %item.operation.resource_type,
                    attempts = item.attempts,
                    status = %item.status,
                    "Recovered item interrupted mid-apply"
                );
                state.commit(item)?;
            } else {
                state.items.insert(item.id.clone(), item);
            }
        }

        debug!(items = state.items.len(), "Operation queue loaded");

        Ok(Self {
            state: Mutex::new(state),
            clock,
            max_retries: config.max_retries,
            default_priority: config.default_priority,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Retry cap this queue enforces.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Register a callback run after every mutation.
    pub fn on_change(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, counts: QueueCounts) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(counts);
        }
    }

    /// Persist a new operation and return its id.
    ///
    /// Uses the configured default priority when `priority` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; nothing is queued then.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        resource_type: &str,
        payload: serde_json::Value,
        priority: Option<i32>,
    ) -> Result<String, SyncError> {
        if resource_type.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "resource_type must not be empty".to_string(),
            ));
        }

        let operation = Operation::new(kind, resource_type, payload, self.clock.now());
        let id = operation.id.clone();

        let counts = {
            let mut state = self.lock();
            let item = QueueItem::new(
                operation,
                priority.unwrap_or(self.default_priority),
                state.next_seq,
            );
            state.commit(item)?;
            state.next_seq += 1;
            state.counts()
        };

        info!(id = %id, kind = %kind, resource_type, "Operation enqueued");
        self.notify(counts);
        Ok(id)
    }

    /// Pending items in dequeue order. Returns a snapshot.
    #[must_use]
    pub fn pending(&self) -> Vec<QueueItem> {
        self.lock().sorted(Some(ItemStatus::Pending))
    }

    /// Dead-lettered items in dequeue order.
    #[must_use]
    pub fn failed(&self) -> Vec<QueueItem> {
        self.lock().sorted(Some(ItemStatus::Failed))
    }

    /// Every item in dequeue order.
    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().sorted(None)
    }

    /// Look up one item.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.lock().items.get(id).cloned()
    }

    /// Counts by status.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        self.lock().counts()
    }

    /// Number of pending items.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.counts().pending
    }

    /// Number of failed items.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.counts().failed
    }

    /// Number of items completed since the queue was opened.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.counts().completed
    }

    /// Move an item to `status`.
    ///
    /// Returns `Ok(false)` without side effects when the item is unknown,
    /// the transition is not in the legal table, or a retry would exceed
    /// the cap. Entering `Processing` counts an attempt. `Completed`
    /// removes the item from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; the item is unchanged then.
    pub fn mark(
        &self,
        id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> Result<bool, SyncError> {
        let counts = {
            let mut state = self.lock();
            let Some(current) = state.items.get(id) else {
                debug!(id, %status, "mark on unknown item");
                return Ok(false);
            };

            if !current.status.can_transition_to(status) {
                debug!(id, from = %current.status, to = %status, "Rejected illegal transition");
                return Ok(false);
            }

            if status == ItemStatus::Pending && current.attempts >= self.max_retries {
                debug!(id, attempts = current.attempts, "Rejected retry past cap");
                return Ok(false);
            }

            let mut item = current.clone();
            let leaving_processing = item.status == ItemStatus::Processing;
            item.status = status;

            if status == ItemStatus::Processing {
                item.attempts += 1;
            }
            if leaving_processing {
                item.last_attempt_at = Some(self.clock.now());
            }
            match status {
                ItemStatus::Pending | ItemStatus::Failed => {
                    if let Some(error) = error {
                        item.last_error = Some(error.to_string());
                    }
                },
                ItemStatus::Completed => item.last_error = None,
                ItemStatus::Processing => {},
            }

            if status == ItemStatus::Completed {
                state.store.remove(id)?;
                state.items.remove(id);
                state.completed += 1;
            } else {
                state.commit(item)?;
            }

            state.counts()
        };

        self.notify(counts);
        Ok(true)
    }

    /// Move one failed item back to `Pending`, keeping its attempt count.
    ///
    /// Returns `Ok(false)` if the item is not currently `Failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn retry(&self, id: &str) -> Result<bool, SyncError> {
        let counts = {
            let mut state = self.lock();
            let Some(current) = state.items.get(id) else {
                return Ok(false);
            };
            if current.status != ItemStatus::Failed {
                return Ok(false);
            }

            let mut item = current.clone();
            item.status = ItemStatus::Pending;
            state.commit(item)?;
            state.counts()
        };

        info!(id, "Failed item re-queued");
        self.notify(counts);
        Ok(true)
    }

    /// Re-queue every failed item. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns an error on the first store write that fails; items
    /// re-queued before it stay re-queued.
    pub fn retry_all_failed(&self) -> Result<usize, SyncError> {
        let ids: Vec<String> = self.failed().into_iter().map(|item| item.id).collect();

        let mut count = 0;
        for id in ids {
            if self.retry(&id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove completed items and failed items older than `retain_failed_for`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; nothing is removed then.
    pub fn cleanup(&self, retain_failed_for: Duration) -> Result<usize, SyncError> {
        let cutoff = self.clock.now() - retain_failed_for;

        let (counts, removed) = {
            let mut state = self.lock();
            let doomed: Vec<String> = state
                .items
                .values()
                .filter(|item| match item.status {
                    ItemStatus::Completed => true,
                    ItemStatus::Failed => item.failed_since() < cutoff,
                    ItemStatus::Pending | ItemStatus::Processing => false,
                })
                .map(|item| item.id.clone())
                .collect();

            if doomed.is_empty() {
                return Ok(0);
            }

            state.store.remove_many(&doomed)?;
            for id in &doomed {
                state.items.remove(id);
            }
            debug!(removed = doomed.len(), "Queue cleanup");
            (state.counts(), doomed.len())
        };

        self.notify(counts);
        Ok(removed)
    }

    /// Discard one item regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn remove(&self, id: &str) -> Result<bool, SyncError> {
        let counts = {
            let mut state = self.lock();
            if !state.items.contains_key(id) {
                return Ok(false);
            }
            state.store.remove(id)?;
            state.items.remove(id);
            state.counts()
        };

        info!(id, "Queue item removed");
        self.notify(counts);
        Ok(true)
    }

    /// Drop every item. Only for a full account or cache reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn clear(&self) -> Result<(), SyncError> {
        let counts = {
            let mut state = self.lock();
            state.store.clear()?;
            state.items.clear();
            state.completed = 0;
            state.counts()
        };

        warn!("Operation queue cleared");
        self.notify(counts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{Database, MockQueueStore};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn create_test_queue() -> (OperationQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let db = Database::open_in_memory().unwrap();
        let queue = OperationQueue::open(Box::new(db), clock.clone(), &SyncConfig::default()).unwrap();
        (queue, clock)
    }

    fn enqueue(queue: &OperationQueue, kind: OperationKind, priority: i32) -> String {
        queue
            .enqueue(kind, "Patient", json!({"id": "P1"}), Some(priority))
            .unwrap()
    }

    /// Drive one item through a failed attempt.
    fn fail_once(queue: &OperationQueue, id: &str) {
        assert!(queue.mark(id, ItemStatus::Processing, None).unwrap());
        let item = queue.get(id).unwrap();
        let next = if item.attempts >= queue.max_retries() {
            ItemStatus::Failed
        } else {
            ItemStatus::Pending
        };
        assert!(queue.mark(id, next, Some("HTTP 503")).unwrap());
    }

    #[test]
    fn test_enqueue_and_get() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Create, 5);

        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.priority, 5);
        assert_eq!(item.operation.created_at, start());
    }

    #[test]
    fn test_enqueue_uses_default_priority() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = SyncConfig {
            default_priority: 3,
            ..SyncConfig::default()
        };
        let queue =
            OperationQueue::open(Box::new(Database::open_in_memory().unwrap()), clock, &config)
                .unwrap();

        let id = queue
            .enqueue(OperationKind::Update, "Observation", json!({}), None)
            .unwrap();
        assert_eq!(queue.get(&id).unwrap().priority, 3);
    }

    #[test]
    fn test_enqueue_rejects_empty_resource_type() {
        let (queue, _) = create_test_queue();
        let result = queue.enqueue(OperationKind::Create, "  ", json!({}), None);
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_pending_order_priority_then_age() {
        let (queue, clock) = create_test_queue();

        let low = enqueue(&queue, OperationKind::Create, 1);
        clock.advance(Duration::seconds(1));
        let high_first = enqueue(&queue, OperationKind::Create, 9);
        clock.advance(Duration::seconds(1));
        let mid = enqueue(&queue, OperationKind::Update, 5);
        clock.advance(Duration::seconds(1));
        let high_second = enqueue(&queue, OperationKind::Delete, 9);

        let order: Vec<String> = queue.pending().into_iter().map(|i| i.id).collect();
        assert_eq!(order, vec![high_first, high_second, mid, low]);
    }

    #[test]
    fn test_same_timestamp_keeps_fifo() {
        let (queue, _) = create_test_queue();

        let create = enqueue(&queue, OperationKind::Create, 5);
        let update = enqueue(&queue, OperationKind::Update, 5);

        let order: Vec<String> = queue.pending().into_iter().map(|i| i.id).collect();
        assert_eq!(order, vec![create, update]);
    }

    #[test]
    fn test_mark_processing_counts_attempt() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Create, 0);

        assert!(queue.mark(&id, ItemStatus::Processing, None).unwrap());
        assert_eq!(queue.get(&id).unwrap().attempts, 1);
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn test_mark_rejects_illegal_transitions() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Create, 0);

        assert!(!queue.mark(&id, ItemStatus::Pending, None).unwrap());
        assert!(!queue.mark(&id, ItemStatus::Completed, None).unwrap());
        assert!(!queue.mark(&id, ItemStatus::Failed, Some("nope")).unwrap());
        assert!(!queue.mark("missing", ItemStatus::Processing, None).unwrap());

        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_mark_completed_removes_item() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let clock = Arc::new(ManualClock::new(start()));

        let id = {
            let queue = OperationQueue::open(
                Box::new(Database::open_at(&db_path).unwrap()),
                clock.clone(),
                &SyncConfig::default(),
            )
            .unwrap();
            let id = enqueue(&queue, OperationKind::Create, 0);
            queue.mark(&id, ItemStatus::Processing, None).unwrap();
            assert!(queue.mark(&id, ItemStatus::Completed, None).unwrap());

            assert!(queue.get(&id).is_none());
            assert_eq!(queue.completed_count(), 1);
            id
        };

        let reopened = OperationQueue::open(
            Box::new(Database::open_at(&db_path).unwrap()),
            clock,
            &SyncConfig::default(),
        )
        .unwrap();
        assert!(reopened.get(&id).is_none());
    }

    #[test]
    fn test_retry_cap_dead_letters() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Delete, 0);

        fail_once(&queue, &id);
        fail_once(&queue, &id);
        assert_eq!(queue.get(&id).unwrap().status, ItemStatus::Pending);

        // Third attempt uses the last one.
        queue.mark(&id, ItemStatus::Processing, None).unwrap();
        assert!(!queue.mark(&id, ItemStatus::Pending, Some("HTTP 503")).unwrap());
        assert!(queue.mark(&id, ItemStatus::Failed, Some("HTTP 503")).unwrap());

        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 503"));

        // Only an explicit retry re-opens it.
        assert!(!queue.mark(&id, ItemStatus::Pending, None).unwrap());
        assert_eq!(queue.failed_count(), 1);
    }

    #[test]
    fn test_retry_keeps_attempts() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Delete, 0);
        for _ in 0..3 {
            fail_once(&queue, &id);
        }

        assert_eq!(queue.retry_all_failed().unwrap(), 1);
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 3);
        // The dead-letter reason stays visible until the next attempt.
        assert_eq!(item.last_error.as_deref(), Some("HTTP 503"));

        // A fourth failure goes straight back to Failed.
        assert!(queue.mark(&id, ItemStatus::Processing, None).unwrap());
        assert_eq!(queue.get(&id).unwrap().last_error.as_deref(), Some("HTTP 503"));
        assert!(queue.mark(&id, ItemStatus::Failed, Some("HTTP 500")).unwrap());
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 4);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_retry_requires_failed() {
        let (queue, _) = create_test_queue();
        let id = enqueue(&queue, OperationKind::Create, 0);

        assert!(!queue.retry(&id).unwrap());
        assert!(!queue.retry("missing").unwrap());
        assert_eq!(queue.retry_all_failed().unwrap(), 0);
    }

    #[test]
    fn test_cleanup_retention_window() {
        let (queue, clock) = create_test_queue();

        let old = enqueue(&queue, OperationKind::Create, 0);
        queue.mark(&old, ItemStatus::Processing, None).unwrap();
        queue.mark(&old, ItemStatus::Failed, Some("HTTP 422")).unwrap();

        clock.advance(Duration::hours(30));

        let fresh = enqueue(&queue, OperationKind::Create, 0);
        queue.mark(&fresh, ItemStatus::Processing, None).unwrap();
        queue.mark(&fresh, ItemStatus::Failed, Some("HTTP 422")).unwrap();

        let pending = enqueue(&queue, OperationKind::Update, 0);

        assert_eq!(queue.cleanup(Duration::hours(24)).unwrap(), 1);
        assert!(queue.get(&old).is_none());
        assert!(queue.get(&fresh).is_some());
        assert!(queue.get(&pending).is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let (queue, _) = create_test_queue();
        let a = enqueue(&queue, OperationKind::Create, 0);
        enqueue(&queue, OperationKind::Create, 0);

        assert!(queue.remove(&a).unwrap());
        assert!(!queue.remove(&a).unwrap());
        assert_eq!(queue.pending_count(), 1);

        queue.clear().unwrap();
        assert_eq!(queue.counts(), QueueCounts::default());
    }

    #[test]
    fn test_counts() {
        let (queue, _) = create_test_queue();
        let a = enqueue(&queue, OperationKind::Create, 0);
        let b = enqueue(&queue, OperationKind::Create, 0);
        enqueue(&queue, OperationKind::Create, 0);

        queue.mark(&a, ItemStatus::Processing, None).unwrap();
        queue.mark(&a, ItemStatus::Completed, None).unwrap();
        queue.mark(&b, ItemStatus::Processing, None).unwrap();

        let counts = queue.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.oldest_pending, Some(start()));
    }

    #[test]
    fn test_enqueue_survives_reload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let clock = Arc::new(ManualClock::new(start()));
        let payload = json!({"resourceType": "Patient", "name": [{"family": "Doe"}]});

        let id = {
            let queue = OperationQueue::open(
                Box::new(Database::open_at(&db_path).unwrap()),
                clock.clone(),
                &SyncConfig::default(),
            )
            .unwrap();
            queue
                .enqueue(OperationKind::Create, "Patient", payload.clone(), Some(5))
                .unwrap()
            // Dropped without any flush: simulated crash.
        };

        let queue = OperationQueue::open(
            Box::new(Database::open_at(&db_path).unwrap()),
            clock,
            &SyncConfig::default(),
        )
        .unwrap();
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].operation.payload, payload);
        assert_eq!(pending[0].priority, 5);
    }

    #[test]
    fn test_recovery_of_interrupted_items() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let clock = Arc::new(ManualClock::new(start()));
        let config = SyncConfig::default();

        let (early, last) = {
            let queue = OperationQueue::open(
                Box::new(Database::open_at(&db_path).unwrap()),
                clock.clone(),
                &config,
            )
            .unwrap();
            let early = enqueue(&queue, OperationKind::Create, 0);
            let last = enqueue(&queue, OperationKind::Update, 0);

            queue.mark(&early, ItemStatus::Processing, None).unwrap();

            fail_once(&queue, &last);
            fail_once(&queue, &last);
            queue.mark(&last, ItemStatus::Processing, None).unwrap();
            (early, last)
        };

        let queue = OperationQueue::open(
            Box::new(Database::open_at(&db_path).unwrap()),
            clock,
            &config,
        )
        .unwrap();

        let early = queue.get(&early).unwrap();
        assert_eq!(early.status, ItemStatus::Pending);
        assert_eq!(early.attempts, 1);

        let last = queue.get(&last).unwrap();
        assert_eq!(last.status, ItemStatus::Failed);
        assert_eq!(last.attempts, 3);
        assert_eq!(last.last_error.as_deref(), Some(INTERRUPTED_ERROR));
    }

    #[test]
    fn test_persistence_failure_propagates() {
        let mut store = MockQueueStore::new();
        store.expect_load_all().returning(|| Ok(Vec::new()));
        store
            .expect_put()
            .returning(|_| Err(SyncError::Database("disk full".to_string())));

        let clock = Arc::new(ManualClock::new(start()));
        let queue = OperationQueue::open(Box::new(store), clock, &SyncConfig::default()).unwrap();

        let result = queue.enqueue(OperationKind::Create, "Patient", json!({}), None);
        assert!(matches!(result, Err(SyncError::Database(_))));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_mark_failure_leaves_item_unchanged() {
        let record = QueueRecord::from(&QueueItem::new(
            Operation::new(OperationKind::Create, "Patient", json!({}), start()),
            0,
            1,
        ));
        let id = record.id.clone();

        let mut store = MockQueueStore::new();
        store
            .expect_load_all()
            .returning(move || Ok(vec![record.clone()]));
        store
            .expect_put()
            .returning(|_| Err(SyncError::Database("readonly".to_string())));

        let clock = Arc::new(ManualClock::new(start()));
        let queue = OperationQueue::open(Box::new(store), clock, &SyncConfig::default()).unwrap();

        assert!(queue.mark(&id, ItemStatus::Processing, None).is_err());
        let item = queue.get(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
    }

    #[test]
    fn test_listener_only_on_effective_mutations() {
        let (queue, _) = create_test_queue();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        queue.on_change(Arc::new(move |_: QueueCounts| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let id = enqueue(&queue, OperationKind::Create, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        queue.mark(&id, ItemStatus::Pending, None).unwrap();
        queue.mark(&id, ItemStatus::Completed, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        queue.mark(&id, ItemStatus::Processing, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
