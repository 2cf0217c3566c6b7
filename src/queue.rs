//! Durable FIFO of feedback events that have not been acknowledged yet.
//!
//! The persisted slot is the only copy of the queue: every operation loads
//! it, changes it and writes it back. Two degradation rules apply:
//!
//! - a missing, unreadable or corrupt slot loads as an empty queue, so a
//!   damaged file drops the pending events instead of blocking new taps;
//! - a failed write is logged and the slot keeps its previous contents. The
//!   pending indicator and the returned lengths always describe what is
//!   actually stored, and [`PendingQueue::pop_front_if`] reports the failure
//!   so a drain never resends an event it could not remove.
//!
//! Callers sharing a queue between tasks must serialize access themselves
//! (the coordinator keeps it behind a mutex that is never held across an
//! await).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::event::{FeedbackEvent, SatisfactionGrade};
use crate::storage::SlotStore;

/// Slot holding the serialized pending queue.
pub const PENDING_QUEUE_KEY: &str = "feedback_pending_queue_v1";

/// Result of [`PendingQueue::pop_front_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// The head was removed and the shorter queue persisted
    Removed,

    /// The head is not the expected event; nothing changed
    HeadChanged,

    /// The head matched but the shorter queue could not be written
    PersistFailed,
}

/// Persisted queue of unsent feedback events.
pub struct PendingQueue {
    store: Arc<dyn SlotStore>,
    key: String,
    pending_tx: watch::Sender<usize>,
}

impl PendingQueue {
    /// Create a queue over the default slot.
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self::with_key(store, PENDING_QUEUE_KEY)
    }

    /// Create a queue over a custom slot key.
    pub fn with_key(store: Arc<dyn SlotStore>, key: impl Into<String>) -> Self {
        let (pending_tx, _) = watch::channel(0);
        let queue = Self {
            store,
            key: key.into(),
            pending_tx,
        };
        queue.publish(queue.load().len());
        queue
    }

    /// Subscribe to the pending-count indicator.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.pending_tx.subscribe()
    }

    /// Read the persisted queue. Never fails: absence and corruption both
    /// yield an empty queue.
    pub fn load(&self) -> Vec<FeedbackEvent> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, slot = %self.key, "Failed to read pending queue");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    error = %e,
                    slot = %self.key,
                    "Pending queue is corrupt, treating it as empty"
                );
                Vec::new()
            }
        }
    }

    /// Overwrite the persisted queue. Best effort: failures are logged and
    /// `false` is returned, leaving the indicator at the stored length.
    pub fn save(&self, events: &[FeedbackEvent]) -> bool {
        let written = match serde_json::to_string(events) {
            Ok(raw) => match self.store.set(&self.key, &raw) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        error = %e,
                        slot = %self.key,
                        pending = events.len(),
                        "Failed to persist pending queue"
                    );
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to encode pending queue");
                false
            }
        };

        if written {
            self.publish(events.len());
        } else {
            self.publish(self.load().len());
        }
        written
    }

    /// Append a new event for `grade`, stamped with the current time.
    pub fn enqueue(&self, grade: SatisfactionGrade) -> FeedbackEvent {
        let event = FeedbackEvent::new(grade);
        self.push(event.clone());
        event
    }

    /// Append an existing event at the tail. Returns the stored length.
    pub fn push(&self, event: FeedbackEvent) -> usize {
        let mut events = self.load();
        debug!(grade = %event.grade, local_id = ?event.local_id, "Queueing feedback");
        events.push(event);
        self.stored_len(&events)
    }

    /// Put an event back at the head, ahead of everything queued. Returns
    /// the stored length.
    pub fn push_front(&self, event: FeedbackEvent) -> usize {
        let mut events = self.load();
        events.insert(0, event);
        self.stored_len(&events)
    }

    /// Oldest pending event, if any.
    pub fn peek(&self) -> Option<FeedbackEvent> {
        self.load().into_iter().next()
    }

    /// Remove the head if it is still `event`.
    pub fn pop_front_if(&self, event: &FeedbackEvent) -> PopOutcome {
        let mut events = self.load();
        if events.first() != Some(event) {
            return PopOutcome::HeadChanged;
        }
        events.remove(0);
        if self.save(&events) {
            PopOutcome::Removed
        } else {
            PopOutcome::PersistFailed
        }
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stored_len(&self, events: &[FeedbackEvent]) -> usize {
        if self.save(events) {
            events.len()
        } else {
            self.load().len()
        }
    }

    fn publish(&self, pending: usize) {
        self.pending_tx.send_replace(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemorySlotStore, StorageError};
    use chrono::{TimeZone, Utc};

    /// Store whose writes always fail, as with an exhausted quota.
    struct FullStore;

    impl SlotStore for FullStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            })
        }
    }

    /// Reads through to existing slots, refuses every write.
    struct ReadOnlyStore(MemorySlotStore);

    impl SlotStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                key: key.to_string(),
                reason: "read-only".to_string(),
            })
        }
    }

    fn queue() -> (MemorySlotStore, PendingQueue) {
        let store = MemorySlotStore::new();
        let queue = PendingQueue::new(Arc::new(store.clone()));
        (store, queue)
    }

    fn event_at(grade: SatisfactionGrade, secs: i64) -> FeedbackEvent {
        FeedbackEvent::at(grade, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn test_empty_when_slot_absent() {
        let (_, queue) = queue();
        assert!(queue.load().is_empty());
        assert!(queue.peek().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (_, queue) = queue();
        let grades = [
            SatisfactionGrade::Unsatisfied,
            SatisfactionGrade::VerySatisfied,
            SatisfactionGrade::Satisfied,
        ];
        for grade in grades {
            queue.enqueue(grade);
        }

        let loaded: Vec<_> = queue.load().into_iter().map(|e| e.grade).collect();
        assert_eq!(loaded, grades);
        assert_eq!(queue.peek().unwrap().grade, SatisfactionGrade::Unsatisfied);
    }

    #[test]
    fn test_save_load_round_trip_is_stable() {
        let (store, queue) = queue();
        queue.push(event_at(SatisfactionGrade::Satisfied, 0).with_local_id(7));
        queue.push(event_at(SatisfactionGrade::Unsatisfied, 1));

        let before = store.get(PENDING_QUEUE_KEY).unwrap();
        queue.save(&queue.load());
        let after = store.get(PENDING_QUEUE_KEY).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_corrupt_slot_loads_empty() {
        let (store, queue) = queue();
        store.set(PENDING_QUEUE_KEY, "[{\"grau_satisfacao\":").unwrap();

        assert!(queue.load().is_empty());

        // The next enqueue replaces the corrupt contents.
        queue.enqueue(SatisfactionGrade::Satisfied);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unknown_grade_in_slot_loads_empty() {
        let (store, queue) = queue();
        store
            .set(
                PENDING_QUEUE_KEY,
                r#"[{"grau_satisfacao":"furious","created_at":"2024-01-01T00:00:00Z"}]"#,
            )
            .unwrap();

        assert!(queue.load().is_empty());
    }

    #[test]
    fn test_pop_front_only_removes_matching_head() {
        let (_, queue) = queue();
        let first = event_at(SatisfactionGrade::VerySatisfied, 0);
        let second = event_at(SatisfactionGrade::Unsatisfied, 1);
        queue.push(first.clone());
        queue.push(second.clone());

        assert_eq!(queue.pop_front_if(&second), PopOutcome::HeadChanged);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop_front_if(&first), PopOutcome::Removed);
        assert_eq!(queue.peek(), Some(second.clone()));
        assert_eq!(queue.pop_front_if(&second), PopOutcome::Removed);
        assert!(queue.is_empty());
        assert_eq!(queue.pop_front_if(&second), PopOutcome::HeadChanged);
    }

    #[test]
    fn test_push_front() {
        let (_, queue) = queue();
        let later = event_at(SatisfactionGrade::Satisfied, 5);
        let earlier = event_at(SatisfactionGrade::Unsatisfied, 1);

        queue.push(later.clone());
        assert_eq!(queue.push_front(earlier.clone()), 2);
        assert_eq!(queue.load(), vec![earlier, later]);
    }

    #[test]
    fn test_reload_from_same_slot() {
        let (store, queue) = queue();
        queue.enqueue(SatisfactionGrade::VerySatisfied);
        drop(queue);

        let reloaded = PendingQueue::new(Arc::new(store));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(*reloaded.subscribe().borrow(), 1);
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let queue = PendingQueue::new(Arc::new(FullStore));
        let rx = queue.subscribe();

        let event = queue.enqueue(SatisfactionGrade::Satisfied);
        assert_eq!(event.grade, SatisfactionGrade::Satisfied);
        // Nothing was persisted, so nothing is pending.
        assert!(queue.is_empty());
        assert_eq!(*rx.borrow(), 0);
        assert_eq!(queue.push(event.clone()), 0);
        assert_eq!(queue.push_front(event), 0);
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn test_pop_reports_failed_persist() {
        let (store, queue) = queue();
        let first = event_at(SatisfactionGrade::VerySatisfied, 0);
        queue.push(first.clone());
        queue.push(event_at(SatisfactionGrade::Satisfied, 1));
        let rx = queue.subscribe();

        // Same slots, but every write fails from here on.
        let stuck = PendingQueue::new(Arc::new(ReadOnlyStore(store)));
        assert_eq!(stuck.pop_front_if(&first), PopOutcome::PersistFailed);
        assert_eq!(stuck.peek(), Some(first));
        assert_eq!(*stuck.subscribe().borrow(), 2);
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn test_pending_indicator_follows_queue() {
        let (_, queue) = queue();
        let rx = queue.subscribe();
        assert_eq!(*rx.borrow(), 0);

        let event = queue.enqueue(SatisfactionGrade::Satisfied);
        queue.enqueue(SatisfactionGrade::Unsatisfied);
        assert_eq!(*rx.borrow(), 2);

        queue.pop_front_if(&event);
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn test_custom_key_is_isolated() {
        let store = MemorySlotStore::new();
        let shared: Arc<dyn SlotStore> = Arc::new(store.clone());
        let main = PendingQueue::new(shared.clone());
        let other = PendingQueue::with_key(shared, "feedback_pending_queue_v2");

        main.enqueue(SatisfactionGrade::Satisfied);
        assert_eq!(main.len(), 1);
        assert!(other.is_empty());
    }
}
