//! Local numeric identifiers for feedback events.
//!
//! An id is `epoch_ms * 1000 + suffix`, a 16-digit number for present-day
//! timestamps. The suffix counts taps inside one millisecond and is kept in a
//! persisted slot so ids stay increasing across restarts within the same
//! millisecond. The suffix wraps modulo 1000: the 1001st id generated inside
//! one millisecond repeats suffix 0.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::SlotStore;

/// Slot holding the last `(ms, suffix)` pair.
pub const ID_STATE_KEY: &str = "feedback_id_ms_v1";

/// Number of distinct suffixes per millisecond.
pub const SUFFIX_SPACE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SuffixState {
    ms: i64,
    n: u16,
}

/// Generator for 16-digit local ids, backed by a persisted slot.
pub struct NumericIdGenerator {
    store: Arc<dyn SlotStore>,
    // Serializes the read-modify-write of the state slot.
    lock: Mutex<()>,
}

impl NumericIdGenerator {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Next id for a tap at `at`.
    pub fn next_id(&self, at: DateTime<Utc>) -> u64 {
        let ms = at.timestamp_millis();
        let suffix = self.next_suffix(ms);
        (ms.max(0) as u64) * u64::from(SUFFIX_SPACE) + u64::from(suffix)
    }

    /// Next suffix for millisecond `ms`: 0 on a new millisecond, otherwise
    /// the previous suffix plus one, modulo 1000.
    pub fn next_suffix(&self, ms: i64) -> u16 {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let previous = self
            .store
            .get(ID_STATE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<SuffixState>(&raw).ok());

        // A suffix outside 0..1000 can only come from a damaged slot.
        let n = match previous {
            Some(state) if state.ms == ms && state.n < SUFFIX_SPACE => {
                (state.n + 1) % SUFFIX_SPACE
            }
            _ => 0,
        };

        let state = SuffixState { ms, n };
        match serde_json::to_string(&state) {
            Ok(raw) => {
                if let Err(e) = self.store.set(ID_STATE_KEY, &raw) {
                    warn!(error = %e, "Failed to persist id suffix state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode id suffix state"),
        }

        n
    }
}
