//! SlotTracker (C3): a fixed-capacity array of concurrent-file slots used
//! for progress reporting during ingestion.

use std::sync::Mutex;

use crate::error::EngineError;
use crate::error::Result;

pub const DEFAULT_SLOT_COUNT: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Starting,
    Chunking,
    Vectorizing,
    Finalizing,
}

#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub filename: String,
    pub size: u64,
    pub status: SlotStatus,
}

struct Slots {
    entries: Vec<Option<SlotEntry>>,
}

/// Fixed array of `N` slots. `acquire_slot`/`release_slot`/`update_status`
/// are mutually exclusive under a single short-lived lock; snapshot reads
/// take the same lock so the occupied set observed is always consistent.
pub struct SlotTracker {
    slots: Mutex<Slots>,
}

impl SlotTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: vec![None; capacity.max(1)],
            }),
        }
    }

    /// Acquire a free slot. Returns `LockUnavailable` if every slot is
    /// occupied — callers retry (single-threaded cooperative backoff) or
    /// queue the file for later.
    pub fn acquire_slot(&self, filename: impl Into<String>, size: u64) -> Result<usize> {
        let mut guard = self.slots.lock().expect("slot tracker mutex poisoned");
        let slot_id = guard
            .entries
            .iter()
            .position(|e| e.is_none())
            .ok_or_else(|| EngineError::LockUnavailable {
                lock: "slot_tracker: no free slots".to_string(),
            })?;
        guard.entries[slot_id] = Some(SlotEntry {
            filename: filename.into(),
            size,
            status: SlotStatus::Starting,
        });
        Ok(slot_id)
    }

    /// Fire-and-forget status transition; silently ignored if the slot was
    /// already released (can happen if a caller races a cancellation).
    pub fn update_status(&self, slot_id: usize, status: SlotStatus) {
        let mut guard = self.slots.lock().expect("slot tracker mutex poisoned");
        if let Some(Some(entry)) = guard.entries.get_mut(slot_id) {
            entry.status = status;
        }
    }

    pub fn release_slot(&self, slot_id: usize) {
        let mut guard = self.slots.lock().expect("slot tracker mutex poisoned");
        if let Some(slot) = guard.entries.get_mut(slot_id) {
            *slot = None;
        }
    }

    /// Snapshot of currently occupied slots, consistent under the lock at
    /// the instant of the call.
    pub fn snapshot(&self) -> Vec<(usize, SlotEntry)> {
        let guard = self.slots.lock().expect("slot tracker mutex poisoned");
        guard
            .entries
            .iter()
            .enumerate()
            .filter_map(|(id, e)| e.clone().map(|e| (id, e)))
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().expect("slot tracker mutex poisoned").entries.len()
    }
}

impl Default for SlotTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_COUNT)
    }
}
