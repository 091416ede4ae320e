//! Per-group completion tracking.
//!
//! Each group holds one slot per requested band and atomic counters. A
//! terminal outcome fills its slot, then bumps `finished`. The caller whose
//! increment reaches the band total removes the group from the map and
//! receives the completed [`PatchGroup`]; every other caller gets `None`.
//! Exactly one caller finalizes each group.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::assembler::{BandSlot, PatchGroup, TaskOutcome};
use crate::asset::GroupKey;

struct GroupState {
    slots: Vec<Mutex<Option<TaskOutcome>>>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    finished: AtomicUsize,
}

impl GroupState {
    fn new(bands: usize) -> Self {
        Self {
            slots: (0..bands).map(|_| Mutex::new(None)).collect(),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }
}

/// Shared completion state of all open groups.
pub struct GroupTracker {
    bands: Vec<String>,
    groups: DashMap<GroupKey, Arc<GroupState>>,
}

impl GroupTracker {
    /// Registers `groups`, each expecting one outcome per band.
    pub fn new(bands: Vec<String>, groups: impl IntoIterator<Item = GroupKey>) -> Self {
        let map = DashMap::new();
        for key in groups {
            map.insert(key, Arc::new(GroupState::new(bands.len())));
        }
        Self { bands, groups: map }
    }

    /// Records a terminal outcome.
    ///
    /// Returns the completed group if this outcome was the last one missing.
    pub fn record(&self, key: &GroupKey, band_index: usize, outcome: TaskOutcome) -> Option<PatchGroup> {
        // Clone the Arc so no map guard is held while touching the slots.
        let state = self.groups.get(key).map(|entry| Arc::clone(entry.value()))?;
        let slot = state.slots.get(band_index)?;

        {
            let mut slot = slot.lock();
            if slot.is_some() {
                warn!(group = %key, band_index, "Duplicate outcome ignored");
                return None;
            }
            if outcome.is_ok() {
                state.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                state.failed.fetch_add(1, Ordering::Relaxed);
            }
            *slot = Some(outcome);
        }

        let finished = state.finished.fetch_add(1, Ordering::AcqRel) + 1;
        if finished < state.slots.len() {
            return None;
        }

        let (_, state) = self.groups.remove(key)?;
        let bands = self
            .bands
            .iter()
            .zip(state.slots.iter())
            .filter_map(|(band, slot)| {
                slot.lock().take().map(|outcome| BandSlot {
                    band: band.clone(),
                    outcome,
                })
            })
            .collect();
        Some(PatchGroup {
            key: key.clone(),
            bands,
        })
    }

    /// `(succeeded, failed)` counts of an open group.
    fn progress(&self, key: &GroupKey) -> Option<(usize, usize)> {
        self.groups.get(key).map(|entry| {
            let state = entry.value();
            (
                state.succeeded.load(Ordering::Relaxed),
                state.failed.load(Ordering::Relaxed),
            )
        })
    }

    /// Number of groups not yet finalized.
    pub fn open_groups(&self) -> usize {
        self.groups.len()
    }

    /// Removes every group not yet finalized, returning each with its
    /// `(succeeded, failed)` counts, sorted by key.
    pub fn drain_open(&self) -> Vec<(GroupKey, (usize, usize))> {
        let mut keys: Vec<GroupKey> = self.groups.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let progress = self.progress(&key).unwrap_or_default();
                self.groups.remove(&key);
                (key, progress)
            })
            .collect()
    }
}
