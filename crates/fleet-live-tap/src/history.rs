//! Bounded newest-first tap history.

use std::collections::VecDeque;

use crate::protocol::HistoryEntry;

/// Default number of entries kept.
pub const HISTORY_CAPACITY: usize = 10;

/// Newest-first history of accepted responses.
///
/// Entries are never mutated; the oldest is evicted once `capacity` is
/// exceeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TapHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for TapHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl TapHistory {
    /// Create a history holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `entry` as the newest.
    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            if self.entries.pop_back().is_none() {
                break;
            }
        }
        self.entries.push_front(entry);
    }

    /// Entry `index` places back from the newest.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot, newest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
