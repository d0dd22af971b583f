//! Recently captured windows, by sequence number.
//!
//! Remote results echo only a sequence number; the ring recovers when that
//! window was captured so the result is timed against audio, not arrival.

use std::collections::VecDeque;

pub(crate) const RECENT_WINDOW_CAPACITY: usize = 512;

#[derive(Debug)]
pub(crate) struct RecentWindows {
    entries: VecDeque<(u64, u64)>,
    capacity: usize,
}

impl RecentWindows {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Sequence numbers arrive strictly increasing
    pub(crate) fn record(&mut self, sequence_number: u64, captured_at_ms: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((sequence_number, captured_at_ms));
    }

    pub(crate) fn captured_at(&self, sequence_number: u64) -> Option<u64> {
        self.entries
            .binary_search_by_key(&sequence_number, |&(seq, _)| seq)
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Lowest sequence number that can belong to a window opening at
    /// `open_ms`: the first window captured at or after it, or the next
    /// window to come when none has been captured yet.
    pub(crate) fn floor_for(&self, open_ms: u64) -> u64 {
        self.entries
            .iter()
            .find(|&&(_, at)| at >= open_ms)
            .map(|&(seq, _)| seq)
            .unwrap_or_else(|| self.entries.back().map_or(0, |&(seq, _)| seq + 1))
    }
}
