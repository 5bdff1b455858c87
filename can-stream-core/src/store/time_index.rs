//! Sparse per-second time index
//!
//! Maps whole seconds since the stream start to the first event index at or
//! after that second, shrinking binary-search windows for range queries. A
//! bus can emit ~1 kHz per id; over an hour-long log an unconstrained
//! binary search is O(log(millions)) per UI query, while the index narrows
//! each query to one second's worth of events.

use super::events::CanEvent;
use std::sync::Arc;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Bucket index over one ordered event list
///
/// `sync` assumes timestamps are monotonic within and across calls; resumed
/// incremental syncs over out-of-order input are unspecified (callers
/// rebuild after any mid-list splice).
#[derive(Debug, Default)]
pub struct TimeIndex {
    /// bucket[sec] = first event index at or after that second
    buckets: Vec<usize>,
    /// Number of events already indexed, for incremental resume
    indexed: usize,
}

impl TimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index newly-appended events; with `rebuild`, start over from the
    /// front (required after a mid-list splice shifts indices)
    pub fn sync(&mut self, events: &[Arc<CanEvent>], start_ts: u64, rebuild: bool) {
        if rebuild {
            self.buckets.clear();
            self.indexed = 0;
        }
        for idx in self.indexed..events.len() {
            let sec = (events[idx].mono_time.saturating_sub(start_ts) / NS_PER_SEC) as usize;
            // Gap seconds repeat this index: bucket[s] stays "first event
            // at or after second s"
            while self.buckets.len() < sec + 1 {
                self.buckets.push(idx);
            }
        }
        self.indexed = events.len();
    }

    /// Narrow a search for `search_ts` to an index window `[lo, hi)`
    pub fn get_bounds(&self, start_ts: u64, search_ts: u64, total_len: usize) -> (usize, usize) {
        if search_ts <= start_ts {
            return (0, total_len);
        }
        let sec = ((search_ts - start_ts) / NS_PER_SEC) as usize;
        if sec >= self.buckets.len() {
            return (self.buckets.last().copied().unwrap_or(0), total_len);
        }
        let lo = self.buckets[sec];
        let hi = if sec + 1 < self.buckets.len() {
            self.buckets[sec + 1]
        } else {
            total_len
        };
        (lo, hi)
    }

    /// Number of seconds currently indexed
    pub fn indexed_seconds(&self) -> usize {
        self.buckets.len()
    }
}
