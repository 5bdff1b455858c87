//! Event records and ordered event lists
//!
//! Events are allocated once and shared between the global list and the
//! per-id list for their message; they are never mutated or individually
//! freed while the store lives. Both views are kept non-decreasing in
//! mono_time across appends and out-of-order batch merges.

use crate::types::MessageId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single received CAN frame, immutable once created
#[derive(Debug, PartialEq, Eq)]
pub struct CanEvent {
    /// Bus source byte
    pub src: u8,
    /// CAN message address
    pub address: u32,
    /// Monotonic timestamp in nanoseconds
    pub mono_time: u64,
    /// Payload bytes
    pub dat: Box<[u8]>,
}

impl CanEvent {
    pub fn id(&self) -> MessageId {
        MessageId::new(self.src, self.address)
    }
}

/// Allocate an event record, copying the payload
pub fn new_event(source: u8, address: u32, mono_time: u64, payload: &[u8]) -> Arc<CanEvent> {
    Arc::new(CanEvent {
        src: source,
        address,
        mono_time,
        dat: payload.into(),
    })
}

/// Per-id merge outcome, used to decide how the time index resyncs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePosition {
    /// Batch landed at the tail; the index can resume incrementally
    Appended,
    /// Batch was spliced mid-list; indices shifted, the index must rebuild
    Spliced,
}

/// Result of merging one batch
#[derive(Debug, Default)]
pub struct MergeResult {
    /// Ids touched by the batch, with how their list was modified
    pub touched: Vec<(MessageId, MergePosition)>,
}

/// Append-only event storage: one global list plus one list per id
///
/// Batches are expected to be internally sorted segments that do not
/// interleave with other pending segments (replay delivers disjoint time
/// windows). An interleaved batch is a caller bug, not a checked condition.
#[derive(Debug, Default)]
pub struct EventBuffer {
    all_events: Vec<Arc<CanEvent>>,
    events: BTreeMap<MessageId, Vec<Arc<CanEvent>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The global event list, ordered by mono_time
    pub fn all_events(&self) -> &[Arc<CanEvent>] {
        &self.all_events
    }

    /// The event list for one id, ordered by mono_time
    pub fn events(&self, id: &MessageId) -> &[Arc<CanEvent>] {
        self.events.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids with at least one event
    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.events.keys()
    }

    /// Monotonic timestamp of the first event ever seen
    pub fn start_ts(&self) -> u64 {
        self.all_events.first().map(|e| e.mono_time).unwrap_or(0)
    }

    /// Monotonic timestamp of the last event
    pub fn last_ts(&self) -> u64 {
        self.all_events.last().map(|e| e.mono_time).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.all_events.is_empty()
    }

    /// Merge a batch of events, preserving mono_time order on the global
    /// and every touched per-id list
    ///
    /// The streaming-dominant case (batch starts at or after the list's
    /// tail) is an O(k) append; an out-of-order replay segment is placed
    /// with an upper-bound splice in O(log n + k).
    pub fn merge_events(&mut self, batch: &[Arc<CanEvent>]) -> MergeResult {
        let mut result = MergeResult::default();
        if batch.is_empty() {
            return result;
        }

        // Group by id, keeping batch order within each group
        let mut by_id: BTreeMap<MessageId, Vec<Arc<CanEvent>>> = BTreeMap::new();
        for event in batch {
            by_id.entry(event.id()).or_default().push(event.clone());
        }

        for (id, group) in by_id {
            let list = self.events.entry(id).or_default();
            let position = insert_group(list, group);
            result.touched.push((id, position));
        }

        insert_group(&mut self.all_events, batch.to_vec());
        result
    }
}

/// Place an internally-sorted group into an ordered list
fn insert_group(list: &mut Vec<Arc<CanEvent>>, group: Vec<Arc<CanEvent>>) -> MergePosition {
    let front_ts = group.first().map(|e| e.mono_time).unwrap_or(0);
    let back_ts = list.last().map(|e| e.mono_time);
    match back_ts {
        Some(back) if front_ts < back => {
            let pos = list.partition_point(|e| e.mono_time <= front_ts);
            list.splice(pos..pos, group);
            MergePosition::Spliced
        }
        _ => {
            list.extend(group);
            MergePosition::Appended
        }
    }
}
