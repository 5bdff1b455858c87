//! Time-indexed, concurrently-accessed event store
//!
//! The store owns all received events, the per-id time indices, the live
//! per-message states and their published snapshots. Producer threads push
//! frames (or merge replay batches); one consumer thread drives periodic
//! snapshot commits and queries. A single mutex serializes merge, seek and
//! commit against each other and against snapshot reads; published events
//! are shared immutable allocations, so ranges handed out by a query stay
//! valid without holding the lock.

pub mod events;
pub mod state;
pub mod time_index;

pub use events::{new_event, CanEvent, EventBuffer, MergePosition};
pub use state::{ByteTrend, DataPattern, MessageState, Rgba};
pub use time_index::TimeIndex;

use crate::config::StreamConfig;
use crate::dbc::DbcDatabase;
use crate::notify::{Notifier, StreamNotification};
use crate::types::{MessageId, RawCanFrame};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NS_PER_SEC: f64 = 1e9;

/// How often the throttled active-flag recompute may run, in stream seconds
const ACTIVE_RECOMPUTE_INTERVAL: f64 = 0.5;

#[derive(Default)]
struct StoreInner {
    buffer: EventBuffer,
    indices: BTreeMap<MessageId, TimeIndex>,
    /// Live per-id state, mutated on every frame
    states: BTreeMap<MessageId, MessageState>,
    /// Read-only copies published by `commit_snapshots`
    snapshots: BTreeMap<MessageId, MessageState>,
    /// Ids touched since the last commit
    dirty: BTreeSet<MessageId>,
    /// Per-id ignore masks built from DBC-defined signal bits
    masks: BTreeMap<MessageId, Vec<u8>>,
    /// Bus sources seen so far
    sources: BTreeSet<u8>,
    /// Source set as of the last commit, for change detection
    published_sources: BTreeSet<u8>,
    /// Playback position in stream seconds
    current_sec: f64,
    /// Stream time of the last active-flag recompute
    last_active_recompute: f64,
    /// False between a seek request and the finished snapshot rebuild
    seek_finished: bool,
    /// start_ts of the buffer when indices were last synced
    indexed_start_ts: u64,
}

/// The event store
///
/// Shareable across threads behind an `Arc`; all methods take `&self`.
pub struct EventStore {
    config: StreamConfig,
    inner: Mutex<StoreInner>,
    seek_cv: Condvar,
    notifier: Notifier,
    /// Playback speed as f64 bits, written by the active source
    speed_bits: AtomicU64,
}

impl EventStore {
    pub fn new(config: StreamConfig) -> Self {
        let speed = config.playback_speed;
        Self {
            config,
            inner: Mutex::new(StoreInner {
                seek_finished: true,
                ..StoreInner::default()
            }),
            seek_cv: Condvar::new(),
            notifier: Notifier::none(),
            speed_bits: AtomicU64::new(speed.to_bits()),
        }
    }

    /// Attach a notification sink
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current playback speed (1.0 = realtime)
    pub fn playback_speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn set_playback_speed(&self, speed: f64) {
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
    }

    /// Playback position in stream seconds
    pub fn current_sec(&self) -> f64 {
        self.inner.lock().current_sec
    }

    /// Monotonic timestamp of the first event
    pub fn start_ts(&self) -> u64 {
        self.inner.lock().buffer.start_ts()
    }

    /// Bus sources seen so far
    pub fn sources(&self) -> Vec<u8> {
        self.inner.lock().sources.iter().copied().collect()
    }

    /// Ingest one live frame: storage merge plus live-state update
    pub fn push_frame(&self, frame: &RawCanFrame) {
        let event = new_event(frame.source, frame.address, frame.mono_time, &frame.dat);
        self.merge_events(std::slice::from_ref(&event));
        let sec = {
            let inner = self.inner.lock();
            (frame.mono_time.saturating_sub(inner.buffer.start_ts())) as f64 / NS_PER_SEC
        };
        self.process_new_message(frame.id(), sec, &frame.dat);
    }

    /// Merge a batch of events into storage, preserving mono_time order on
    /// the global and per-id views, and resync touched time indices
    pub fn merge_events(&self, batch: &[Arc<CanEvent>]) {
        if batch.is_empty() {
            return;
        }
        let touched: Vec<MessageId> = {
            let mut inner = self.inner.lock();
            for event in batch {
                inner.sources.insert(event.src);
            }
            let result = inner.buffer.merge_events(batch);

            // A splice in front of the first event moves the time origin
            // and invalidates every index
            let start_ts = inner.buffer.start_ts();
            let origin_moved = start_ts != inner.indexed_start_ts;
            inner.indexed_start_ts = start_ts;
            if origin_moved {
                inner.indices.clear();
            }

            for (id, position) in &result.touched {
                let len = inner.buffer.events(id).len();
                if len < self.config.time_index_threshold {
                    continue;
                }
                let rebuild = *position == MergePosition::Spliced;
                // Split borrows: the index map and the event lists live in
                // different fields of the inner state
                let StoreInner {
                    ref mut indices,
                    ref buffer,
                    ..
                } = *inner;
                indices
                    .entry(*id)
                    .or_default()
                    .sync(buffer.events(id), start_ts, rebuild);
            }
            result.touched.iter().map(|(id, _)| *id).collect()
        };
        self.notifier
            .send(StreamNotification::EventsMerged { ids: touched });
    }

    /// Feed one frame into the live state for `id`
    ///
    /// Reinitializes byte tracking when the payload size changed (a new
    /// message shape) and marks the id dirty for the next commit.
    pub fn process_new_message(&self, id: MessageId, sec: f64, data: &[u8]) {
        let speed = self.playback_speed();
        let mut inner = self.inner.lock();
        let StoreInner {
            ref mut states,
            ref masks,
            ..
        } = *inner;
        let mask = masks.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        states.entry(id).or_default().compute(sec, data, speed, mask);
        inner.dirty.insert(id);
        if sec > inner.current_sec {
            inner.current_sec = sec;
        }
    }

    /// Events for `id` within `[t0, t1]` stream seconds (inclusive)
    ///
    /// The search window is narrowed by the id's time index before the
    /// binary searches, so the cost scales with per-second density rather
    /// than total history.
    pub fn events_in_range(&self, id: &MessageId, t0: f64, t1: f64) -> Vec<Arc<CanEvent>> {
        let inner = self.inner.lock();
        let events = inner.buffer.events(id);
        if events.is_empty() || t1 < t0 {
            return Vec::new();
        }
        let start_ts = inner.buffer.start_ts();
        let t0_ns = to_mono(start_ts, t0);
        let t1_ns = to_mono(start_ts, t1);

        let (lo, hi) = match inner.indices.get(id) {
            Some(index) => {
                let (lo, _) = index.get_bounds(start_ts, t0_ns, events.len());
                let (_, hi) = index.get_bounds(start_ts, t1_ns, events.len());
                (lo, hi)
            }
            None => (0, events.len()),
        };

        let window = &events[lo..hi];
        let first = lo + window.partition_point(|e| e.mono_time < t0_ns);
        let last = lo + window.partition_point(|e| e.mono_time <= t1_ns);
        events[first..last].to_vec()
    }

    /// Published snapshot for `id`, if any
    pub fn snapshot(&self, id: &MessageId) -> Option<MessageState> {
        self.inner.lock().snapshots.get(id).cloned()
    }

    /// Ids with a published snapshot
    pub fn snapshot_ids(&self) -> Vec<MessageId> {
        self.inner.lock().snapshots.keys().copied().collect()
    }

    /// Flush dirty live states into the published snapshots
    ///
    /// Called at UI frame rate by the consumer; batches every id dirtied
    /// since the previous call into one notification. Active flags are
    /// recomputed on a throttle, and source-set changes are detected here.
    pub fn commit_snapshots(&self) {
        let (ids, structure_changed, sources_changed, sources) = {
            let mut inner = self.inner.lock();
            let now = inner.current_sec;

            // Throttled recompute of "recently seen" flags
            if now - inner.last_active_recompute >= ACTIVE_RECOMPUTE_INTERVAL {
                inner.last_active_recompute = now;
                let window = self.config.active_window_sec;
                let StoreInner {
                    ref mut states,
                    ref mut dirty,
                    ..
                } = *inner;
                for (id, state) in states.iter_mut() {
                    let active = now - state.ts < window;
                    if active != state.active {
                        state.active = active;
                        dirty.insert(*id);
                    }
                }
            }

            let dirty: Vec<MessageId> = std::mem::take(&mut inner.dirty).into_iter().collect();
            let mut structure_changed = false;
            for id in &dirty {
                if let Some(state) = inner.states.get(id) {
                    structure_changed |= !inner.snapshots.contains_key(id);
                    let snapshot = state.clone();
                    inner.snapshots.insert(*id, snapshot);
                }
            }

            let sources_changed = inner.sources != inner.published_sources;
            if sources_changed {
                inner.published_sources = inner.sources.clone();
            }
            let sources = inner.sources.iter().copied().collect();
            (dirty, structure_changed, sources_changed, sources)
        };

        if !ids.is_empty() {
            self.notifier.send(StreamNotification::SnapshotsUpdated {
                ids,
                structure_changed,
            });
        }
        if sources_changed {
            self.notifier
                .send(StreamNotification::SourcesUpdated { sources });
        }
    }

    /// Mark a seek as requested; `wait_for_seek` blocks until the matching
    /// `seek_to` finishes. Call before handing the seek to another thread.
    pub fn begin_seek(&self) {
        self.inner.lock().seek_finished = false;
    }

    /// Rebuild all live state and snapshots as of `sec` stream seconds
    ///
    /// For every known id the last event at or before the target is located
    /// through the time index; the state is rebuilt from that single event,
    /// discarding trend history (a discontinuity by design). Ids with no
    /// qualifying event are dropped. Waiters blocked in `wait_for_seek` are
    /// woken once the snapshots are in place. Overlapping seeks serialize
    /// on the store mutex; the last one wins.
    pub fn seek_to(&self, sec: f64) {
        let speed = self.playback_speed();
        let (ids, structure_changed) = {
            let mut inner = self.inner.lock();
            let start_ts = inner.buffer.start_ts();
            let target_ns = to_mono(start_ts, sec);

            let mut rebuilt: BTreeMap<MessageId, MessageState> = BTreeMap::new();
            for id in inner.buffer.ids() {
                let events = inner.buffer.events(id);
                let (lo, hi) = match inner.indices.get(id) {
                    Some(index) => index.get_bounds(start_ts, target_ns, events.len()),
                    None => (0, events.len()),
                };
                let pos = lo + events[lo..hi].partition_point(|e| e.mono_time <= target_ns);
                if pos == 0 {
                    continue; // no event at or before the target
                }
                let event = &events[pos - 1];
                let event_sec =
                    event.mono_time.saturating_sub(start_ts) as f64 / NS_PER_SEC;
                let mask = inner
                    .masks
                    .get(id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let mut state = MessageState::new();
                state.compute(event_sec, &event.dat, speed, mask);
                state.count = pos as u64;
                rebuilt.insert(*id, state);
            }

            let structure_changed = rebuilt.keys().ne(inner.snapshots.keys());
            inner.snapshots = rebuilt.clone();
            inner.states = rebuilt;
            inner.dirty.clear();
            inner.current_sec = sec;
            inner.last_active_recompute = sec;
            inner.seek_finished = true;
            self.seek_cv.notify_all();
            (inner.snapshots.keys().copied().collect::<Vec<_>>(), structure_changed)
        };

        self.notifier.send(StreamNotification::SnapshotsUpdated {
            ids,
            structure_changed,
        });
        self.notifier.send(StreamNotification::SeekFinished { sec });
    }

    /// Block until the pending seek's snapshot rebuild finishes
    pub fn wait_for_seek(&self) {
        let mut inner = self.inner.lock();
        while !inner.seek_finished {
            self.seek_cv.wait(&mut inner);
        }
    }

    /// Rebuild the per-id ignore masks from DBC-defined signal bits
    ///
    /// With `suppress_defined_signals` off the mask cache empties. Bit
    /// counters under newly-masked bits reset so stale statistics cannot
    /// leak through.
    pub fn update_masks(&self, dbc: &DbcDatabase) {
        let mut inner = self.inner.lock();
        inner.masks.clear();
        if self.config.suppress_defined_signals {
            let sources: Vec<u8> = inner.sources.iter().copied().collect();
            for source in sources {
                for msg in dbc.messages() {
                    inner
                        .masks
                        .insert(MessageId::new(source, msg.address), msg.mask.clone());
                }
            }
        }
        let StoreInner {
            ref mut states,
            ref masks,
            ..
        } = *inner;
        for (id, state) in states.iter_mut() {
            if let Some(mask) = masks.get(id) {
                state.apply_mask(mask);
            }
        }
    }

    /// Mute every byte that changed recently, across all live states;
    /// returns the total number of muted bytes
    pub fn suppress_recent_changes(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = inner.current_sec;
        inner
            .states
            .values_mut()
            .map(|state| state.suppress_recent_changes(now))
            .sum()
    }

    /// Unmute all bytes on all live states
    pub fn clear_suppression(&self) {
        let mut inner = self.inner.lock();
        for state in inner.states.values_mut() {
            state.clear_suppression();
        }
    }
}

fn to_mono(start_ts: u64, sec: f64) -> u64 {
    start_ts.saturating_add((sec.max(0.0) * NS_PER_SEC) as u64)
}
