// Composite snapshots and their bounded retention.
//
// A `SimSnapshot` is an immutable capture of everything needed to resume a
// simulation at a point in time: the clock, the processed-event counter, a
// deep copy of the world, a deep copy of the pending queue (including its
// sequence counter), and the RNG state. The engine produces them
// (`SimEngine::capture_snapshot`) and consumes them
// (`SimEngine::restore_snapshot`).
//
// `SnapshotBuffer` keeps the K most recent snapshots in a ring with a time
// index for exact and at-or-before lookups. Once a snapshot is evicted its
// point in time is unrecoverable; there is no archival tier.
//
// `SnapshotPolicy` decides when the runner's real-time loop captures.
//
// If the active generator cannot expose its state, `RngState::state` is
// `None`. Restoring such a snapshot leaves the live generator untouched, so
// the replayed random sequence differs from the original run.
//
// See also: `engine.rs` for capture/restore, `runner.rs` for seek.

use crate::error::SimError;
use crate::event::QueueSnapshot;
use crate::world::WorldSnapshot;
use eventide_prng::{GeneratorState, RandomSource};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::Hasher;
use tracing::warn;

/// Stable 64-bit hash of a value's JSON encoding. Used to compare states
/// across runs and after restores.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<u64> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = FxHasher::default();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

// ---------------------------------------------------------------------------
// Snapshot records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RngState {
    pub capture_time: f64,
    pub event_count: u64,
    pub generator_type: String,
    #[serde(rename = "stateBlob")]
    pub state: Option<GeneratorState>,
}

impl RngState {
    pub fn capture(rng: &dyn RandomSource, capture_time: f64, event_count: u64) -> Self {
        let state = rng.capture_state();
        if state.is_none() {
            warn!(
                generator = rng.generator_name(),
                time = capture_time,
                "generator does not expose state; restore will not replay its sequence"
            );
        }
        Self {
            capture_time,
            event_count,
            generator_type: rng.generator_name().to_owned(),
            state,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimSnapshot {
    time: f64,
    events_processed: u64,
    world: WorldSnapshot,
    queue: QueueSnapshot,
    rng: RngState,
}

impl SimSnapshot {
    pub(crate) fn new(
        time: f64,
        events_processed: u64,
        world: WorldSnapshot,
        queue: QueueSnapshot,
        rng: RngState,
    ) -> Self {
        Self {
            time,
            events_processed,
            world,
            queue,
            rng,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn world(&self) -> &WorldSnapshot {
        &self.world
    }

    pub fn queue(&self) -> &QueueSnapshot {
        &self.queue
    }

    pub fn rng(&self) -> &RngState {
        &self.rng
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn fingerprint(&self) -> serde_json::Result<u64> {
        fingerprint(self)
    }
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Index key ordering capture times with `total_cmp`. `-0.0` is folded into
/// `0.0` so both spell the same instant.
#[derive(Clone, Copy, Debug)]
struct TimeKey(f64);

impl TimeKey {
    fn new(time: f64) -> Self {
        Self(if time == 0.0 { 0.0 } else { time })
    }
}

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Fixed-capacity ring of snapshots indexed by capture time.
///
/// When two retained snapshots share a capture time, lookups return the
/// more recently added one.
#[derive(Clone, Debug)]
pub struct SnapshotBuffer {
    slots: Vec<Option<SimSnapshot>>,
    cursor: usize,
    index: BTreeMap<TimeKey, usize>,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Result<Self, SimError> {
        if capacity == 0 {
            return Err(SimError::invalid_argument(
                "snapshot buffer capacity must be at least 1",
            ));
        }
        Ok(Self::allocate(capacity))
    }

    /// Caller guarantees `capacity >= 1`.
    pub(crate) fn allocate(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            cursor: 0,
            index: BTreeMap::new(),
        }
    }

    /// Insert at the write cursor, evicting the oldest snapshot when full.
    pub fn add(&mut self, snapshot: SimSnapshot) -> &SimSnapshot {
        let cursor = self.cursor;
        if let Some(evicted) = self.slots[cursor].take() {
            let key = TimeKey::new(evicted.time);
            if self.index.get(&key) == Some(&cursor) {
                self.index.remove(&key);
            }
        }
        self.index.insert(TimeKey::new(snapshot.time), cursor);
        self.cursor = (cursor + 1) % self.slots.len();
        self.slots[cursor].insert(snapshot)
    }

    /// Exact-time lookup.
    pub fn try_get_by_time(&self, time: f64) -> Option<&SimSnapshot> {
        let slot = *self.index.get(&TimeKey::new(time))?;
        self.slots[slot].as_ref()
    }

    /// The retained snapshot with the greatest capture time `<= time`.
    pub fn try_get_latest_at_or_before(&self, time: f64) -> Option<&SimSnapshot> {
        if time.is_nan() {
            return None;
        }
        let (_, &slot) = self.index.range(..=TimeKey::new(time)).next_back()?;
        self.slots[slot].as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.index.clear();
        self.cursor = 0;
    }

    /// Every retained snapshot, ordered by capture time then insertion.
    pub fn all(&self) -> Vec<&SimSnapshot> {
        let cap = self.slots.len();
        // Oldest slot first, so a stable sort keeps insertion order for ties.
        let mut retained: Vec<&SimSnapshot> = (0..cap)
            .filter_map(|i| self.slots[(self.cursor + i) % cap].as_ref())
            .collect();
        retained.sort_by(|a, b| TimeKey::new(a.time).cmp(&TimeKey::new(b.time)));
        retained
    }
}

// ---------------------------------------------------------------------------
// Capture policy
// ---------------------------------------------------------------------------

/// When the real-time loop captures snapshots, and how many it keeps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotPolicy {
    event_interval: Option<u64>,
    time_interval: Option<f64>,
    max_snapshots: usize,
}

impl SnapshotPolicy {
    pub fn new(
        event_interval: Option<u64>,
        time_interval: Option<f64>,
        max_snapshots: usize,
    ) -> Result<Self, SimError> {
        if event_interval.is_none() && time_interval.is_none() {
            return Err(SimError::invalid_argument(
                "snapshot policy needs an event interval or a time interval",
            ));
        }
        if event_interval == Some(0) {
            return Err(SimError::invalid_argument(
                "snapshot event interval must be positive",
            ));
        }
        if time_interval.is_some_and(|t| !(t.is_finite() && t > 0.0)) {
            return Err(SimError::invalid_argument(
                "snapshot time interval must be positive and finite",
            ));
        }
        if max_snapshots == 0 {
            return Err(SimError::invalid_argument(
                "snapshot policy must retain at least 1 snapshot",
            ));
        }
        Ok(Self {
            event_interval,
            time_interval,
            max_snapshots,
        })
    }

    pub fn event_interval(&self) -> Option<u64> {
        self.event_interval
    }

    pub fn time_interval(&self) -> Option<f64> {
        self.time_interval
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Whether a frame that processed `processed_in_frame` events, leaving
    /// the engine at `time` with `events_processed` total, should capture.
    pub fn should_capture(
        &self,
        processed_in_frame: u64,
        events_processed: u64,
        time: f64,
        last_capture_time: Option<f64>,
    ) -> bool {
        if processed_in_frame == 0 {
            return false;
        }
        let by_events = self
            .event_interval
            .is_some_and(|n| events_processed % n == 0);
        let by_time = self.time_interval.is_some_and(|dt| match last_capture_time {
            Some(last) => time - last >= dt,
            None => true,
        });
        by_events || by_time
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            event_interval: Some(10),
            time_interval: None,
            max_snapshots: 10,
        }
    }
}
