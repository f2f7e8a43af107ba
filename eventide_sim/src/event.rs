// Scheduled events and the priority queue that orders them.
//
// An `Event` is an immutable unit of scheduled work: a simulated time, a
// priority, a queue-assigned sequence number, a type string used to route it
// to handlers, a payload, and the handler that will run it. Events are built
// from an `EventSpec` and only become `Event`s when the queue stamps them
// with a sequence number.
//
// `EventQueue` is a min-heap over `(time, priority, sequence)`. Rust's
// `BinaryHeap` is a max-heap, so the heap entry reverses the ordering.
// Sequence numbers come from a per-queue counter that is never reset except
// by restoring a `QueueSnapshot`, which carries the counter along with the
// pending events so numbering resumes exactly where the capture left it.
//
// See also: `engine.rs` for the run loop that drains the queue,
// `snapshot.rs` for composite snapshots that embed `QueueSnapshot`.
//
// **Critical constraint: determinism.** Replay depends on the queue ordering
// being a total order that is independent of heap layout. Times are compared
// with `f64::total_cmp`; NaN times are rejected at enqueue so the order never
// has to rank them.

use crate::blob::{AnyBlob, Blob};
use crate::engine::SimContext;
use crate::error::SimError;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Payloads and handlers
// ---------------------------------------------------------------------------

/// Event data: either a loose key/value map or one strongly typed value.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Map(BTreeMap<String, serde_json::Value>),
    Typed(AnyBlob),
}

impl Payload {
    pub fn typed<T: Blob>(value: T) -> Self {
        Self::Typed(AnyBlob::new(value))
    }

    /// Build a map payload from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

/// Per-event handler callback.
pub type HandlerFn =
    Arc<dyn Fn(&mut SimContext<'_>, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Who runs an event when it is dequeued.
#[derive(Clone, Default)]
pub enum EventHandler {
    /// Fan out to every handler and system registered for the event type.
    #[default]
    Dispatch,
    /// Run this callback only, bypassing the registry.
    Custom(HandlerFn),
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => f.write_str("Dispatch"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything needed to schedule an event except its time and sequence.
#[derive(Clone, Debug)]
pub struct EventSpec {
    event_type: String,
    priority: i32,
    payload: Payload,
    handler: EventHandler,
}

impl EventSpec {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            priority: 0,
            payload: Payload::default(),
            handler: EventHandler::Dispatch,
        }
    }

    /// Lower priorities run first among events at the same time.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_typed<T: Blob>(self, value: T) -> Self {
        self.with_payload(Payload::typed(value))
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut SimContext<'_>, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler = EventHandler::Custom(Arc::new(handler));
        self
    }
}

impl From<&str> for EventSpec {
    fn from(event_type: &str) -> Self {
        Self::new(event_type)
    }
}

impl From<String> for EventSpec {
    fn from(event_type: String) -> Self {
        Self::new(event_type)
    }
}

/// A scheduled event. Immutable once enqueued.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    time: f64,
    priority: i32,
    sequence: u64,
    #[serde(rename = "type")]
    event_type: String,
    payload: Payload,
    #[serde(skip)]
    handler: EventHandler,
}

impl Event {
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn handler(&self) -> &EventHandler {
        &self.handler
    }

    /// The typed payload, if there is one and it is a `T`.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Typed(blob) => blob.downcast_ref::<T>(),
            Payload::Map(_) => None,
        }
    }

    /// Like `payload_as`, but reports what was found on mismatch.
    pub fn typed_payload<T: 'static>(&self) -> Result<&T, SimError> {
        let actual = match &self.payload {
            Payload::Typed(blob) => match blob.downcast_ref::<T>() {
                Some(value) => return Ok(value),
                None => blob.type_name().to_owned(),
            },
            Payload::Map(_) => "map payload".to_owned(),
        };
        Err(SimError::PayloadType {
            expected: std::any::type_name::<T>(),
            actual,
        })
    }

    /// Look up a key in a map payload.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match &self.payload {
            Payload::Map(map) => map.get(key),
            Payload::Typed(_) => None,
        }
    }

    /// Queue order: `(time, priority, sequence)` ascending.
    fn order(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Heap entry. Reversed so the max-heap pops the smallest key first.
#[derive(Clone, Debug)]
struct Queued(Event);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.order(&self.0)
    }
}

/// Priority queue of pending events.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Queued>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `spec` with the next sequence number and insert it at `time`.
    /// Returns the assigned sequence.
    pub fn enqueue(&mut self, time: f64, spec: impl Into<EventSpec>) -> Result<u64, SimError> {
        if time.is_nan() {
            return Err(SimError::invalid_argument("event time must not be NaN"));
        }
        let EventSpec {
            event_type,
            priority,
            payload,
            handler,
        } = spec.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Queued(Event {
            time,
            priority,
            sequence,
            event_type,
            payload,
            handler,
        }));
        Ok(sequence)
    }

    /// Put a previously dequeued event back with its original sequence.
    pub(crate) fn requeue(&mut self, event: Event) {
        self.heap.push(Queued(event));
    }

    /// Remove and return the earliest event.
    pub fn dequeue(&mut self) -> Option<Event> {
        self.heap.pop().map(|q| q.0)
    }

    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|q| &q.0)
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.peek().map(Event::time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The sequence number the next enqueue will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn capture_snapshot(&self) -> QueueSnapshot {
        let mut events: Vec<Event> = self.heap.iter().map(|q| q.0.clone()).collect();
        events.sort_by(Event::order);
        QueueSnapshot {
            events,
            next_sequence: self.next_sequence,
        }
    }

    /// Replace the queue contents wholesale. Nothing is dispatched.
    pub fn restore_snapshot(&mut self, snapshot: &QueueSnapshot) {
        self.heap = snapshot.events.iter().cloned().map(Queued).collect();
        self.next_sequence = snapshot.next_sequence;
    }
}

/// Deep copy of every pending event plus the sequence counter.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    events: Vec<Event>,
    next_sequence: u64,
}

impl QueueSnapshot {
    /// Pending events in dispatch order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn fingerprint(&self) -> serde_json::Result<u64> {
        crate::snapshot::fingerprint(self)
    }
}
