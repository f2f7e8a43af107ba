// eventide_sim: deterministic discrete-event simulation kernel.
//
// The kernel advances a logical clock by repeatedly dequeuing the
// earliest-ordered pending event and dispatching it to registered handlers,
// and guarantees that a run can be captured, rewound, and replayed
// bit-for-bit. It has no I/O of its own beyond config loading; embedding
// code owns the world's domain content and the handlers that act on it.
//
// Module overview:
// - `engine.rs`:   SimEngine run loop, SimContext handler view, System trait, handler registry.
// - `event.rs`:    Event, EventSpec, Payload, and the (time, priority, sequence) EventQueue.
// - `world.rs`:    Entity/component/global store and WorldSnapshot.
// - `blob.rs`:     Type-erased deep-cloneable values (components, globals, typed payloads).
// - `snapshot.rs`: Composite SimSnapshot, RngState, SnapshotBuffer ring, SnapshotPolicy.
// - `runner.rs`:   SimRunner stepping, seek, and the async real-time pacing loop.
// - `time.rs`:     TimeMode / TimeModel (discrete turns vs continuous time).
// - `metrics.rs`:  MetricsSink trait plus in-memory and no-op sinks.
// - `config.rs`:   SimConfig loaded from JSON.
// - `error.rs`:    SimError.
// - `rng`:         Re-exported from `eventide_prng` (RandomSource, Pcg32, DefaultRandomSource).
//
// **Critical constraint: determinism.** Given the same seed, initial world,
// and schedule, every run produces the same trace. All randomness flows
// through the engine's `RandomSource`; ordered state lives in `BTreeMap`s;
// the real-time runner is the only place wall-clock time enters, and it only
// chooses how far to advance, never what happens.

pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub use eventide_prng as rng;
pub mod runner;
pub mod snapshot;
pub mod time;
pub mod world;

pub use engine::{OverrunPolicy, RunResult, SimContext, SimEngine, StepResult, StopReason, System};
pub use error::SimError;
pub use event::{Event, EventQueue, EventSpec, Payload};
pub use runner::{RealTimeReport, RunnerControl, SimRunner};
pub use snapshot::{SimSnapshot, SnapshotBuffer, SnapshotPolicy};
pub use time::{TimeMode, TimeModel};
pub use world::{Entity, EntityId, World};
