// The simulation engine: queue, world, RNG, handler registry, run loop.
//
// `SimEngine` repeatedly dequeues the earliest pending event, advances the
// clock to its time, and runs its handler. An event's handler is either the
// engine's dispatcher, which fans out to every handler and system registered
// for the event type in registration order, or a custom callback attached
// when the event was scheduled.
//
// Handlers never see the engine itself. They get a `SimContext`, which
// exposes the clock, time model, world, RNG, metrics, scheduling, and `stop`,
// but not the handler tables or the run flag.
//
// ## Run loop
//
// `process_until(until, max_events)` is the core loop:
//
//   1. While the run flag is set and the queue is non-empty, dequeue.
//   2. If `until` is set and the event lies beyond it, stop with
//      `TimeReached`. The overrun event is dropped (`OverrunPolicy::Discard`,
//      the default) or put back with its original sequence
//      (`OverrunPolicy::Requeue`).
//   3. Otherwise set the clock, dispatch, count it, and stop with
//      `MaxEventsReached` once `max_events` have run in this batch.
//
// A handler error aborts the remaining handlers for that event and is
// returned as `SimError::Handler`. Nothing is rolled back.
//
// `try_process_next_event` runs exactly one event with no time bound.
//
// See also: `event.rs` for the queue, `snapshot.rs` for the composite
// snapshot produced by `capture_snapshot`, `runner.rs` for stepping, seek,
// and real-time pacing built on this contract.
//
// **Critical constraint: determinism.** Given the same seed, initial world,
// and schedule, two engines produce identical traces. All randomness must
// come from `SimContext::rng`. The handler route table is a hash map, but it
// is only ever looked up, never iterated.

use crate::config::SimConfig;
use crate::error::SimError;
use crate::event::{Event, EventHandler, EventQueue, EventSpec};
use crate::metrics::{self, MetricsRegistry, MetricsSink};
use crate::snapshot::{RngState, SimSnapshot};
use crate::time::TimeModel;
use crate::world::World;
use eventide_prng::RandomSource;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    QueueEmpty,
    TimeReached,
    MaxEventsReached,
    StoppedByUser,
}

/// What to do with the first event found beyond a `process_until` bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Drop it. Matches the historical behavior of the run loop.
    #[default]
    Discard,
    /// Put it back with its original sequence number.
    Requeue,
}

/// Outcome of one batch of processing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepResult {
    pub stop_reason: StopReason,
    pub final_time: f64,
    pub events_processed: u64,
    pub events_remaining: usize,
    pub wall_clock_duration: Duration,
}

impl StepResult {
    /// Whether another batch could make progress.
    pub fn can_continue(&self) -> bool {
        self.stop_reason != StopReason::StoppedByUser && self.events_remaining > 0
    }
}

/// `StepResult` plus world size, returned by `SimEngine::run`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunResult {
    pub stop_reason: StopReason,
    pub final_time: f64,
    pub events_processed: u64,
    pub events_remaining: usize,
    pub wall_clock_duration: Duration,
    pub entity_count: usize,
}

impl RunResult {
    fn new(step: StepResult, entity_count: usize) -> Self {
        Self {
            stop_reason: step.stop_reason,
            final_time: step.final_time,
            events_processed: step.events_processed,
            events_remaining: step.events_remaining,
            wall_clock_duration: step.wall_clock_duration,
            entity_count,
        }
    }

    pub fn events_per_second(&self) -> f64 {
        let secs = self.wall_clock_duration.as_secs_f64();
        if secs > 0.0 {
            self.events_processed as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at t={:.3}: {} events in {:.3}ms ({:.0} events/s), {} pending, {} entities",
            self.stop_reason,
            self.final_time,
            self.events_processed,
            self.wall_clock_duration.as_secs_f64() * 1000.0,
            self.events_per_second(),
            self.events_remaining,
            self.entity_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Handler context and registry
// ---------------------------------------------------------------------------

/// State handlers are allowed to touch.
struct EngineCore {
    time: f64,
    time_model: TimeModel,
    world: World,
    queue: EventQueue,
    rng: Box<dyn RandomSource>,
    metrics: Box<dyn MetricsSink>,
    running: bool,
    events_processed: u64,
}

impl EngineCore {
    fn schedule(&mut self, time: f64, spec: EventSpec) -> Result<u64, SimError> {
        if time.is_nan() {
            return Err(SimError::invalid_argument("event time must not be NaN"));
        }
        if time < self.time {
            return Err(SimError::invalid_argument(format!(
                "cannot schedule at {time}: earlier than current time {}",
                self.time
            )));
        }
        self.queue.enqueue(time, spec)
    }
}

/// The view of the engine handed to handlers and systems.
pub struct SimContext<'a> {
    core: &'a mut EngineCore,
}

impl SimContext<'_> {
    pub fn time(&self) -> f64 {
        self.core.time
    }

    pub fn time_model(&self) -> TimeModel {
        self.core.time_model
    }

    pub fn events_processed(&self) -> u64 {
        self.core.events_processed
    }

    pub fn world(&self) -> &World {
        &self.core.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.core.world
    }

    pub fn rng(&mut self) -> &mut dyn RandomSource {
        self.core.rng.as_mut()
    }

    pub fn metrics(&mut self) -> &mut dyn MetricsSink {
        self.core.metrics.as_mut()
    }

    /// Schedule at an absolute time, which must not precede the current time.
    pub fn schedule(&mut self, time: f64, spec: impl Into<EventSpec>) -> Result<u64, SimError> {
        self.core.schedule(time, spec.into())
    }

    /// Schedule `dt` after the current time.
    pub fn schedule_in(&mut self, dt: f64, spec: impl Into<EventSpec>) -> Result<u64, SimError> {
        let time = self.core.time + dt;
        self.core.schedule(time, spec.into())
    }

    /// Ask the run loop to stop before the next event.
    pub fn stop(&mut self) {
        self.core.running = false;
    }
}

/// A reusable bundle of handlers for a declared set of event types.
pub trait System: Send {
    fn handled_event_types(&self) -> Vec<String>;

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, evt: &Event) -> anyhow::Result<()>;
}

type BoxedHandler = Box<dyn FnMut(&mut SimContext<'_>, &Event) -> anyhow::Result<()> + Send>;

#[derive(Clone, Copy, Debug)]
enum Route {
    Handler(usize),
    System(usize),
}

#[derive(Default)]
struct HandlerRegistry {
    routes: FxHashMap<String, SmallVec<[Route; 4]>>,
    handlers: Vec<BoxedHandler>,
    systems: Vec<Box<dyn System>>,
}

impl HandlerRegistry {
    fn dispatch(&mut self, ctx: &mut SimContext<'_>, evt: &Event) -> anyhow::Result<()> {
        let Some(routes) = self.routes.get(evt.event_type()) else {
            return Ok(());
        };
        for route in routes {
            match *route {
                Route::Handler(i) => {
                    if let Some(handler) = self.handlers.get_mut(i) {
                        handler(ctx, evt)?;
                    }
                }
                Route::System(i) => {
                    if let Some(system) = self.systems.get_mut(i) {
                        system.handle_event(ctx, evt)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn route_count(&self, event_type: &str) -> usize {
        self.routes.get(event_type).map_or(0, SmallVec::len)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SimEngine {
    core: EngineCore,
    handlers: HandlerRegistry,
    overrun: OverrunPolicy,
}

impl SimEngine {
    /// An engine with an empty world and queue, reporting into an in-memory
    /// `MetricsRegistry`.
    pub fn new(time_model: TimeModel, rng: Box<dyn RandomSource>) -> Self {
        Self::with_parts(time_model, World::new(), EventQueue::new(), rng)
    }

    pub fn with_parts(
        time_model: TimeModel,
        world: World,
        queue: EventQueue,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            core: EngineCore {
                time: time_model.initial_time(),
                time_model,
                world,
                queue,
                rng,
                metrics: Box::new(MetricsRegistry::new()),
                running: false,
                events_processed: 0,
            },
            handlers: HandlerRegistry::default(),
            overrun: OverrunPolicy::default(),
        }
    }

    pub fn from_config(config: &SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self::new(config.time_model()?, config.build_rng()).with_overrun(config.overrun))
    }

    pub fn with_metrics(mut self, metrics: Box<dyn MetricsSink>) -> Self {
        self.core.metrics = metrics;
        self
    }

    pub fn with_overrun(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }

    // -- accessors --

    pub fn time(&self) -> f64 {
        self.core.time
    }

    pub fn time_model(&self) -> TimeModel {
        self.core.time_model
    }

    pub fn events_processed(&self) -> u64 {
        self.core.events_processed
    }

    pub fn is_running(&self) -> bool {
        self.core.running
    }

    pub fn overrun(&self) -> OverrunPolicy {
        self.overrun
    }

    pub fn world(&self) -> &World {
        &self.core.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.core.world
    }

    pub fn queue(&self) -> &EventQueue {
        &self.core.queue
    }

    pub fn rng_mut(&mut self) -> &mut dyn RandomSource {
        self.core.rng.as_mut()
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.core.metrics.as_ref()
    }

    /// A handler-level view of the engine, for setup code that wants to use
    /// the same API handlers do.
    pub fn context(&mut self) -> SimContext<'_> {
        SimContext {
            core: &mut self.core,
        }
    }

    // -- scheduling and registration --

    pub fn schedule(&mut self, time: f64, spec: impl Into<EventSpec>) -> Result<u64, SimError> {
        self.core.schedule(time, spec.into())
    }

    pub fn schedule_in(&mut self, dt: f64, spec: impl Into<EventSpec>) -> Result<u64, SimError> {
        let time = self.core.time + dt;
        self.core.schedule(time, spec.into())
    }

    /// Append a handler for `event_type`. Handlers run in registration order.
    pub fn register_handler<F>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: FnMut(&mut SimContext<'_>, &Event) -> anyhow::Result<()> + Send + 'static,
    {
        let index = self.handlers.handlers.len();
        self.handlers.handlers.push(Box::new(handler));
        self.handlers
            .routes
            .entry(event_type.into())
            .or_default()
            .push(Route::Handler(index));
    }

    /// Route every type the system declares to it, after any handlers
    /// already registered for that type.
    pub fn register_system<S: System + 'static>(&mut self, system: S) {
        let index = self.handlers.systems.len();
        let types = system.handled_event_types();
        self.handlers.systems.push(Box::new(system));
        for event_type in types {
            self.handlers
                .routes
                .entry(event_type)
                .or_default()
                .push(Route::System(index));
        }
    }

    /// Number of handlers and systems that will see `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.route_count(event_type)
    }

    // -- running --

    /// Cooperative stop, observed before the next event is dequeued.
    pub fn stop(&mut self) {
        self.core.running = false;
    }

    pub fn process_until(
        &mut self,
        until: Option<f64>,
        max_events: Option<u64>,
    ) -> Result<StepResult, SimError> {
        if until.is_some_and(f64::is_nan) {
            return Err(SimError::invalid_argument("time bound must not be NaN"));
        }
        if max_events == Some(0) {
            return Err(SimError::invalid_argument("max_events must be at least 1"));
        }

        let started = Instant::now();
        self.core.running = true;
        let mut processed = 0u64;
        let mut reason = StopReason::QueueEmpty;

        while self.core.running {
            self.core
                .metrics
                .set_gauge(metrics::QUEUE_SIZE, self.core.queue.len() as f64);
            let Some(evt) = self.core.queue.dequeue() else {
                break;
            };

            if until.is_some_and(|bound| evt.time() > bound) {
                self.handle_overrun(evt);
                reason = StopReason::TimeReached;
                break;
            }

            if let Err(err) = self.execute(&evt) {
                self.core.running = false;
                return Err(err);
            }
            processed += 1;

            if max_events.is_some_and(|max| processed >= max) {
                reason = StopReason::MaxEventsReached;
                break;
            }
        }

        if !self.core.running {
            reason = StopReason::StoppedByUser;
        }
        self.core.running = false;

        let result = StepResult {
            stop_reason: reason,
            final_time: self.core.time,
            events_processed: processed,
            events_remaining: self.core.queue.len(),
            wall_clock_duration: started.elapsed(),
        };
        debug!(
            reason = ?result.stop_reason,
            time = result.final_time,
            processed = result.events_processed,
            remaining = result.events_remaining,
            "batch finished"
        );
        Ok(result)
    }

    /// `process_until` plus world size.
    pub fn run(
        &mut self,
        until: Option<f64>,
        max_events: Option<u64>,
    ) -> Result<RunResult, SimError> {
        let step = self.process_until(until, max_events)?;
        Ok(RunResult::new(step, self.core.world.entity_count()))
    }

    /// Run exactly one event, ignoring any time bound. Returns the event, or
    /// `None` if the queue was empty.
    pub fn try_process_next_event(&mut self) -> Result<Option<Event>, SimError> {
        self.core
            .metrics
            .set_gauge(metrics::QUEUE_SIZE, self.core.queue.len() as f64);
        let Some(evt) = self.core.queue.dequeue() else {
            return Ok(None);
        };
        self.execute(&evt)?;
        Ok(Some(evt))
    }

    fn handle_overrun(&mut self, evt: Event) {
        match self.overrun {
            OverrunPolicy::Discard => debug!(
                time = evt.time(),
                sequence = evt.sequence(),
                event_type = evt.event_type(),
                "discarding event beyond time bound"
            ),
            OverrunPolicy::Requeue => self.core.queue.requeue(evt),
        }
    }

    fn execute(&mut self, evt: &Event) -> Result<(), SimError> {
        self.core.time = evt.time();
        self.core.metrics.set_gauge(metrics::SIM_TIME, evt.time());
        trace!(
            time = evt.time(),
            sequence = evt.sequence(),
            event_type = evt.event_type(),
            "dispatching event"
        );

        let mut ctx = SimContext {
            core: &mut self.core,
        };
        let outcome = match evt.handler() {
            EventHandler::Dispatch => self.handlers.dispatch(&mut ctx, evt),
            EventHandler::Custom(handler) => (**handler)(&mut ctx, evt),
        };
        outcome.map_err(|err| SimError::Handler {
            event_type: evt.event_type().to_owned(),
            time: evt.time(),
            source: err.into(),
        })?;

        self.core.events_processed += 1;
        self.core
            .metrics
            .increment_counter(metrics::EVENTS_PROCESSED, 1);
        Ok(())
    }

    // -- snapshots --

    pub fn capture_snapshot(&self) -> SimSnapshot {
        let core = &self.core;
        let snapshot = SimSnapshot::new(
            core.time,
            core.events_processed,
            core.world.capture_snapshot(),
            core.queue.capture_snapshot(),
            RngState::capture(core.rng.as_ref(), core.time, core.events_processed),
        );
        debug!(
            time = core.time,
            events_processed = core.events_processed,
            pending = core.queue.len(),
            "captured snapshot"
        );
        snapshot
    }

    /// Replace clock, counters, world, queue, and (when the snapshot carries
    /// it) RNG state. A rejected RNG state leaves the engine untouched.
    pub fn restore_snapshot(&mut self, snapshot: &SimSnapshot) -> Result<(), SimError> {
        match &snapshot.rng().state {
            Some(state) => self.core.rng.restore_state(state)?,
            None => debug!(
                generator = %snapshot.rng().generator_type,
                "snapshot has no generator state; rng left as is"
            ),
        }
        let core = &mut self.core;
        core.running = false;
        core.time = snapshot.time();
        core.events_processed = snapshot.events_processed();
        core.world.restore_snapshot(snapshot.world());
        core.queue.restore_snapshot(snapshot.queue());
        debug!(
            time = core.time,
            events_processed = core.events_processed,
            pending = core.queue.len(),
            "restored snapshot"
        );
        Ok(())
    }

    /// Record an event at info level as `[t=...] TYPE {payload}`. Usable as a
    /// handler body or from tests.
    pub fn log_event(evt: &Event) {
        let payload = serde_json::to_string(evt.payload())
            .unwrap_or_else(|err| format!("<unencodable payload: {err}>"));
        info!(
            target: "eventide_sim::events",
            "[t={:.3}] {} {}",
            evt.time(),
            evt.event_type(),
            payload
        );
    }
}

impl fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEngine")
            .field("time", &self.core.time)
            .field("time_model", &self.core.time_model)
            .field("events_processed", &self.core.events_processed)
            .field("pending", &self.core.queue.len())
            .field("entities", &self.core.world.entity_count())
            .field("generator", &self.core.rng.generator_name())
            .field("overrun", &self.overrun)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::metrics::NoopMetrics;
    use crate::world::{Entity, EntityId};
    use eventide_prng::{DefaultRandomSource, Pcg32};
    use std::sync::{Arc, Mutex};

    fn engine() -> SimEngine {
        SimEngine::new(TimeModel::default(), Box::new(Pcg32::new(42)))
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(
        log: &Log,
        tag: &'static str,
    ) -> impl FnMut(&mut SimContext<'_>, &Event) -> anyhow::Result<()> + Send + 'static {
        let log = Arc::clone(log);
        move |ctx, evt| {
            log.lock()
                .unwrap()
                .push(format!("{tag}:{}@{}", evt.event_type(), ctx.time()));
            Ok(())
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    struct Counter {
        types: Vec<String>,
        log: Log,
    }

    impl System for Counter {
        fn handled_event_types(&self) -> Vec<String> {
            self.types.clone()
        }

        fn handle_event(&mut self, _ctx: &mut SimContext<'_>, evt: &Event) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("system:{}", evt.event_type()));
            Ok(())
        }
    }

    #[test]
    fn processes_in_queue_order() {
        let log = Log::default();
        let mut sim = engine();
        for t in ["A", "B", "C"] {
            sim.register_handler(t, recorder(&log, "h"));
        }
        sim.schedule(1.0, EventSpec::new("A").with_priority(5)).unwrap();
        sim.schedule(1.0, EventSpec::new("B").with_priority(1)).unwrap();
        sim.schedule(2.0, "C").unwrap();

        let result = sim.process_until(None, None).unwrap();
        assert_eq!(result.stop_reason, StopReason::QueueEmpty);
        assert_eq!(result.events_processed, 3);
        assert_eq!(result.final_time, 2.0);
        assert_eq!(entries(&log), vec!["h:B@1", "h:A@1", "h:C@2"]);
    }

    #[test]
    fn handlers_then_systems_in_registration_order() {
        let log = Log::default();
        let mut sim = engine();
        sim.register_handler("PING", recorder(&log, "first"));
        sim.register_system(Counter {
            types: vec!["PING".into(), "PONG".into()],
            log: Arc::clone(&log),
        });
        sim.register_handler("PING", recorder(&log, "second"));
        assert_eq!(sim.handler_count("PING"), 3);
        assert_eq!(sim.handler_count("PONG"), 1);
        assert_eq!(sim.handler_count("NONE"), 0);

        sim.schedule(0.0, "PING").unwrap();
        sim.schedule(0.0, "PONG").unwrap();
        sim.process_until(None, None).unwrap();
        assert_eq!(
            entries(&log),
            vec!["first:PING@0", "system:PING", "second:PING@0", "system:PONG"]
        );
    }

    #[test]
    fn unhandled_events_still_advance_and_count() {
        let mut sim = engine();
        sim.schedule(3.0, "NOBODY").unwrap();
        let result = sim.process_until(None, None).unwrap();
        assert_eq!(result.events_processed, 1);
        assert_eq!(sim.time(), 3.0);
        assert_eq!(sim.events_processed(), 1);
    }

    #[test]
    fn time_bound_discards_overrun_event_by_default() {
        let mut sim = engine();
        for t in [1.0, 2.0, 3.0, 4.0] {
            sim.schedule(t, "E").unwrap();
        }
        let result = sim.process_until(Some(2.5), None).unwrap();
        assert_eq!(result.stop_reason, StopReason::TimeReached);
        assert_eq!(result.events_processed, 2);
        assert_eq!(result.final_time, 2.0);
        // The event at 3.0 was dequeued past the bound and dropped.
        assert_eq!(result.events_remaining, 1);
        assert_eq!(sim.queue().peek_time(), Some(4.0));
    }

    #[test]
    fn time_bound_requeues_when_configured() {
        let mut sim = engine().with_overrun(OverrunPolicy::Requeue);
        for t in [1.0, 3.0, 3.0] {
            sim.schedule(t, "E").unwrap();
        }
        let result = sim.process_until(Some(2.0), None).unwrap();
        assert_eq!(result.stop_reason, StopReason::TimeReached);
        assert_eq!(result.events_remaining, 2);
        let next = sim.queue().peek().unwrap();
        assert_eq!((next.time(), next.sequence()), (3.0, 1));
    }

    #[test]
    fn bound_is_inclusive() {
        let mut sim = engine();
        sim.schedule(1.0, "E").unwrap();
        sim.schedule(2.0, "E").unwrap();
        let result = sim.process_until(Some(2.0), None).unwrap();
        assert_eq!(result.events_processed, 2);
        assert_eq!(result.stop_reason, StopReason::QueueEmpty);
    }

    #[test]
    fn max_events_limits_batch() {
        let mut sim = engine();
        for i in 0..5 {
            sim.schedule(f64::from(i), "E").unwrap();
        }
        let result = sim.process_until(None, Some(2)).unwrap();
        assert_eq!(result.stop_reason, StopReason::MaxEventsReached);
        assert_eq!(result.events_processed, 2);
        assert!(result.can_continue());

        // Each call is an independent batch.
        let result = sim.process_until(None, Some(2)).unwrap();
        assert_eq!(result.events_processed, 2);
        assert_eq!(sim.events_processed(), 4);
    }

    #[test]
    fn invalid_bounds_are_rejected_before_mutation() {
        let mut sim = engine();
        sim.schedule(1.0, "E").unwrap();
        assert!(matches!(
            sim.process_until(Some(f64::NAN), None),
            Err(SimError::InvalidArgument { .. })
        ));
        assert!(sim.process_until(None, Some(0)).is_err());
        assert_eq!(sim.queue().len(), 1);
    }

    #[test]
    fn stop_from_handler_is_cooperative() {
        let mut sim = engine();
        sim.register_handler("HALT", |ctx, _| {
            ctx.stop();
            Ok(())
        });
        sim.schedule(1.0, "E").unwrap();
        sim.schedule(2.0, "HALT").unwrap();
        sim.schedule(3.0, "E").unwrap();
        let result = sim.process_until(None, None).unwrap();
        assert_eq!(result.stop_reason, StopReason::StoppedByUser);
        assert_eq!(result.events_processed, 2);
        assert_eq!(result.events_remaining, 1);
        assert!(!result.can_continue());
        assert!(!sim.is_running());

        // The flag resets on the next batch.
        let result = sim.process_until(None, None).unwrap();
        assert_eq!(result.stop_reason, StopReason::QueueEmpty);
    }

    #[test]
    fn try_process_next_event_ignores_bounds() {
        let mut sim = engine();
        assert!(sim.try_process_next_event().unwrap().is_none());
        sim.schedule(100.0, "FAR").unwrap();
        let evt = sim.try_process_next_event().unwrap().unwrap();
        assert_eq!(evt.event_type(), "FAR");
        assert_eq!(sim.time(), 100.0);
        assert_eq!(sim.events_processed(), 1);
    }

    #[test]
    fn handler_error_aborts_remaining_handlers() {
        let log = Log::default();
        let mut sim = engine();
        sim.register_handler("E", recorder(&log, "before"));
        sim.register_handler("E", |_, _| Err(anyhow::anyhow!("exploded")));
        sim.register_handler("E", recorder(&log, "after"));
        sim.schedule(1.5, "E").unwrap();
        sim.schedule(2.0, "E").unwrap();

        let err = sim.process_until(None, None).unwrap_err();
        match &err {
            SimError::Handler {
                event_type, time, ..
            } => {
                assert_eq!(event_type, "E");
                assert_eq!(*time, 1.5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("exploded"));
        assert_eq!(entries(&log), vec!["before:E@1.5"]);
        // No rollback: time moved, the failing event is gone, the counter did not advance.
        assert_eq!(sim.time(), 1.5);
        assert_eq!(sim.queue().len(), 1);
        assert_eq!(sim.events_processed(), 0);
    }

    #[test]
    fn custom_handler_bypasses_registry() {
        let log = Log::default();
        let mut sim = engine();
        sim.register_handler("E", recorder(&log, "registered"));
        let custom_log = Arc::clone(&log);
        sim.schedule(
            1.0,
            EventSpec::new("E").with_handler(move |_, evt| {
                custom_log
                    .lock()
                    .unwrap()
                    .push(format!("custom:{}", evt.sequence()));
                Ok(())
            }),
        )
        .unwrap();
        sim.process_until(None, None).unwrap();
        assert_eq!(entries(&log), vec!["custom:0"]);
    }

    #[test]
    fn handlers_schedule_follow_ups() {
        let mut sim = engine();
        sim.register_handler("GROW", |ctx, evt| {
            let n = evt.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
            if n < 3 {
                ctx.schedule_in(0.5, EventSpec::new("GROW").with_payload(Payload::map([("n", n + 1)])))?;
            }
            Ok(())
        });
        sim.schedule(0.0, EventSpec::new("GROW").with_payload(Payload::map([("n", 0)])))
            .unwrap();
        let result = sim.run(None, None).unwrap();
        assert_eq!(result.events_processed, 4);
        assert_eq!(result.final_time, 1.5);
    }

    #[test]
    fn scheduling_in_the_past_is_rejected() {
        let mut sim = engine();
        sim.schedule(5.0, "E").unwrap();
        sim.process_until(None, None).unwrap();
        assert!(matches!(
            sim.schedule(4.0, "E"),
            Err(SimError::InvalidArgument { .. })
        ));
        assert!(sim.schedule_in(-1.0, "E").is_err());
        assert!(sim.schedule(f64::NAN, "E").is_err());
        assert_eq!(sim.schedule_in(0.0, "E").unwrap(), 1);
    }

    #[test]
    fn handlers_reach_world_and_rng() {
        let mut sim = engine();
        sim.world_mut()
            .add_entity(Entity::new(EntityId(1), "elf").with_component("hp", 10_i64));
        sim.register_handler("HIT", |ctx, _| {
            let dmg = i64::from(ctx.rng().next_int(1, 4)?);
            if let Some(hp) = ctx.world_mut().component_mut::<i64>(EntityId(1), "hp") {
                *hp -= dmg;
            }
            Ok(())
        });
        sim.schedule(0.0, "HIT").unwrap();
        sim.process_until(None, None).unwrap();
        let hp = *sim.world().component::<i64>(EntityId(1), "hp").unwrap();
        assert!((7..=9).contains(&hp), "hp = {hp}");
    }

    #[test]
    fn writes_metrics() {
        let mut sim = engine();
        sim.schedule(1.0, "E").unwrap();
        sim.schedule(2.0, "E").unwrap();
        sim.process_until(None, None).unwrap();
        assert_eq!(sim.metrics().counter(metrics::EVENTS_PROCESSED), Some(2));
        assert_eq!(sim.metrics().gauge(metrics::SIM_TIME), Some(2.0));
        assert_eq!(sim.metrics().gauge(metrics::QUEUE_SIZE), Some(0.0));

        let mut quiet = engine().with_metrics(Box::new(NoopMetrics));
        quiet.schedule(1.0, "E").unwrap();
        quiet.process_until(None, None).unwrap();
        assert_eq!(quiet.metrics().counter(metrics::EVENTS_PROCESSED), None);
    }

    #[test]
    fn run_reports_entities() {
        let mut sim = engine();
        sim.world_mut().add_entity(Entity::new(EntityId(1), "a"));
        sim.world_mut().add_entity(Entity::new(EntityId(2), "b"));
        sim.schedule(1.0, "E").unwrap();
        let result = sim.run(None, None).unwrap();
        assert_eq!(result.entity_count, 2);
        let summary = result.to_string();
        assert!(summary.contains("QueueEmpty"), "{summary}");
        assert!(summary.contains("2 entities"), "{summary}");
    }

    #[test]
    fn events_per_second_with_zero_duration() {
        let result = RunResult {
            stop_reason: StopReason::QueueEmpty,
            final_time: 0.0,
            events_processed: 10,
            events_remaining: 0,
            wall_clock_duration: Duration::ZERO,
            entity_count: 0,
        };
        assert_eq!(result.events_per_second(), 0.0);
    }

    #[test]
    fn capture_then_restore_is_identity() {
        let mut sim = engine();
        sim.world_mut()
            .add_entity(Entity::new(EntityId(1), "elf").with_component("hp", 3_i32));
        sim.world_mut().set_global("seed", String::from("baseline"));
        sim.schedule(1.0, "E").unwrap();
        sim.schedule(2.0, "E").unwrap();
        sim.process_until(None, Some(1)).unwrap();

        let snapshot = sim.capture_snapshot();
        let before = snapshot.fingerprint().unwrap();
        sim.restore_snapshot(&snapshot).unwrap();
        let after = sim.capture_snapshot();
        assert_eq!(after.fingerprint().unwrap(), before);
        assert_eq!(sim.time(), 1.0);
        assert_eq!(sim.events_processed(), 1);
        assert_eq!(sim.queue().len(), 1);
    }

    #[test]
    fn restore_rewinds_world_queue_and_rng() {
        let mut sim = engine();
        sim.world_mut()
            .add_entity(Entity::new(EntityId(1), "elf").with_component("hp", 3_i32));
        sim.schedule(1.0, "E").unwrap();
        let snapshot = sim.capture_snapshot();
        let draws: Vec<f64> = (0..5).map(|_| sim.rng_mut().next_f64()).collect();

        sim.world_mut().add_entity(Entity::new(EntityId(2), "orc"));
        sim.process_until(None, None).unwrap();
        sim.schedule(9.0, "LATE").unwrap();

        sim.restore_snapshot(&snapshot).unwrap();
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.world().entity_count(), 1);
        assert_eq!(sim.queue().len(), 1);
        assert_eq!(sim.queue().next_sequence(), 1);
        let replay: Vec<f64> = (0..5).map(|_| sim.rng_mut().next_f64()).collect();
        assert_eq!(draws, replay);
    }

    #[test]
    fn mismatched_rng_state_rejects_restore_without_mutation() {
        let mut source = SimEngine::new(
            TimeModel::default(),
            Box::new(Pcg32::with_stream(1, 0xabc)),
        );
        source.schedule(1.0, "E").unwrap();
        let snapshot = source.capture_snapshot();

        let mut target = engine();
        target.schedule(7.0, "OTHER").unwrap();
        target.process_until(None, None).unwrap();
        let err = target.restore_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, SimError::Rng(_)), "{err}");
        assert_eq!(target.time(), 7.0);
        assert_eq!(target.events_processed(), 1);
        assert!(target.queue().is_empty());
    }

    #[test]
    fn opaque_rng_restores_everything_else() {
        let mut sim = SimEngine::new(
            TimeModel::default(),
            Box::new(DefaultRandomSource::new(Some(9))),
        );
        sim.schedule(1.0, "E").unwrap();
        let snapshot = sim.capture_snapshot();
        assert!(snapshot.rng().state.is_none());

        sim.process_until(None, None).unwrap();
        sim.restore_snapshot(&snapshot).unwrap();
        assert_eq!(sim.queue().len(), 1);
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn context_exposes_handler_api() {
        let mut sim = engine();
        let mut ctx = sim.context();
        ctx.schedule_in(2.0, "E").unwrap();
        ctx.world_mut().set_global("k", 1_u8);
        assert_eq!(ctx.time_model(), TimeModel::default());
        assert_eq!(sim.queue().peek_time(), Some(2.0));
        assert_eq!(sim.world().global::<u8>("k"), Some(&1));
    }
}
