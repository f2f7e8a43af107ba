// Shared scenario for integration tests: three agents ticking forward with
// randomized deltas and delays, ten ticks each.

#![allow(dead_code)]

use eventide_sim::engine::OverrunPolicy;
use eventide_sim::rng::{Pcg32, RandomSource};
use eventide_sim::snapshot::fingerprint;
use eventide_sim::{Entity, EntityId, EventSpec, SimEngine, TimeModel};
use serde::Serialize;
use std::sync::{Arc, Mutex};

pub const TICK: &str = "TICK";
pub const TICKS_PER_AGENT: u32 = 10;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentState {
    pub value: f64,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickPayload {
    pub entity_id: u64,
    pub step: u32,
    pub delta: f64,
}

/// One dispatched event: type, time bits, payload hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub event_type: String,
    pub time_bits: u64,
    pub payload_hash: u64,
}

pub type Trace = Arc<Mutex<Vec<TraceEntry>>>;

pub fn build_engine(rng: Box<dyn RandomSource>, overrun: OverrunPolicy) -> (SimEngine, Trace) {
    let mut engine = SimEngine::new(TimeModel::default(), rng).with_overrun(overrun);

    for i in 0..3_u64 {
        engine.world_mut().add_entity(
            Entity::new(EntityId(i + 1), "agent").with_component(
                "state",
                AgentState {
                    value: 0.0,
                    label: format!("a{}", i + 1),
                },
            ),
        );
    }
    engine
        .world_mut()
        .set_global("seed", String::from("baseline"));

    let trace = Trace::default();
    let log = Arc::clone(&trace);
    engine.register_handler(TICK, move |ctx, evt| {
        let tick = evt.typed_payload::<TickPayload>()?.clone();
        if let Some(state) = ctx
            .world_mut()
            .component_mut::<AgentState>(EntityId(tick.entity_id), "state")
        {
            state.value += tick.delta;
        }
        log.lock().unwrap().push(TraceEntry {
            event_type: evt.event_type().to_owned(),
            time_bits: evt.time().to_bits(),
            payload_hash: fingerprint(evt.payload())?,
        });

        if tick.step + 1 < TICKS_PER_AGENT {
            let delta = ctx.rng().next_f64();
            let dt = ctx.rng().next_f64() * 0.5;
            let next = TickPayload {
                entity_id: tick.entity_id,
                step: tick.step + 1,
                delta,
            };
            ctx.schedule(
                evt.time() + dt,
                EventSpec::new(TICK)
                    .with_priority((tick.step % 2) as i32)
                    .with_typed(next),
            )?;
        }
        Ok(())
    });

    for i in 0..3_u64 {
        engine
            .schedule(
                0.0,
                EventSpec::new(TICK).with_typed(TickPayload {
                    entity_id: i + 1,
                    step: 0,
                    delta: 0.0,
                }),
            )
            .unwrap();
    }
    (engine, trace)
}

pub fn seeded_engine(seed: u64) -> (SimEngine, Trace) {
    build_engine(Box::new(Pcg32::new(seed)), OverrunPolicy::Requeue)
}

pub fn snapshot_hash(engine: &SimEngine) -> u64 {
    engine.capture_snapshot().fingerprint().unwrap()
}

pub fn entries(trace: &Trace) -> Vec<TraceEntry> {
    trace.lock().unwrap().clone()
}
