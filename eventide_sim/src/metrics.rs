// Metrics sink the engine reports into.
//
// The engine writes three series while it runs: a `sim.time` gauge, a
// `sim.queue_size` gauge, and a `sim.events_processed` counter. It only needs
// a write interface; reading back is optional and exists so tests and
// embedding code can inspect an in-memory registry.
//
// `MetricsRegistry` is the default in-memory sink. `NoopMetrics` discards
// everything for callers who want no bookkeeping in hot loops.

use std::collections::BTreeMap;

pub const SIM_TIME: &str = "sim.time";
pub const QUEUE_SIZE: &str = "sim.queue_size";
pub const EVENTS_PROCESSED: &str = "sim.events_processed";

pub trait MetricsSink: Send {
    fn increment_counter(&mut self, name: &str, by: u64);

    fn set_gauge(&mut self, name: &str, value: f64);

    fn counter(&self, _name: &str) -> Option<u64> {
        None
    }

    fn gauge(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// In-memory counters and gauges.
#[derive(Clone, Debug, Default)]
pub struct MetricsRegistry {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, f64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for MetricsRegistry {
    fn increment_counter(&mut self, name: &str, by: u64) {
        match self.counters.get_mut(name) {
            Some(count) => *count += by,
            None => {
                self.counters.insert(name.to_owned(), by);
            }
        }
    }

    fn set_gauge(&mut self, name: &str, value: f64) {
        match self.gauges.get_mut(name) {
            Some(gauge) => *gauge = value,
            None => {
                self.gauges.insert(name.to_owned(), value);
            }
        }
    }

    fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&mut self, _name: &str, _by: u64) {}

    fn set_gauge(&mut self, _name: &str, _value: f64) {}
}
