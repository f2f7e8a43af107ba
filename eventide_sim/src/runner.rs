// Stepping, seeking, and real-time pacing on top of the engine.
//
// `SimRunner` drives a `SimEngine` strictly through its public contract
// (`process_until`, `try_process_next_event`, snapshot capture/restore) and
// adds:
//
// - single-event, turn, and delta stepping;
// - `seek`, which moves simulated time backward by restoring the latest
//   retained snapshot at or before the target and replaying forward, or
//   forward by processing;
// - `run_real_time`, an async frame loop that maps wall-clock time (scaled
//   by the time scale) onto simulated time, with a per-frame event budget
//   and periodic snapshot capture.
//
// Snapshots live in a `SnapshotBuffer` sized by the `SnapshotPolicy`. Seeking
// backward to a time with no retained snapshot fails; there is no undo log.
//
// Pause state and time scale sit in `RunnerControl`, shared through an `Arc`
// so another task can pause, resume, or re-scale a running frame loop. Both
// are read once per frame.
//
// See also: `engine.rs` for the run loop, `snapshot.rs` for the buffer and
// capture policy.

use crate::config::SimConfig;
use crate::engine::{SimEngine, StepResult, StopReason};
use crate::error::SimError;
use crate::snapshot::{SimSnapshot, SnapshotBuffer, SnapshotPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Times closer than this are the same instant for seek purposes.
const SEEK_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Shared control state
// ---------------------------------------------------------------------------

/// Pause flag and time scale, shareable with other tasks.
#[derive(Debug)]
pub struct RunnerControl {
    paused: AtomicBool,
    /// `f64` bit pattern of the time scale.
    time_scale: AtomicU64,
}

impl RunnerControl {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            time_scale: AtomicU64::new(1.0_f64.to_bits()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn time_scale(&self) -> f64 {
        f64::from_bits(self.time_scale.load(Ordering::Acquire))
    }

    /// Simulated seconds per wall-clock second. Must be positive and finite.
    pub fn set_time_scale(&self, scale: f64) -> Result<(), SimError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(SimError::invalid_argument(format!(
                "time scale must be greater than 0, got {scale}"
            )));
        }
        self.time_scale.store(scale.to_bits(), Ordering::Release);
        Ok(())
    }
}

impl Default for RunnerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a `run_real_time` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RealTimeReport {
    pub frames: u64,
    pub events_processed: u64,
    pub snapshots_captured: u64,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SimRunner {
    engine: SimEngine,
    buffer: SnapshotBuffer,
    policy: SnapshotPolicy,
    control: Arc<RunnerControl>,
    last_capture_time: Option<f64>,
}

impl SimRunner {
    /// Runner with the default policy: capture every 10 events, keep 10.
    pub fn new(engine: SimEngine) -> Self {
        Self::with_policy(engine, SnapshotPolicy::default())
    }

    /// Default capture cadence, retaining `capacity` snapshots.
    pub fn with_capacity(engine: SimEngine, capacity: usize) -> Result<Self, SimError> {
        let defaults = SnapshotPolicy::default();
        let policy =
            SnapshotPolicy::new(defaults.event_interval(), defaults.time_interval(), capacity)?;
        Ok(Self::with_policy(engine, policy))
    }

    pub fn with_policy(engine: SimEngine, policy: SnapshotPolicy) -> Self {
        Self {
            engine,
            buffer: SnapshotBuffer::allocate(policy.max_snapshots()),
            policy,
            control: Arc::new(RunnerControl::new()),
            last_capture_time: None,
        }
    }

    pub fn from_config(config: &SimConfig) -> Result<Self, SimError> {
        let engine = SimEngine::from_config(config)?;
        Ok(Self::with_policy(engine, config.snapshot_policy()?))
    }

    // -- accessors --

    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SimEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> SimEngine {
        self.engine
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Handle for pausing, resuming, or re-scaling from another task.
    pub fn control(&self) -> Arc<RunnerControl> {
        Arc::clone(&self.control)
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn time_scale(&self) -> f64 {
        self.control.time_scale()
    }

    // -- control --

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn set_time_scale(&self, scale: f64) -> Result<(), SimError> {
        self.control.set_time_scale(scale)
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Capture the engine's current state into the snapshot buffer.
    pub fn record_snapshot(&mut self) -> &SimSnapshot {
        let snapshot = self.engine.capture_snapshot();
        self.last_capture_time = Some(snapshot.time());
        self.buffer.add(snapshot)
    }

    // -- stepping --

    /// Process exactly one event.
    pub fn step_event(&mut self) -> Result<StepResult, SimError> {
        let processed = self.engine.try_process_next_event()?;
        let (stop_reason, events_processed) = match processed {
            Some(_) => (StopReason::MaxEventsReached, 1),
            None => (StopReason::QueueEmpty, 0),
        };
        Ok(self.instant_result(stop_reason, events_processed))
    }

    /// Process every event up to the next turn boundary. Discrete mode only.
    pub fn step_turn(&mut self) -> Result<StepResult, SimError> {
        let model = self.engine.time_model();
        if !model.is_discrete() {
            return Err(SimError::invalid_operation(
                "step_turn is only valid for discrete simulations",
            ));
        }
        let boundary = model.next_step_time(self.engine.time())?;
        self.engine.process_until(Some(boundary), None)
    }

    /// Process every event up to `dt` past the current time.
    pub fn step_delta(&mut self, dt: f64) -> Result<StepResult, SimError> {
        if dt.is_nan() || dt < 0.0 {
            return Err(SimError::invalid_argument(format!(
                "time delta must be non-negative, got {dt}"
            )));
        }
        let target = self.engine.time() + dt;
        self.engine.process_until(Some(target), None)
    }

    /// Move simulated time to `target`.
    ///
    /// Backward seeks restore the latest retained snapshot at or before
    /// `target`, then replay forward to it. Forward seeks process up to it.
    pub fn seek(&mut self, target: f64) -> Result<StepResult, SimError> {
        if target.is_nan() || target < 0.0 {
            return Err(SimError::invalid_argument(format!(
                "seek target must be non-negative, got {target}"
            )));
        }
        let now = self.engine.time();

        if target < now {
            let Some(snapshot) = self.buffer.try_get_latest_at_or_before(target) else {
                return Err(SimError::NoSnapshot {
                    requested: target,
                    current: now,
                });
            };
            debug!(
                to = target,
                from = now,
                snapshot_time = snapshot.time(),
                "seeking backward"
            );
            self.engine.restore_snapshot(snapshot)?;
            if (snapshot.time() - target).abs() < SEEK_EPSILON {
                return Ok(self.instant_result(StopReason::TimeReached, 0));
            }
            return self.engine.process_until(Some(target), None);
        }

        if (target - now).abs() < SEEK_EPSILON {
            return Ok(self.instant_result(StopReason::TimeReached, 0));
        }

        debug!(to = target, from = now, "seeking forward");
        self.engine.process_until(Some(target), None)
    }

    fn instant_result(&self, stop_reason: StopReason, events_processed: u64) -> StepResult {
        StepResult {
            stop_reason,
            final_time: self.engine.time(),
            events_processed,
            events_remaining: self.engine.queue().len(),
            wall_clock_duration: Duration::ZERO,
        }
    }

    // -- real time --

    /// Pace the simulation against the wall clock until the queue drains or
    /// `cancel` fires.
    ///
    /// Each frame, unless paused, advances a simulated-time target by the
    /// wall time elapsed since the previous frame times the time scale, then
    /// processes events up to that target, at most `event_budget_per_frame`
    /// of them. Events beyond the target are subject to the engine's
    /// `OverrunPolicy`; use `Requeue` here unless dropping is intended. While paused only the wall
    /// clock bookkeeping moves, so resuming never jumps simulated time.
    /// Cancellation is checked between frames; a frame in progress always
    /// completes.
    pub async fn run_real_time(
        &mut self,
        frame_duration_ms: u64,
        event_budget_per_frame: u64,
        cancel: CancellationToken,
    ) -> Result<RealTimeReport, SimError> {
        if frame_duration_ms == 0 {
            return Err(SimError::invalid_argument("frame duration must be positive"));
        }
        if event_budget_per_frame == 0 {
            return Err(SimError::invalid_argument("event budget must be positive"));
        }

        let frame = Duration::from_millis(frame_duration_ms);
        let mut report = RealTimeReport::default();
        let mut last_wall = Instant::now();
        // Simulated time the wall clock has paid for. Tracked separately from
        // the engine clock, which only moves when an event runs.
        let mut sim_clock = self.engine.time();
        info!(
            frame_ms = frame_duration_ms,
            budget = event_budget_per_frame,
            time = self.engine.time(),
            pending = self.engine.queue().len(),
            "real-time loop starting"
        );

        while !cancel.is_cancelled() && !self.engine.queue().is_empty() {
            let frame_start = Instant::now();

            if self.control.is_paused() {
                last_wall = frame_start;
            } else {
                let wall_delta = frame_start.duration_since(last_wall).as_secs_f64();
                last_wall = frame_start;
                sim_clock = sim_clock.max(self.engine.time()) + wall_delta * self.control.time_scale();
                let result = self
                    .engine
                    .process_until(Some(sim_clock), Some(event_budget_per_frame))?;
                report.events_processed += result.events_processed;

                if self.policy.should_capture(
                    result.events_processed,
                    self.engine.events_processed(),
                    self.engine.time(),
                    self.last_capture_time,
                ) {
                    self.record_snapshot();
                    report.snapshots_captured += 1;
                }
            }
            report.frames += 1;

            match frame.checked_sub(frame_start.elapsed()) {
                Some(remaining) if !remaining.is_zero() => {
                    tokio::select! {
                        _ = tokio::time::sleep(remaining) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                _ => {}
            }
        }

        report.cancelled = cancel.is_cancelled();
        info!(
            frames = report.frames,
            processed = report.events_processed,
            snapshots = report.snapshots_captured,
            cancelled = report.cancelled,
            time = self.engine.time(),
            "real-time loop finished"
        );
        Ok(report)
    }
}
