// Engine and runner configuration.
//
// `SimConfig` gathers every knob needed to build a fully wired engine or
// runner: seed and generator choice, time model, overrun handling, snapshot
// retention, and real-time pacing. It loads from JSON; every field has a
// default, so `{}` is a valid config.
//
// See also: `engine.rs` (`SimEngine::from_config`), `runner.rs`
// (`SimRunner::from_config`).
//
// **Critical constraint: determinism.** Two engines built from the same
// config with a `seed` set produce identical runs. Without a seed the
// generator is seeded from the clock.

use crate::engine::OverrunPolicy;
use crate::error::SimError;
use crate::snapshot::SnapshotPolicy;
use crate::time::{TimeMode, TimeModel};
use eventide_prng::{DefaultRandomSource, Pcg32, RandomSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// Which generator the engine owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RngKind {
    /// xoshiro256++. Fast, but snapshots cannot replay its sequence.
    #[default]
    Default,
    /// Rewindable PCG32.
    Pcg32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub capacity: usize,
    pub event_interval: Option<u64>,
    pub time_interval: Option<f64>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            event_interval: Some(10),
            time_interval: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    pub frame_duration_ms: u64,
    pub event_budget_per_frame: u64,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: 16,
            event_budget_per_frame: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: Option<u64>,
    pub rng: RngKind,
    pub time_mode: TimeMode,
    /// Turn length in discrete mode.
    pub time_step: f64,
    pub overrun: OverrunPolicy,
    pub snapshots: SnapshotConfig,
    pub realtime: RealTimeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            rng: RngKind::Default,
            time_mode: TimeMode::Discrete,
            time_step: 1.0,
            overrun: OverrunPolicy::Discard,
            snapshots: SnapshotConfig::default(),
            realtime: RealTimeConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err::<(), _>(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return invalid("time_step must be positive and finite");
        }
        if self.snapshots.capacity == 0 {
            return invalid("snapshots.capacity must be at least 1");
        }
        if self.snapshots.event_interval.is_none() && self.snapshots.time_interval.is_none() {
            return invalid("snapshots needs event_interval or time_interval");
        }
        if self.snapshots.event_interval == Some(0) {
            return invalid("snapshots.event_interval must be positive");
        }
        if self
            .snapshots
            .time_interval
            .is_some_and(|t| !(t.is_finite() && t > 0.0))
        {
            return invalid("snapshots.time_interval must be positive and finite");
        }
        if self.realtime.frame_duration_ms == 0 {
            return invalid("realtime.frame_duration_ms must be positive");
        }
        if self.realtime.event_budget_per_frame == 0 {
            return invalid("realtime.event_budget_per_frame must be positive");
        }
        Ok(())
    }

    pub fn time_model(&self) -> Result<TimeModel, SimError> {
        match self.time_mode {
            TimeMode::Discrete => TimeModel::discrete(self.time_step),
            TimeMode::Continuous => Ok(TimeModel::continuous()),
        }
    }

    pub fn snapshot_policy(&self) -> Result<SnapshotPolicy, SimError> {
        SnapshotPolicy::new(
            self.snapshots.event_interval,
            self.snapshots.time_interval,
            self.snapshots.capacity,
        )
    }

    pub fn build_rng(&self) -> Box<dyn RandomSource> {
        match self.rng {
            RngKind::Default => Box::new(DefaultRandomSource::new(self.seed)),
            RngKind::Pcg32 => {
                let seed = self
                    .seed
                    .unwrap_or_else(|| DefaultRandomSource::new(None).next_u64());
                Box::new(Pcg32::new(seed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = SimConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config = SimConfig::from_json("{}").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.snapshots.capacity, 10);
        assert_eq!(config.realtime.frame_duration_ms, 16);
    }

    #[test]
    fn config_loads_from_json_string() {
        let json = r#"{
            "seed": 1337,
            "rng": "pcg32",
            "time_mode": "continuous",
            "overrun": "requeue",
            "snapshots": { "capacity": 4, "event_interval": null, "time_interval": 0.5 },
            "realtime": { "event_budget_per_frame": 50 }
        }"#;
        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.seed, Some(1337));
        assert_eq!(config.rng, RngKind::Pcg32);
        assert_eq!(config.time_mode, TimeMode::Continuous);
        assert_eq!(config.overrun, OverrunPolicy::Requeue);
        assert_eq!(config.snapshots.event_interval, None);
        assert_eq!(config.realtime.frame_duration_ms, 16);
        assert_eq!(config.realtime.event_budget_per_frame, 50);

        let policy = config.snapshot_policy().unwrap();
        assert_eq!(policy.max_snapshots(), 4);
        assert_eq!(policy.time_interval(), Some(0.5));
        assert!(!config.time_model().unwrap().is_discrete());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for json in [
            r#"{"time_step": 0}"#,
            r#"{"snapshots": {"capacity": 0}}"#,
            r#"{"snapshots": {"event_interval": 0}}"#,
            r#"{"snapshots": {"event_interval": null}}"#,
            r#"{"realtime": {"frame_duration_ms": 0}}"#,
            r#"{"realtime": {"event_budget_per_frame": 0}}"#,
        ] {
            let err = SimConfig::from_json(json).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { .. }),
                "{json} gave {err}"
            );
        }
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = SimConfig::from_json(r#"{"rng": "mersenne"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SimConfig::from_file("/nonexistent/eventide.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("eventide.json"));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let config = SimConfig {
            seed: Some(7),
            rng: RngKind::Pcg32,
            ..SimConfig::default()
        };
        let mut a = config.build_rng();
        let mut b = config.build_rng();
        assert_eq!(a.generator_name(), "pcg32");
        for _ in 0..20 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }
}
