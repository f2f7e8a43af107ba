// Simulated-time model.
//
// `TimeModel` tells handlers and the runner how simulated time is quantized.
// In `Discrete` mode time advances in fixed turns of `step` units and the
// runner's `step_turn` is available. In `Continuous` mode events may land at
// any `f64` time and turn-based helpers refuse to run.
//
// The engine itself does not snap event times to turn boundaries; the model
// is advisory for handlers and drives the runner's turn stepping.

use crate::error::SimError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    #[default]
    Discrete,
    Continuous,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeModel {
    mode: TimeMode,
    step: f64,
}

impl TimeModel {
    /// Discrete turns of `step` time units each. `step` must be finite and
    /// positive.
    pub fn discrete(step: f64) -> Result<Self, SimError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(SimError::invalid_argument(format!(
                "time step must be positive and finite, got {step}"
            )));
        }
        Ok(Self {
            mode: TimeMode::Discrete,
            step,
        })
    }

    pub fn continuous() -> Self {
        Self {
            mode: TimeMode::Continuous,
            step: 1.0,
        }
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_discrete(&self) -> bool {
        self.mode == TimeMode::Discrete
    }

    pub fn initial_time(&self) -> f64 {
        0.0
    }

    /// Time of the turn boundary following `time`.
    pub fn next_step_time(&self, time: f64) -> Result<f64, SimError> {
        self.require_discrete("next_step_time")?;
        Ok(time + self.step)
    }

    /// Turn number containing `time`, rounded to the nearest boundary.
    pub fn to_turn(&self, time: f64) -> Result<i64, SimError> {
        self.require_discrete("to_turn")?;
        Ok((time / self.step).round() as i64)
    }

    fn require_discrete(&self, op: &str) -> Result<(), SimError> {
        if self.is_discrete() {
            Ok(())
        } else {
            Err(SimError::invalid_operation(format!(
                "{op} is only valid for discrete simulations"
            )))
        }
    }
}

impl Default for TimeModel {
    fn default() -> Self {
        Self {
            mode: TimeMode::Discrete,
            step: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_rejects_bad_steps() {
        assert!(TimeModel::discrete(0.0).is_err());
        assert!(TimeModel::discrete(-1.0).is_err());
        assert!(TimeModel::discrete(f64::NAN).is_err());
        assert!(TimeModel::discrete(f64::INFINITY).is_err());
    }

    #[test]
    fn discrete_turn_math() {
        let model = TimeModel::discrete(0.5).unwrap();
        assert_eq!(model.initial_time(), 0.0);
        assert_eq!(model.next_step_time(1.0).unwrap(), 1.5);
        assert_eq!(model.to_turn(1.5).unwrap(), 3);
        assert_eq!(model.to_turn(1.6).unwrap(), 3);
    }

    #[test]
    fn continuous_refuses_turn_helpers() {
        let model = TimeModel::continuous();
        assert!(!model.is_discrete());
        let err = model.next_step_time(1.0).unwrap_err();
        assert!(err.to_string().contains("discrete"), "{err}");
        assert!(matches!(
            model.to_turn(3.0),
            Err(SimError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&TimeMode::Continuous).unwrap();
        assert_eq!(json, "\"continuous\"");
    }
}
