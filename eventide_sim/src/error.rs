// Error type for the simulation kernel.
//
// Every fallible kernel operation returns `Result<_, SimError>`. Argument
// validation (`InvalidArgument`) always runs before any state is touched, so
// an `Err` of that class guarantees the engine is unchanged. Handler failures
// are different: they abort the batch mid-flight and leave time, queue, and
// world exactly as the failing handler left them. There is no rollback; take
// a snapshot before a risky batch and restore it if you need one.
//
// See also: `config.rs` for `ConfigError`, `eventide_prng::RngError` for
// generator errors (wrapped here via `#[from]`).

use crate::config::ConfigError;
use eventide_prng::RngError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A caller-supplied value failed validation. Nothing was mutated.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The operation is not valid in the engine's current mode or state.
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },

    /// A backward seek found no retained snapshot covering the target.
    #[error(
        "cannot seek to {requested}: no snapshot available at or before that time (current time is {current})"
    )]
    NoSnapshot { requested: f64, current: f64 },

    /// A typed payload was read as the wrong type.
    #[error("payload type mismatch: expected {expected}, found {actual}")]
    PayloadType {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Rng(#[from] RngError),

    /// A handler or system returned an error while processing an event.
    #[error("handler for `{event_type}` failed at t={time}: {source}")]
    Handler {
        event_type: String,
        time: f64,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl SimError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}
