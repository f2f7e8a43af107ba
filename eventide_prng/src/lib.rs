// Deterministic, portable random sources for the simulation kernel.
//
// Two generators live here, both hand-rolled so their output is identical
// across platforms, compilers and processes:
//
// - `DefaultRandomSource` (`xoshiro.rs`): xoshiro256++ (Blackman & Vigna,
//   2019) with SplitMix64 seeding and unbiased rejection sampling for integer
//   ranges. It does not expose its state, so a simulation driven by it can be
//   snapshotted but cannot reproduce its future random sequence on restore.
// - `Pcg32` (`pcg.rs`): PCG XSH-RR 64/32. Rewindable: `capture_state()`
//   returns a `GeneratorState` that can be restored into the same instance
//   or into any other `Pcg32` with the same stream increment.
//
// Both implement the `RandomSource` capability trait, which is what the
// simulation engine owns (`Box<dyn RandomSource>`) and what event handlers
// draw from through the simulation context.
//
// **Critical constraint: determinism.** Every method must produce identical
// output given the same prior state, regardless of platform, compiler
// version, or optimization level. The only floating-point arithmetic is the
// final integer-to-unit-interval conversion.

mod pcg;
mod xoshiro;

pub use pcg::Pcg32;
pub use xoshiro::DefaultRandomSource;

use serde::{Deserialize, Serialize};

/// Errors raised by random sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RngError {
    /// `next_int` was called with `min >= max`.
    #[error("invalid range: min ({min}) must be less than max ({max})")]
    InvalidRange { min: i32, max: i32 },

    /// A captured state does not belong to this generator family/stream.
    #[error("invalid generator state: {reason}")]
    InvalidState { reason: String },

    /// The generator cannot expose or accept state.
    #[error("generator `{generator}` does not support state capture")]
    Unsupported { generator: String },
}

/// Opaque capture of a rewindable generator's internal state.
///
/// `generator` tags the algorithm family so a restore can reject states
/// captured from a different kind of generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorState {
    pub generator: String,
    pub state: u64,
    pub increment: u64,
}

/// Capability interface for the simulation's source of randomness.
pub trait RandomSource: Send {
    /// Uniform `f64` in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Integer in `[min, max)`. Fails with `RngError::InvalidRange` when
    /// `min >= max`.
    fn next_int(&mut self, min: i32, max: i32) -> Result<i32, RngError>;

    /// Stable identifier for the algorithm family, used to tag captures.
    fn generator_name(&self) -> &'static str;

    /// Capture the state needed to replay the future sequence, if this
    /// generator supports it.
    fn capture_state(&self) -> Option<GeneratorState> {
        None
    }

    /// Restore a state previously produced by `capture_state`.
    fn restore_state(&mut self, state: &GeneratorState) -> Result<(), RngError> {
        let _ = state;
        Err(RngError::Unsupported {
            generator: self.generator_name().to_owned(),
        })
    }
}

/// Width of the integer range `[min, max)`, validated.
pub(crate) fn int_range(min: i32, max: i32) -> Result<u64, RngError> {
    if min >= max {
        return Err(RngError::InvalidRange { min, max });
    }
    Ok((i64::from(max) - i64::from(min)) as u64)
}

/// Offset `min` by `sample`, where `sample` is known to be below the range
/// width returned by `int_range`.
pub(crate) fn offset_int(min: i32, sample: u64) -> i32 {
    (i64::from(min) + sample as i64) as i32
}
