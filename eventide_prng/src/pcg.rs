// Rewindable random source: PCG XSH-RR 64/32.
//
// The generator is a 64-bit LCG (`state' = state * MULTIPLIER + increment`)
// whose output is a permutation of the *old* state: an xorshift of the high
// bits followed by a rotation by the old state's top five bits, giving 32
// output bits per step.
//
// Its entire state is the pair `(state, increment)`. `capture_state()` hands
// that pair out as a `GeneratorState`; `restore_state()` accepts it back on
// this or any other `Pcg32` on the same stream (same increment), after which
// the output sequence continues exactly as it did after the capture. That is
// what lets a restored snapshot replay forward bit-for-bit.
//
// `next_int` reduces with a plain modulo. Ranges that do not evenly divide
// 2^32 carry a small bias toward low values; this is kept so traces stay
// comparable with existing recordings.

use crate::{GeneratorState, RandomSource, RngError, int_range, offset_int};

const MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const DEFAULT_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// PCG32 generator with explicit state capture and restore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    increment: u64,
}

impl Pcg32 {
    pub const GENERATOR: &'static str = "pcg32";

    /// Create a generator on the default stream.
    pub fn new(seed: u64) -> Self {
        Self::with_stream(seed, DEFAULT_INCREMENT)
    }

    /// Create a generator on a specific stream. The increment is forced odd,
    /// as the LCG requires for a full period.
    pub fn with_stream(seed: u64, increment: u64) -> Self {
        let increment = increment | 1;
        let state = (seed ^ increment)
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(increment);
        Self { state, increment }
    }

    /// The stream increment. States can only move between generators that
    /// share it.
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// Advance the LCG and permute the old state into 32 output bits.
    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(MULTIPLIER).wrapping_add(self.increment);

        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }
}

impl RandomSource for Pcg32 {
    fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }

    fn next_int(&mut self, min: i32, max: i32) -> Result<i32, RngError> {
        let range = int_range(min, max)?;
        let sample = u64::from(self.next_u32()) % range;
        Ok(offset_int(min, sample))
    }

    fn generator_name(&self) -> &'static str {
        Self::GENERATOR
    }

    fn capture_state(&self) -> Option<GeneratorState> {
        Some(GeneratorState {
            generator: Self::GENERATOR.to_owned(),
            state: self.state,
            increment: self.increment,
        })
    }

    fn restore_state(&mut self, state: &GeneratorState) -> Result<(), RngError> {
        if state.generator != Self::GENERATOR {
            return Err(RngError::InvalidState {
                reason: format!(
                    "state was captured from `{}`, not `{}`",
                    state.generator,
                    Self::GENERATOR
                ),
            });
        }
        if state.increment != self.increment {
            return Err(RngError::InvalidState {
                reason: format!(
                    "increment mismatch: state is from stream {:#x}, this generator is on {:#x}",
                    state.increment, self.increment
                ),
            });
        }
        self.state = state.state;
        Ok(())
    }
}
