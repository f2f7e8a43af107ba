// Default random source: xoshiro256++ with SplitMix64 seeding.
//
// This is the generator an engine gets when nothing else is requested. It is
// fast and statistically strong, but it deliberately does not implement
// `capture_state`/`restore_state`: snapshots taken while it is active record
// no generator state, and restoring them cannot reproduce the future random
// sequence. Use `Pcg32` when replay must be bit-exact.

use crate::{RandomSource, RngError, int_range, offset_int};
use std::time::{SystemTime, UNIX_EPOCH};

/// Xoshiro256++ PRNG.
#[derive(Clone, Debug)]
pub struct DefaultRandomSource {
    s: [u64; 4],
}

impl DefaultRandomSource {
    pub const GENERATOR: &'static str = "xoshiro256pp";

    /// Create a generator from an optional seed.
    ///
    /// With `None` the seed is taken from the system clock, so the output is
    /// not reproducible. Two instances created with the same `Some(seed)`
    /// produce identical sequences.
    pub fn new(seed: Option<u64>) -> Self {
        let mut sm = seed.unwrap_or_else(clock_seed);
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[0, range)` without modulo bias. `range` must be
    /// non-zero.
    fn below(&mut self, range: u64) -> u64 {
        if range.is_power_of_two() {
            return self.next_u64() & (range - 1);
        }
        // Reject the low `2^64 mod range` values so every residue is equally likely.
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % range;
            }
        }
    }
}

impl RandomSource for DefaultRandomSource {
    /// Uses the upper 53 bits, which fill an f64 mantissa exactly.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_int(&mut self, min: i32, max: i32) -> Result<i32, RngError> {
        let range = int_range(min, max)?;
        Ok(offset_int(min, self.below(range)))
    }

    fn generator_name(&self) -> &'static str {
        Self::GENERATOR
    }
}

/// SplitMix64, used only to expand a single `u64` seed into 256 bits.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}
