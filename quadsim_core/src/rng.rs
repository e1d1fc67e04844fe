//! Deterministic pseudo-random generation.
//!
//! Replay at tier0/tier1 depends on every random draw being bit-identical
//! across runs and platforms, so the generator is spelled out here instead of
//! delegated to a library default that may change between releases.
//!
//! # Algorithm
//!
//! SplitMix64 (Steele, Lea & Flood 2014):
//!
//! ```text
//! state = state + 0x9E3779B97F4A7C15          (wrapping)
//! z = state
//! z = (z ^ (z >> 30)) * 0xBF58476D1CE4E5B9    (wrapping)
//! z = (z ^ (z >> 27)) * 0x94D049BB133111EB    (wrapping)
//! return z ^ (z >> 31)
//! ```
//!
//! # Seed derivation
//!
//! Each consumer gets its own stream:
//! `mix(scenario_seed ^ purpose_offset ^ (channel + 1) * 0x9E3779B97F4A7C15)`,
//! where `mix` is one SplitMix64 output step and the purpose offsets are the
//! constants in [`SeedPurpose`]. Adding a new consumer never shifts the
//! stream of an existing one.

use rand::{RngCore, SeedableRng};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// One SplitMix64 output step applied to `state`.
pub fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Independent random streams derived from one scenario seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPurpose {
    /// Per-axis white noise and random walk
    SensorNoise,
    /// Sensor dropout draws
    SensorDropout,
    /// Randomized scenario generation
    ScenarioGeneration,
}

impl SeedPurpose {
    /// Fixed per-purpose salt.
    pub fn offset(self) -> u64 {
        match self {
            SeedPurpose::SensorNoise => 0x5EED_0000_0000_0001,
            SeedPurpose::SensorDropout => 0x5EED_0000_0000_0002,
            SeedPurpose::ScenarioGeneration => 0x5EED_0000_0000_0003,
        }
    }
}

/// Derives the seed of stream `channel` for `purpose`.
pub fn derive_seed(seed: u64, purpose: SeedPurpose, channel: u64) -> u64 {
    splitmix64(seed ^ purpose.offset() ^ channel.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA))
}

/// Stateless draw in `[0, 1)` keyed by `(seed, purpose, a, b)`.
///
/// Used where a draw must not depend on call order (dropout per step and
/// channel).
pub fn keyed_unit(seed: u64, purpose: SeedPurpose, a: u64, b: u64) -> f64 {
    let mut state = derive_seed(seed, purpose, a);
    state = splitmix64(state ^ b.wrapping_mul(0xC2B2_AE3D_27D4_EB4F));
    unit_from_bits(state)
}

/// Maps the top 53 bits of `bits` to `[0, 1)`.
pub fn unit_from_bits(bits: u64) -> f64 {
    (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// SplitMix64 generator usable with `rand`/`rand_distr` distributions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generator for stream `channel` of `purpose` under `seed`.
    pub fn for_stream(seed: u64, purpose: SeedPurpose, channel: u64) -> Self {
        Self::new(derive_seed(seed, purpose, channel))
    }
}

impl RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        let out = splitmix64(self.state);
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        out
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SplitMix64 {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}
