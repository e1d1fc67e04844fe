//! Per-axis sensor noise and sample delay.

use crate::rng::{SeedPurpose, SplitMix64};
use quadsim_env::ValidationError;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Noise parameters for one sensor axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisNoiseConfig {
    /// Constant offset
    pub bias: f64,

    /// Standard deviation of the white component
    pub white_sigma: f64,

    /// Random-walk density; each call adds N(0, σ²·dt)
    pub random_walk_sigma: f64,
}

impl AxisNoiseConfig {
    pub fn new(bias: f64, white_sigma: f64, random_walk_sigma: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            bias: ValidationError::finite("bias", bias)?,
            white_sigma: ValidationError::non_negative("white_sigma", white_sigma)?,
            random_walk_sigma: ValidationError::non_negative("random_walk_sigma", random_walk_sigma)?,
        })
    }

    /// A noiseless axis.
    pub fn ideal() -> Self {
        Self {
            bias: 0.0,
            white_sigma: 0.0,
            random_walk_sigma: 0.0,
        }
    }
}

/// Stateful noise generator for one axis.
///
/// Holds its own seeded generator and accumulated random walk, so two
/// generators built from the same seed produce identical sequences.
#[derive(Debug, Clone)]
pub struct AxisNoise {
    config: AxisNoiseConfig,
    rng: SplitMix64,
    walk: f64,
}

impl AxisNoise {
    /// Creates the generator for `axis` under the scenario `seed`.
    pub fn new(config: AxisNoiseConfig, seed: u64, axis: u64) -> Self {
        Self {
            config,
            rng: SplitMix64::for_stream(seed, SeedPurpose::SensorNoise, axis),
            walk: 0.0,
        }
    }

    /// Draws `bias + white + walk` for an interval of `dt` seconds.
    ///
    /// `noise_scale` multiplies the white component only. Both normal draws
    /// happen on every call so the stream position never depends on the
    /// configured sigmas.
    pub fn sample(&mut self, dt: f64, noise_scale: f64) -> f64 {
        let walk_draw: f64 = StandardNormal.sample(&mut self.rng);
        let white_draw: f64 = StandardNormal.sample(&mut self.rng);

        self.walk += self.config.random_walk_sigma * dt.sqrt() * walk_draw;
        let white = self.config.white_sigma * noise_scale * white_draw;

        self.config.bias + white + self.walk
    }

    /// Accumulated random-walk term.
    pub fn walk(&self) -> f64 {
        self.walk
    }

    pub fn config(&self) -> &AxisNoiseConfig {
        &self.config
    }
}

/// Fixed-capacity FIFO that delays sample vectors by `capacity` pushes.
///
/// Until `capacity` vectors have been pushed, `push` returns `None`: the
/// buffer emits nothing rather than zero-filled vectors. A capacity of zero
/// passes every vector straight through.
#[derive(Debug, Clone)]
pub struct DelayBuffer<T> {
    capacity: usize,
    queue: VecDeque<T>,
}

impl<T> DelayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Pushes `item` and returns the vector from `capacity` pushes ago.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        self.queue.push_back(item);
        if self.queue.len() > self.capacity {
            self.queue.pop_front()
        } else {
            None
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
