//! Motor bank with first-order lag, plus the degradation and swap decorators.
//!
//! Decorators compose in a fixed order around the base engine:
//!
//! ```text
//! DegradedActuator ─► SwapActuator ─► FirstOrderActuator
//! ```
//!
//! Each stage folds its own active events into an [`ActuatorModifiers`]
//! table and hands the table to the stage it wraps. Only the base engine
//! owns thrust state.

use crate::faults::{ActuatorDegradationEvent, ActuatorModifiers, ActuatorSwapEvent, HfStressEvent};
use quadsim_env::{
    ActuatorEngine, ActuatorTelemetrySnapshot, ActuatorValue, SubsystemError, SubsystemResult,
    TimeStep, ValidationError, WorldTime,
};
use serde::{Deserialize, Serialize};

/// Motor bank configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// First-order lag time constant τ (s)
    pub time_constant: f64,

    /// Nominal max thrust per channel (N); its length is the channel count
    pub max_output: Vec<f64>,
}

impl ActuatorConfig {
    /// `channels` motors sharing one max output.
    pub fn uniform(channels: usize, time_constant: f64, max_output: f64) -> Self {
        Self {
            time_constant,
            max_output: vec![max_output; channels],
        }
    }

    /// Overrides the max output of one channel.
    pub fn with_channel_max(mut self, channel: usize, max_output: f64) -> Self {
        if let Some(slot) = self.max_output.get_mut(channel) {
            *slot = max_output;
        }
        self
    }

    pub fn with_time_constant(mut self, time_constant: f64) -> Self {
        self.time_constant = time_constant;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.max_output.len()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("time_constant", self.time_constant)?;
        if self.max_output.is_empty() {
            return Err(ValidationError::Empty { field: "max_output" });
        }
        for max in &self.max_output {
            ValidationError::positive("max_output", *max)?;
        }
        Ok(())
    }
}

impl Default for ActuatorConfig {
    /// Four motors, τ = 20 ms, 8 N each.
    fn default() -> Self {
        Self::uniform(4, 0.02, 8.0)
    }
}

/// An actuator stage that accepts an externally computed modifier table.
pub trait ModifiableActuator: ActuatorEngine {
    /// Advances one actuator period under `modifiers`.
    fn update_with(&mut self, time: &WorldTime, modifiers: &ActuatorModifiers) -> SubsystemResult<()>;

    fn channel_count(&self) -> usize;
}

// =============================================================================
// BASE ENGINE
// =============================================================================

/// First-order lag motor model.
///
/// Per update and channel:
///
/// ```text
/// max     = nominal_max · max_scale
/// target  = clamp(commanded · gain, 0, max)   (0 if below deadzone)
/// applied += (target − applied) · min(dt / (τ · lag_scale), 1)
/// applied  = clamp(applied, 0, max)
/// ```
#[derive(Debug, Clone)]
pub struct FirstOrderActuator {
    config: ActuatorConfig,
    period: f64,
    commanded: Vec<f64>,
    applied: Vec<f64>,
    effective_max: Vec<f64>,
}

impl FirstOrderActuator {
    /// `period` is the time between `update` calls.
    pub fn new(config: ActuatorConfig, period: TimeStep) -> Result<Self, ValidationError> {
        config.validate()?;
        let n = config.channel_count();
        Ok(Self {
            effective_max: config.max_output.clone(),
            config,
            period: period.seconds(),
            commanded: vec![0.0; n],
            applied: vec![0.0; n],
        })
    }

    /// Starts every motor already spinning at `thrust` (clamped).
    pub fn with_initial_thrust(mut self, thrust: f64) -> Self {
        for (i, max) in self.config.max_output.iter().enumerate() {
            let value = thrust.clamp(0.0, *max);
            self.commanded[i] = value;
            self.applied[i] = value;
        }
        self
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }
}

impl ModifiableActuator for FirstOrderActuator {
    fn update_with(&mut self, _time: &WorldTime, modifiers: &ActuatorModifiers) -> SubsystemResult<()> {
        for i in 0..self.applied.len() {
            let m = modifiers.channel(i);
            let max = self.config.max_output[i] * m.max_scale;

            let mut target = self.commanded[i] * m.gain;
            if target < m.deadzone {
                target = 0.0;
            }
            let target = target.clamp(0.0, max);

            let alpha = (self.period / (self.config.time_constant * m.lag_scale)).min(1.0);
            let next = self.applied[i] + (target - self.applied[i]) * alpha;

            self.applied[i] = next.clamp(0.0, max);
            self.effective_max[i] = max;
        }
        SubsystemError::check_finite("actuator", "applied thrust", &self.applied)
    }

    fn channel_count(&self) -> usize {
        self.config.channel_count()
    }
}

impl ActuatorEngine for FirstOrderActuator {
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()> {
        let identity = ActuatorModifiers::identity(self.channel_count());
        self.update_with(time, &identity)
    }

    fn apply(&mut self, values: &[ActuatorValue], _time: &WorldTime) -> SubsystemResult<()> {
        let count = self.channel_count();
        if values.len() != count {
            return Err(SubsystemError::LengthMismatch {
                subsystem: "actuator",
                expected: count,
                actual: values.len(),
            });
        }
        for value in values {
            if value.channel >= count {
                return Err(SubsystemError::ChannelOutOfRange {
                    subsystem: "actuator",
                    index: value.channel,
                    count,
                });
            }
            if !value.value.is_finite() {
                return Err(SubsystemError::NonFiniteState {
                    subsystem: "actuator",
                    field: "command",
                });
            }
        }
        for value in values {
            self.commanded[value.channel] = value.value.clamp(0.0, self.config.max_output[value.channel]);
        }
        Ok(())
    }

    fn telemetry(&self) -> ActuatorTelemetrySnapshot {
        ActuatorTelemetrySnapshot {
            commanded: self.commanded.clone(),
            applied: self.applied.clone(),
            max_output: self.effective_max.clone(),
        }
    }
}

// =============================================================================
// DECORATORS
// =============================================================================

/// Partial motor failure from a start time on.
#[derive(Debug, Clone)]
pub struct DegradedActuator<A> {
    inner: A,
    event: Option<ActuatorDegradationEvent>,
}

impl<A: ModifiableActuator> DegradedActuator<A> {
    /// Rejects an event targeting a channel `inner` does not have.
    pub fn new(inner: A, event: Option<ActuatorDegradationEvent>) -> Result<Self, ValidationError> {
        if let Some(event) = &event {
            event.validate()?;
            let count = inner.channel_count();
            if event.channel >= count {
                return Err(ValidationError::ChannelOutOfRange {
                    index: event.channel,
                    count,
                });
            }
        }
        Ok(Self { inner, event })
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: ModifiableActuator> ModifiableActuator for DegradedActuator<A> {
    fn update_with(&mut self, time: &WorldTime, modifiers: &ActuatorModifiers) -> SubsystemResult<()> {
        match &self.event {
            Some(event) if event.is_active(time.time) => {
                let mut modifiers = modifiers.clone();
                modifiers.scale_max(event.channel, event.max_output_scale);
                self.inner.update_with(time, &modifiers)
            }
            _ => self.inner.update_with(time, modifiers),
        }
    }

    fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }
}

impl<A: ModifiableActuator> ActuatorEngine for DegradedActuator<A> {
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()> {
        let identity = ActuatorModifiers::identity(self.channel_count());
        self.update_with(time, &identity)
    }

    fn apply(&mut self, values: &[ActuatorValue], time: &WorldTime) -> SubsystemResult<()> {
        self.inner.apply(values, time)
    }

    fn telemetry(&self) -> ActuatorTelemetrySnapshot {
        self.inner.telemetry()
    }
}

/// Time-windowed actuator swap faults plus HF actuator saturation.
#[derive(Debug, Clone)]
pub struct SwapActuator<A> {
    inner: A,
    swaps: Vec<ActuatorSwapEvent>,
    stress: Vec<HfStressEvent>,
}

impl<A: ModifiableActuator> SwapActuator<A> {
    pub fn new(
        inner: A,
        swaps: Vec<ActuatorSwapEvent>,
        stress: Vec<HfStressEvent>,
    ) -> Result<Self, ValidationError> {
        let count = inner.channel_count();
        for swap in &swaps {
            swap.validate()?;
            swap.validate_channels(count)?;
        }
        for event in &stress {
            event.validate()?;
        }
        Ok(Self { inner, swaps, stress })
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: ModifiableActuator> ModifiableActuator for SwapActuator<A> {
    fn update_with(&mut self, time: &WorldTime, modifiers: &ActuatorModifiers) -> SubsystemResult<()> {
        let mut modifiers = modifiers.clone();
        modifiers.merge_active(&self.swaps, &self.stress, time.time);
        self.inner.update_with(time, &modifiers)
    }

    fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }
}

impl<A: ModifiableActuator> ActuatorEngine for SwapActuator<A> {
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()> {
        let identity = ActuatorModifiers::identity(self.channel_count());
        self.update_with(time, &identity)
    }

    fn apply(&mut self, values: &[ActuatorValue], time: &WorldTime) -> SubsystemResult<()> {
        self.inner.apply(values, time)
    }

    fn telemetry(&self) -> ActuatorTelemetrySnapshot {
        self.inner.telemetry()
    }
}

/// The full actuator chain used by scenario runs.
pub type FaultedActuator = DegradedActuator<SwapActuator<FirstOrderActuator>>;
