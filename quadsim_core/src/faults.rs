//! Time-windowed fault injection.
//!
//! Events are plain values owned by a scenario definition. The engines and
//! decorators never mutate them; they only ask which events are active at a
//! given time and fold those into modifier tables:
//!
//! - [`ActuatorModifiers`]: gain, lag, max-output and deadzone per motor
//! - [`SensorModifiers`]: gain, bias, noise scale, dropout and delay per
//!   sensor channel
//!
//! Overlapping events combine multiplicatively for scales, by `max` for
//! thresholds and delays, and as independent trials for dropout.

use nalgebra::Vector3;
use quadsim_env::{SensorChannel, ValidationError};
use serde::{Deserialize, Serialize};

/// Closed activity window `[start_time, start_time + duration]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: f64,
    pub duration: f64,
}

impl TimeWindow {
    pub fn new(start_time: f64, duration: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            start_time: ValidationError::non_negative("start_time", start_time)?,
            duration: ValidationError::non_negative("duration", duration)?,
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time <= self.end_time()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Self::new(self.start_time, self.duration).map(|_| ())
    }
}

fn check_vector(field: &'static str, v: &Vector3<f64>) -> Result<(), ValidationError> {
    for value in v.iter() {
        ValidationError::finite(field, *value)?;
    }
    Ok(())
}

/// Body-frame torque applied over a window (impulse shock or sustained wind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorqueDisturbanceEvent {
    pub label: String,
    pub window: TimeWindow,
    pub torque: Vector3<f64>,
}

impl TorqueDisturbanceEvent {
    pub fn new(
        label: impl Into<String>,
        window: TimeWindow,
        torque: Vector3<f64>,
    ) -> Result<Self, ValidationError> {
        let event = Self {
            label: label.into(),
            window,
            torque,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.window.validate()?;
        check_vector("torque", &self.torque)
    }
}

/// Permanent loss of output on one motor from `start_time` on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorDegradationEvent {
    pub start_time: f64,
    pub channel: usize,
    /// Multiplier on the channel's max output (> 0)
    pub max_output_scale: f64,
}

impl ActuatorDegradationEvent {
    pub fn new(start_time: f64, channel: usize, max_output_scale: f64) -> Result<Self, ValidationError> {
        let event = Self {
            start_time,
            channel,
            max_output_scale,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::non_negative("start_time", self.start_time)?;
        ValidationError::positive("max_output_scale", self.max_output_scale)?;
        Ok(())
    }

    pub fn is_active(&self, time: f64) -> bool {
        time >= self.start_time
    }
}

/// Temporary actuator fault on a set of channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSwapEvent {
    pub window: TimeWindow,
    pub channels: Vec<usize>,
    pub gain_scale: f64,
    pub lag_scale: f64,
    pub max_output_scale: f64,
    /// Commands below this value (N) are zeroed
    pub deadzone: f64,
}

impl ActuatorSwapEvent {
    /// An event on `channels` with every modifier at identity.
    pub fn identity(window: TimeWindow, channels: Vec<usize>) -> Self {
        Self {
            window,
            channels,
            gain_scale: 1.0,
            lag_scale: 1.0,
            max_output_scale: 1.0,
            deadzone: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.window.validate()?;
        if self.channels.is_empty() {
            return Err(ValidationError::Empty { field: "actuator_swap.channels" });
        }
        ValidationError::positive("gain_scale", self.gain_scale)?;
        ValidationError::positive("lag_scale", self.lag_scale)?;
        ValidationError::positive("max_output_scale", self.max_output_scale)?;
        ValidationError::non_negative("deadzone", self.deadzone)?;
        Ok(())
    }

    /// Checks every targeted channel against `count`.
    pub fn validate_channels(&self, count: usize) -> Result<(), ValidationError> {
        for &index in &self.channels {
            if index >= count {
                return Err(ValidationError::ChannelOutOfRange { index, count });
            }
        }
        Ok(())
    }
}

/// Temporary sensor fault on a set of channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSwapEvent {
    pub window: TimeWindow,
    pub channels: Vec<SensorChannel>,
    pub gain_scale: f64,
    pub bias_shift: f64,
    pub noise_scale: f64,
    /// Probability in `[0, 1]` that a sample is suppressed
    pub dropout_probability: f64,
    /// Extra delay in sensor periods
    pub delay_steps: u32,
}

impl SensorSwapEvent {
    pub fn identity(window: TimeWindow, channels: Vec<SensorChannel>) -> Self {
        Self {
            window,
            channels,
            gain_scale: 1.0,
            bias_shift: 0.0,
            noise_scale: 1.0,
            dropout_probability: 0.0,
            delay_steps: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.window.validate()?;
        if self.channels.is_empty() {
            return Err(ValidationError::Empty { field: "sensor_swap.channels" });
        }
        ValidationError::positive("gain_scale", self.gain_scale)?;
        ValidationError::finite("bias_shift", self.bias_shift)?;
        ValidationError::positive("noise_scale", self.noise_scale)?;
        ValidationError::in_range("dropout_probability", self.dropout_probability, 0.0, 1.0)?;
        Ok(())
    }
}

/// High-frequency stress injected independently of swap events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HfStressKind {
    /// Constant body torque for the window
    ImpulseTorque { torque: Vector3<f64> },

    /// Sinusoidal body torque `amplitude · sin(2π f (t - start))`
    Vibration {
        amplitude: Vector3<f64>,
        frequency_hz: f64,
    },

    /// One-shot additive spike on the first sample inside the window
    SensorGlitch {
        channels: Vec<SensorChannel>,
        magnitude: f64,
    },

    /// Caps max output of every motor at `max_output_scale` of nominal
    ActuatorSaturation { max_output_scale: f64 },

    /// Extra sensor delay in sensor periods on every channel
    LatencySpike { delay_steps: u32 },
}

/// A windowed high-frequency stress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfStressEvent {
    pub window: TimeWindow,
    pub kind: HfStressKind,
}

impl HfStressEvent {
    pub fn new(window: TimeWindow, kind: HfStressKind) -> Result<Self, ValidationError> {
        let event = Self { window, kind };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.window.validate()?;
        match &self.kind {
            HfStressKind::ImpulseTorque { torque } => check_vector("torque", torque),
            HfStressKind::Vibration {
                amplitude,
                frequency_hz,
            } => {
                check_vector("amplitude", amplitude)?;
                ValidationError::positive("frequency_hz", *frequency_hz).map(|_| ())
            }
            HfStressKind::SensorGlitch { channels, magnitude } => {
                if channels.is_empty() {
                    return Err(ValidationError::Empty { field: "sensor_glitch.channels" });
                }
                ValidationError::finite("magnitude", *magnitude).map(|_| ())
            }
            HfStressKind::ActuatorSaturation { max_output_scale } => {
                ValidationError::positive("max_output_scale", *max_output_scale).map(|_| ())
            }
            HfStressKind::LatencySpike { .. } => Ok(()),
        }
    }

    /// Short tag used in disturbance snapshots and reports.
    pub fn tag(&self) -> &'static str {
        match self.kind {
            HfStressKind::ImpulseTorque { .. } => "hf-impulse",
            HfStressKind::Vibration { .. } => "hf-vibration",
            HfStressKind::SensorGlitch { .. } => "hf-sensor-glitch",
            HfStressKind::ActuatorSaturation { .. } => "hf-actuator-saturation",
            HfStressKind::LatencySpike { .. } => "hf-latency-spike",
        }
    }
}

// =============================================================================
// ACTUATOR MODIFIERS
// =============================================================================

/// Modifiers in force on one motor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelModifier {
    pub gain: f64,
    pub lag_scale: f64,
    pub max_scale: f64,
    pub deadzone: f64,
}

impl ChannelModifier {
    pub const IDENTITY: ChannelModifier = ChannelModifier {
        gain: 1.0,
        lag_scale: 1.0,
        max_scale: 1.0,
        deadzone: 0.0,
    };
}

impl Default for ChannelModifier {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Per-motor modifier table at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorModifiers {
    channels: Vec<ChannelModifier>,
}

impl ActuatorModifiers {
    pub fn identity(channel_count: usize) -> Self {
        Self {
            channels: vec![ChannelModifier::IDENTITY; channel_count],
        }
    }

    pub fn channel(&self, index: usize) -> ChannelModifier {
        self.channels.get(index).copied().unwrap_or_default()
    }

    /// Scales one channel's max output.
    pub fn scale_max(&mut self, index: usize, scale: f64) {
        if let Some(m) = self.channels.get_mut(index) {
            m.max_scale *= scale;
        }
    }

    /// Folds one active swap event into the table.
    pub fn apply_swap(&mut self, event: &ActuatorSwapEvent) {
        for &index in &event.channels {
            if let Some(m) = self.channels.get_mut(index) {
                m.gain *= event.gain_scale;
                m.lag_scale *= event.lag_scale;
                m.max_scale *= event.max_output_scale;
                m.deadzone = m.deadzone.max(event.deadzone);
            }
        }
    }

    /// Caps every channel's max scale at `cap`.
    pub fn cap_all(&mut self, cap: f64) {
        for m in &mut self.channels {
            m.max_scale = m.max_scale.min(cap);
        }
    }

    /// Table for the swap and saturation events active at `time`.
    pub fn active_at(
        channel_count: usize,
        swaps: &[ActuatorSwapEvent],
        stress: &[HfStressEvent],
        time: f64,
    ) -> Self {
        let mut table = Self::identity(channel_count);
        table.merge_active(swaps, stress, time);
        table
    }

    /// Folds the swap and saturation events active at `time` into `self`.
    pub fn merge_active(&mut self, swaps: &[ActuatorSwapEvent], stress: &[HfStressEvent], time: f64) {
        for event in swaps.iter().filter(|e| e.window.contains(time)) {
            self.apply_swap(event);
        }
        for event in stress.iter().filter(|e| e.window.contains(time)) {
            if let HfStressKind::ActuatorSaturation { max_output_scale } = event.kind {
                self.cap_all(max_output_scale);
            }
        }
    }
}

// =============================================================================
// SENSOR MODIFIERS
// =============================================================================

/// Modifiers in force on one sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorChannelModifier {
    pub gain: f64,
    pub bias: f64,
    pub noise_scale: f64,
    pub dropout_probability: f64,
    pub delay_steps: u32,
}

impl SensorChannelModifier {
    pub const IDENTITY: SensorChannelModifier = SensorChannelModifier {
        gain: 1.0,
        bias: 0.0,
        noise_scale: 1.0,
        dropout_probability: 0.0,
        delay_steps: 0,
    };
}

impl Default for SensorChannelModifier {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Number of addressable sensor channels (IMU + altimeter).
pub const SENSOR_CHANNEL_SLOTS: usize = 7;

/// Per-sensor-channel modifier table at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorModifiers {
    channels: [SensorChannelModifier; SENSOR_CHANNEL_SLOTS],
}

impl SensorModifiers {
    pub fn identity() -> Self {
        Self {
            channels: [SensorChannelModifier::IDENTITY; SENSOR_CHANNEL_SLOTS],
        }
    }

    pub fn channel(&self, channel: SensorChannel) -> SensorChannelModifier {
        self.channels[channel.index()]
    }

    pub fn apply_swap(&mut self, event: &SensorSwapEvent) {
        for channel in &event.channels {
            let m = &mut self.channels[channel.index()];
            m.gain *= event.gain_scale;
            m.bias += event.bias_shift;
            m.noise_scale *= event.noise_scale;
            m.dropout_probability =
                1.0 - (1.0 - m.dropout_probability) * (1.0 - event.dropout_probability);
            m.delay_steps = m.delay_steps.max(event.delay_steps);
        }
    }

    /// Folds another table into this one with the same rules as overlapping
    /// swap events.
    pub fn combine(&mut self, other: &SensorModifiers) {
        for (m, o) in self.channels.iter_mut().zip(other.channels.iter()) {
            m.gain *= o.gain;
            m.bias += o.bias;
            m.noise_scale *= o.noise_scale;
            m.dropout_probability = 1.0 - (1.0 - m.dropout_probability) * (1.0 - o.dropout_probability);
            m.delay_steps = m.delay_steps.max(o.delay_steps);
        }
    }

    /// Adds `steps` of delay to every channel.
    pub fn add_global_delay(&mut self, steps: u32) {
        for m in &mut self.channels {
            m.delay_steps = m.delay_steps.saturating_add(steps);
        }
    }

    /// Table for the swap and latency events active at `time`.
    ///
    /// Glitches are one-shot and tracked by the sensor decorator, not here.
    pub fn active_at(swaps: &[SensorSwapEvent], stress: &[HfStressEvent], time: f64) -> Self {
        let mut table = Self::identity();
        for event in swaps.iter().filter(|e| e.window.contains(time)) {
            table.apply_swap(event);
        }
        for event in stress.iter().filter(|e| e.window.contains(time)) {
            if let HfStressKind::LatencySpike { delay_steps } = event.kind {
                table.add_global_delay(delay_steps);
            }
        }
        table
    }
}
