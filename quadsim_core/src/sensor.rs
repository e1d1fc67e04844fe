//! IMU sensor field and its swap-fault decorator.

use crate::faults::{HfStressEvent, HfStressKind, SensorModifiers, SensorSwapEvent};
use crate::noise::{AxisNoise, AxisNoiseConfig, DelayBuffer};
use crate::rng::{keyed_unit, SeedPurpose};
use quadsim_env::{
    ChannelSample, PlantStateSnapshot, SensorChannel, SensorField, SubsystemError, SubsystemResult,
    TimeStep, ValidationError, WorldTime,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// IMU noise and latency configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuConfig {
    /// Noise per gyro axis (x, y, z)
    pub gyro: [AxisNoiseConfig; 3],

    /// Noise per accelerometer axis (x, y, z)
    pub accel: [AxisNoiseConfig; 3],

    /// Altimeter noise; `None` disables the altitude channel
    pub altimeter: Option<AxisNoiseConfig>,

    /// Depth of the shared delay buffer, in sensor periods
    pub delay_steps: u32,
}

impl ImuConfig {
    /// Noise-free, zero-latency IMU.
    pub fn ideal() -> Self {
        Self {
            gyro: [AxisNoiseConfig::ideal(); 3],
            accel: [AxisNoiseConfig::ideal(); 3],
            altimeter: None,
            delay_steps: 0,
        }
    }

    pub fn with_altimeter(mut self, noise: AxisNoiseConfig) -> Self {
        self.altimeter = Some(noise);
        self
    }

    pub fn with_delay_steps(mut self, steps: u32) -> Self {
        self.delay_steps = steps;
        self
    }

    pub fn with_gyro_noise(mut self, noise: AxisNoiseConfig) -> Self {
        self.gyro = [noise; 3];
        self
    }

    pub fn with_accel_noise(mut self, noise: AxisNoiseConfig) -> Self {
        self.accel = [noise; 3];
        self
    }

    /// Channels this configuration emits, in emission order.
    pub fn channels(&self) -> Vec<SensorChannel> {
        let mut channels = SensorChannel::IMU.to_vec();
        if self.altimeter.is_some() {
            channels.push(SensorChannel::Altitude);
        }
        channels
    }

    fn noise_for(&self, channel: SensorChannel) -> AxisNoiseConfig {
        let i = channel.index();
        match channel {
            SensorChannel::GyroX | SensorChannel::GyroY | SensorChannel::GyroZ => self.gyro[i],
            SensorChannel::AccelX | SensorChannel::AccelY | SensorChannel::AccelZ => self.accel[i - 3],
            SensorChannel::Altitude => self.altimeter.unwrap_or_else(AxisNoiseConfig::ideal),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let all = self.gyro.iter().chain(self.accel.iter()).chain(self.altimeter.iter());
        for axis in all {
            AxisNoiseConfig::new(axis.bias, axis.white_sigma, axis.random_walk_sigma)?;
        }
        Ok(())
    }
}

impl Default for ImuConfig {
    /// Consumer-grade MEMS figures, one sample of latency, no altimeter.
    fn default() -> Self {
        Self {
            gyro: [AxisNoiseConfig {
                bias: 0.0,
                white_sigma: 0.002,
                random_walk_sigma: 0.0005,
            }; 3],
            accel: [AxisNoiseConfig {
                bias: 0.0,
                white_sigma: 0.02,
                random_walk_sigma: 0.001,
            }; 3],
            altimeter: None,
            delay_steps: 1,
        }
    }
}

/// A sensor stage that accepts an externally computed modifier table.
pub trait ModifiableSensor: SensorField {
    fn sample_with(
        &mut self,
        time: &WorldTime,
        plant: &PlantStateSnapshot,
        modifiers: &SensorModifiers,
    ) -> SubsystemResult<Vec<ChannelSample>>;
}

/// Ground-truth value a channel measures.
pub fn channel_truth(channel: SensorChannel, plant: &PlantStateSnapshot) -> f64 {
    match channel {
        SensorChannel::GyroX => plant.angular_velocity.x,
        SensorChannel::GyroY => plant.angular_velocity.y,
        SensorChannel::GyroZ => plant.angular_velocity.z,
        SensorChannel::AccelX => plant.specific_force.x,
        SensorChannel::AccelY => plant.specific_force.y,
        SensorChannel::AccelZ => plant.specific_force.z,
        SensorChannel::Altitude => plant.position.z,
    }
}

// =============================================================================
// BASE SENSOR
// =============================================================================

/// Six-axis IMU with optional altimeter.
///
/// Each channel owns an [`AxisNoise`] seeded from the scenario seed and the
/// channel index. The sample vector goes through one [`DelayBuffer`] shared
/// by every channel; while it fills, `sample` returns an empty set.
#[derive(Debug, Clone)]
pub struct ImuSensorField {
    channels: Vec<SensorChannel>,
    noise: Vec<AxisNoise>,
    period: f64,
    delay: DelayBuffer<Vec<ChannelSample>>,
}

impl ImuSensorField {
    /// `period` is the time between `sample` calls.
    pub fn new(config: &ImuConfig, period: TimeStep, seed: u64) -> Result<Self, ValidationError> {
        config.validate()?;
        let channels = config.channels();
        let noise = channels
            .iter()
            .map(|&ch| AxisNoise::new(config.noise_for(ch), seed, ch.index() as u64))
            .collect();
        Ok(Self {
            channels,
            noise,
            period: period.seconds(),
            delay: DelayBuffer::new(config.delay_steps as usize),
        })
    }

    pub fn channels(&self) -> &[SensorChannel] {
        &self.channels
    }
}

impl ModifiableSensor for ImuSensorField {
    fn sample_with(
        &mut self,
        time: &WorldTime,
        plant: &PlantStateSnapshot,
        modifiers: &SensorModifiers,
    ) -> SubsystemResult<Vec<ChannelSample>> {
        let mut samples = Vec::with_capacity(self.channels.len());
        for (&channel, noise) in self.channels.iter().zip(self.noise.iter_mut()) {
            let m = modifiers.channel(channel);
            let truth = channel_truth(channel, plant);
            let measured = (truth + noise.sample(self.period, m.noise_scale)) * m.gain + m.bias;
            if !measured.is_finite() {
                return Err(SubsystemError::NonFiniteState {
                    subsystem: "sensor",
                    field: "sample",
                });
            }
            samples.push(ChannelSample {
                channel,
                value: measured,
                time: time.time,
            });
        }
        Ok(self.delay.push(samples).unwrap_or_default())
    }
}

impl SensorField for ImuSensorField {
    fn sample(&mut self, time: &WorldTime, plant: &PlantStateSnapshot) -> SubsystemResult<Vec<ChannelSample>> {
        self.sample_with(time, plant, &SensorModifiers::identity())
    }
}

// =============================================================================
// SWAP DECORATOR
// =============================================================================

/// Emissions kept for per-channel delay shifts.
const HISTORY_LIMIT: usize = 64;

/// Time-windowed sensor faults plus HF glitch and latency stress.
///
/// Gain, bias and noise scale are pushed down to the wrapped sensor through
/// the modifier table. Dropout, delay shift and glitches act on the wrapped
/// sensor's emissions.
#[derive(Debug, Clone)]
pub struct SwapSensorField<S> {
    inner: S,
    seed: u64,
    swaps: Vec<SensorSwapEvent>,
    stress: Vec<HfStressEvent>,
    /// Channels each glitch has already disturbed, by stress event index
    glitched: Vec<Vec<SensorChannel>>,
    history: VecDeque<Vec<ChannelSample>>,
}

impl<S: ModifiableSensor> SwapSensorField<S> {
    pub fn new(
        inner: S,
        seed: u64,
        swaps: Vec<SensorSwapEvent>,
        stress: Vec<HfStressEvent>,
    ) -> Result<Self, ValidationError> {
        for swap in &swaps {
            swap.validate()?;
        }
        for event in &stress {
            event.validate()?;
        }
        Ok(Self {
            inner,
            seed,
            glitched: vec![Vec::new(); stress.len()],
            swaps,
            stress,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn delayed(&self, channel: SensorChannel, steps: u32) -> Option<ChannelSample> {
        let steps = steps as usize;
        if steps >= self.history.len() {
            return None;
        }
        self.history[self.history.len() - 1 - steps]
            .iter()
            .find(|s| s.channel == channel)
            .copied()
    }

    /// Adds each glitch once per targeted channel, on the first emitted sample
    /// of that channel inside the window.
    fn apply_glitches(&mut self, time: f64, samples: &mut [ChannelSample]) {
        if samples.is_empty() {
            return;
        }
        for (event, done) in self.stress.iter().zip(self.glitched.iter_mut()) {
            let HfStressKind::SensorGlitch { channels, magnitude } = &event.kind else {
                continue;
            };
            if !event.window.contains(time) {
                continue;
            }
            for sample in samples.iter_mut() {
                if channels.contains(&sample.channel) && !done.contains(&sample.channel) {
                    sample.value += magnitude;
                    done.push(sample.channel);
                }
            }
        }
    }
}

impl<S: ModifiableSensor> ModifiableSensor for SwapSensorField<S> {
    fn sample_with(
        &mut self,
        time: &WorldTime,
        plant: &PlantStateSnapshot,
        modifiers: &SensorModifiers,
    ) -> SubsystemResult<Vec<ChannelSample>> {
        let mut active = SensorModifiers::active_at(&self.swaps, &self.stress, time.time);
        active.combine(modifiers);

        let emitted = self.inner.sample_with(time, plant, &active)?;
        if emitted.is_empty() {
            return Ok(emitted);
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(emitted.clone());

        let mut out = Vec::with_capacity(emitted.len());
        for sample in &emitted {
            let m = active.channel(sample.channel);
            let Some(selected) = self.delayed(sample.channel, m.delay_steps) else {
                continue;
            };
            if m.dropout_probability > 0.0 {
                let draw = keyed_unit(
                    self.seed,
                    SeedPurpose::SensorDropout,
                    sample.channel.index() as u64,
                    time.step_index,
                );
                if draw < m.dropout_probability {
                    continue;
                }
            }
            out.push(selected);
        }

        self.apply_glitches(time.time, &mut out);
        Ok(out)
    }
}

impl<S: ModifiableSensor> SensorField for SwapSensorField<S> {
    fn sample(&mut self, time: &WorldTime, plant: &PlantStateSnapshot) -> SubsystemResult<Vec<ChannelSample>> {
        self.sample_with(time, plant, &SensorModifiers::identity())
    }
}

/// The full sensor chain used by scenario runs.
pub type FaultedSensor = SwapSensorField<ImuSensorField>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::TimeWindow;
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn ms() -> TimeStep {
        TimeStep::new(0.001).unwrap()
    }

    fn hover_plant() -> PlantStateSnapshot {
        PlantStateSnapshot {
            position: Vector3::new(0.0, 0.0, 10.0),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::new(0.1, -0.2, 0.3),
            specific_force: Vector3::new(0.0, 0.0, 9.81),
        }
    }

    fn window(start: f64, duration: f64) -> TimeWindow {
        TimeWindow::new(start, duration).unwrap()
    }

    fn value_of(samples: &[ChannelSample], channel: SensorChannel) -> Option<f64> {
        samples.iter().find(|s| s.channel == channel).map(|s| s.value)
    }

    #[test]
    fn test_ideal_imu_reports_truth() {
        let mut imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 42).unwrap();
        let samples = imu.sample(&WorldTime::zero(), &hover_plant()).unwrap();
        assert_eq!(samples.len(), 6);
        assert_eq!(value_of(&samples, SensorChannel::GyroY), Some(-0.2));
        assert_eq!(value_of(&samples, SensorChannel::AccelZ), Some(9.81));
    }

    #[test]
    fn test_altimeter_channel_is_optional() {
        let config = ImuConfig::ideal().with_altimeter(AxisNoiseConfig::ideal());
        let mut imu = ImuSensorField::new(&config, ms(), 42).unwrap();
        let samples = imu.sample(&WorldTime::zero(), &hover_plant()).unwrap();
        assert_eq!(samples.len(), 7);
        assert_eq!(value_of(&samples, SensorChannel::Altitude), Some(10.0));
    }

    #[test]
    fn test_delay_buffer_emits_nothing_until_full() {
        let config = ImuConfig::ideal().with_delay_steps(2);
        let mut imu = ImuSensorField::new(&config, ms(), 42).unwrap();
        let mut time = WorldTime::zero();
        assert!(imu.sample(&time, &hover_plant()).unwrap().is_empty());
        time = time.advanced(ms());
        assert!(imu.sample(&time, &hover_plant()).unwrap().is_empty());
        time = time.advanced(ms());
        let samples = imu.sample(&time, &hover_plant()).unwrap();
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].time, 0.0);
    }

    #[test]
    fn test_noise_reproducible_per_seed() {
        let config = ImuConfig::default().with_delay_steps(0);
        let mut a = ImuSensorField::new(&config, ms(), 9).unwrap();
        let mut b = ImuSensorField::new(&config, ms(), 9).unwrap();
        let mut c = ImuSensorField::new(&config, ms(), 10).unwrap();
        let t = WorldTime::zero();
        let sa = a.sample(&t, &hover_plant()).unwrap();
        assert_eq!(sa, b.sample(&t, &hover_plant()).unwrap());
        assert_ne!(sa, c.sample(&t, &hover_plant()).unwrap());
    }

    #[test]
    fn test_swap_gain_and_bias_on_target_only() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let mut swap = SensorSwapEvent::identity(window(0.0, 1.0), vec![SensorChannel::GyroZ]);
        swap.gain_scale = 2.0;
        swap.bias_shift = 0.5;
        let mut sensor = SwapSensorField::new(imu, 1, vec![swap], vec![]).unwrap();

        let samples = sensor.sample(&WorldTime::zero(), &hover_plant()).unwrap();
        assert_abs_diff_eq!(value_of(&samples, SensorChannel::GyroZ).unwrap(), 1.1, epsilon = 1e-12);
        assert_eq!(value_of(&samples, SensorChannel::GyroX), Some(0.1));
    }

    #[test]
    fn test_full_dropout_suppresses_channel() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let mut swap = SensorSwapEvent::identity(window(0.0, 1.0), vec![SensorChannel::AccelX]);
        swap.dropout_probability = 1.0;
        let mut sensor = SwapSensorField::new(imu, 1, vec![swap], vec![]).unwrap();

        let samples = sensor.sample(&WorldTime::zero(), &hover_plant()).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(value_of(&samples, SensorChannel::AccelX), None);
    }

    #[test]
    fn test_partial_dropout_is_reproducible() {
        let build = || {
            let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 3).unwrap();
            let mut swap = SensorSwapEvent::identity(window(0.0, 10.0), SensorChannel::IMU.to_vec());
            swap.dropout_probability = 0.3;
            SwapSensorField::new(imu, 3, vec![swap], vec![]).unwrap()
        };
        let (mut a, mut b) = (build(), build());
        let mut time = WorldTime::zero();
        let mut total = 0;
        for _ in 0..1000 {
            time = time.advanced(ms());
            let sa = a.sample(&time, &hover_plant()).unwrap();
            assert_eq!(sa, b.sample(&time, &hover_plant()).unwrap());
            total += sa.len();
        }
        // 6000 draws at p = 0.3 keep about 4200.
        assert!((3900..4500).contains(&total));
    }

    #[test]
    fn test_delay_shift_uses_older_emission() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let mut swap = SensorSwapEvent::identity(window(0.0, 1.0), vec![SensorChannel::GyroX]);
        swap.delay_steps = 1;
        let mut sensor = SwapSensorField::new(imu, 1, vec![swap], vec![]).unwrap();

        let mut plant = hover_plant();
        let first = sensor.sample(&WorldTime::zero(), &plant).unwrap();
        assert_eq!(value_of(&first, SensorChannel::GyroX), None);

        plant.angular_velocity.x = 0.7;
        let time = WorldTime::zero().advanced(ms());
        let second = sensor.sample(&time, &plant).unwrap();
        assert_eq!(value_of(&second, SensorChannel::GyroX), Some(0.1));
        assert_eq!(value_of(&second, SensorChannel::GyroY), Some(-0.2));
    }

    #[test]
    fn test_glitch_fires_once() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let glitch = HfStressEvent::new(
            window(0.0, 1.0),
            HfStressKind::SensorGlitch {
                channels: vec![SensorChannel::AccelZ],
                magnitude: 50.0,
            },
        )
        .unwrap();
        let mut sensor = SwapSensorField::new(imu, 1, vec![], vec![glitch]).unwrap();

        let first = sensor.sample(&WorldTime::zero(), &hover_plant()).unwrap();
        assert_abs_diff_eq!(value_of(&first, SensorChannel::AccelZ).unwrap(), 59.81, epsilon = 1e-12);

        let time = WorldTime::zero().advanced(ms());
        let second = sensor.sample(&time, &hover_plant()).unwrap();
        assert_eq!(value_of(&second, SensorChannel::AccelZ), Some(9.81));
    }

    fn accel_glitch(magnitude: f64) -> HfStressEvent {
        HfStressEvent::new(
            window(0.0, 1.0),
            HfStressKind::SensorGlitch {
                channels: vec![SensorChannel::AccelZ],
                magnitude,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_glitch_waits_out_dropout() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let mut swap = SensorSwapEvent::identity(window(0.0, 0.0015), vec![SensorChannel::AccelZ]);
        swap.dropout_probability = 1.0;
        let mut sensor = SwapSensorField::new(imu, 1, vec![swap], vec![accel_glitch(50.0)]).unwrap();

        let mut time = WorldTime::zero();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(value_of(&sensor.sample(&time, &hover_plant()).unwrap(), SensorChannel::AccelZ));
            time = time.advanced(ms());
        }
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], None);
        assert_abs_diff_eq!(seen[2].unwrap(), 59.81, epsilon = 1e-12);
        assert_eq!(seen[3], Some(9.81));
    }

    #[test]
    fn test_glitch_waits_out_delay_shift() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let mut swap = SensorSwapEvent::identity(window(0.0, 1.0), vec![SensorChannel::AccelZ]);
        swap.delay_steps = 2;
        let mut sensor = SwapSensorField::new(imu, 1, vec![swap], vec![accel_glitch(50.0)]).unwrap();

        let mut time = WorldTime::zero();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(value_of(&sensor.sample(&time, &hover_plant()).unwrap(), SensorChannel::AccelZ));
            time = time.advanced(ms());
        }
        assert_eq!(&seen[..2], &[None, None]);
        assert_abs_diff_eq!(seen[2].unwrap(), 59.81, epsilon = 1e-12);
        assert_eq!(seen[3], Some(9.81));
    }

    #[test]
    fn test_latency_spike_delays_every_channel() {
        let imu = ImuSensorField::new(&ImuConfig::ideal(), ms(), 1).unwrap();
        let spike = HfStressEvent::new(window(0.0, 1.0), HfStressKind::LatencySpike { delay_steps: 1 }).unwrap();
        let mut sensor = SwapSensorField::new(imu, 1, vec![], vec![spike]).unwrap();
        assert!(sensor.sample(&WorldTime::zero(), &hover_plant()).unwrap().is_empty());
        let time = WorldTime::zero().advanced(ms());
        assert_eq!(sensor.sample(&time, &hover_plant()).unwrap().len(), 6);
    }
}
