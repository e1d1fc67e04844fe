//! Scenario definitions and suite generators.

use crate::safety::SafetyEnvelope;
use nalgebra::{UnitQuaternion, Vector3};
use quadsim_core::rng::SeedPurpose;
use quadsim_core::{
    ActuatorConfig, ActuatorDegradationEvent, ActuatorSwapEvent, AxisNoiseConfig, ControllerGains,
    ControllerMode, HfStressEvent, HfStressKind, ImuConfig, QuadrotorParams, RigidBodyState, SensorSwapEvent,
    TimeWindow, TorqueDisturbanceEvent,
};
use quadsim_env::{ScenarioId, SensorChannel, TimeStep, ValidationError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Altitude every standard scenario starts at (m).
pub const INITIAL_ALTITUDE: f64 = 10.0;

/// Scenario kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Level hover from rest, no faults
    HoverStart,

    /// Short roll torque pulse
    ImpulseTorqueShock,

    /// Long constant torque with vibration on top
    SustainedWindTorque,

    /// Gyro bias/noise/dropout swap, accelerometer glitch, latency spike
    SensorDriftStress,

    /// One motor loses output permanently, another lags
    ActuatorDegradation,

    // ═══════════════════════════════════════════════════
    // LIFT-HOVER - altitude hold with the altimeter
    // ═══════════════════════════════════════════════════
    /// Climb 1 m and hold
    LiftHoverStart,

    /// Climb 1 m and hold with a degraded motor
    LiftHoverDegraded,
}

impl ScenarioKind {
    /// Returns a list of all kinds.
    pub fn all() -> Vec<ScenarioKind> {
        vec![
            ScenarioKind::HoverStart,
            ScenarioKind::ImpulseTorqueShock,
            ScenarioKind::SustainedWindTorque,
            ScenarioKind::SensorDriftStress,
            ScenarioKind::ActuatorDegradation,
            ScenarioKind::LiftHoverStart,
            ScenarioKind::LiftHoverDegraded,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::HoverStart => "hover-start",
            ScenarioKind::ImpulseTorqueShock => "impulse-torque-shock",
            ScenarioKind::SustainedWindTorque => "sustained-wind-torque",
            ScenarioKind::SensorDriftStress => "sensor-drift-stress",
            ScenarioKind::ActuatorDegradation => "actuator-degradation",
            ScenarioKind::LiftHoverStart => "lift-hover-start",
            ScenarioKind::LiftHoverDegraded => "lift-hover-degraded",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::HoverStart => "Hover from rest; body rate must settle below 0.5 rad/s after 1 s",
            ScenarioKind::ImpulseTorqueShock => "0.1 s roll torque pulse; tilt must be under 5° two seconds later",
            ScenarioKind::SustainedWindTorque => "Constant torque for half the run plus 30 Hz vibration",
            ScenarioKind::SensorDriftStress => "Gyro bias drift, noise and dropout; accel glitch; latency spike",
            ScenarioKind::ActuatorDegradation => "Motor 0 at 50% output, motor 1 lagging, brief saturation",
            ScenarioKind::LiftHoverStart => "Climb 1 m on the altimeter and hold within 0.5 m",
            ScenarioKind::LiftHoverDegraded => "Climb 1 m and hold with motor 2 at 60% output",
        }
    }

    /// True for kinds judged on altitude hold.
    pub fn is_lift_hover(&self) -> bool {
        matches!(self, ScenarioKind::LiftHoverStart | ScenarioKind::LiftHoverDegraded)
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "hover-start" | "hover" => Ok(ScenarioKind::HoverStart),
            "impulse-torque-shock" | "impulse" => Ok(ScenarioKind::ImpulseTorqueShock),
            "sustained-wind-torque" | "wind" => Ok(ScenarioKind::SustainedWindTorque),
            "sensor-drift-stress" | "sensor-drift" => Ok(ScenarioKind::SensorDriftStress),
            "actuator-degradation" | "degradation" => Ok(ScenarioKind::ActuatorDegradation),
            "lift-hover-start" | "lift-hover" => Ok(ScenarioKind::LiftHoverStart),
            "lift-hover-degraded" => Ok(ScenarioKind::LiftHoverDegraded),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// Identity and timing of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: ScenarioId,
    pub seed: u64,
    pub duration: f64,
    pub timestep: TimeStep,
}

impl ScenarioConfig {
    pub fn new(id: ScenarioId, seed: u64, duration: f64, timestep: TimeStep) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            seed,
            duration: ValidationError::positive("duration", duration)?,
            timestep,
        })
    }
}

/// Airframe, motors, sensors and controller used by a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSetup {
    pub params: QuadrotorParams,
    pub actuator: ActuatorConfig,
    pub imu: ImuConfig,
    pub gains: ControllerGains,
    pub controller_mode: ControllerMode,

    /// Altitude to hold when the altimeter is fitted; `None` holds the first
    /// reading
    #[serde(default)]
    pub altitude_target: Option<f64>,
}

impl Default for VehicleSetup {
    fn default() -> Self {
        Self {
            params: QuadrotorParams::default(),
            actuator: ActuatorConfig::default(),
            imu: ImuConfig::default(),
            gains: ControllerGains::default(),
            controller_mode: ControllerMode::Drives,
            altitude_target: None,
        }
    }
}

/// Immutable description of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub config: ScenarioConfig,
    pub kind: ScenarioKind,
    pub initial: RigidBodyState,
    pub envelope: SafetyEnvelope,
    pub vehicle: VehicleSetup,
    pub torque_events: Vec<TorqueDisturbanceEvent>,
    pub actuator_degradation: Option<ActuatorDegradationEvent>,
    pub sensor_swaps: Vec<SensorSwapEvent>,
    pub actuator_swaps: Vec<ActuatorSwapEvent>,
    pub hf_stress: Vec<HfStressEvent>,
}

impl ScenarioDefinition {
    /// Starts a builder with default vehicle, envelope and a rest state at
    /// [`INITIAL_ALTITUDE`].
    pub fn builder(kind: ScenarioKind, config: ScenarioConfig) -> ScenarioBuilder {
        ScenarioBuilder {
            definition: ScenarioDefinition {
                config,
                kind,
                initial: RigidBodyState::at_rest(Vector3::new(0.0, 0.0, INITIAL_ALTITUDE)),
                envelope: SafetyEnvelope::default(),
                vehicle: VehicleSetup::default(),
                torque_events: Vec::new(),
                actuator_degradation: None,
                sensor_swaps: Vec::new(),
                actuator_swaps: Vec::new(),
                hf_stress: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> &ScenarioId {
        &self.config.id
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// True if any fault, disturbance or stress event is configured.
    pub fn has_events(&self) -> bool {
        !self.torque_events.is_empty()
            || self.actuator_degradation.is_some()
            || !self.sensor_swaps.is_empty()
            || !self.actuator_swaps.is_empty()
            || !self.hf_stress.is_empty()
    }

    /// Earliest event start, if any.
    pub fn first_event_start(&self) -> Option<f64> {
        let starts = self
            .torque_events
            .iter()
            .map(|e| e.window.start_time)
            .chain(self.actuator_degradation.iter().map(|e| e.start_time))
            .chain(self.sensor_swaps.iter().map(|e| e.window.start_time))
            .chain(self.actuator_swaps.iter().map(|e| e.window.start_time))
            .chain(self.hf_stress.iter().map(|e| e.window.start_time));
        starts.fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.min(t))))
    }

    /// Latest event end, if any. A degradation never ends; its start counts.
    pub fn last_event_end(&self) -> Option<f64> {
        let ends = self
            .torque_events
            .iter()
            .map(|e| e.window.end_time())
            .chain(self.actuator_degradation.iter().map(|e| e.start_time))
            .chain(self.sensor_swaps.iter().map(|e| e.window.end_time()))
            .chain(self.actuator_swaps.iter().map(|e| e.window.end_time()))
            .chain(self.hf_stress.iter().map(|e| e.window.end_time()));
        ends.fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
    }

    /// End of the last torque disturbance, for impulse scoring.
    pub fn last_torque_end(&self) -> Option<f64> {
        self.torque_events
            .iter()
            .map(|e| e.window.end_time())
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
    }

    /// Altitude the lift-hover controller holds.
    pub fn altitude_target(&self) -> f64 {
        self.vehicle.altitude_target.unwrap_or(self.initial.position.z)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("duration", self.config.duration)?;
        for value in self.initial.to_vector().iter() {
            ValidationError::finite("initial_state", *value)?;
        }
        self.envelope.validate()?;
        self.vehicle.params.validate()?;
        self.vehicle.actuator.validate()?;
        self.vehicle.imu.validate()?;
        self.vehicle.gains.validate()?;
        if let Some(target) = self.vehicle.altitude_target {
            ValidationError::finite("altitude_target", target)?;
        }
        if self.vehicle.actuator.channel_count() != self.vehicle.params.motor_count() {
            return Err(ValidationError::ChannelOutOfRange {
                index: self.vehicle.actuator.channel_count(),
                count: self.vehicle.params.motor_count(),
            });
        }

        let channels = self.vehicle.actuator.channel_count();
        for event in &self.torque_events {
            event.validate()?;
        }
        if let Some(event) = &self.actuator_degradation {
            event.validate()?;
            if event.channel >= channels {
                return Err(ValidationError::ChannelOutOfRange {
                    index: event.channel,
                    count: channels,
                });
            }
        }
        for event in &self.sensor_swaps {
            event.validate()?;
        }
        for event in &self.actuator_swaps {
            event.validate()?;
            event.validate_channels(channels)?;
        }
        for event in &self.hf_stress {
            event.validate()?;
        }
        Ok(())
    }
}

/// Builder for [`ScenarioDefinition`]; `build` validates everything.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    definition: ScenarioDefinition,
}

impl ScenarioBuilder {
    pub fn with_initial_state(mut self, initial: RigidBodyState) -> Self {
        self.definition.initial = initial;
        self
    }

    pub fn with_initial_rates(mut self, angular_velocity: Vector3<f64>) -> Self {
        self.definition.initial.angular_velocity = angular_velocity;
        self
    }

    pub fn with_initial_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.definition.initial.orientation = orientation;
        self
    }

    pub fn with_envelope(mut self, envelope: SafetyEnvelope) -> Self {
        self.definition.envelope = envelope;
        self
    }

    pub fn with_vehicle(mut self, vehicle: VehicleSetup) -> Self {
        self.definition.vehicle = vehicle;
        self
    }

    pub fn with_imu(mut self, imu: ImuConfig) -> Self {
        self.definition.vehicle.imu = imu;
        self
    }

    pub fn with_controller_mode(mut self, mode: ControllerMode) -> Self {
        self.definition.vehicle.controller_mode = mode;
        self
    }

    pub fn with_altitude_target(mut self, altitude: f64) -> Self {
        self.definition.vehicle.altitude_target = Some(altitude);
        self
    }

    pub fn with_torque_event(mut self, event: TorqueDisturbanceEvent) -> Self {
        self.definition.torque_events.push(event);
        self
    }

    pub fn with_actuator_degradation(mut self, event: ActuatorDegradationEvent) -> Self {
        self.definition.actuator_degradation = Some(event);
        self
    }

    pub fn with_sensor_swap(mut self, event: SensorSwapEvent) -> Self {
        self.definition.sensor_swaps.push(event);
        self
    }

    pub fn with_actuator_swap(mut self, event: ActuatorSwapEvent) -> Self {
        self.definition.actuator_swaps.push(event);
        self
    }

    pub fn with_hf_stress(mut self, event: HfStressEvent) -> Self {
        self.definition.hf_stress.push(event);
        self
    }

    pub fn build(self) -> Result<ScenarioDefinition, ValidationError> {
        self.definition.validate()?;
        Ok(self.definition)
    }
}

// =============================================================================
// SUITES
// =============================================================================

/// Ordered collection of scenario definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSuite {
    scenarios: Vec<ScenarioDefinition>,
}

impl ScenarioSuite {
    pub fn new(scenarios: Vec<ScenarioDefinition>) -> Self {
        Self { scenarios }
    }

    /// One scenario of every kind with fixed parameters.
    ///
    /// Scenario `i` gets seed `seed + i`. Event times scale down for runs
    /// shorter than 8 s.
    pub fn standard(seed: u64, duration: f64, timestep: TimeStep) -> Result<Self, ValidationError> {
        let scenarios = ScenarioKind::all()
            .into_iter()
            .enumerate()
            .map(|(i, kind)| standard_scenario(kind, seed.wrapping_add(i as u64), duration, timestep))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scenarios })
    }

    /// The fixed hover-start scenario alone.
    pub fn hover(seed: u64, duration: f64, timestep: TimeStep) -> Result<Self, ValidationError> {
        Ok(Self {
            scenarios: vec![standard_scenario(ScenarioKind::HoverStart, seed, duration, timestep)?],
        })
    }

    /// `count` scenarios with kinds and fault magnitudes drawn from a
    /// ChaCha8 stream keyed by `seed`.
    pub fn randomized(seed: u64, count: usize, duration: f64, timestep: TimeStep) -> Result<Self, ValidationError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ SeedPurpose::ScenarioGeneration.offset());
        let kinds = ScenarioKind::all();
        let scenarios = (0..count)
            .map(|i| {
                let kind = kinds[rng.gen_range(0..kinds.len())];
                randomized_scenario(&mut rng, kind, i, seed.wrapping_add(i as u64), duration, timestep)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scenarios })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioDefinition> {
        self.scenarios.iter()
    }

    pub fn scenarios(&self) -> &[ScenarioDefinition] {
        &self.scenarios
    }

    /// Keeps only scenarios of `kind`.
    pub fn filter_kind(self, kind: ScenarioKind) -> Self {
        Self {
            scenarios: self.scenarios.into_iter().filter(|s| s.kind == kind).collect(),
        }
    }
}

/// Event start time: 2 s, or a quarter of short runs.
fn event_start(duration: f64) -> f64 {
    if duration >= 8.0 {
        2.0
    } else {
        duration * 0.25
    }
}

fn scenario_config(name: &str, seed: u64, duration: f64, timestep: TimeStep) -> Result<ScenarioConfig, ValidationError> {
    ScenarioConfig::new(ScenarioId::new(name)?, seed, duration, timestep)
}

fn lift_hover_vehicle() -> VehicleSetup {
    VehicleSetup {
        imu: ImuConfig::default().with_altimeter(AxisNoiseConfig {
            bias: 0.0,
            white_sigma: 0.02,
            random_walk_sigma: 0.0,
        }),
        altitude_target: Some(INITIAL_ALTITUDE),
        ..VehicleSetup::default()
    }
}

/// Lift-hover runs start 1 m below the target.
fn lift_hover_start() -> RigidBodyState {
    RigidBodyState::at_rest(Vector3::new(0.0, 0.0, INITIAL_ALTITUDE - 1.0))
}

fn standard_scenario(
    kind: ScenarioKind,
    seed: u64,
    duration: f64,
    timestep: TimeStep,
) -> Result<ScenarioDefinition, ValidationError> {
    let config = scenario_config(kind.name(), seed, duration, timestep)?;
    let start = event_start(duration);
    let builder = ScenarioDefinition::builder(kind, config);

    let builder = match kind {
        ScenarioKind::HoverStart => builder,
        ScenarioKind::ImpulseTorqueShock => builder.with_torque_event(TorqueDisturbanceEvent::new(
            "impulse-roll",
            TimeWindow::new(start, 0.1)?,
            Vector3::new(0.05, 0.0, 0.0),
        )?),
        ScenarioKind::SustainedWindTorque => {
            let window = TimeWindow::new(start, duration * 0.5)?;
            builder
                .with_torque_event(TorqueDisturbanceEvent::new(
                    "wind",
                    window,
                    Vector3::new(0.01, 0.01, 0.005),
                )?)
                .with_hf_stress(HfStressEvent::new(
                    window,
                    HfStressKind::Vibration {
                        amplitude: Vector3::new(0.002, 0.002, 0.0),
                        frequency_hz: 30.0,
                    },
                )?)
        }
        ScenarioKind::SensorDriftStress => {
            let mut drift = SensorSwapEvent::identity(
                TimeWindow::new(start, start)?,
                vec![SensorChannel::GyroX, SensorChannel::GyroY],
            );
            drift.bias_shift = 0.01;
            drift.noise_scale = 3.0;
            drift.dropout_probability = 0.1;
            builder
                .with_sensor_swap(drift)
                .with_hf_stress(HfStressEvent::new(
                    TimeWindow::new(start * 1.5, 0.1)?,
                    HfStressKind::SensorGlitch {
                        channels: vec![SensorChannel::AccelZ],
                        magnitude: 5.0,
                    },
                )?)
                .with_hf_stress(HfStressEvent::new(
                    TimeWindow::new(start * 1.75, 0.2)?,
                    HfStressKind::LatencySpike { delay_steps: 2 },
                )?)
        }
        ScenarioKind::ActuatorDegradation => {
            let mut lag = ActuatorSwapEvent::identity(TimeWindow::new(start * 2.0, start * 0.5)?, vec![1]);
            lag.gain_scale = 0.9;
            lag.lag_scale = 2.0;
            builder
                .with_actuator_degradation(ActuatorDegradationEvent::new(start, 0, 0.5)?)
                .with_actuator_swap(lag)
                .with_hf_stress(HfStressEvent::new(
                    TimeWindow::new(start * 2.5, start * 0.25)?,
                    HfStressKind::ActuatorSaturation { max_output_scale: 0.6 },
                )?)
        }
        ScenarioKind::LiftHoverStart => builder
            .with_vehicle(lift_hover_vehicle())
            .with_initial_state(lift_hover_start()),
        ScenarioKind::LiftHoverDegraded => builder
            .with_vehicle(lift_hover_vehicle())
            .with_initial_state(lift_hover_start())
            .with_actuator_degradation(ActuatorDegradationEvent::new(start, 2, 0.6)?),
    };
    builder.build()
}

fn randomized_scenario(
    rng: &mut ChaCha8Rng,
    kind: ScenarioKind,
    index: usize,
    seed: u64,
    duration: f64,
    timestep: TimeStep,
) -> Result<ScenarioDefinition, ValidationError> {
    let name = format!("{}-r{:03}", kind.name(), index);
    let config = scenario_config(&name, seed, duration, timestep)?;
    let start = event_start(duration) * rng.gen_range(0.75..1.25);
    let builder = ScenarioDefinition::builder(kind, config);

    let builder = match kind {
        ScenarioKind::HoverStart => {
            let rates = Vector3::new(rng.gen_range(-0.2..0.2), rng.gen_range(-0.2..0.2), rng.gen_range(-0.1..0.1));
            let tilt = UnitQuaternion::from_euler_angles(
                rng.gen_range(-0.03..0.03),
                rng.gen_range(-0.03..0.03),
                rng.gen_range(-PI..PI),
            );
            let mode = if rng.gen_bool(0.5) {
                ControllerMode::Drives
            } else {
                ControllerMode::Direct
            };
            builder
                .with_initial_rates(rates)
                .with_initial_orientation(tilt)
                .with_controller_mode(mode)
        }
        ScenarioKind::ImpulseTorqueShock => {
            let axis = rng.gen_range(0..2);
            let mut torque = Vector3::zeros();
            torque[axis] = rng.gen_range(0.02..0.08) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            builder.with_torque_event(TorqueDisturbanceEvent::new(
                "impulse",
                TimeWindow::new(start, rng.gen_range(0.05..0.15))?,
                torque,
            )?)
        }
        ScenarioKind::SustainedWindTorque => builder.with_torque_event(TorqueDisturbanceEvent::new(
            "wind",
            TimeWindow::new(start, duration * rng.gen_range(0.2..0.5))?,
            Vector3::new(
                rng.gen_range(-0.015..0.015),
                rng.gen_range(-0.015..0.015),
                rng.gen_range(-0.005..0.005),
            ),
        )?),
        ScenarioKind::SensorDriftStress => {
            let mut drift = SensorSwapEvent::identity(
                TimeWindow::new(start, start * rng.gen_range(0.5..1.0))?,
                vec![SensorChannel::GyroX, SensorChannel::GyroY, SensorChannel::GyroZ],
            );
            drift.bias_shift = rng.gen_range(-0.01..0.01);
            drift.noise_scale = rng.gen_range(1.0..4.0);
            drift.dropout_probability = rng.gen_range(0.0..0.2);
            let imu = ImuConfig::default().with_delay_steps(rng.gen_range(1..4));
            builder.with_imu(imu).with_sensor_swap(drift)
        }
        ScenarioKind::ActuatorDegradation => builder.with_actuator_degradation(ActuatorDegradationEvent::new(
            start,
            rng.gen_range(0..4),
            rng.gen_range(0.4..0.8),
        )?),
        ScenarioKind::LiftHoverStart => builder
            .with_vehicle(lift_hover_vehicle())
            .with_initial_state(lift_hover_start()),
        ScenarioKind::LiftHoverDegraded => builder
            .with_vehicle(lift_hover_vehicle())
            .with_initial_state(lift_hover_start())
            .with_actuator_degradation(ActuatorDegradationEvent::new(
                start,
                rng.gen_range(0..4),
                rng.gen_range(0.5..0.8),
            )?),
    };
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms() -> TimeStep {
        TimeStep::new(0.001).unwrap()
    }

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in ScenarioKind::all() {
            assert_eq!(kind.name().parse::<ScenarioKind>(), Ok(kind));
        }
        assert_eq!("HOVER_START".parse::<ScenarioKind>(), Ok(ScenarioKind::HoverStart));
        assert!("warp".parse::<ScenarioKind>().is_err());
    }

    #[test]
    fn test_standard_suite_covers_every_kind() {
        let suite = ScenarioSuite::standard(42, 20.0, ms()).unwrap();
        assert_eq!(suite.len(), ScenarioKind::all().len());
        let kinds: Vec<_> = suite.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, ScenarioKind::all());
        assert!(!suite.scenarios()[0].has_events());
        assert!(suite.scenarios()[1].has_events());
    }

    #[test]
    fn test_standard_suite_is_deterministic() {
        let a = ScenarioSuite::standard(42, 20.0, ms()).unwrap();
        let b = ScenarioSuite::standard(42, 20.0, ms()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_randomized_suite_is_deterministic() {
        let a = ScenarioSuite::randomized(7, 12, 10.0, ms()).unwrap();
        let b = ScenarioSuite::randomized(7, 12, 10.0, ms()).unwrap();
        let c = ScenarioSuite::randomized(8, 12, 10.0, ms()).unwrap();
        assert_eq!(a.len(), 12);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_randomized_vehicle_variation() {
        let suite = ScenarioSuite::randomized(3, 200, 10.0, ms()).unwrap();
        let hovers = suite.clone().filter_kind(ScenarioKind::HoverStart);
        assert!(!hovers.is_empty());
        for hover in hovers.iter() {
            let (roll, pitch, _) = hover.initial.orientation.euler_angles();
            assert!(roll.abs() <= 0.03 && pitch.abs() <= 0.03);
            assert_ne!(hover.initial.orientation, UnitQuaternion::identity());
        }
        let modes: Vec<_> = hovers.iter().map(|s| s.vehicle.controller_mode).collect();
        assert!(modes.contains(&ControllerMode::Drives));
        assert!(modes.contains(&ControllerMode::Direct));

        let drift = suite.filter_kind(ScenarioKind::SensorDriftStress);
        assert!(!drift.is_empty());
        assert!(drift.iter().all(|s| (1..4).contains(&s.vehicle.imu.delay_steps)));
    }

    #[test]
    fn test_event_bounds() {
        let suite = ScenarioSuite::standard(1, 20.0, ms()).unwrap();
        let impulse = &suite.scenarios()[1];
        assert_eq!(impulse.first_event_start(), Some(2.0));
        assert!((impulse.last_event_end().unwrap() - 2.1).abs() < 1e-12);
        assert!((impulse.last_torque_end().unwrap() - 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_builder_rejects_bad_degradation_channel() {
        let config = ScenarioConfig::new(ScenarioId::new("x").unwrap(), 1, 5.0, ms()).unwrap();
        let result = ScenarioDefinition::builder(ScenarioKind::ActuatorDegradation, config)
            .with_actuator_degradation(ActuatorDegradationEvent::new(1.0, 4, 0.5).unwrap())
            .build();
        assert!(matches!(result, Err(ValidationError::ChannelOutOfRange { index: 4, count: 4 })));
    }

    #[test]
    fn test_builder_rejects_non_finite_initial_state() {
        let config = ScenarioConfig::new(ScenarioId::new("x").unwrap(), 1, 5.0, ms()).unwrap();
        let result = ScenarioDefinition::builder(ScenarioKind::HoverStart, config)
            .with_initial_rates(Vector3::new(f64::NAN, 0.0, 0.0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_short_runs_scale_event_times() {
        let suite = ScenarioSuite::standard(1, 4.0, ms()).unwrap();
        for scenario in suite.iter() {
            if let Some(end) = scenario.last_event_end() {
                assert!(end <= 4.0, "{} ends at {}", scenario.id(), end);
            }
        }
    }
}
