//! Value types exchanged between the simulator and its subsystems.

use crate::error::ValidationError;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Simulated world clock.
///
/// `time` is derived from `step_index * dt` rather than accumulated, so the
/// same step always carries the same bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldTime {
    /// Number of completed physics steps
    pub step_index: u64,

    /// Simulated seconds since scenario start
    pub time: f64,
}

impl WorldTime {
    /// The clock before the first step.
    pub fn zero() -> Self {
        Self {
            step_index: 0,
            time: 0.0,
        }
    }

    /// Returns the clock one step of `dt` later.
    pub fn advanced(&self, dt: TimeStep) -> Self {
        let step_index = self.step_index + 1;
        Self {
            step_index,
            time: step_index as f64 * dt.seconds(),
        }
    }

    /// Returns true when a subsystem with `period_steps` runs on this step.
    pub fn is_due(&self, period_steps: u32) -> bool {
        period_steps > 0 && self.step_index % u64::from(period_steps) == 0
    }
}

impl Default for WorldTime {
    fn default() -> Self {
        Self::zero()
    }
}

/// Fixed physics time step in seconds (finite, > 0).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TimeStep(f64);

impl TimeStep {
    /// Creates a validated time step.
    pub fn new(seconds: f64) -> Result<Self, ValidationError> {
        ValidationError::positive("timestep", seconds).map(Self)
    }

    /// Returns the step length in seconds.
    pub fn seconds(&self) -> f64 {
        self.0
    }

    /// Number of whole steps that fit in `duration` seconds.
    pub fn steps_in(&self, duration: f64) -> u64 {
        // Guard against 20.0 / 0.001 landing a hair under 20000.
        let raw = duration / self.0;
        let rounded = raw.round();
        if (raw - rounded).abs() < 1e-9 * rounded.max(1.0) {
            rounded as u64
        } else {
            raw.floor() as u64
        }
    }
}

impl TryFrom<f64> for TimeStep {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TimeStep> for f64 {
    fn from(value: TimeStep) -> Self {
        value.0
    }
}

/// Non-empty scenario identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScenarioId(String);

impl ScenarioId {
    /// Creates a validated identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::Empty { field: "scenario_id" });
        }
        Ok(Self(id))
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ScenarioId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScenarioId> for String {
    fn from(value: ScenarioId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Actuator channel index, validated against a channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelIndex(usize);

impl ChannelIndex {
    /// Creates an index that is known to be `< count`.
    pub fn new(index: usize, count: usize) -> Result<Self, ValidationError> {
        if index < count {
            Ok(Self(index))
        } else {
            Err(ValidationError::ChannelOutOfRange { index, count })
        }
    }

    /// Returns the raw index.
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Logical sensor channels of the IMU (plus the optional altimeter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    GyroX,
    GyroY,
    GyroZ,
    AccelX,
    AccelY,
    AccelZ,
    Altitude,
}

impl SensorChannel {
    /// The six inertial channels in emission order.
    pub const IMU: [SensorChannel; 6] = [
        SensorChannel::GyroX,
        SensorChannel::GyroY,
        SensorChannel::GyroZ,
        SensorChannel::AccelX,
        SensorChannel::AccelY,
        SensorChannel::AccelZ,
    ];

    /// Position of this channel in the emitted sample vector.
    pub fn index(&self) -> usize {
        match self {
            SensorChannel::GyroX => 0,
            SensorChannel::GyroY => 1,
            SensorChannel::GyroZ => 2,
            SensorChannel::AccelX => 3,
            SensorChannel::AccelY => 4,
            SensorChannel::AccelZ => 5,
            SensorChannel::Altitude => 6,
        }
    }

    /// Returns true for the three gyro channels.
    pub fn is_gyro(&self) -> bool {
        matches!(self, SensorChannel::GyroX | SensorChannel::GyroY | SensorChannel::GyroZ)
    }
}

/// One emitted sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    /// Source channel
    pub channel: SensorChannel,

    /// Measured value (rad/s, m/s² or m)
    pub value: f64,

    /// World time at which the value was measured (earlier than the
    /// emitting step when the sample was delayed)
    pub time: f64,
}

/// A per-channel actuator value produced by a control stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorValue {
    /// Target channel (validated by the actuator engine)
    pub channel: usize,

    /// Commanded thrust in newtons
    pub value: f64,
}

impl ActuatorValue {
    pub fn new(channel: usize, value: f64) -> Self {
        Self { channel, value }
    }
}

/// A command emitted by an external drive allocator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Target channel
    pub channel: usize,

    /// Commanded thrust in newtons
    pub value: f64,
}

/// Output of a control transform for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CutOutput {
    /// Per-channel actuator values applied directly
    Actuators { values: Vec<ActuatorValue> },

    /// High-level drive intents plus fast reflex corrections, routed
    /// through the motor-nerve stage
    Drives {
        intents: Vec<f64>,
        corrections: Vec<f64>,
    },
}

/// Actuator state as seen from outside the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuatorTelemetrySnapshot {
    /// Last commanded value per channel (after clamping)
    pub commanded: Vec<f64>,

    /// Thrust currently produced per channel
    pub applied: Vec<f64>,

    /// Effective maximum output per channel after fault modifiers
    pub max_output: Vec<f64>,
}

impl ActuatorTelemetrySnapshot {
    /// Number of actuator channels.
    pub fn channel_count(&self) -> usize {
        self.applied.len()
    }
}

/// External loads acting on the vehicle at the current time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceSnapshot {
    /// Torque in the body frame (N·m)
    pub body_torque: Vector3<f64>,

    /// Force in the world frame (N)
    pub world_force: Vector3<f64>,

    /// Labels of disturbance events active at this time, in definition order
    pub active_events: Vec<String>,
}

impl Default for DisturbanceSnapshot {
    fn default() -> Self {
        Self {
            body_torque: Vector3::zeros(),
            world_force: Vector3::zeros(),
            active_events: Vec::new(),
        }
    }
}

/// Rigid-body state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantStateSnapshot {
    /// Position in the world frame (m), z up
    pub position: Vector3<f64>,

    /// Velocity in the world frame (m/s)
    pub velocity: Vector3<f64>,

    /// Body-to-world rotation
    pub orientation: UnitQuaternion<f64>,

    /// Angular velocity in the body frame (rad/s)
    pub angular_velocity: Vector3<f64>,

    /// Non-gravitational acceleration in the body frame (m/s²)
    pub specific_force: Vector3<f64>,
}

impl PlantStateSnapshot {
    /// Every scalar in the snapshot, for integrity checks.
    pub fn scalars(&self) -> [f64; 16] {
        let q = self.orientation.quaternion();
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
            q.w,
            q.i,
            q.j,
            q.k,
            self.angular_velocity.x,
            self.angular_velocity.y,
            self.angular_velocity.z,
            self.specific_force.x,
            self.specific_force.y,
            self.specific_force.z,
        ]
    }

    /// Angle between body z and world z.
    pub fn tilt_radians(&self) -> f64 {
        let q = self.orientation.quaternion();
        let cos_tilt = 1.0 - 2.0 * (q.i * q.i + q.j * q.j);
        cos_tilt.clamp(-1.0, 1.0).acos()
    }
}

/// Derived safety quantities logged every step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SafetyTrace {
    /// |ω| in rad/s
    pub omega_magnitude: f64,

    /// Tilt from vertical in radians
    pub tilt_radians: f64,
}
