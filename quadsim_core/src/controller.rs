//! Reference PD attitude controller.
//!
//! Estimator:
//! - attitude: gyro integration from the known initial orientation
//! - vertical velocity: integration of world-frame specific force minus g
//! - altitude: the altimeter channel when present
//!
//! Control law, per axis `i` of the attitude error `e` (twice the vector
//! part of `q_target⁻¹ ⊗ q_est`):
//!
//! ```text
//! intent_i     = -kp_i · e_i
//! correction_i = -kd_i · ω_i
//! thrust       = m·g / cos(tilt)             (intent)
//!              + m·(-kz·(z - z_ref) - kv·vz) / cos(tilt)   (correction)
//! ```

use crate::mixer::{AllocationMixer, DRIVE_AXES};
use crate::plant::QuadrotorParams;
use nalgebra::{UnitQuaternion, Vector3};
use quadsim_env::{
    ActuatorTelemetrySnapshot, ActuatorValue, ChannelSample, ControlTransform, CutOutput, SensorChannel,
    SubsystemError, SubsystemResult, ValidationError, WorldTime,
};
use serde::{Deserialize, Serialize};

/// Lowest tilt cosine used for thrust compensation.
const MIN_TILT_COSINE: f64 = 0.5;

/// Controller gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerGains {
    /// Proportional attitude gains (roll, pitch, yaw) in N·m/rad
    pub attitude_kp: Vector3<f64>,

    /// Rate damping gains (roll, pitch, yaw) in N·m·s/rad
    pub rate_kd: Vector3<f64>,

    /// Vertical velocity gain (1/s)
    pub vertical_velocity_gain: f64,

    /// Altitude gain (1/s²), used only with an altimeter
    pub altitude_gain: f64,
}

impl ControllerGains {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for kp in self.attitude_kp.iter() {
            ValidationError::non_negative("attitude_kp", *kp)?;
        }
        for kd in self.rate_kd.iter() {
            ValidationError::non_negative("rate_kd", *kd)?;
        }
        ValidationError::non_negative("vertical_velocity_gain", self.vertical_velocity_gain)?;
        ValidationError::non_negative("altitude_gain", self.altitude_gain)?;
        Ok(())
    }

    pub fn with_attitude_kp(mut self, kp: Vector3<f64>) -> Self {
        self.attitude_kp = kp;
        self
    }

    pub fn with_rate_kd(mut self, kd: Vector3<f64>) -> Self {
        self.rate_kd = kd;
        self
    }
}

impl Default for ControllerGains {
    /// Tuned for the default 1 kg airframe: roll/pitch ωn = 15 rad/s,
    /// ζ = 0.9; yaw ωn = 8 rad/s, ζ = 0.8.
    fn default() -> Self {
        Self {
            attitude_kp: Vector3::new(2.25, 2.25, 1.28),
            rate_kd: Vector3::new(0.27, 0.27, 0.256),
            vertical_velocity_gain: 3.0,
            altitude_gain: 4.0,
        }
    }
}

/// What the controller emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Drive intents plus reflex corrections for a motor nerve
    #[default]
    Drives,
    /// Per-motor values mixed internally
    Direct,
}

/// Gyro-integrating PD attitude controller with vertical damping.
#[derive(Debug, Clone)]
pub struct PdAttitudeController {
    gains: ControllerGains,
    mass: f64,
    gravity: f64,
    mode: ControllerMode,
    mixer: AllocationMixer,
    target: UnitQuaternion<f64>,
    estimate: UnitQuaternion<f64>,
    vertical_velocity: f64,
    altitude_target: Option<f64>,
    latest: [Option<f64>; 7],
    last_time: Option<f64>,
    last_output: CutOutput,
}

impl PdAttitudeController {
    /// Holds level attitude at the yaw of `initial_orientation`.
    pub fn new(
        params: &QuadrotorParams,
        gains: ControllerGains,
        mode: ControllerMode,
        initial_orientation: UnitQuaternion<f64>,
    ) -> Result<Self, ValidationError> {
        gains.validate()?;
        let mixer = AllocationMixer::new(params)?;
        let (_, _, yaw) = initial_orientation.euler_angles();
        let mut controller = Self {
            gains,
            mass: params.mass,
            gravity: params.gravity,
            mode,
            mixer,
            target: UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
            estimate: initial_orientation,
            vertical_velocity: 0.0,
            altitude_target: None,
            latest: [None; 7],
            last_time: None,
            last_output: CutOutput::Drives {
                intents: Vec::new(),
                corrections: Vec::new(),
            },
        };
        controller.last_output = controller.hover_output();
        Ok(controller)
    }

    /// Holds this altitude instead of the first altimeter reading.
    pub fn with_altitude_target(mut self, altitude: f64) -> Self {
        self.altitude_target = Some(altitude);
        self
    }

    pub fn estimate(&self) -> UnitQuaternion<f64> {
        self.estimate
    }

    pub fn vertical_velocity_estimate(&self) -> f64 {
        self.vertical_velocity
    }

    fn reading(&self, channel: SensorChannel) -> Option<f64> {
        self.latest[channel.index()]
    }

    /// Output held until the first samples arrive.
    fn hover_output(&self) -> CutOutput {
        let hover = [self.mass * self.gravity, 0.0, 0.0, 0.0];
        match self.mode {
            ControllerMode::Drives => CutOutput::Drives {
                intents: hover.to_vec(),
                corrections: vec![0.0; DRIVE_AXES],
            },
            ControllerMode::Direct => CutOutput::Actuators {
                values: self
                    .mixer
                    .allocate(&hover)
                    .into_iter()
                    .enumerate()
                    .map(|(channel, thrust)| ActuatorValue::new(channel, thrust.max(0.0)))
                    .collect(),
            },
        }
    }

    fn output(&self, intents: [f64; DRIVE_AXES], corrections: [f64; DRIVE_AXES]) -> SubsystemResult<CutOutput> {
        match self.mode {
            ControllerMode::Drives => Ok(CutOutput::Drives {
                intents: intents.to_vec(),
                corrections: corrections.to_vec(),
            }),
            ControllerMode::Direct => {
                let values = self
                    .mixer
                    .mix(&intents, &corrections, &ActuatorTelemetrySnapshot::default())?;
                Ok(CutOutput::Actuators { values })
            }
        }
    }
}

impl ControlTransform for PdAttitudeController {
    fn update(&mut self, samples: &[ChannelSample], time: &WorldTime) -> SubsystemResult<CutOutput> {
        if samples.is_empty() {
            return Ok(self.last_output.clone());
        }
        for sample in samples {
            self.latest[sample.channel.index()] = Some(sample.value);
        }
        let dt = self.last_time.map_or(0.0, |last| (time.time - last).max(0.0));
        self.last_time = Some(time.time);

        let gyro = Vector3::new(
            self.reading(SensorChannel::GyroX).unwrap_or(0.0),
            self.reading(SensorChannel::GyroY).unwrap_or(0.0),
            self.reading(SensorChannel::GyroZ).unwrap_or(0.0),
        );
        let accel = Vector3::new(
            self.reading(SensorChannel::AccelX).unwrap_or(0.0),
            self.reading(SensorChannel::AccelY).unwrap_or(0.0),
            self.reading(SensorChannel::AccelZ).unwrap_or(self.gravity),
        );
        SubsystemError::check_finite("controller", "gyro", gyro.as_slice())?;
        SubsystemError::check_finite("controller", "accel", accel.as_slice())?;

        self.estimate *= UnitQuaternion::from_scaled_axis(gyro * dt);
        let world_accel_z = (self.estimate * accel).z - self.gravity;
        self.vertical_velocity += world_accel_z * dt;

        let error = self.target.inverse() * self.estimate;
        let sign = if error.w < 0.0 { -1.0 } else { 1.0 };
        let attitude_error = error.imag() * (2.0 * sign);
        let torque_p = -self.gains.attitude_kp.component_mul(&attitude_error);
        let torque_d = -self.gains.rate_kd.component_mul(&gyro);

        let tilt_cosine = (self.estimate * Vector3::z()).z.max(MIN_TILT_COSINE);
        let collective = self.mass * self.gravity / tilt_cosine;

        let mut vertical_accel = -self.gains.vertical_velocity_gain * self.vertical_velocity;
        if let Some(altitude) = self.reading(SensorChannel::Altitude) {
            let target = *self.altitude_target.get_or_insert(altitude);
            vertical_accel -= self.gains.altitude_gain * (altitude - target);
        }
        let thrust_correction = self.mass * vertical_accel / tilt_cosine;

        let output = self.output(
            [collective, torque_p.x, torque_p.y, torque_p.z],
            [thrust_correction, torque_d.x, torque_d.y, torque_d.z],
        )?;
        self.last_output = output.clone();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn imu(gyro: Vector3<f64>, accel: Vector3<f64>, time: f64) -> Vec<ChannelSample> {
        let values = [gyro.x, gyro.y, gyro.z, accel.x, accel.y, accel.z];
        SensorChannel::IMU
            .iter()
            .zip(values)
            .map(|(&channel, value)| ChannelSample { channel, value, time })
            .collect()
    }

    fn controller(mode: ControllerMode) -> PdAttitudeController {
        PdAttitudeController::new(
            &QuadrotorParams::default(),
            ControllerGains::default(),
            mode,
            UnitQuaternion::identity(),
        )
        .unwrap()
    }

    #[test]
    fn test_level_hover_commands_weight() {
        let mut ctrl = controller(ControllerMode::Drives);
        let out = ctrl
            .update(&imu(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81), 0.0), &WorldTime::zero())
            .unwrap();
        let CutOutput::Drives { intents, corrections } = out else {
            panic!("expected drives");
        };
        assert_abs_diff_eq!(intents[0], 9.81, epsilon = 1e-12);
        assert_eq!(&intents[1..], &[0.0, 0.0, 0.0]);
        assert_eq!(corrections, vec![0.0; 4]);
    }

    #[test]
    fn test_rate_damping_opposes_rotation() {
        let mut ctrl = controller(ControllerMode::Drives);
        let out = ctrl
            .update(&imu(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.81), 0.0), &WorldTime::zero())
            .unwrap();
        let CutOutput::Drives { corrections, .. } = out else {
            panic!("expected drives");
        };
        assert_abs_diff_eq!(corrections[1], -0.27, epsilon = 1e-12);
    }

    #[test]
    fn test_integrated_roll_produces_restoring_torque() {
        let mut ctrl = controller(ControllerMode::Drives);
        let accel = Vector3::new(0.0, 0.0, 9.81);
        let dt = quadsim_env::TimeStep::new(0.01).unwrap();
        let mut time = WorldTime::zero();
        ctrl.update(&imu(Vector3::new(1.0, 0.0, 0.0), accel, 0.0), &time).unwrap();
        for _ in 0..10 {
            time = time.advanced(dt);
            ctrl.update(&imu(Vector3::new(1.0, 0.0, 0.0), accel, time.time), &time).unwrap();
        }
        // Rolled about +x by ~0.1 rad.
        assert_abs_diff_eq!(ctrl.estimate().euler_angles().0, 0.1, epsilon = 1e-9);
        let out = ctrl.update(&imu(Vector3::zeros(), accel, time.time), &time).unwrap();
        let CutOutput::Drives { intents, .. } = out else {
            panic!("expected drives");
        };
        assert!(intents[1] < 0.0);
        assert!(intents[0] > 9.81);
    }

    #[test]
    fn test_empty_samples_hold_last_output() {
        let mut ctrl = controller(ControllerMode::Drives);
        let first = ctrl.update(&[], &WorldTime::zero()).unwrap();
        assert_eq!(
            first,
            CutOutput::Drives {
                intents: vec![9.81, 0.0, 0.0, 0.0],
                corrections: vec![0.0; 4]
            }
        );
        let out = ctrl
            .update(&imu(Vector3::new(0.5, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.81), 0.0), &WorldTime::zero())
            .unwrap();
        assert_eq!(ctrl.update(&[], &WorldTime::zero()).unwrap(), out);
    }

    #[test]
    fn test_direct_mode_emits_per_motor_values() {
        let mut ctrl = controller(ControllerMode::Direct);
        let out = ctrl
            .update(&imu(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81), 0.0), &WorldTime::zero())
            .unwrap();
        let CutOutput::Actuators { values } = out else {
            panic!("expected actuator values");
        };
        assert_eq!(values.len(), 4);
        for v in values {
            assert_abs_diff_eq!(v.value, 9.81 / 4.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_direct_mode_holds_hover_split_before_samples() {
        let mut ctrl = controller(ControllerMode::Direct);
        let CutOutput::Actuators { values } = ctrl.update(&[], &WorldTime::zero()).unwrap() else {
            panic!("expected actuator values");
        };
        assert_eq!(values.len(), 4);
        for (channel, v) in values.iter().enumerate() {
            assert_eq!(v.channel, channel);
            assert_abs_diff_eq!(v.value, 9.81 / 4.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_altitude_hold_pushes_back_toward_reference() {
        let mut ctrl = controller(ControllerMode::Drives).with_altitude_target(10.0);
        let mut samples = imu(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81), 0.0);
        samples.push(ChannelSample {
            channel: SensorChannel::Altitude,
            value: 9.0,
            time: 0.0,
        });
        let out = ctrl.update(&samples, &WorldTime::zero()).unwrap();
        let CutOutput::Drives { corrections, .. } = out else {
            panic!("expected drives");
        };
        assert_abs_diff_eq!(corrections[0], 4.0, epsilon = 1e-12);
    }
}
