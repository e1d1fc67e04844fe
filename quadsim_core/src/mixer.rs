//! Motor-nerve stage: drive intents to per-motor thrust.
//!
//! Drives are `[collective thrust, τx, τy, τz]`. Reflex corrections use the
//! same layout and are added before allocation.

use crate::plant::QuadrotorParams;
use nalgebra::{DMatrix, DVector};
use quadsim_env::{
    ActuatorTelemetrySnapshot, ActuatorValue, DriveAllocator, MotorNerve, SubsystemError, SubsystemResult,
    ValidationError, WorldTime,
};

/// Number of drive axes (thrust plus three torques).
pub const DRIVE_AXES: usize = 4;

/// Pseudo-inverse allocation over a motor layout.
#[derive(Debug, Clone)]
pub struct AllocationMixer {
    inverse: DMatrix<f64>,
}

impl AllocationMixer {
    /// Builds the allocation for `params.motors`. Fails when the layout
    /// cannot produce all four drive axes independently.
    pub fn new(params: &QuadrotorParams) -> Result<Self, ValidationError> {
        params.validate()?;
        let n = params.motor_count();
        let allocation = DMatrix::from_fn(DRIVE_AXES, n, |row, col| {
            let motor = &params.motors[col];
            match row {
                0 => 1.0,
                1 => motor.position.y,
                2 => -motor.position.x,
                _ => motor.spin * params.yaw_moment_coefficient,
            }
        });
        if allocation.rank(1e-9) < DRIVE_AXES {
            return Err(ValidationError::Degenerate { field: "motor allocation" });
        }
        let inverse = allocation
            .pseudo_inverse(1e-12)
            .map_err(|_| ValidationError::Degenerate { field: "motor allocation" })?;
        Ok(Self { inverse })
    }

    pub fn motor_count(&self) -> usize {
        self.inverse.nrows()
    }

    /// Unclamped per-motor thrust for one drive vector.
    pub fn allocate(&self, drives: &[f64; DRIVE_AXES]) -> Vec<f64> {
        let d = DVector::from_row_slice(drives);
        (&self.inverse * d).iter().copied().collect()
    }

    /// Sums intents and corrections, allocates, and clamps each motor to
    /// `[0, max]` where `max` comes from telemetry when available.
    pub fn mix(
        &self,
        intents: &[f64],
        corrections: &[f64],
        telemetry: &ActuatorTelemetrySnapshot,
    ) -> SubsystemResult<Vec<ActuatorValue>> {
        if intents.len() != DRIVE_AXES {
            return Err(SubsystemError::LengthMismatch {
                subsystem: "mixer",
                expected: DRIVE_AXES,
                actual: intents.len(),
            });
        }
        if !corrections.is_empty() && corrections.len() != DRIVE_AXES {
            return Err(SubsystemError::LengthMismatch {
                subsystem: "mixer",
                expected: DRIVE_AXES,
                actual: corrections.len(),
            });
        }
        SubsystemError::check_finite("mixer", "drive intents", intents)?;
        SubsystemError::check_finite("mixer", "reflex corrections", corrections)?;

        let mut drives = [0.0; DRIVE_AXES];
        for (i, d) in drives.iter_mut().enumerate() {
            *d = intents[i] + corrections.get(i).copied().unwrap_or(0.0);
        }

        let values = self
            .allocate(&drives)
            .into_iter()
            .enumerate()
            .map(|(channel, thrust)| {
                let max = telemetry.max_output.get(channel).copied().unwrap_or(f64::INFINITY);
                ActuatorValue::new(channel, thrust.clamp(0.0, max))
            })
            .collect();
        Ok(values)
    }
}

impl MotorNerve for AllocationMixer {
    fn update(
        &mut self,
        intents: &[f64],
        corrections: &[f64],
        telemetry: &ActuatorTelemetrySnapshot,
        _time: &WorldTime,
    ) -> SubsystemResult<Vec<ActuatorValue>> {
        self.mix(intents, corrections, telemetry)
    }
}

/// Lets an external [`DriveAllocator`] stand in for the nerve stage.
///
/// Returned commands are checked against the motor count before they reach
/// the actuator engine.
#[derive(Debug, Clone)]
pub struct AllocatorNerve<D> {
    allocator: D,
    channel_count: usize,
}

impl<D: DriveAllocator> AllocatorNerve<D> {
    pub fn new(allocator: D, channel_count: usize) -> Self {
        Self {
            allocator,
            channel_count,
        }
    }

    pub fn allocator(&self) -> &D {
        &self.allocator
    }
}

impl<D: DriveAllocator> MotorNerve for AllocatorNerve<D> {
    fn update(
        &mut self,
        intents: &[f64],
        corrections: &[f64],
        telemetry: &ActuatorTelemetrySnapshot,
        time: &WorldTime,
    ) -> SubsystemResult<Vec<ActuatorValue>> {
        let commands = self.allocator.update(intents, corrections, telemetry, time)?;
        commands
            .into_iter()
            .map(|command| {
                if command.channel >= self.channel_count {
                    return Err(SubsystemError::ChannelOutOfRange {
                        subsystem: "drive allocator",
                        index: command.channel,
                        count: self.channel_count,
                    });
                }
                if !command.value.is_finite() {
                    return Err(SubsystemError::NonFiniteState {
                        subsystem: "drive allocator",
                        field: "command",
                    });
                }
                Ok(ActuatorValue::new(command.channel, command.value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use quadsim_env::ActuatorCommand;

    #[test]
    fn test_hover_splits_evenly() {
        let params = QuadrotorParams::default();
        let mixer = AllocationMixer::new(&params).unwrap();
        let thrusts = mixer.allocate(&[params.mass * params.gravity, 0.0, 0.0, 0.0]);
        for t in thrusts {
            assert_abs_diff_eq!(t, params.hover_thrust_per_motor(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_allocation_inverts_motor_wrench() {
        let params = QuadrotorParams::default();
        let mixer = AllocationMixer::new(&params).unwrap();
        let drives = [9.0, 0.05, -0.03, 0.01];
        let thrusts = mixer.allocate(&drives);
        let (force, torque) = params.motor_wrench(&thrusts);
        assert_abs_diff_eq!(force.z, drives[0], epsilon = 1e-9);
        assert_abs_diff_eq!(torque, Vector3::new(drives[1], drives[2], drives[3]), epsilon = 1e-9);
    }

    #[test]
    fn test_corrections_add_to_intents() {
        let params = QuadrotorParams::default();
        let mut mixer = AllocationMixer::new(&params).unwrap();
        let telemetry = ActuatorTelemetrySnapshot::default();
        let a = mixer
            .update(&[5.0, 0.0, 0.0, 0.0], &[4.81, 0.0, 0.0, 0.0], &telemetry, &WorldTime::zero())
            .unwrap();
        let b = mixer.mix(&[9.81, 0.0, 0.0, 0.0], &[], &telemetry).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_abs_diff_eq!(x.value, y.value, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mix_clamps_to_telemetry_max() {
        let params = QuadrotorParams::default();
        let mixer = AllocationMixer::new(&params).unwrap();
        let telemetry = ActuatorTelemetrySnapshot {
            commanded: vec![0.0; 4],
            applied: vec![0.0; 4],
            max_output: vec![2.0; 4],
        };
        let values = mixer.mix(&[40.0, 0.0, 0.0, 0.0], &[], &telemetry).unwrap();
        assert!(values.iter().all(|v| v.value == 2.0));
    }

    #[test]
    fn test_mix_rejects_wrong_drive_count() {
        let mixer = AllocationMixer::new(&QuadrotorParams::default()).unwrap();
        let result = mixer.mix(&[1.0, 0.0], &[], &ActuatorTelemetrySnapshot::default());
        assert!(matches!(result, Err(SubsystemError::LengthMismatch { expected: 4, actual: 2, .. })));
    }

    #[test]
    fn test_coplanar_single_axis_layout_is_degenerate() {
        let mut params = QuadrotorParams::default();
        for motor in &mut params.motors {
            motor.position.y = 0.0;
        }
        assert!(matches!(
            AllocationMixer::new(&params),
            Err(ValidationError::Degenerate { .. })
        ));
    }

    struct FixedAllocator(Vec<ActuatorCommand>);

    impl DriveAllocator for FixedAllocator {
        fn update(
            &mut self,
            _drives: &[f64],
            _corrections: &[f64],
            _telemetry: &ActuatorTelemetrySnapshot,
            _time: &WorldTime,
        ) -> SubsystemResult<Vec<ActuatorCommand>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_allocator_nerve_validates_channels() {
        let good = FixedAllocator(vec![ActuatorCommand { channel: 1, value: 2.0 }]);
        let mut nerve = AllocatorNerve::new(good, 4);
        let values = nerve
            .update(&[], &[], &ActuatorTelemetrySnapshot::default(), &WorldTime::zero())
            .unwrap();
        assert_eq!(values, vec![ActuatorValue::new(1, 2.0)]);

        let bad = FixedAllocator(vec![ActuatorCommand { channel: 9, value: 2.0 }]);
        let mut nerve = AllocatorNerve::new(bad, 4);
        let result = nerve.update(&[], &[], &ActuatorTelemetrySnapshot::default(), &WorldTime::zero());
        assert!(matches!(result, Err(SubsystemError::ChannelOutOfRange { index: 9, .. })));
    }
}
