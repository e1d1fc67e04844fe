//! Streaming safety-envelope failure policy.
//!
//! The policy sees every step once, in order, and keeps two running
//! counters: how long the rate/tilt envelope has been violated and how long
//! the vehicle has been falling. Checks run in priority order:
//!
//! 1. any non-finite state scalar → `simulation-integrity`
//! 2. envelope violated for `sustained_violation_seconds` → `safety-envelope`
//! 3. altitude below `ground_z` → `ground-violation` (no accumulation)
//! 4. sinking faster than `fall_velocity_threshold` for
//!    `fall_duration_seconds` → `sustained-fall`

use crate::log::{FailureEvent, FailureReason, WorldStepLog};
use quadsim_env::{TimeStep, ValidationError};
use serde::{Deserialize, Serialize};

/// Slack on duration thresholds so `n · dt` reaching a round number is not
/// lost to rounding.
const DURATION_EPSILON: f64 = 1e-9;

/// Acceptance bounds for a scenario trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyEnvelope {
    /// Max body rate magnitude (rad/s)
    pub omega_safe_max: f64,

    /// Max tilt from vertical (degrees)
    pub tilt_safe_max_degrees: f64,

    /// How long a violation may last before it is terminal (s)
    pub sustained_violation_seconds: f64,

    /// Lowest admissible altitude (m)
    pub ground_z: f64,

    /// How long a fall may last before it is terminal (s)
    pub fall_duration_seconds: f64,

    /// Sink rate counted as falling (m/s, positive)
    pub fall_velocity_threshold: f64,
}

impl SafetyEnvelope {
    pub fn new(
        omega_safe_max: f64,
        tilt_safe_max_degrees: f64,
        sustained_violation_seconds: f64,
        ground_z: f64,
        fall_duration_seconds: f64,
        fall_velocity_threshold: f64,
    ) -> Result<Self, ValidationError> {
        let envelope = Self {
            omega_safe_max,
            tilt_safe_max_degrees,
            sustained_violation_seconds,
            ground_z,
            fall_duration_seconds,
            fall_velocity_threshold,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("omega_safe_max", self.omega_safe_max)?;
        ValidationError::positive("tilt_safe_max_degrees", self.tilt_safe_max_degrees)?;
        ValidationError::positive("sustained_violation_seconds", self.sustained_violation_seconds)?;
        ValidationError::finite("ground_z", self.ground_z)?;
        ValidationError::positive("fall_duration_seconds", self.fall_duration_seconds)?;
        ValidationError::positive("fall_velocity_threshold", self.fall_velocity_threshold)?;
        Ok(())
    }

    pub fn tilt_safe_max_radians(&self) -> f64 {
        self.tilt_safe_max_degrees.to_radians()
    }

    /// True when rate or tilt is outside the envelope.
    pub fn is_violated(&self, omega: f64, tilt_radians: f64) -> bool {
        omega > self.omega_safe_max || tilt_radians > self.tilt_safe_max_radians()
    }

    pub fn with_ground_z(mut self, ground_z: f64) -> Self {
        self.ground_z = ground_z;
        self
    }

    pub fn with_omega_safe_max(mut self, omega: f64) -> Self {
        self.omega_safe_max = omega;
        self
    }
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        Self {
            omega_safe_max: 6.0,
            tilt_safe_max_degrees: 45.0,
            sustained_violation_seconds: 0.5,
            ground_z: 0.0,
            fall_duration_seconds: 1.0,
            fall_velocity_threshold: 2.0,
        }
    }
}

/// Early-failure predicate consulted once per step.
pub trait FailurePolicy {
    /// Returns the terminal failure for this step, if any.
    fn check(&mut self, step: &WorldStepLog) -> Option<FailureEvent>;
}

/// Policy for runs that always go the full duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailurePolicy for NeverFail {
    fn check(&mut self, _step: &WorldStepLog) -> Option<FailureEvent> {
        None
    }
}

/// The safety-envelope state machine.
#[derive(Debug, Clone)]
pub struct SafetyFailurePolicy {
    envelope: SafetyEnvelope,
    dt: f64,
    violation_steps: u64,
    fall_steps: u64,
}

impl SafetyFailurePolicy {
    pub fn new(envelope: SafetyEnvelope, timestep: TimeStep) -> Self {
        Self {
            envelope,
            dt: timestep.seconds(),
            violation_steps: 0,
            fall_steps: 0,
        }
    }

    pub fn envelope(&self) -> &SafetyEnvelope {
        &self.envelope
    }

    /// Current uninterrupted envelope-violation time (s).
    pub fn violation_duration(&self) -> f64 {
        self.violation_steps as f64 * self.dt
    }

    /// Current uninterrupted fall time (s).
    pub fn fall_duration(&self) -> f64 {
        self.fall_steps as f64 * self.dt
    }

    pub fn reset(&mut self) {
        self.violation_steps = 0;
        self.fall_steps = 0;
    }

    fn failure(step: &WorldStepLog, reason: FailureReason) -> Option<FailureEvent> {
        Some(FailureEvent {
            reason,
            time: step.time.time,
            step_index: step.time.step_index,
        })
    }
}

impl FailurePolicy for SafetyFailurePolicy {
    fn check(&mut self, step: &WorldStepLog) -> Option<FailureEvent> {
        let omega = step.safety.omega_magnitude;
        let tilt = step.safety.tilt_radians;
        let integrity_ok = omega.is_finite()
            && tilt.is_finite()
            && step.plant.scalars().iter().all(|v| v.is_finite());
        if !integrity_ok {
            return Self::failure(step, FailureReason::SimulationIntegrity);
        }

        if self.envelope.is_violated(omega, tilt) {
            self.violation_steps += 1;
            if self.violation_duration() + DURATION_EPSILON >= self.envelope.sustained_violation_seconds {
                return Self::failure(step, FailureReason::SafetyEnvelope);
            }
        } else {
            self.violation_steps = 0;
        }

        if step.plant.position.z < self.envelope.ground_z {
            return Self::failure(step, FailureReason::GroundViolation);
        }

        if step.plant.velocity.z < -self.envelope.fall_velocity_threshold {
            self.fall_steps += 1;
            if self.fall_duration() + DURATION_EPSILON >= self.envelope.fall_duration_seconds {
                return Self::failure(step, FailureReason::SustainedFall);
            }
        } else {
            self.fall_steps = 0;
        }

        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};
    use proptest::prelude::*;
    use quadsim_env::{
        ActuatorTelemetrySnapshot, DisturbanceSnapshot, PlantStateSnapshot, SafetyTrace, WorldTime,
    };

    /// Level, motionless step at `z` for unit tests across the crate.
    pub(crate) fn step_at(step_index: u64, z: f64) -> WorldStepLog {
        WorldStepLog {
            time: WorldTime {
                step_index,
                time: step_index as f64 * 0.001,
            },
            events: Vec::new(),
            sensor_samples: Vec::new(),
            control_output: None,
            applied_values: Vec::new(),
            actuators: ActuatorTelemetrySnapshot::default(),
            safety: SafetyTrace::default(),
            plant: PlantStateSnapshot {
                position: Vector3::new(0.0, 0.0, z),
                velocity: Vector3::zeros(),
                orientation: UnitQuaternion::identity(),
                angular_velocity: Vector3::zeros(),
                specific_force: Vector3::new(0.0, 0.0, 9.81),
            },
            disturbance: DisturbanceSnapshot::default(),
        }
    }

    fn policy() -> SafetyFailurePolicy {
        SafetyFailurePolicy::new(SafetyEnvelope::default(), TimeStep::new(0.001).unwrap())
    }

    #[test]
    fn test_envelope_validation() {
        assert!(SafetyEnvelope::new(0.0, 45.0, 0.5, 0.0, 1.0, 2.0).is_err());
        assert!(SafetyEnvelope::new(6.0, f64::NAN, 0.5, 0.0, 1.0, 2.0).is_err());
        assert!(SafetyEnvelope::new(6.0, 45.0, 0.5, f64::INFINITY, 1.0, 2.0).is_err());
        let envelope = SafetyEnvelope::new(6.0, 45.0, 0.5, -1.0, 1.0, 2.0).unwrap();
        assert_eq!(envelope.ground_z, -1.0);
        assert_eq!(envelope.sustained_violation_seconds, 0.5);
    }

    #[test]
    fn test_calm_step_passes() {
        let mut policy = policy();
        assert_eq!(policy.check(&step_at(1, 10.0)), None);
    }

    #[test]
    fn test_violation_must_be_sustained() {
        let mut policy = policy();
        let mut fired = None;
        for i in 1..=600 {
            let mut step = step_at(i, 10.0);
            step.safety.omega_magnitude = 7.0;
            if let Some(event) = policy.check(&step) {
                fired = Some(event);
                break;
            }
        }
        let event = fired.unwrap();
        assert_eq!(event.reason, FailureReason::SafetyEnvelope);
        assert_eq!(event.step_index, 500);
    }

    #[test]
    fn test_violation_counter_resets() {
        let mut policy = policy();
        for i in 1..=2000 {
            let mut step = step_at(i, 10.0);
            // 400 ms bursts separated by calm steps never reach 500 ms.
            if i % 401 != 0 {
                step.safety.tilt_radians = 1.0;
            }
            assert_eq!(policy.check(&step), None);
        }
    }

    #[test]
    fn test_sustained_fall() {
        let mut policy = policy();
        let mut result = None;
        for i in 1..=1200 {
            let mut step = step_at(i, 10.0);
            step.plant.velocity.z = -2.5;
            result = policy.check(&step);
            if result.is_some() {
                break;
            }
        }
        let event = result.unwrap();
        assert_eq!(event.reason, FailureReason::SustainedFall);
        assert_eq!(event.step_index, 1000);
    }

    #[test]
    fn test_integrity_takes_priority() {
        let mut policy = policy();
        let mut step = step_at(1, -5.0);
        step.plant.velocity.x = f64::NAN;
        assert_eq!(policy.check(&step).unwrap().reason, FailureReason::SimulationIntegrity);
    }

    proptest! {
        #[test]
        fn test_nan_omega_is_integrity_failure(z in -100.0f64..100.0, tilt in 0.0f64..3.0, vz in -10.0f64..10.0) {
            let mut policy = policy();
            let mut step = step_at(1, z);
            step.safety.omega_magnitude = f64::NAN;
            step.safety.tilt_radians = tilt;
            step.plant.velocity.z = vz;
            let event = policy.check(&step);
            prop_assert_eq!(event.map(|e| e.reason), Some(FailureReason::SimulationIntegrity));
        }

        #[test]
        fn test_below_ground_fails_on_first_step(depth in 1e-6f64..100.0, omega in 0.0f64..20.0) {
            let mut policy = policy();
            let mut step = step_at(1, -depth);
            step.safety.omega_magnitude = omega;
            let event = policy.check(&step);
            prop_assert_eq!(event.map(|e| e.reason), Some(FailureReason::GroundViolation));
        }
    }
}
