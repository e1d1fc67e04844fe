//! Rigid-body multirotor plant.
//!
//! State is 13 scalars integrated with classical RK4:
//!
//! ```text
//! [ p_x p_y p_z | v_x v_y v_z | q_w q_x q_y q_z | ω_x ω_y ω_z ]
//!   world frame   world frame   body → world      body frame
//! ```
//!
//! World z points up; gravity is `(0, 0, -g)`. Motors push along body +z.

use nalgebra::{Quaternion, SVector, UnitQuaternion, Vector3};
use quadsim_env::{
    ActuatorTelemetrySnapshot, DisturbanceSnapshot, PlantEngine, PlantStateSnapshot, SafetyTrace,
    SubsystemError, SubsystemResult, TimeStep, ValidationError, WorldTime,
};
use serde::{Deserialize, Serialize};

/// Packed 13-element state vector.
pub type StateVector = SVector<f64, 13>;

/// Mounting of one motor on the airframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorGeometry {
    /// Rotor hub position in the body frame (m)
    pub position: Vector3<f64>,

    /// +1 for a rotor whose drag torque yaws the body positively, -1 otherwise
    pub spin: f64,
}

/// Physical parameters of the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrotorParams {
    /// Mass (kg)
    pub mass: f64,

    /// Principal moments of inertia (kg·m²)
    pub inertia: Vector3<f64>,

    /// Gravitational acceleration (m/s²)
    pub gravity: f64,

    /// Rotor drag torque per newton of thrust (m)
    pub yaw_moment_coefficient: f64,

    /// Motor layout; the order defines actuator channel indices
    pub motors: Vec<MotorGeometry>,
}

impl QuadrotorParams {
    /// Validates every field.
    pub fn new(
        mass: f64,
        inertia: Vector3<f64>,
        gravity: f64,
        yaw_moment_coefficient: f64,
        motors: Vec<MotorGeometry>,
    ) -> Result<Self, ValidationError> {
        let params = Self {
            mass,
            inertia,
            gravity,
            yaw_moment_coefficient,
            motors,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("mass", self.mass)?;
        for value in self.inertia.iter() {
            ValidationError::positive("inertia", *value)?;
        }
        ValidationError::positive("gravity", self.gravity)?;
        ValidationError::non_negative("yaw_moment_coefficient", self.yaw_moment_coefficient)?;
        if self.motors.is_empty() {
            return Err(ValidationError::Empty { field: "motors" });
        }
        for motor in &self.motors {
            for value in motor.position.iter() {
                ValidationError::finite("motor.position", *value)?;
            }
            ValidationError::finite("motor.spin", motor.spin)?;
        }
        Ok(())
    }

    /// X-configuration quadrotor with arm length `arm` (m).
    ///
    /// Channel order: front-right, rear-left, front-left, rear-right.
    pub fn x_quad(mass: f64, inertia: Vector3<f64>, arm: f64, yaw_moment_coefficient: f64) -> Self {
        let a = arm / std::f64::consts::SQRT_2;
        Self {
            mass,
            inertia,
            gravity: 9.81,
            yaw_moment_coefficient,
            motors: vec![
                MotorGeometry { position: Vector3::new(a, -a, 0.0), spin: 1.0 },
                MotorGeometry { position: Vector3::new(-a, a, 0.0), spin: 1.0 },
                MotorGeometry { position: Vector3::new(a, a, 0.0), spin: -1.0 },
                MotorGeometry { position: Vector3::new(-a, -a, 0.0), spin: -1.0 },
            ],
        }
    }

    pub fn motor_count(&self) -> usize {
        self.motors.len()
    }

    /// Per-motor thrust that exactly balances gravity.
    pub fn hover_thrust_per_motor(&self) -> f64 {
        self.mass * self.gravity / self.motors.len() as f64
    }

    /// Body force and torque produced by per-motor thrusts.
    pub fn motor_wrench(&self, thrusts: &[f64]) -> (Vector3<f64>, Vector3<f64>) {
        let mut force = Vector3::zeros();
        let mut torque = Vector3::zeros();
        for (motor, &f) in self.motors.iter().zip(thrusts) {
            force.z += f;
            torque.x += motor.position.y * f;
            torque.y -= motor.position.x * f;
            torque.z += motor.spin * self.yaw_moment_coefficient * f;
        }
        (force, torque)
    }
}

impl Default for QuadrotorParams {
    /// 1 kg, 0.2 m arm X-quad.
    fn default() -> Self {
        Self::x_quad(1.0, Vector3::new(0.01, 0.01, 0.02), 0.2, 0.02)
    }
}

/// Loads acting on the body during one integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantInput {
    /// Motor force in the body frame
    pub body_force: Vector3<f64>,

    /// Motor plus disturbance torque in the body frame
    pub body_torque: Vector3<f64>,

    /// Disturbance force in the world frame
    pub world_force: Vector3<f64>,
}

impl PlantInput {
    pub fn zero() -> Self {
        Self {
            body_force: Vector3::zeros(),
            body_torque: Vector3::zeros(),
            world_force: Vector3::zeros(),
        }
    }

    /// Combines motor thrusts with a disturbance snapshot.
    pub fn from_parts(params: &QuadrotorParams, thrusts: &[f64], disturbance: &DisturbanceSnapshot) -> Self {
        let (body_force, motor_torque) = params.motor_wrench(thrusts);
        Self {
            body_force,
            body_torque: motor_torque + disturbance.body_torque,
            world_force: disturbance.world_force,
        }
    }
}

/// Rigid-body state in structured form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl RigidBodyState {
    /// At rest, level, at `position`.
    pub fn at_rest(position: Vector3<f64>) -> Self {
        Self {
            position,
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }

    pub fn to_vector(&self) -> StateVector {
        let q = self.orientation.quaternion();
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<3>(0).copy_from(&self.position);
        x.fixed_rows_mut::<3>(3).copy_from(&self.velocity);
        x[6] = q.w;
        x[7] = q.i;
        x[8] = q.j;
        x[9] = q.k;
        x.fixed_rows_mut::<3>(10).copy_from(&self.angular_velocity);
        x
    }

    /// Unpacks a state vector, renormalising the quaternion.
    pub fn from_vector(x: &StateVector) -> Self {
        Self {
            position: x.fixed_rows::<3>(0).into_owned(),
            velocity: x.fixed_rows::<3>(3).into_owned(),
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(x[6], x[7], x[8], x[9])),
            angular_velocity: x.fixed_rows::<3>(10).into_owned(),
        }
    }

    /// Angle between body z and world z.
    pub fn tilt_radians(&self) -> f64 {
        let q = self.orientation.quaternion();
        (1.0 - 2.0 * (q.i * q.i + q.j * q.j)).clamp(-1.0, 1.0).acos()
    }
}

fn orientation_of(x: &StateVector) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(x[6], x[7], x[8], x[9]))
}

/// Continuous-time dynamics `ẋ = f(x, u)`.
pub fn derivative(x: &StateVector, input: &PlantInput, params: &QuadrotorParams) -> StateVector {
    let velocity = x.fixed_rows::<3>(3).into_owned();
    let omega = x.fixed_rows::<3>(10).into_owned();
    let q = Quaternion::new(x[6], x[7], x[8], x[9]);

    let acceleration = linear_acceleration(&orientation_of(x), input, params);

    let q_dot = (q * Quaternion::new(0.0, omega.x, omega.y, omega.z)) * 0.5;

    let inertia = params.inertia;
    let angular_momentum = inertia.component_mul(&omega);
    let net_torque = input.body_torque - omega.cross(&angular_momentum);
    let omega_dot = net_torque.component_div(&inertia);

    let mut dx = StateVector::zeros();
    dx.fixed_rows_mut::<3>(0).copy_from(&velocity);
    dx.fixed_rows_mut::<3>(3).copy_from(&acceleration);
    dx[6] = q_dot.w;
    dx[7] = q_dot.i;
    dx[8] = q_dot.j;
    dx[9] = q_dot.k;
    dx.fixed_rows_mut::<3>(10).copy_from(&omega_dot);
    dx
}

fn linear_acceleration(
    orientation: &UnitQuaternion<f64>,
    input: &PlantInput,
    params: &QuadrotorParams,
) -> Vector3<f64> {
    let total_force = orientation * input.body_force + input.world_force;
    total_force / params.mass + Vector3::new(0.0, 0.0, -params.gravity)
}

/// What an ideal body-mounted accelerometer reads: non-gravitational
/// acceleration expressed in the body frame.
///
/// Derived from the same acceleration the integrator uses, so at hover it
/// reads `(0, 0, g)`.
pub fn specific_force(state: &RigidBodyState, input: &PlantInput, params: &QuadrotorParams) -> Vector3<f64> {
    let acceleration = linear_acceleration(&state.orientation, input, params);
    let gravity = Vector3::new(0.0, 0.0, -params.gravity);
    state.orientation.inverse() * (acceleration - gravity)
}

/// One classical Runge-Kutta step with the input held constant.
pub fn rk4_step(x: &StateVector, input: &PlantInput, params: &QuadrotorParams, dt: f64) -> StateVector {
    let k1 = derivative(x, input, params);
    let k2 = derivative(&(x + k1 * (dt / 2.0)), input, params);
    let k3 = derivative(&(x + k2 * (dt / 2.0)), input, params);
    let k4 = derivative(&(x + k3 * dt), input, params);
    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// RK4-integrated rigid-body plant engine.
#[derive(Debug, Clone)]
pub struct RigidBodyPlant {
    params: QuadrotorParams,
    dt: TimeStep,
    state: RigidBodyState,
    specific_force: Vector3<f64>,
}

impl RigidBodyPlant {
    pub fn new(
        params: QuadrotorParams,
        dt: TimeStep,
        initial: RigidBodyState,
    ) -> Result<Self, ValidationError> {
        params.validate()?;
        for value in initial.to_vector().iter() {
            ValidationError::finite("initial_state", *value)?;
        }
        // Before the first step the vehicle is assumed held at hover.
        let gravity_reaction = initial.orientation.inverse() * Vector3::new(0.0, 0.0, params.gravity);
        Ok(Self {
            params,
            dt,
            state: initial,
            specific_force: gravity_reaction,
        })
    }

    pub fn params(&self) -> &QuadrotorParams {
        &self.params
    }

    pub fn state(&self) -> &RigidBodyState {
        &self.state
    }
}

impl PlantEngine for RigidBodyPlant {
    fn integrate(
        &mut self,
        _time: &WorldTime,
        actuators: &ActuatorTelemetrySnapshot,
        disturbance: &DisturbanceSnapshot,
    ) -> SubsystemResult<()> {
        let expected = self.params.motor_count();
        if actuators.applied.len() != expected {
            return Err(SubsystemError::LengthMismatch {
                subsystem: "plant",
                expected,
                actual: actuators.applied.len(),
            });
        }
        SubsystemError::check_finite("plant", "motor thrust", &actuators.applied)?;

        let input = PlantInput::from_parts(&self.params, &actuators.applied, disturbance);
        SubsystemError::check_finite("plant", "body torque", input.body_torque.as_slice())?;
        SubsystemError::check_finite("plant", "world force", input.world_force.as_slice())?;

        let next = rk4_step(&self.state.to_vector(), &input, &self.params, self.dt.seconds());
        SubsystemError::check_finite("plant", "state", next.as_slice())?;
        let quaternion_norm = (next[6] * next[6] + next[7] * next[7] + next[8] * next[8] + next[9] * next[9]).sqrt();
        if quaternion_norm < f64::EPSILON {
            return Err(SubsystemError::NonFiniteState {
                subsystem: "plant",
                field: "orientation",
            });
        }

        let state = RigidBodyState::from_vector(&next);
        let specific = specific_force(&state, &input, &self.params);
        SubsystemError::check_finite("plant", "specific force", specific.as_slice())?;

        self.state = state;
        self.specific_force = specific;
        Ok(())
    }

    fn snapshot(&self) -> PlantStateSnapshot {
        PlantStateSnapshot {
            position: self.state.position,
            velocity: self.state.velocity,
            orientation: self.state.orientation,
            angular_velocity: self.state.angular_velocity,
            specific_force: self.specific_force,
        }
    }

    fn safety_trace(&self) -> SafetyTrace {
        SafetyTrace {
            omega_magnitude: self.state.angular_velocity.norm(),
            tilt_radians: self.state.tilt_radians(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn telemetry(thrust: f64, n: usize) -> ActuatorTelemetrySnapshot {
        ActuatorTelemetrySnapshot {
            commanded: vec![thrust; n],
            applied: vec![thrust; n],
            max_output: vec![10.0; n],
        }
    }

    #[test]
    fn test_hover_derivative_is_zero() {
        let params = QuadrotorParams::default();
        let hover = params.hover_thrust_per_motor();
        let state = RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 5.0));
        let input = PlantInput::from_parts(&params, &[hover; 4], &DisturbanceSnapshot::default());

        let dx = derivative(&state.to_vector(), &input, &params);
        for i in 3..6 {
            assert_abs_diff_eq!(dx[i], 0.0, epsilon = 1e-9);
        }
        for i in 10..13 {
            assert_abs_diff_eq!(dx[i], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_hover_holds_for_any_dt() {
        for dt in [1e-4, 1e-3, 5e-3, 2e-2] {
            let params = QuadrotorParams::default();
            let hover = params.hover_thrust_per_motor();
            let start = RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 5.0));
            let mut plant = RigidBodyPlant::new(params, TimeStep::new(dt).unwrap(), start).unwrap();

            let mut time = WorldTime::zero();
            for _ in 0..100 {
                time = time.advanced(TimeStep::new(dt).unwrap());
                plant
                    .integrate(&time, &telemetry(hover, 4), &DisturbanceSnapshot::default())
                    .unwrap();
            }
            let s = plant.snapshot();
            assert_abs_diff_eq!(s.velocity.norm(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(s.angular_velocity.norm(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(s.specific_force.z, 9.81, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_free_fall_matches_closed_form() {
        let params = QuadrotorParams::default();
        let dt = TimeStep::new(0.01).unwrap();
        let mut plant =
            RigidBodyPlant::new(params, dt, RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 100.0))).unwrap();

        let mut time = WorldTime::zero();
        for _ in 0..100 {
            time = time.advanced(dt);
            plant
                .integrate(&time, &telemetry(0.0, 4), &DisturbanceSnapshot::default())
                .unwrap();
        }
        let s = plant.snapshot();
        assert_abs_diff_eq!(s.position.z, 100.0 - 0.5 * 9.81, epsilon = 1e-9);
        assert_abs_diff_eq!(s.velocity.z, -9.81, epsilon = 1e-9);
        // Free fall: accelerometer reads zero.
        assert_abs_diff_eq!(s.specific_force.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_torque_spins_up_at_tau_over_inertia() {
        let params = QuadrotorParams::default();
        let dt = TimeStep::new(0.001).unwrap();
        let hover = params.hover_thrust_per_motor();
        let mut plant =
            RigidBodyPlant::new(params, dt, RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 10.0))).unwrap();
        let disturbance = DisturbanceSnapshot {
            body_torque: Vector3::new(0.0, 0.0, 0.01),
            ..DisturbanceSnapshot::default()
        };

        let time = WorldTime::zero().advanced(dt);
        plant.integrate(&time, &telemetry(hover, 4), &disturbance).unwrap();
        // ω̇_z = 0.01 / 0.02 = 0.5 rad/s²
        assert_abs_diff_eq!(plant.snapshot().angular_velocity.z, 0.5e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_stays_unit() {
        let params = QuadrotorParams::default();
        let dt = TimeStep::new(0.002).unwrap();
        let mut start = RigidBodyState::at_rest(Vector3::new(0.0, 0.0, 10.0));
        start.angular_velocity = Vector3::new(3.0, -2.0, 1.0);
        let mut plant = RigidBodyPlant::new(params, dt, start).unwrap();

        let mut time = WorldTime::zero();
        for _ in 0..2000 {
            time = time.advanced(dt);
            plant
                .integrate(&time, &telemetry(2.0, 4), &DisturbanceSnapshot::default())
                .unwrap();
        }
        let norm = plant.snapshot().orientation.quaternion().norm();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_roll_torque_from_differential_thrust() {
        let params = QuadrotorParams::default();
        // Motors 1 and 2 sit at +y: more thrust there rolls positive about x.
        let (_, torque) = params.motor_wrench(&[1.0, 2.0, 2.0, 1.0]);
        assert!(torque.x > 0.0);
        assert_abs_diff_eq!(torque.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_thrust_is_fatal() {
        let params = QuadrotorParams::default();
        let dt = TimeStep::new(0.001).unwrap();
        let mut plant = RigidBodyPlant::new(params, dt, RigidBodyState::at_rest(Vector3::zeros())).unwrap();
        let result = plant.integrate(
            &WorldTime::zero().advanced(dt),
            &telemetry(f64::NAN, 4),
            &DisturbanceSnapshot::default(),
        );
        assert!(matches!(result, Err(SubsystemError::NonFiniteState { .. })));
    }

    #[test]
    fn test_thrust_length_mismatch() {
        let params = QuadrotorParams::default();
        let dt = TimeStep::new(0.001).unwrap();
        let mut plant = RigidBodyPlant::new(params, dt, RigidBodyState::at_rest(Vector3::zeros())).unwrap();
        let result = plant.integrate(
            &WorldTime::zero().advanced(dt),
            &telemetry(1.0, 3),
            &DisturbanceSnapshot::default(),
        );
        assert_eq!(
            result,
            Err(SubsystemError::LengthMismatch {
                subsystem: "plant",
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_params_validation() {
        assert!(QuadrotorParams::new(0.0, Vector3::new(1.0, 1.0, 1.0), 9.81, 0.0, vec![]).is_err());
        assert!(QuadrotorParams::default().validate().is_ok());
    }
}
