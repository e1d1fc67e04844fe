//! quadsim core - the engines driven by the deterministic step loop
//!
//! 1. **Plant**: 13-state rigid body integrated with RK4, plus the matching
//!    specific-force model for the accelerometer
//! 2. **Actuators and sensors**: first-order motor bank and IMU, each wrapped
//!    by time-windowed fault decorators
//! 3. **Control**: reference PD attitude controller and the allocation mixer
//!    used as motor nerve
//!
//! All randomness flows from [`rng::SplitMix64`] streams derived from the
//! scenario seed.

pub mod actuator;
pub mod controller;
pub mod disturbance;
pub mod faults;
pub mod mixer;
pub mod noise;
pub mod plant;
pub mod rng;
pub mod sensor;

// Re-export key types for convenience
pub use actuator::{ActuatorConfig, DegradedActuator, FaultedActuator, FirstOrderActuator, SwapActuator};
pub use controller::{ControllerGains, ControllerMode, PdAttitudeController};
pub use disturbance::TorqueDisturbanceField;
pub use faults::{
    ActuatorDegradationEvent, ActuatorSwapEvent, HfStressEvent, HfStressKind, SensorSwapEvent, TimeWindow,
    TorqueDisturbanceEvent,
};
pub use mixer::{AllocationMixer, AllocatorNerve};
pub use noise::{AxisNoise, AxisNoiseConfig, DelayBuffer};
pub use plant::{QuadrotorParams, RigidBodyPlant, RigidBodyState};
pub use sensor::{FaultedSensor, ImuConfig, ImuSensorField, SwapSensorField};
