//! Capability traits implemented by the simulation subsystems.

use crate::error::SubsystemError;
use crate::types::{
    ActuatorCommand, ActuatorTelemetrySnapshot, ActuatorValue, ChannelSample, CutOutput,
    DisturbanceSnapshot, PlantStateSnapshot, SafetyTrace, WorldTime,
};

/// Result alias for subsystem calls.
pub type SubsystemResult<T> = Result<T, SubsystemError>;

/// Source of external forces and torques.
pub trait DisturbanceField {
    /// Recomputes the active disturbance for `time`.
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()>;

    /// Returns the disturbance computed by the last `update`.
    fn snapshot(&self) -> DisturbanceSnapshot;
}

/// Motor bank turning commands into applied thrust.
///
/// `update` advances the actuator dynamics by one actuator period;
/// `apply` replaces the commanded set.
pub trait ActuatorEngine {
    /// Advances applied thrust toward the current command.
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()>;

    /// Sets new commanded values. Rejects bad indices and short/long sets.
    fn apply(&mut self, values: &[ActuatorValue], time: &WorldTime) -> SubsystemResult<()>;

    /// Current commanded/applied/max state.
    fn telemetry(&self) -> ActuatorTelemetrySnapshot;
}

/// Rigid-body dynamics.
pub trait PlantEngine {
    /// Integrates one physics step using the given actuator and disturbance
    /// state. A non-finite result is an error, never clamped.
    fn integrate(
        &mut self,
        time: &WorldTime,
        actuators: &ActuatorTelemetrySnapshot,
        disturbance: &DisturbanceSnapshot,
    ) -> SubsystemResult<()>;

    fn snapshot(&self) -> PlantStateSnapshot;

    fn safety_trace(&self) -> SafetyTrace;
}

/// Sensor suite sampling the plant.
pub trait SensorField {
    /// Samples the plant. May return an empty set (buffer filling, dropout).
    fn sample(
        &mut self,
        time: &WorldTime,
        plant: &PlantStateSnapshot,
    ) -> SubsystemResult<Vec<ChannelSample>>;
}

/// Control law ("Cut") consuming samples and producing actuation.
pub trait ControlTransform {
    fn update(&mut self, samples: &[ChannelSample], time: &WorldTime) -> SubsystemResult<CutOutput>;
}

/// Optional stage mapping drive intents plus reflex corrections onto
/// physical actuator channels.
pub trait MotorNerve {
    fn update(
        &mut self,
        intents: &[f64],
        corrections: &[f64],
        telemetry: &ActuatorTelemetrySnapshot,
        time: &WorldTime,
    ) -> SubsystemResult<Vec<ActuatorValue>>;
}

/// External drive-allocation layer ("DAL"), e.g. a learned allocator.
///
/// Lives outside the deterministic core; plugged in through an adapter
/// that implements [`MotorNerve`].
pub trait DriveAllocator {
    fn update(
        &mut self,
        drives: &[f64],
        corrections: &[f64],
        telemetry: &ActuatorTelemetrySnapshot,
        time: &WorldTime,
    ) -> SubsystemResult<Vec<ActuatorCommand>>;
}

/// Placeholder nerve for configurations whose controller emits actuator
/// values directly. Any drive output routed to it is a contract violation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNerve;

impl MotorNerve for NoNerve {
    fn update(
        &mut self,
        _intents: &[f64],
        _corrections: &[f64],
        _telemetry: &ActuatorTelemetrySnapshot,
        _time: &WorldTime,
    ) -> SubsystemResult<Vec<ActuatorValue>> {
        Err(SubsystemError::contract(
            "controller produced drive intents but no motor nerve is configured",
        ))
    }
}
