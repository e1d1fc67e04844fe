//! quadsim environment layer
//!
//! Shared vocabulary between the deterministic simulator and the engines it
//! drives: the subsystem capability traits, the snapshot types that flow
//! between them each step, the error taxonomy, and run control.
//!
//! # Subsystem roles
//!
//! ```text
//!  DisturbanceField ─┐
//!                    ▼
//!  ActuatorEngine ─► PlantEngine ─► SensorField ─► ControlTransform
//!        ▲                                              │
//!        └──────────── MotorNerve / DriveAllocator ◄────┘
//! ```
//!
//! The simulator is generic over concrete implementations of these traits,
//! fixed when a scenario run is constructed.

mod control;
mod error;
mod subsystems;
mod types;

pub use control::{RunControl, SingleFlight, SingleFlightPermit, StopRequested};
pub use error::{BusyError, SubsystemError, ValidationError};
pub use subsystems::{
    ActuatorEngine, ControlTransform, DisturbanceField, DriveAllocator, MotorNerve, NoNerve,
    PlantEngine, SensorField, SubsystemResult,
};
pub use types::{
    ActuatorCommand, ActuatorTelemetrySnapshot, ActuatorValue, ChannelIndex, ChannelSample,
    CutOutput, DisturbanceSnapshot, PlantStateSnapshot, SafetyTrace, ScenarioId, SensorChannel,
    TimeStep, WorldTime,
};
