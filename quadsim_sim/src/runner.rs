//! Builds and runs the world for one scenario definition.

use crate::config::{DeterminismConfig, SimulatorConfig, SubsystemSchedule};
use crate::error::SimError;
use crate::log::{config_hash, SimulationLog};
use crate::safety::SafetyFailurePolicy;
use crate::scenarios::ScenarioDefinition;
use crate::world::{Subsystems, WorldSimulator};

use quadsim_core::{
    AllocationMixer, DegradedActuator, FaultedActuator, FaultedSensor, FirstOrderActuator, ImuSensorField,
    PdAttitudeController, RigidBodyPlant, SwapActuator, SwapSensorField, TorqueDisturbanceField,
};
use quadsim_env::{ControlTransform, RunControl, SingleFlight, TimeStep, ValidationError};
use serde::Serialize;
use tracing::debug;

/// World type used for scenario runs with a given control law.
pub type ScenarioWorld<C> =
    WorldSimulator<TorqueDisturbanceField, FaultedActuator, RigidBodyPlant, FaultedSensor, C, AllocationMixer>;

/// What the config hash covers.
#[derive(Serialize)]
struct HashedRunConfig<'a> {
    scenario: &'a ScenarioDefinition,
    schedule: &'a SubsystemSchedule,
    determinism: &'a DeterminismConfig,
}

/// Runs scenarios with a fixed schedule and determinism contract.
///
/// Every run builds fresh engines from the definition, so runs never share
/// state.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    schedule: SubsystemSchedule,
    determinism: DeterminismConfig,
    control: Option<RunControl>,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(mut self, schedule: SubsystemSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_determinism(mut self, determinism: DeterminismConfig) -> Self {
        self.determinism = determinism;
        self
    }

    /// Shares a pause/stop token with every run.
    pub fn with_run_control(mut self, control: RunControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn schedule(&self) -> &SubsystemSchedule {
        &self.schedule
    }

    pub fn determinism(&self) -> &DeterminismConfig {
        &self.determinism
    }

    /// Runs `definition` with the built-in PD attitude controller.
    pub fn run(&self, definition: &ScenarioDefinition) -> Result<SimulationLog, SimError> {
        let controller = self.default_controller(definition)?;
        self.run_with_control(definition, controller)
    }

    /// Runs `definition` with a caller-supplied control law.
    pub fn run_with_control<C: ControlTransform>(
        &self,
        definition: &ScenarioDefinition,
        controller: C,
    ) -> Result<SimulationLog, SimError> {
        let world = self.build_world(definition, controller)?;
        let mut policy = SafetyFailurePolicy::new(definition.envelope, definition.config.timestep);
        world.run(self.control.as_ref(), &mut policy)
    }

    /// Runs `definition` with a controller built from a shared model.
    ///
    /// The model is held for the whole run; a concurrent caller gets
    /// [`SimError::Busy`] without waiting.
    pub fn run_with_model<M, C, F>(
        &self,
        definition: &ScenarioDefinition,
        model: &SingleFlight<M>,
        make_controller: F,
    ) -> Result<SimulationLog, SimError>
    where
        C: ControlTransform,
        F: FnOnce(&mut M, &ScenarioDefinition) -> Result<C, ValidationError>,
    {
        let mut permit = model.try_acquire()?;
        let controller = make_controller(&mut *permit, definition)?;
        self.run_with_control(definition, controller)
    }

    /// The PD controller configured by the definition's vehicle setup.
    pub fn default_controller(&self, definition: &ScenarioDefinition) -> Result<PdAttitudeController, ValidationError> {
        let vehicle = &definition.vehicle;
        let controller = PdAttitudeController::new(
            &vehicle.params,
            vehicle.gains,
            vehicle.controller_mode,
            definition.initial.orientation,
        )?;
        Ok(if vehicle.imu.altimeter.is_some() {
            controller.with_altitude_target(definition.altitude_target())
        } else {
            controller
        })
    }

    /// Builds the world without running it.
    pub fn build_world<C: ControlTransform>(
        &self,
        definition: &ScenarioDefinition,
        controller: C,
    ) -> Result<ScenarioWorld<C>, SimError> {
        definition.validate()?;
        self.schedule.validate()?;

        let config = &definition.config;
        let dt = config.timestep;
        let vehicle = &definition.vehicle;

        let actuator_period = TimeStep::new(dt.seconds() * f64::from(self.schedule.actuator_period))?;
        let sensor_period = TimeStep::new(dt.seconds() * f64::from(self.schedule.sensor_period))?;

        let motors = FirstOrderActuator::new(vehicle.actuator.clone(), actuator_period)?
            .with_initial_thrust(vehicle.params.hover_thrust_per_motor());
        let actuator = DegradedActuator::new(
            SwapActuator::new(motors, definition.actuator_swaps.clone(), definition.hf_stress.clone())?,
            definition.actuator_degradation,
        )?;

        let imu = ImuSensorField::new(&vehicle.imu, sensor_period, config.seed)?;
        let sensor = SwapSensorField::new(
            imu,
            config.seed,
            definition.sensor_swaps.clone(),
            definition.hf_stress.clone(),
        )?;

        let subsystems = Subsystems {
            disturbance: TorqueDisturbanceField::new(definition.torque_events.clone(), definition.hf_stress.clone())?,
            actuator,
            plant: RigidBodyPlant::new(vehicle.params.clone(), dt, definition.initial)?,
            sensor,
            control: controller,
            nerve: AllocationMixer::new(&vehicle.params)?,
        };

        let hash = config_hash(&HashedRunConfig {
            scenario: definition,
            schedule: &self.schedule,
            determinism: &self.determinism,
        })?;
        debug!("Built world for {} (config {})", config.id, &hash[..12]);

        let sim_config = SimulatorConfig::new(config.id.clone(), config.seed, dt, config.duration)?
            .with_schedule(self.schedule)
            .with_determinism(self.determinism);
        Ok(WorldSimulator::new(sim_config, subsystems, hash)?)
    }
}
