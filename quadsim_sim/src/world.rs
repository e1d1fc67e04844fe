//! WorldSimulator - the fixed-period step loop.
//!
//! One step, in this order and never reordered:
//!
//! ```text
//! advance time
//!   → disturbance.update
//!   → actuator.update          (if due)
//!   → plant.integrate
//!   → sensor.sample            (if due)
//!   → control.update           (if due)
//!   → nerve.update             (if due and drives are pending)
//!   → actuator.apply           (if the step produced values)
//!   → append WorldStepLog
//! ```
//!
//! Off-period subsystems are not called; their last outputs persist.

use crate::config::SimulatorConfig;
use crate::error::SimError;
use crate::log::{FailureEvent, SimulationLog, StepEvent, WorldStepLog};
use crate::safety::FailurePolicy;

use quadsim_env::{
    ActuatorEngine, ActuatorValue, ChannelSample, ControlTransform, CutOutput, DisturbanceField,
    MotorNerve, PlantEngine, RunControl, SensorField, SubsystemError, ValidationError, WorldTime,
};
use tracing::{debug, info, warn};

/// One instance of each subsystem role, fixed for a run.
#[derive(Debug, Clone)]
pub struct Subsystems<D, A, P, S, C, N> {
    pub disturbance: D,
    pub actuator: A,
    pub plant: P,
    pub sensor: S,
    pub control: C,
    pub nerve: N,
}

/// Drive intents and reflex corrections waiting for the nerve stage.
#[derive(Debug, Clone, PartialEq)]
struct PendingDrives {
    intents: Vec<f64>,
    corrections: Vec<f64>,
}

/// The step loop for one scenario run.
pub struct WorldSimulator<D, A, P, S, C, N> {
    config: SimulatorConfig,
    config_hash: String,
    subsystems: Subsystems<D, A, P, S, C, N>,
    time: WorldTime,
    pending_samples: Vec<ChannelSample>,
    drives: Option<PendingDrives>,
    steps: Vec<WorldStepLog>,
    failure: Option<FailureEvent>,
    steps_per_second: u64,
}

impl<D, A, P, S, C, N> WorldSimulator<D, A, P, S, C, N>
where
    D: DisturbanceField,
    A: ActuatorEngine,
    P: PlantEngine,
    S: SensorField,
    C: ControlTransform,
    N: MotorNerve,
{
    /// Creates a simulator at time zero.
    pub fn new(
        config: SimulatorConfig,
        subsystems: Subsystems<D, A, P, S, C, N>,
        config_hash: String,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let steps_per_second = ((1.0 / config.timestep.seconds()).round() as u64).max(1);
        let capacity = usize::try_from(config.total_steps()).unwrap_or(0);
        Ok(Self {
            config,
            config_hash,
            subsystems,
            time: WorldTime::zero(),
            pending_samples: Vec::new(),
            drives: None,
            steps: Vec::with_capacity(capacity),
            failure: None,
            steps_per_second,
        })
    }

    pub fn time(&self) -> WorldTime {
        self.time
    }

    pub fn steps(&self) -> &[WorldStepLog] {
        &self.steps
    }

    pub fn subsystems(&self) -> &Subsystems<D, A, P, S, C, N> {
        &self.subsystems
    }

    /// Advances world time by one timestep and records the step.
    pub fn step(&mut self) -> Result<&WorldStepLog, SimError> {
        let time = self.time.advanced(self.config.timestep);
        self.time = time;
        let schedule = self.config.schedule;
        let at = |stage: StepEvent| {
            move |source: SubsystemError| SimError::Subsystem {
                step: time.step_index,
                stage,
                source,
            }
        };

        let mut events = vec![StepEvent::TimeAdvance];
        let sub = &mut self.subsystems;

        sub.disturbance
            .update(&time)
            .map_err(at(StepEvent::DisturbanceUpdate))?;
        events.push(StepEvent::DisturbanceUpdate);
        let disturbance = sub.disturbance.snapshot();

        if time.is_due(schedule.actuator_period) {
            sub.actuator.update(&time).map_err(at(StepEvent::ActuatorUpdate))?;
            events.push(StepEvent::ActuatorUpdate);
        }

        sub.plant
            .integrate(&time, &sub.actuator.telemetry(), &disturbance)
            .map_err(at(StepEvent::PlantIntegrate))?;
        events.push(StepEvent::PlantIntegrate);
        let plant = sub.plant.snapshot();

        let mut sensor_samples = Vec::new();
        if time.is_due(schedule.sensor_period) {
            sensor_samples = sub.sensor.sample(&time, &plant).map_err(at(StepEvent::SensorSample))?;
            self.pending_samples.extend_from_slice(&sensor_samples);
            events.push(StepEvent::SensorSample);
        }

        let mut to_apply: Option<Vec<ActuatorValue>> = None;
        let mut control_output = None;
        if time.is_due(schedule.control_period) {
            let output = sub
                .control
                .update(&self.pending_samples, &time)
                .map_err(at(StepEvent::ControlUpdate))?;
            self.pending_samples.clear();
            events.push(StepEvent::ControlUpdate);
            match &output {
                CutOutput::Actuators { values } => to_apply = Some(values.clone()),
                CutOutput::Drives { intents, corrections } => {
                    self.drives = Some(PendingDrives {
                        intents: intents.clone(),
                        corrections: corrections.clone(),
                    });
                }
            }
            control_output = Some(output);
        }

        if time.is_due(schedule.nerve_period) {
            if let Some(drives) = &self.drives {
                let values = sub
                    .nerve
                    .update(&drives.intents, &drives.corrections, &sub.actuator.telemetry(), &time)
                    .map_err(at(StepEvent::MotorNerveUpdate))?;
                events.push(StepEvent::MotorNerveUpdate);
                to_apply = Some(values);
            }
        }

        let applied_values = match to_apply {
            Some(values) => {
                sub.actuator.apply(&values, &time).map_err(at(StepEvent::ActuatorApply))?;
                events.push(StepEvent::ActuatorApply);
                values
            }
            None => Vec::new(),
        };

        events.push(StepEvent::Logging);
        let record = WorldStepLog {
            time,
            events,
            sensor_samples,
            control_output,
            applied_values,
            actuators: sub.actuator.telemetry(),
            safety: sub.plant.safety_trace(),
            plant,
            disturbance,
        };

        if time.step_index % self.steps_per_second == 0 {
            debug!(
                "  t={:.1}s | z={:.3} | |ω|={:.4} | tilt={:.2}°",
                time.time,
                record.plant.position.z,
                record.safety.omega_magnitude,
                record.safety.tilt_radians.to_degrees()
            );
        }

        self.steps.push(record);
        let index = self.steps.len() - 1;
        Ok(&self.steps[index])
    }

    /// Runs `floor(duration / timestep)` steps, or fewer if `policy` reports
    /// a terminal failure. A stop request on `control` ends the run with
    /// [`SimError::Cancelled`].
    pub fn run(
        mut self,
        control: Option<&RunControl>,
        policy: &mut impl FailurePolicy,
    ) -> Result<SimulationLog, SimError> {
        let total = self.config.total_steps();
        info!(
            "Starting run: {} (seed={}, steps={}, dt={})",
            self.config.scenario_id,
            self.config.seed,
            total,
            self.config.timestep.seconds()
        );

        for _ in 0..total {
            if let Some(control) = control {
                if control.checkpoint().is_err() {
                    let step = self.time.step_index + 1;
                    warn!("Run {} cancelled before step {}", self.config.scenario_id, step);
                    return Err(SimError::Cancelled { step });
                }
            }

            let record = self.step()?;
            if let Some(failure) = policy.check(record) {
                warn!(
                    "Run {} terminated: {} at t={:.3}s",
                    self.config.scenario_id, failure.reason, failure.time
                );
                self.failure = Some(failure);
                break;
            }
        }

        info!(
            "Finished run: {} ({} steps, t={:.3}s)",
            self.config.scenario_id,
            self.steps.len(),
            self.time.time
        );
        Ok(self.into_log())
    }

    /// Consumes the simulator and returns what it recorded so far.
    pub fn into_log(self) -> SimulationLog {
        SimulationLog {
            scenario_id: self.config.scenario_id,
            seed: self.config.seed,
            timestep: self.config.timestep,
            determinism: self.config.determinism,
            config_hash: self.config_hash,
            steps: self.steps,
            failure: self.failure,
        }
    }
}
