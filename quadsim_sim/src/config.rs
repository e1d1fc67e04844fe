//! Run configuration: subsystem schedule and determinism contract.

use crate::replay::Tier1Tolerance;
use quadsim_env::{ScenarioId, TimeStep, ValidationError};
use serde::{Deserialize, Serialize};

/// How often each scheduled subsystem runs, in base physics steps.
///
/// A subsystem with period `p` runs on steps where `step_index % p == 0`.
/// Disturbance and plant run every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsystemSchedule {
    pub sensor_period: u32,
    pub actuator_period: u32,
    pub control_period: u32,
    pub nerve_period: u32,
}

impl SubsystemSchedule {
    pub fn new(
        sensor_period: u32,
        actuator_period: u32,
        control_period: u32,
        nerve_period: u32,
    ) -> Result<Self, ValidationError> {
        let schedule = Self {
            sensor_period,
            actuator_period,
            control_period,
            nerve_period,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let periods = [
            ("sensor_period", self.sensor_period),
            ("actuator_period", self.actuator_period),
            ("control_period", self.control_period),
            ("nerve_period", self.nerve_period),
        ];
        for (field, period) in periods {
            if period == 0 {
                return Err(ValidationError::NonPositive { field, value: 0.0 });
            }
        }
        Ok(())
    }

    /// Sets the control period and keeps the nerve in step with it.
    pub fn with_control_period(mut self, period: u32) -> Self {
        self.control_period = period;
        self.nerve_period = period;
        self
    }

    pub fn with_sensor_period(mut self, period: u32) -> Self {
        self.sensor_period = period;
        self
    }

    pub fn with_actuator_period(mut self, period: u32) -> Self {
        self.actuator_period = period;
        self
    }
}

impl Default for SubsystemSchedule {
    /// Sensors and actuators every step, control and nerve every second step.
    fn default() -> Self {
        Self {
            sensor_period: 1,
            actuator_period: 1,
            control_period: 2,
            nerve_period: 2,
        }
    }
}

/// Declared strictness of cross-run replay equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismTier {
    /// Bitwise equal logs
    #[default]
    Tier0,
    /// Residuals within a tolerance bundle
    Tier1,
    /// Statistical equivalence (not supported)
    Tier2,
}

impl DeterminismTier {
    pub fn name(&self) -> &'static str {
        match self {
            DeterminismTier::Tier0 => "tier0",
            DeterminismTier::Tier1 => "tier1",
            DeterminismTier::Tier2 => "tier2",
        }
    }
}

impl std::fmt::Display for DeterminismTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DeterminismTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tier0" | "0" | "bitwise" => Ok(DeterminismTier::Tier0),
            "tier1" | "1" | "tolerance" => Ok(DeterminismTier::Tier1),
            "tier2" | "2" | "statistical" => Ok(DeterminismTier::Tier2),
            _ => Err(format!("Unknown determinism tier: {}", s)),
        }
    }
}

/// Determinism contract a run is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeterminismConfig {
    pub tier: DeterminismTier,

    /// Required for tier1 replay checks
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tier1_tolerance: Option<Tier1Tolerance>,
}

impl DeterminismConfig {
    pub fn tier0() -> Self {
        Self::default()
    }

    /// tier1 with the baseline tolerance bundle.
    pub fn tier1() -> Self {
        Self {
            tier: DeterminismTier::Tier1,
            tier1_tolerance: Some(Tier1Tolerance::baseline()),
        }
    }

    pub fn with_tier(mut self, tier: DeterminismTier) -> Self {
        self.tier = tier;
        if tier == DeterminismTier::Tier1 && self.tier1_tolerance.is_none() {
            self.tier1_tolerance = Some(Tier1Tolerance::baseline());
        }
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tier1Tolerance) -> Self {
        self.tier1_tolerance = Some(tolerance);
        self
    }
}

/// Everything the step loop needs besides the subsystems themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub scenario_id: ScenarioId,
    pub seed: u64,
    pub timestep: TimeStep,

    /// Simulated duration (s); the run takes `floor(duration / timestep)` steps
    pub duration: f64,

    pub schedule: SubsystemSchedule,
    pub determinism: DeterminismConfig,
}

impl SimulatorConfig {
    pub fn new(scenario_id: ScenarioId, seed: u64, timestep: TimeStep, duration: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            scenario_id,
            seed,
            timestep,
            duration: ValidationError::positive("duration", duration)?,
            schedule: SubsystemSchedule::default(),
            determinism: DeterminismConfig::default(),
        })
    }

    pub fn with_schedule(mut self, schedule: SubsystemSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_determinism(mut self, determinism: DeterminismConfig) -> Self {
        self.determinism = determinism;
        self
    }

    /// Number of steps a full run records.
    pub fn total_steps(&self) -> u64 {
        self.timestep.steps_in(self.duration)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("duration", self.duration)?;
        self.schedule.validate()?;
        if let Some(tolerance) = &self.determinism.tier1_tolerance {
            tolerance.validate()?;
        }
        Ok(())
    }
}
