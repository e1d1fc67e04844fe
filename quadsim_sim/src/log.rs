//! Append-only simulation log.

use crate::config::DeterminismConfig;
use quadsim_env::{
    ActuatorTelemetrySnapshot, ActuatorValue, ChannelSample, CutOutput, DisturbanceSnapshot,
    PlantStateSnapshot, SafetyTrace, ScenarioId, TimeStep, WorldTime,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Stage executed within a step, recorded in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepEvent {
    TimeAdvance,
    DisturbanceUpdate,
    ActuatorUpdate,
    PlantIntegrate,
    SensorSample,
    ControlUpdate,
    MotorNerveUpdate,
    ActuatorApply,
    Logging,
}

impl StepEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            StepEvent::TimeAdvance => "time-advance",
            StepEvent::DisturbanceUpdate => "disturbance-update",
            StepEvent::ActuatorUpdate => "actuator-update",
            StepEvent::PlantIntegrate => "plant-integrate",
            StepEvent::SensorSample => "sensor-sample",
            StepEvent::ControlUpdate => "control-update",
            StepEvent::MotorNerveUpdate => "motor-nerve-update",
            StepEvent::ActuatorApply => "actuator-apply",
            StepEvent::Logging => "logging",
        }
    }
}

impl std::fmt::Display for StepEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Snapshot of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStepLog {
    pub time: WorldTime,

    /// Stages executed this step, in order
    pub events: Vec<StepEvent>,

    /// Samples emitted by the sensor field this step
    pub sensor_samples: Vec<ChannelSample>,

    /// Control output if the controller ran this step
    #[serde(default)]
    pub control_output: Option<CutOutput>,

    /// Values applied to the actuator engine this step
    pub applied_values: Vec<ActuatorValue>,

    pub actuators: ActuatorTelemetrySnapshot,
    pub safety: SafetyTrace,
    pub plant: PlantStateSnapshot,
    pub disturbance: DisturbanceSnapshot,
}

impl WorldStepLog {
    pub fn has_event(&self, event: StepEvent) -> bool {
        self.events.contains(&event)
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    SimulationIntegrity,
    SafetyEnvelope,
    GroundViolation,
    SustainedFall,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::SimulationIntegrity => "simulation-integrity",
            FailureReason::SafetyEnvelope => "safety-envelope",
            FailureReason::GroundViolation => "ground-violation",
            FailureReason::SustainedFall => "sustained-fall",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Terminal failure recorded in a log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub reason: FailureReason,
    pub time: f64,
    pub step_index: u64,
}

/// Full record of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationLog {
    pub scenario_id: ScenarioId,
    pub seed: u64,
    pub timestep: TimeStep,
    pub determinism: DeterminismConfig,

    /// SHA-256 (hex) of the run configuration
    pub config_hash: String,

    pub steps: Vec<WorldStepLog>,

    #[serde(default)]
    pub failure: Option<FailureEvent>,
}

impl SimulationLog {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure.map(|f| f.reason)
    }

    pub fn failure_time(&self) -> Option<f64> {
        self.failure.map(|f| f.time)
    }

    pub fn last_step(&self) -> Option<&WorldStepLog> {
        self.steps.last()
    }

    /// Simulated time covered by the log.
    pub fn final_time(&self) -> f64 {
        self.last_step().map_or(0.0, |s| s.time.time)
    }
}

/// Lowercase hex SHA-256 of the canonical JSON encoding of `value`.
pub fn config_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&canonical);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags_match_serde() {
        for event in [StepEvent::TimeAdvance, StepEvent::MotorNerveUpdate, StepEvent::Logging] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.tag()));
        }
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(FailureReason::SustainedFall.code(), "sustained-fall");
        let json = serde_json::to_string(&FailureReason::GroundViolation).unwrap();
        assert_eq!(json, "\"ground-violation\"");
    }

    #[test]
    fn test_config_hash_is_stable_hex() {
        let a = config_hash(&("hover", 42u64, 0.001f64)).unwrap();
        let b = config_hash(&("hover", 42u64, 0.001f64)).unwrap();
        let c = config_hash(&("hover", 43u64, 0.001f64)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }
}
