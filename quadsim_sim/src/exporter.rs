//! JSON export of runs for plotting and offline analysis.
//!
//! Everything here builds values or strings; writing them out is left to
//! the caller.

use crate::evaluator::ScenarioEvaluation;
use crate::log::SimulationLog;
use serde::{Deserialize, Serialize};

/// One down-sampled point of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Tilt from vertical (degrees)
    pub tilt_deg: f64,

    /// Body rate magnitude (rad/s)
    pub omega: f64,

    /// Applied thrust per motor (N)
    pub thrust: Vec<f64>,

    /// Disturbance labels active at this time
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<String>,
}

/// Down-sampled trajectory of one run plus its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryExport {
    /// Scenario id
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Simulated duration covered in seconds
    pub duration_sec: f64,

    pub frames: Vec<TrajectoryFrame>,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TrajectoryExport {
    /// Keeps every `stride`-th step and always the last one.
    pub fn from_log(log: &SimulationLog, evaluation: Option<&ScenarioEvaluation>, stride: usize) -> Self {
        let stride = stride.max(1);
        let last = log.len().saturating_sub(1);
        let frames = log
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| i % stride == 0 || *i == last)
            .map(|(_, step)| TrajectoryFrame {
                time_sec: step.time.time,
                x: step.plant.position.x,
                y: step.plant.position.y,
                z: step.plant.position.z,
                tilt_deg: step.safety.tilt_radians.to_degrees(),
                omega: step.safety.omega_magnitude,
                thrust: step.actuators.applied.clone(),
                events: step.disturbance.active_events.clone(),
            })
            .collect();

        Self {
            scenario: log.scenario_id.to_string(),
            seed: log.seed,
            duration_sec: log.final_time(),
            frames,
            passed: evaluation.map_or(log.failure.is_none(), |e| e.passed),
            failure_reason: log.failure_reason().map(|r| r.code().to_string()),
        }
    }
}

/// Pretty-printed JSON of any exportable value.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Parses a log previously written with [`to_json`].
pub fn log_from_json(json: &str) -> Result<SimulationLog, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeterminismConfig;
    use crate::log::{FailureEvent, FailureReason};
    use crate::safety::tests::step_at;
    use quadsim_env::{ScenarioId, TimeStep};

    fn log(steps: u64) -> SimulationLog {
        SimulationLog {
            scenario_id: ScenarioId::new("hover-start").unwrap(),
            seed: 42,
            timestep: TimeStep::new(0.001).unwrap(),
            determinism: DeterminismConfig::tier1(),
            config_hash: "00ff".to_string(),
            steps: (1..=steps).map(|i| step_at(i, 10.0)).collect(),
            failure: None,
        }
    }

    #[test]
    fn test_trajectory_stride_keeps_last() {
        let export = TrajectoryExport::from_log(&log(25), None, 10);
        let times: Vec<u64> = export.frames.iter().map(|f| (f.time_sec * 1000.0).round() as u64).collect();
        assert_eq!(times, vec![1, 11, 21, 25]);
        assert!(export.passed);
        assert!((export.duration_sec - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_trajectory_reports_failure() {
        let mut failed = log(5);
        failed.failure = Some(FailureEvent {
            reason: FailureReason::SustainedFall,
            time: 0.005,
            step_index: 5,
        });
        let export = TrajectoryExport::from_log(&failed, None, 1);
        assert!(!export.passed);
        assert_eq!(export.failure_reason.as_deref(), Some("sustained-fall"));
        assert_eq!(export.frames.len(), 5);
    }

    #[test]
    fn test_log_json_roundtrip() {
        let original = log(3);
        let json = to_json(&original).unwrap();
        assert!(json.contains("\"tier\": \"tier1\""));
        assert_eq!(log_from_json(&json).unwrap(), original);
    }
}
