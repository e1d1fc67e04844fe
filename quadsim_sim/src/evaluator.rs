//! Scenario evaluation: pass/fail plus recovery and stability metrics.

use crate::log::SimulationLog;
use crate::scenarios::{ScenarioDefinition, ScenarioKind};
use quadsim_env::ScenarioId;
use serde::{Deserialize, Serialize};

const TIME_EPSILON: f64 = 1e-9;

/// Thresholds used to judge scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    /// Hover: time after start before the rate bound applies (s)
    pub hover_warmup_seconds: f64,
    /// Hover: max body rate after warm-up (rad/s)
    pub hover_omega_max: f64,

    /// Impulse: time after the last torque event ends before tilt is judged (s)
    pub impulse_settle_seconds: f64,
    /// Impulse: max tilt once settled (degrees)
    pub impulse_tilt_max_degrees: f64,

    /// Lift-hover: time after start before altitude is judged (s)
    pub lift_settle_seconds: f64,
    /// Lift-hover: max altitude error once settled (m)
    pub lift_altitude_tolerance: f64,

    /// Length of the in-envelope window that counts as recovered (s)
    pub recovery_window_seconds: f64,
}

impl Default for EvaluationCriteria {
    fn default() -> Self {
        Self {
            hover_warmup_seconds: 1.0,
            hover_omega_max: 0.5,
            impulse_settle_seconds: 2.0,
            impulse_tilt_max_degrees: 5.0,
            lift_settle_seconds: 3.0,
            lift_altitude_tolerance: 0.5,
            recovery_window_seconds: 0.5,
        }
    }
}

/// Verdict and metrics for one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEvaluation {
    pub scenario_id: ScenarioId,
    pub kind: ScenarioKind,
    pub passed: bool,

    /// Failure code if the run terminated early
    pub failure_reason: Option<String>,
    pub failure_time: Option<f64>,

    pub steps: usize,
    pub max_omega: f64,
    pub max_tilt_degrees: f64,

    /// Longest uninterrupted envelope violation (s)
    pub sustained_violation_seconds: f64,

    /// Time from the last event's end to the start of the first stable window
    pub recovery_time: Option<f64>,

    /// Max tilt from the first event onward (degrees)
    pub overshoot_degrees: Option<f64>,

    /// `1 / (1 + mean |d²ω/dt²|)` when events are present
    pub hf_stability: Option<f64>,

    /// Lift-hover only: max altitude error after settling (m)
    pub altitude_error: Option<f64>,

    /// Human-readable reasons for a failed verdict
    pub notes: Vec<String>,
}

/// Judges logs against their scenario definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScenarioEvaluator {
    criteria: EvaluationCriteria,
}

impl ScenarioEvaluator {
    pub fn new(criteria: EvaluationCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &EvaluationCriteria {
        &self.criteria
    }

    pub fn evaluate(&self, definition: &ScenarioDefinition, log: &SimulationLog) -> ScenarioEvaluation {
        let c = &self.criteria;
        let envelope = &definition.envelope;
        let dt = log.timestep.seconds();
        let final_time = log.final_time();
        let mut notes = Vec::new();

        let max_omega = log.steps.iter().map(|s| s.safety.omega_magnitude).fold(0.0, f64::max);
        let max_tilt_degrees = log
            .steps
            .iter()
            .map(|s| s.safety.tilt_radians.to_degrees())
            .fold(0.0, f64::max);

        let mut longest = 0usize;
        let mut run = 0usize;
        for step in &log.steps {
            if envelope.is_violated(step.safety.omega_magnitude, step.safety.tilt_radians) {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        let sustained_violation_seconds = longest as f64 * dt;

        let recovery_time = definition
            .last_event_end()
            .and_then(|end| self.recovery_after(definition, log, end));

        let overshoot_degrees = definition.first_event_start().map(|start| {
            log.steps
                .iter()
                .filter(|s| s.time.time + TIME_EPSILON >= start)
                .map(|s| s.safety.tilt_radians.to_degrees())
                .fold(0.0, f64::max)
        });

        let hf_stability = if definition.has_events() {
            hf_stability(log)
        } else {
            None
        };

        if let Some(failure) = &log.failure {
            notes.push(format!("terminated: {} at t={:.3}s", failure.reason, failure.time));
        }

        let mut altitude_error = None;
        match definition.kind {
            ScenarioKind::HoverStart => {
                let settled_max = log
                    .steps
                    .iter()
                    .filter(|s| s.time.time + TIME_EPSILON >= c.hover_warmup_seconds)
                    .map(|s| s.safety.omega_magnitude)
                    .fold(0.0, f64::max);
                if final_time + TIME_EPSILON < c.hover_warmup_seconds {
                    notes.push("run shorter than hover warm-up".to_string());
                } else if !(settled_max <= c.hover_omega_max) {
                    notes.push(format!(
                        "body rate {:.3} rad/s after warm-up exceeds {:.3}",
                        settled_max, c.hover_omega_max
                    ));
                }
            }
            ScenarioKind::ImpulseTorqueShock => {
                let settle_at = definition.last_torque_end().unwrap_or(0.0) + c.impulse_settle_seconds;
                if final_time + TIME_EPSILON < settle_at {
                    notes.push(format!("run ends before impulse settle time {:.3}s", settle_at));
                } else {
                    let settled_tilt = log
                        .steps
                        .iter()
                        .filter(|s| s.time.time + TIME_EPSILON >= settle_at)
                        .map(|s| s.safety.tilt_radians.to_degrees())
                        .fold(0.0, f64::max);
                    if !(settled_tilt < c.impulse_tilt_max_degrees) {
                        notes.push(format!(
                            "tilt {:.2}° at t≥{:.3}s exceeds {:.2}°",
                            settled_tilt, settle_at, c.impulse_tilt_max_degrees
                        ));
                    }
                }
            }
            ScenarioKind::SustainedWindTorque | ScenarioKind::SensorDriftStress | ScenarioKind::ActuatorDegradation => {
                if definition.has_events() && recovery_time.is_none() {
                    notes.push("no stable window after the last event".to_string());
                }
            }
            ScenarioKind::LiftHoverStart | ScenarioKind::LiftHoverDegraded => {
                let target = definition.altitude_target();
                if final_time + TIME_EPSILON < c.lift_settle_seconds {
                    notes.push("run shorter than lift-hover settle time".to_string());
                } else {
                    let error = log
                        .steps
                        .iter()
                        .filter(|s| s.time.time + TIME_EPSILON >= c.lift_settle_seconds)
                        .map(|s| (s.plant.position.z - target).abs())
                        .fold(0.0, f64::max);
                    if !(error <= c.lift_altitude_tolerance) {
                        notes.push(format!(
                            "altitude error {:.3} m exceeds {:.3} m",
                            error, c.lift_altitude_tolerance
                        ));
                    }
                    altitude_error = Some(error);
                }
            }
        }

        ScenarioEvaluation {
            scenario_id: log.scenario_id.clone(),
            kind: definition.kind,
            passed: notes.is_empty(),
            failure_reason: log.failure_reason().map(|r| r.code().to_string()),
            failure_time: log.failure_time(),
            steps: log.len(),
            max_omega,
            max_tilt_degrees,
            sustained_violation_seconds,
            recovery_time,
            overshoot_degrees,
            hf_stability,
            altitude_error,
            notes,
        }
    }

    /// Start of the first in-envelope window of `recovery_window_seconds`
    /// beginning at or after `event_end`, relative to `event_end`.
    fn recovery_after(&self, definition: &ScenarioDefinition, log: &SimulationLog, event_end: f64) -> Option<f64> {
        let dt = log.timestep.seconds();
        let window = self.criteria.recovery_window_seconds;
        let mut window_start: Option<f64> = None;

        for step in log.steps.iter().filter(|s| s.time.time + TIME_EPSILON >= event_end) {
            let t = step.time.time;
            if definition
                .envelope
                .is_violated(step.safety.omega_magnitude, step.safety.tilt_radians)
            {
                window_start = None;
                continue;
            }
            let start = *window_start.get_or_insert(t);
            if t - start + dt + TIME_EPSILON >= window {
                return Some((start - event_end).max(0.0));
            }
        }
        None
    }
}

/// `1 / (1 + mean |Δ²ω| / dt²)` over consecutive step triples.
fn hf_stability(log: &SimulationLog) -> Option<f64> {
    if log.steps.len() < 3 {
        return None;
    }
    let dt = log.timestep.seconds();
    let (sum, count) = log.steps.windows(3).fold((0.0, 0usize), |(sum, count), w| {
        let jerk = (w[2].plant.angular_velocity - 2.0 * w[1].plant.angular_velocity + w[0].plant.angular_velocity)
            .norm()
            / (dt * dt);
        (sum + jerk, count + 1)
    });
    let mean = sum / count as f64;
    mean.is_finite().then(|| 1.0 / (1.0 + mean))
}
