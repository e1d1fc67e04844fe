//! Tiered replay checking between two simulation logs.
//!
//! * tier0 - logs must be equal, field for field
//! * tier1 - step-aligned residuals must stay within a [`Tier1Tolerance`];
//!   metadata, event order and disturbance labels must match exactly
//! * tier2 - not supported; always fails with `tier2-unsupported`

use crate::config::{DeterminismConfig, DeterminismTier};
use crate::error::ReplayError;
use crate::log::{SimulationLog, WorldStepLog};
use nalgebra::Vector4;
use quadsim_env::ValidationError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum admissible per-step residuals for tier1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier1Tolerance {
    /// m
    pub position: f64,
    /// m/s
    pub velocity: f64,
    /// rad/s
    pub angular_velocity: f64,
    /// `1 - |q_ref · q_cand|`
    pub quaternion: f64,
    /// N, on applied motor thrust
    pub motor_thrust: f64,
    /// Absolute difference of emitted sample values
    pub sensor: f64,
}

impl Tier1Tolerance {
    pub fn new(
        position: f64,
        velocity: f64,
        angular_velocity: f64,
        quaternion: f64,
        motor_thrust: f64,
        sensor: f64,
    ) -> Result<Self, ValidationError> {
        let tolerance = Self {
            position,
            velocity,
            angular_velocity,
            quaternion,
            motor_thrust,
            sensor,
        };
        tolerance.validate()?;
        Ok(tolerance)
    }

    /// Bundle used when tier1 is requested without explicit bounds.
    pub fn baseline() -> Self {
        Self {
            position: 1e-4,
            velocity: 1e-4,
            angular_velocity: 1e-4,
            quaternion: 1e-8,
            motor_thrust: 1e-4,
            sensor: 1e-4,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::positive("tolerance.position", self.position)?;
        ValidationError::positive("tolerance.velocity", self.velocity)?;
        ValidationError::positive("tolerance.angular_velocity", self.angular_velocity)?;
        ValidationError::positive("tolerance.quaternion", self.quaternion)?;
        ValidationError::positive("tolerance.motor_thrust", self.motor_thrust)?;
        ValidationError::positive("tolerance.sensor", self.sensor)?;
        Ok(())
    }
}

/// Largest residual seen per quantity over a tier1 comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayResiduals {
    pub position: f64,
    pub velocity: f64,
    pub angular_velocity: f64,
    pub quaternion: f64,
    pub motor_thrust: f64,
    pub sensor: f64,
}

impl ReplayResiduals {
    fn absorb(&mut self, other: &ReplayResiduals) {
        self.position = self.position.max(other.position);
        self.velocity = self.velocity.max(other.velocity);
        self.angular_velocity = self.angular_velocity.max(other.angular_velocity);
        self.quaternion = self.quaternion.max(other.quaternion);
        self.motor_thrust = self.motor_thrust.max(other.motor_thrust);
        self.sensor = self.sensor.max(other.sensor);
    }
}

/// One reason a replay check failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayIssue {
    /// Stable kebab-case code, e.g. `position-residual`
    pub code: String,
    pub message: String,
}

impl ReplayIssue {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of a replay check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCheckResult {
    pub tier: DeterminismTier,
    pub passed: bool,

    /// Present for tier1 comparisons
    #[serde(default)]
    pub residuals: Option<ReplayResiduals>,

    pub issues: Vec<ReplayIssue>,
}

impl ReplayCheckResult {
    fn from_issues(tier: DeterminismTier, residuals: Option<ReplayResiduals>, issues: Vec<ReplayIssue>) -> Self {
        Self {
            tier,
            passed: issues.is_empty(),
            residuals,
            issues,
        }
    }

    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    pub fn issue_codes(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.code.as_str()).collect()
    }
}

/// Compares a candidate log against a reference at a requested tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayChecker {
    tier: DeterminismTier,
    tolerance: Option<Tier1Tolerance>,
}

impl ReplayChecker {
    pub fn new(tier: DeterminismTier) -> Self {
        Self { tier, tolerance: None }
    }

    /// Checker matching the contract a run was recorded under.
    pub fn from_config(config: &DeterminismConfig) -> Self {
        Self {
            tier: config.tier,
            tolerance: config.tier1_tolerance,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Tier1Tolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn tier(&self) -> DeterminismTier {
        self.tier
    }

    /// Runs the check.
    ///
    /// Both logs must declare the requested tier. tier1 takes the tolerance
    /// set on the checker, falling back to the one the reference declares.
    pub fn check(&self, reference: &SimulationLog, candidate: &SimulationLog) -> Result<ReplayCheckResult, ReplayError> {
        for log in [reference, candidate] {
            if log.determinism.tier != self.tier {
                return Err(ReplayError::TierMismatch {
                    requested: self.tier,
                    declared: log.determinism.tier,
                });
            }
        }

        let result = match self.tier {
            DeterminismTier::Tier0 => check_tier0(reference, candidate),
            DeterminismTier::Tier1 => {
                let tolerance = self
                    .tolerance
                    .or(reference.determinism.tier1_tolerance)
                    .ok_or(ReplayError::MissingTolerance)?;
                check_tier1(reference, candidate, &tolerance)?
            }
            DeterminismTier::Tier2 => ReplayCheckResult::from_issues(
                DeterminismTier::Tier2,
                None,
                vec![ReplayIssue::new(
                    "tier2-unsupported",
                    "statistical replay equivalence is not implemented",
                )],
            ),
        };

        debug!(
            "Replay {} vs {} at {}: passed={} issues={:?}",
            reference.scenario_id,
            candidate.scenario_id,
            self.tier,
            result.passed,
            result.issue_codes()
        );
        Ok(result)
    }
}

fn check_tier0(reference: &SimulationLog, candidate: &SimulationLog) -> ReplayCheckResult {
    let mut issues = metadata_issues(reference, candidate);
    if reference != candidate {
        let detail = match first_divergent_step(reference, candidate) {
            Some(index) => format!("logs diverge at step {}", index + 1),
            None => format!(
                "logs differ in length ({} vs {} steps) or failure record",
                reference.len(),
                candidate.len()
            ),
        };
        issues.insert(0, ReplayIssue::new("log-mismatch", detail));
    }
    ReplayCheckResult::from_issues(DeterminismTier::Tier0, None, issues)
}

fn first_divergent_step(reference: &SimulationLog, candidate: &SimulationLog) -> Option<usize> {
    reference
        .steps
        .iter()
        .zip(&candidate.steps)
        .position(|(a, b)| a != b)
}

fn metadata_issues(reference: &SimulationLog, candidate: &SimulationLog) -> Vec<ReplayIssue> {
    let mut issues = Vec::new();
    if reference.scenario_id != candidate.scenario_id {
        issues.push(ReplayIssue::new(
            "scenario-id-mismatch",
            format!("{} vs {}", reference.scenario_id, candidate.scenario_id),
        ));
    }
    if reference.seed != candidate.seed {
        issues.push(ReplayIssue::new(
            "seed-mismatch",
            format!("{} vs {}", reference.seed, candidate.seed),
        ));
    }
    if reference.timestep != candidate.timestep {
        issues.push(ReplayIssue::new(
            "timestep-mismatch",
            format!("{} vs {}", reference.timestep.seconds(), candidate.timestep.seconds()),
        ));
    }
    if reference.config_hash != candidate.config_hash {
        issues.push(ReplayIssue::new("config-hash-mismatch", "run configurations differ"));
    }
    issues
}

fn check_tier1(
    reference: &SimulationLog,
    candidate: &SimulationLog,
    tolerance: &Tier1Tolerance,
) -> Result<ReplayCheckResult, ReplayError> {
    if reference.len() != candidate.len() {
        return Err(ReplayError::ShapeMismatch {
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }

    let mut issues = metadata_issues(reference, candidate);
    let mut worst = ReplayResiduals::default();
    let mut event_order_step = None;
    let mut disturbance_step = None;

    for (index, (a, b)) in reference.steps.iter().zip(&candidate.steps).enumerate() {
        worst.absorb(&step_residuals(a, b));
        if event_order_step.is_none() && (a.events != b.events || a.time.step_index != b.time.step_index) {
            event_order_step = Some(index + 1);
        }
        if disturbance_step.is_none() && a.disturbance != b.disturbance {
            disturbance_step = Some(index + 1);
        }
    }

    if let Some(step) = event_order_step {
        issues.push(ReplayIssue::new(
            "event-order-mismatch",
            format!("stage sequence differs at step {}", step),
        ));
    }
    if let Some(step) = disturbance_step {
        issues.push(ReplayIssue::new(
            "disturbance-mismatch",
            format!("disturbance differs at step {}", step),
        ));
    }
    if reference.failure_reason() != candidate.failure_reason() {
        issues.push(ReplayIssue::new(
            "failure-mismatch",
            format!("{:?} vs {:?}", reference.failure_reason(), candidate.failure_reason()),
        ));
    }

    let bounds = [
        ("position-residual", worst.position, tolerance.position),
        ("velocity-residual", worst.velocity, tolerance.velocity),
        ("angular-velocity-residual", worst.angular_velocity, tolerance.angular_velocity),
        ("quaternion-residual", worst.quaternion, tolerance.quaternion),
        ("motor-thrust-residual", worst.motor_thrust, tolerance.motor_thrust),
        ("sensor-residual", worst.sensor, tolerance.sensor),
    ];
    for (code, residual, bound) in bounds {
        // NaN residuals compare false, so test for "not within" explicitly.
        if !(residual <= bound) {
            issues.push(ReplayIssue::new(code, format!("max residual {:e} exceeds {:e}", residual, bound)));
        }
    }

    Ok(ReplayCheckResult::from_issues(DeterminismTier::Tier1, Some(worst), issues))
}

fn step_residuals(a: &WorldStepLog, b: &WorldStepLog) -> ReplayResiduals {
    ReplayResiduals {
        position: (a.plant.position - b.plant.position).norm(),
        velocity: (a.plant.velocity - b.plant.velocity).norm(),
        angular_velocity: (a.plant.angular_velocity - b.plant.angular_velocity).norm(),
        quaternion: quaternion_residual(&a.plant.orientation.coords, &b.plant.orientation.coords),
        motor_thrust: max_abs_diff(&a.actuators.applied, &b.actuators.applied),
        sensor: sensor_residual(a, b),
    }
}

/// `1 - |<a, b>|` for unit quaternions, written as `min(|a - b|², |a + b|²) / 2`
/// so identical orientations give exactly zero.
fn quaternion_residual(a: &Vector4<f64>, b: &Vector4<f64>) -> f64 {
    let minus = (a - b).norm_squared();
    let plus = (a + b).norm_squared();
    0.5 * minus.min(plus)
}

/// Largest element-wise difference; differing lengths count as infinite.
fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter().zip(b).fold(0.0, |acc, (x, y)| acc.max((x - y).abs()))
}

fn sensor_residual(a: &WorldStepLog, b: &WorldStepLog) -> f64 {
    if a.sensor_samples.len() != b.sensor_samples.len() {
        return f64::INFINITY;
    }
    a.sensor_samples
        .iter()
        .zip(&b.sensor_samples)
        .fold(0.0, |acc, (x, y)| {
            if x.channel != y.channel {
                f64::INFINITY
            } else {
                acc.max((x.value - y.value).abs())
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::tests::step_at;
    use approx::assert_abs_diff_eq;
    use nalgebra::UnitQuaternion;
    use quadsim_env::{ChannelSample, ScenarioId, SensorChannel, TimeStep};

    fn log(tier: DeterminismConfig) -> SimulationLog {
        let steps = (1..=50)
            .map(|i| {
                let mut step = step_at(i, 10.0);
                step.actuators.applied = vec![2.45; 4];
                step.sensor_samples = vec![ChannelSample {
                    channel: SensorChannel::GyroX,
                    value: 0.001 * i as f64,
                    time: step.time.time,
                }];
                step
            })
            .collect();
        SimulationLog {
            scenario_id: ScenarioId::new("hover-start").unwrap(),
            seed: 42,
            timestep: TimeStep::new(0.001).unwrap(),
            determinism: tier,
            config_hash: "abc".to_string(),
            steps,
            failure: None,
        }
    }

    #[test]
    fn test_tier0_identical_logs_pass() {
        let reference = log(DeterminismConfig::tier0());
        let result = ReplayChecker::new(DeterminismTier::Tier0)
            .check(&reference, &reference.clone())
            .unwrap();
        assert!(result.passed);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_tier0_detects_any_difference() {
        let reference = log(DeterminismConfig::tier0());
        let mut candidate = reference.clone();
        candidate.steps[10].plant.position.x += 1e-15;
        let result = ReplayChecker::new(DeterminismTier::Tier0)
            .check(&reference, &candidate)
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.issue_codes(), vec!["log-mismatch"]);
        assert!(result.issues[0].message.contains("step 11"));
    }

    #[test]
    fn test_tier0_reports_metadata() {
        let reference = log(DeterminismConfig::tier0());
        let mut candidate = reference.clone();
        candidate.seed = 7;
        let result = ReplayChecker::new(DeterminismTier::Tier0)
            .check(&reference, &candidate)
            .unwrap();
        assert!(result.has_issue("log-mismatch"));
        assert!(result.has_issue("seed-mismatch"));
    }

    #[test]
    fn test_tier_mismatch_is_error() {
        let reference = log(DeterminismConfig::tier0());
        let result = ReplayChecker::new(DeterminismTier::Tier1).check(&reference, &reference);
        assert_eq!(
            result,
            Err(ReplayError::TierMismatch {
                requested: DeterminismTier::Tier1,
                declared: DeterminismTier::Tier0,
            })
        );
    }

    #[test]
    fn test_tier1_requires_tolerance() {
        let declared = DeterminismConfig {
            tier: DeterminismTier::Tier1,
            tier1_tolerance: None,
        };
        let reference = log(declared);
        let result = ReplayChecker::new(DeterminismTier::Tier1).check(&reference, &reference);
        assert_eq!(result, Err(ReplayError::MissingTolerance));
    }

    #[test]
    fn test_tier1_self_check_has_zero_residuals() {
        let mut reference = log(DeterminismConfig::tier1());
        for (i, step) in reference.steps.iter_mut().enumerate() {
            step.plant.orientation = UnitQuaternion::from_euler_angles(0.3, -0.2 + 0.01 * i as f64, 1.1);
        }
        let result = ReplayChecker::from_config(&reference.determinism)
            .check(&reference, &reference.clone())
            .unwrap();
        assert!(result.passed);
        assert!(result.issues.is_empty());
        assert_eq!(result.residuals, Some(ReplayResiduals::default()));
    }

    #[test]
    fn test_quaternion_residual_ignores_sign() {
        let q = UnitQuaternion::from_euler_angles(0.4, 0.1, -0.7);
        let flipped = -q.into_inner();
        assert_eq!(quaternion_residual(&q.coords, &flipped.coords), 0.0);

        let angle = 1e-3;
        let turned = q * UnitQuaternion::from_euler_angles(angle, 0.0, 0.0);
        let expected = 1.0 - (angle / 2.0).cos();
        assert_abs_diff_eq!(quaternion_residual(&q.coords, &turned.coords), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_tier1_thrust_and_sensor_residuals() {
        let reference = log(DeterminismConfig::tier1());
        let mut candidate = reference.clone();
        candidate.steps[3].actuators.applied[2] += 0.01;
        candidate.steps[4].sensor_samples[0].value += 0.01;
        let result = ReplayChecker::from_config(&reference.determinism)
            .check(&reference, &candidate)
            .unwrap();
        assert!(!result.passed);
        assert!(result.has_issue("motor-thrust-residual"));
        assert!(result.has_issue("sensor-residual"));
        assert!(!result.has_issue("position-residual"));
    }

    #[test]
    fn test_tier1_shape_mismatch() {
        let reference = log(DeterminismConfig::tier1());
        let mut candidate = reference.clone();
        candidate.steps.pop();
        let result = ReplayChecker::from_config(&reference.determinism).check(&reference, &candidate);
        assert_eq!(
            result,
            Err(ReplayError::ShapeMismatch {
                reference: 50,
                candidate: 49
            })
        );
    }

    #[test]
    fn test_tier1_event_order_and_disturbance() {
        let reference = log(DeterminismConfig::tier1());
        let mut candidate = reference.clone();
        candidate.steps[0].events.push(crate::log::StepEvent::Logging);
        candidate.steps[2].disturbance.active_events.push("gust".to_string());
        let result = ReplayChecker::from_config(&reference.determinism)
            .check(&reference, &candidate)
            .unwrap();
        assert!(result.has_issue("event-order-mismatch"));
        assert!(result.has_issue("disturbance-mismatch"));
    }

    #[test]
    fn test_tier2_always_unsupported() {
        let declared = DeterminismConfig::tier0().with_tier(DeterminismTier::Tier2);
        let reference = log(declared);
        let result = ReplayChecker::new(DeterminismTier::Tier2)
            .check(&reference, &reference)
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.issue_codes(), vec!["tier2-unsupported"]);
    }

    #[test]
    fn test_tolerance_validation() {
        assert!(Tier1Tolerance::new(1e-4, 1e-4, 1e-4, 1e-8, 1e-4, 0.0).is_err());
        assert!(Tier1Tolerance::new(1e-4, 1e-4, 1e-4, 1e-8, 1e-4, 1e-4).is_ok());
        assert!(Tier1Tolerance::baseline().validate().is_ok());
    }
}
