//! Suite runner: runs every scenario of a suite, evaluates it, optionally
//! verifies replay, and aggregates a validation summary.
//!
//! A scenario that errors is reported and the suite continues. A stop
//! request ends the suite; scenarios not yet started are not run.

use crate::config::{DeterminismConfig, SubsystemSchedule};
use crate::error::SimError;
use crate::evaluator::{EvaluationCriteria, ScenarioEvaluation, ScenarioEvaluator};
use crate::log::SimulationLog;
use crate::replay::{ReplayCheckResult, ReplayChecker};
use crate::runner::ScenarioRunner;
use crate::scenarios::{ScenarioDefinition, ScenarioKind, ScenarioSuite};

use quadsim_env::{RunControl, ScenarioId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Suite-wide run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRunnerConfig {
    pub schedule: SubsystemSchedule,
    pub determinism: DeterminismConfig,
    pub criteria: EvaluationCriteria,

    /// Run every scenario twice and compare the logs at the declared tier
    pub verify_replay: bool,

    /// Upper bound on scenarios in flight for [`SuiteRunner::run_concurrent`]
    pub max_concurrency: usize,

    /// Keep full logs in the reports
    pub keep_logs: bool,
}

impl Default for SuiteRunnerConfig {
    fn default() -> Self {
        Self {
            schedule: SubsystemSchedule::default(),
            determinism: DeterminismConfig::default(),
            criteria: EvaluationCriteria::default(),
            verify_replay: false,
            max_concurrency: 1,
            keep_logs: false,
        }
    }
}

impl SuiteRunnerConfig {
    pub fn with_schedule(mut self, schedule: SubsystemSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_determinism(mut self, determinism: DeterminismConfig) -> Self {
        self.determinism = determinism;
        self
    }

    pub fn with_criteria(mut self, criteria: EvaluationCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_replay_verification(mut self, verify: bool) -> Self {
        self.verify_replay = verify;
        self
    }

    pub fn with_max_concurrency(mut self, jobs: usize) -> Self {
        self.max_concurrency = jobs.max(1);
        self
    }

    pub fn with_logs(mut self, keep: bool) -> Self {
        self.keep_logs = keep;
        self
    }
}

/// How a scenario run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Log produced and evaluated
    Completed,
    /// Configuration or subsystem error
    Errored,
    /// Stopped by the operator
    Cancelled,
}

/// Outcome of one scenario within a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario_id: ScenarioId,
    pub kind: ScenarioKind,
    pub seed: u64,
    pub status: ScenarioStatus,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evaluation: Option<ScenarioEvaluation>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replay: Option<ReplayCheckResult>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub config_hash: Option<String>,

    #[serde(skip)]
    pub log: Option<SimulationLog>,
}

impl ScenarioReport {
    fn errored(definition: &ScenarioDefinition, err: &SimError) -> Self {
        let status = if err.is_cancelled() {
            ScenarioStatus::Cancelled
        } else {
            ScenarioStatus::Errored
        };
        Self {
            scenario_id: definition.id().clone(),
            kind: definition.kind,
            seed: definition.seed(),
            status,
            evaluation: None,
            replay: None,
            error: Some(err.to_string()),
            config_hash: None,
            log: None,
        }
    }

    /// Completed, evaluated as passing, and replay-consistent if checked.
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Completed
            && self.evaluation.as_ref().is_some_and(|e| e.passed)
            && self.replay.as_ref().map_or(true, |r| r.passed)
    }

    /// Short reason for a non-passing report.
    pub fn failure_summary(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        let mut reasons: Vec<String> = self
            .evaluation
            .as_ref()
            .map(|e| e.notes.clone())
            .unwrap_or_default();
        if let Some(replay) = self.replay.as_ref().filter(|r| !r.passed) {
            reasons.push(format!("replay: {}", replay.issue_codes().join(", ")));
        }
        Some(reasons.join("; "))
    }
}

/// Reports for every scenario run, in suite order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRunResult {
    pub reports: Vec<ScenarioReport>,

    /// A stop request ended the suite early
    pub cancelled: bool,
}

impl SuiteRunResult {
    pub fn suite_passed(&self) -> bool {
        !self.cancelled && self.reports.iter().all(ScenarioReport::passed)
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary::from_result(self)
    }
}

/// Runs scenario suites.
#[derive(Debug, Clone, Default)]
pub struct SuiteRunner {
    config: SuiteRunnerConfig,
    control: Option<RunControl>,
}

impl SuiteRunner {
    pub fn new(config: SuiteRunnerConfig) -> Self {
        Self { config, control: None }
    }

    pub fn with_run_control(mut self, control: RunControl) -> Self {
        self.control = Some(control);
        self
    }

    pub fn config(&self) -> &SuiteRunnerConfig {
        &self.config
    }

    /// Runs the suite one scenario at a time.
    pub fn run(&self, suite: &ScenarioSuite) -> SuiteRunResult {
        info!("Running suite: {} scenarios", suite.len());
        let mut reports = Vec::with_capacity(suite.len());
        let mut cancelled = false;

        for definition in suite.iter() {
            let report = run_scenario(&self.config, self.control.as_ref(), definition);
            let stop = report.status == ScenarioStatus::Cancelled;
            reports.push(report);
            if stop {
                warn!("Suite stopped after {} of {} scenarios", reports.len(), suite.len());
                cancelled = true;
                break;
            }
        }

        SuiteRunResult { reports, cancelled }
    }

    /// Runs up to `max_concurrency` scenarios at once on the blocking pool.
    ///
    /// Each scenario is an independent world; reports come back in suite
    /// order and are identical to a sequential run's.
    pub async fn run_concurrent(&self, suite: &ScenarioSuite) -> SuiteRunResult {
        let jobs = self.config.max_concurrency.max(1);
        info!("Running suite: {} scenarios ({} concurrent)", suite.len(), jobs);
        let semaphore = Arc::new(Semaphore::new(jobs));

        let mut handles = Vec::with_capacity(suite.len());
        for definition in suite.iter().cloned() {
            let permit = semaphore.clone().acquire_owned().await.ok();
            let config = self.config.clone();
            let control = self.control.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                run_scenario(&config, control.as_ref(), &definition)
            });
            handles.push(handle);
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (definition, handle) in suite.iter().zip(handles) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(join_error) => {
                    error!("Scenario {} worker failed: {}", definition.id(), join_error);
                    reports.push(ScenarioReport {
                        scenario_id: definition.id().clone(),
                        kind: definition.kind,
                        seed: definition.seed(),
                        status: ScenarioStatus::Errored,
                        evaluation: None,
                        replay: None,
                        error: Some(format!("worker failed: {}", join_error)),
                        config_hash: None,
                        log: None,
                    });
                }
            }
        }

        let cancelled = reports.iter().any(|r| r.status == ScenarioStatus::Cancelled);
        SuiteRunResult { reports, cancelled }
    }
}

/// Runs, evaluates and optionally replays one scenario.
fn run_scenario(config: &SuiteRunnerConfig, control: Option<&RunControl>, definition: &ScenarioDefinition) -> ScenarioReport {
    let mut runner = ScenarioRunner::new()
        .with_schedule(config.schedule)
        .with_determinism(config.determinism);
    if let Some(control) = control {
        runner = runner.with_run_control(control.clone());
    }

    let log = match runner.run(definition) {
        Ok(log) => log,
        Err(err) => {
            if !err.is_cancelled() {
                error!("Scenario {} errored: {}", definition.id(), err);
            }
            return ScenarioReport::errored(definition, &err);
        }
    };

    let evaluation = ScenarioEvaluator::new(config.criteria).evaluate(definition, &log);
    debug!(
        "Evaluated {}: passed={} max_omega={:.3} max_tilt={:.2}°",
        definition.id(),
        evaluation.passed,
        evaluation.max_omega,
        evaluation.max_tilt_degrees
    );

    let mut report = ScenarioReport {
        scenario_id: definition.id().clone(),
        kind: definition.kind,
        seed: definition.seed(),
        status: ScenarioStatus::Completed,
        evaluation: Some(evaluation),
        replay: None,
        error: None,
        config_hash: Some(log.config_hash.clone()),
        log: None,
    };

    if config.verify_replay {
        let replayed = match runner.run(definition) {
            Ok(replayed) => replayed,
            Err(err) => {
                if !err.is_cancelled() {
                    error!("Scenario {} replay errored: {}", definition.id(), err);
                }
                return ScenarioReport::errored(definition, &err);
            }
        };
        match ReplayChecker::from_config(&config.determinism).check(&log, &replayed) {
            Ok(result) => {
                if !result.passed {
                    warn!("Scenario {} replay diverged: {:?}", definition.id(), result.issue_codes());
                }
                report.replay = Some(result);
            }
            Err(err) => {
                error!("Scenario {} replay check failed: {}", definition.id(), err);
                report.status = ScenarioStatus::Errored;
                report.error = Some(format!("replay check failed: {}", err));
            }
        }
    }

    if config.keep_logs {
        report.log = Some(log);
    }
    report
}

// =============================================================================
// SUMMARY AND MANIFEST
// =============================================================================

/// Per-scenario line of a [`ValidationSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummaryEntry {
    pub scenario_id: ScenarioId,
    pub kind: ScenarioKind,
    pub seed: u64,
    pub status: ScenarioStatus,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_time: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_passed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate verdict and metrics for a suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub suite_passed: bool,
    pub cancelled: bool,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,

    /// Mean over scenarios that recovered (s)
    pub mean_recovery_time: Option<f64>,

    /// Largest tilt after an event across the suite (degrees)
    pub worst_overshoot_degrees: Option<f64>,

    /// Mean high-frequency stability score over scenarios with events
    pub mean_hf_stability: Option<f64>,

    pub scenarios: Vec<ScenarioSummaryEntry>,
}

impl ValidationSummary {
    pub fn from_result(result: &SuiteRunResult) -> Self {
        let evaluations: Vec<&ScenarioEvaluation> = result.reports.iter().filter_map(|r| r.evaluation.as_ref()).collect();

        let scenarios: Vec<ScenarioSummaryEntry> = result
            .reports
            .iter()
            .map(|r| ScenarioSummaryEntry {
                scenario_id: r.scenario_id.clone(),
                kind: r.kind,
                seed: r.seed,
                status: r.status,
                passed: r.passed(),
                failure_reason: r.evaluation.as_ref().and_then(|e| e.failure_reason.clone()),
                recovery_time: r.evaluation.as_ref().and_then(|e| e.recovery_time),
                replay_passed: r.replay.as_ref().map(|rp| rp.passed),
                detail: r.failure_summary(),
            })
            .collect();

        let passed = scenarios.iter().filter(|s| s.passed).count();
        let errored = scenarios.iter().filter(|s| s.status != ScenarioStatus::Completed).count();

        Self {
            suite_passed: result.suite_passed(),
            cancelled: result.cancelled,
            total: scenarios.len(),
            passed,
            failed: scenarios.len() - passed - errored,
            errored,
            mean_recovery_time: mean(evaluations.iter().filter_map(|e| e.recovery_time)),
            worst_overshoot_degrees: evaluations
                .iter()
                .filter_map(|e| e.overshoot_degrees)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v)))),
            mean_hf_stability: mean(evaluations.iter().filter_map(|e| e.hf_stability)),
            scenarios,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Static description of a suite, for reproducing it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioManifest {
    pub suite_seed: u64,
    pub schedule: SubsystemSchedule,
    pub determinism: DeterminismConfig,
    pub scenarios: Vec<ManifestEntry>,
}

/// One scenario in a [`ScenarioManifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub scenario_id: ScenarioId,
    pub kind: ScenarioKind,
    pub description: String,
    pub seed: u64,
    pub duration: f64,
    pub timestep: f64,
    pub torque_events: usize,
    pub sensor_swaps: usize,
    pub actuator_swaps: usize,
    pub hf_stress: usize,
    pub actuator_degradation: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_event_start: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_end: Option<f64>,
}

impl ScenarioManifest {
    pub fn new(suite_seed: u64, suite: &ScenarioSuite, config: &SuiteRunnerConfig) -> Self {
        Self {
            suite_seed,
            schedule: config.schedule,
            determinism: config.determinism,
            scenarios: suite
                .iter()
                .map(|s| ManifestEntry {
                    scenario_id: s.id().clone(),
                    kind: s.kind,
                    description: s.kind.description().to_string(),
                    seed: s.seed(),
                    duration: s.config.duration,
                    timestep: s.config.timestep.seconds(),
                    torque_events: s.torque_events.len(),
                    sensor_swaps: s.sensor_swaps.len(),
                    actuator_swaps: s.actuator_swaps.len(),
                    hf_stress: s.hf_stress.len(),
                    actuator_degradation: s.actuator_degradation.is_some(),
                    first_event_start: s.first_event_start(),
                    last_event_end: s.last_event_end(),
                })
                .collect(),
        }
    }
}
