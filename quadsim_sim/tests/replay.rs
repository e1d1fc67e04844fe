//! Replay checker against real runs.

use proptest::prelude::*;
use quadsim_env::TimeStep;
use quadsim_sim::{
    DeterminismConfig, DeterminismTier, ReplayChecker, ReplayResiduals, ScenarioKind, ScenarioRunner, ScenarioSuite,
    SimulationLog,
};

fn run(determinism: DeterminismConfig, kind: ScenarioKind, duration: f64) -> SimulationLog {
    let suite = ScenarioSuite::standard(21, duration, TimeStep::new(0.001).unwrap())
        .unwrap()
        .filter_kind(kind);
    ScenarioRunner::new()
        .with_determinism(determinism)
        .run(&suite.scenarios()[0])
        .unwrap()
}

fn shifted(log: &SimulationLog, delta: f64) -> SimulationLog {
    let mut candidate = log.clone();
    for step in &mut candidate.steps {
        step.plant.position.x += delta;
    }
    candidate
}

#[test]
fn test_tier0_replay_is_idempotent() {
    let reference = run(DeterminismConfig::tier0(), ScenarioKind::ActuatorDegradation, 3.0);
    let replayed = run(DeterminismConfig::tier0(), ScenarioKind::ActuatorDegradation, 3.0);
    let result = ReplayChecker::new(DeterminismTier::Tier0).check(&reference, &replayed).unwrap();
    assert!(result.passed, "{:?}", result.issues);
}

#[test]
fn test_tier1_replay_is_idempotent() {
    let reference = run(DeterminismConfig::tier1(), ScenarioKind::SensorDriftStress, 3.0);
    let replayed = run(DeterminismConfig::tier1(), ScenarioKind::SensorDriftStress, 3.0);
    let result = ReplayChecker::from_config(&reference.determinism)
        .check(&reference, &replayed)
        .unwrap();
    assert!(result.passed, "{:?}", result.issues);
    assert!(result.issues.is_empty());
    assert_eq!(result.residuals, Some(ReplayResiduals::default()));
}

#[test]
fn test_self_check_every_standard_scenario() {
    for kind in ScenarioKind::all() {
        let tier0 = run(DeterminismConfig::tier0(), kind, 3.0);
        let result = ReplayChecker::new(DeterminismTier::Tier0).check(&tier0, &tier0).unwrap();
        assert!(result.passed, "{}: {:?}", kind, result.issues);
        assert!(result.issues.is_empty());

        let tier1 = run(DeterminismConfig::tier1(), kind, 3.0);
        let result = ReplayChecker::from_config(&tier1.determinism).check(&tier1, &tier1).unwrap();
        assert!(result.issues.is_empty(), "{}: {:?}", kind, result.issues);
        assert_eq!(result.residuals, Some(ReplayResiduals::default()), "{}", kind);
    }
}

#[test]
fn test_tier1_sensitivity() {
    let reference = run(DeterminismConfig::tier1(), ScenarioKind::HoverStart, 0.5);
    let checker = ReplayChecker::from_config(&reference.determinism);

    let small = checker.check(&reference, &shifted(&reference, 5e-5)).unwrap();
    assert!(small.passed, "{:?}", small.issues);

    let large = checker.check(&reference, &shifted(&reference, 1e-2)).unwrap();
    assert!(!large.passed);
    assert!(large.has_issue("position-residual"));
    assert!(!large.has_issue("velocity-residual"));
}

#[test]
fn test_different_scenarios_do_not_replay() {
    let hover = run(DeterminismConfig::tier1(), ScenarioKind::HoverStart, 0.5);
    let impulse = run(DeterminismConfig::tier1(), ScenarioKind::ImpulseTorqueShock, 0.5);
    let result = ReplayChecker::from_config(&hover.determinism).check(&hover, &impulse).unwrap();
    assert!(result.has_issue("scenario-id-mismatch"));
    assert!(result.has_issue("config-hash-mismatch"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_tier1_position_bound(delta in 1e-7f64..9e-5, excess in 2e-4f64..1.0) {
        let reference = run(DeterminismConfig::tier1(), ScenarioKind::HoverStart, 0.05);
        let checker = ReplayChecker::from_config(&reference.determinism);
        prop_assert!(checker.check(&reference, &shifted(&reference, delta)).unwrap().passed);
        let failed = checker.check(&reference, &shifted(&reference, excess)).unwrap();
        prop_assert!(failed.has_issue("position-residual"));
    }
}
