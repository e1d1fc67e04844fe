//! quadsim Deterministic Simulation Harness
//!
//! Runs quadrotor scenarios through a fixed-period step loop, judges them
//! against a safety envelope and per-scenario criteria, and checks that
//! repeated runs replay within a declared determinism tier.
//!
//! # Step order
//!
//! ```text
//! ┌──────────────────────────────── WorldSimulator::step ───────────────────────────────┐
//! │ time → disturbance → actuator.update → plant (RK4) → sensor → control → nerve → apply │
//! └───────────────────────────────────────┬──────────────────────────────────────────────┘
//!                                         ▼
//!                         WorldStepLog ──► FailurePolicy
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use quadsim_sim::{ScenarioSuite, SuiteRunner, SuiteRunnerConfig};
//! use quadsim_env::TimeStep;
//!
//! let suite = ScenarioSuite::standard(42, 20.0, TimeStep::new(0.001)?)?;
//! let result = SuiteRunner::new(SuiteRunnerConfig::default()).run(&suite);
//! println!("{}", result.suite_passed());
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod exporter;
pub mod log;
pub mod replay;
pub mod runner;
pub mod safety;
pub mod scenarios;
pub mod suite;
pub mod world;

pub use config::{DeterminismConfig, DeterminismTier, SimulatorConfig, SubsystemSchedule};
pub use error::{ReplayError, SimError};
pub use evaluator::{EvaluationCriteria, ScenarioEvaluation, ScenarioEvaluator};
pub use exporter::{TrajectoryExport, TrajectoryFrame};
pub use log::{config_hash, FailureEvent, FailureReason, SimulationLog, StepEvent, WorldStepLog};
pub use replay::{ReplayCheckResult, ReplayChecker, ReplayIssue, ReplayResiduals, Tier1Tolerance};
pub use runner::{ScenarioRunner, ScenarioWorld};
pub use safety::{FailurePolicy, NeverFail, SafetyEnvelope, SafetyFailurePolicy};
pub use scenarios::{ScenarioBuilder, ScenarioConfig, ScenarioDefinition, ScenarioKind, ScenarioSuite, VehicleSetup};
pub use suite::{
    ManifestEntry, ScenarioManifest, ScenarioReport, ScenarioStatus, ScenarioSummaryEntry, SuiteRunResult,
    SuiteRunner, SuiteRunnerConfig, ValidationSummary,
};
pub use world::{Subsystems, WorldSimulator};
