//! Error types for simulation runs and replay checks.

use crate::config::DeterminismTier;
use crate::log::StepEvent;
use quadsim_env::{BusyError, SubsystemError, ValidationError};
use thiserror::Error;

/// A scenario run that could not produce a complete log.
///
/// Terminal safety failures are not errors; they end the run normally and
/// are recorded in the log.
#[derive(Debug, Error)]
pub enum SimError {
    /// A subsystem call failed; the run is aborted at that step
    #[error("{stage} failed at step {step}: {source}")]
    Subsystem {
        step: u64,
        stage: StepEvent,
        #[source]
        source: SubsystemError,
    },

    /// Operator stop observed at the checkpoint before `step`
    #[error("run cancelled before step {step}")]
    Cancelled { step: u64 },

    /// Scenario or engine configuration rejected
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    /// Single-flight model already in use
    #[error(transparent)]
    Busy(#[from] BusyError),

    /// Run configuration could not be encoded for hashing
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimError {
    /// True when the run was stopped by the operator, not by a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SimError::Cancelled { .. })
    }
}

/// A replay comparison that cannot be performed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    /// A log declares a different tier than the one requested
    #[error("determinism tier mismatch: requested {requested}, log declares {declared}")]
    TierMismatch {
        requested: DeterminismTier,
        declared: DeterminismTier,
    },

    /// tier1 requested without a tolerance bundle
    #[error("tier1 replay requires a Tier1Tolerance")]
    MissingTolerance,

    /// Logs have different step counts
    #[error("log shape mismatch: reference has {reference} steps, candidate has {candidate}")]
    ShapeMismatch { reference: usize, candidate: usize },
}
