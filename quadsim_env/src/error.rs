//! Error types shared by every quadsim subsystem.

use thiserror::Error;

/// Rejected configuration or value construction.
///
/// Returned by validated constructors; a value that exists has passed these
/// checks, so downstream code never re-validates it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value is NaN or infinite
    #[error("{field} must be finite (got {value})")]
    NonFinite { field: &'static str, value: f64 },

    /// Value must be strictly greater than zero
    #[error("{field} must be > 0 (got {value})")]
    NonPositive { field: &'static str, value: f64 },

    /// Value must be greater than or equal to zero
    #[error("{field} must be >= 0 (got {value})")]
    Negative { field: &'static str, value: f64 },

    /// Value lies outside an inclusive range
    #[error("{field} must be within [{min}, {max}] (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Required text or collection is empty
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// Matrix or geometry that cannot be inverted
    #[error("{field} is degenerate")]
    Degenerate { field: &'static str },

    /// Channel index outside the configured channel count
    #[error("channel index {index} out of range for {count} channels")]
    ChannelOutOfRange { index: usize, count: usize },
}

impl ValidationError {
    /// Checks that `value` is finite.
    pub fn finite(field: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(Self::NonFinite { field, value })
        }
    }

    /// Checks that `value` is finite and strictly positive.
    pub fn positive(field: &'static str, value: f64) -> Result<f64, Self> {
        let value = Self::finite(field, value)?;
        if value > 0.0 {
            Ok(value)
        } else {
            Err(Self::NonPositive { field, value })
        }
    }

    /// Checks that `value` is finite and non-negative.
    pub fn non_negative(field: &'static str, value: f64) -> Result<f64, Self> {
        let value = Self::finite(field, value)?;
        if value >= 0.0 {
            Ok(value)
        } else {
            Err(Self::Negative { field, value })
        }
    }

    /// Checks that `value` is finite and within `[min, max]`.
    pub fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, Self> {
        let value = Self::finite(field, value)?;
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(Self::OutOfRange { field, value, min, max })
        }
    }
}

/// Runtime failure raised by a subsystem during a step.
///
/// Fatal to the current scenario run; the simulator never retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubsystemError {
    /// A state scalar became NaN or infinite
    #[error("{subsystem}: non-finite {field}")]
    NonFiniteState {
        subsystem: &'static str,
        field: &'static str,
    },

    /// A command or sample referenced a channel that does not exist
    #[error("{subsystem}: channel {index} out of range for {count} channels")]
    ChannelOutOfRange {
        subsystem: &'static str,
        index: usize,
        count: usize,
    },

    /// A command set or sample vector had the wrong number of entries
    #[error("{subsystem}: expected {expected} values, got {actual}")]
    LengthMismatch {
        subsystem: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A subsystem was driven in a way its contract forbids
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Wrapped construction-time validation failure
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SubsystemError {
    /// Creates a contract violation error.
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }

    /// Returns `Err(NonFiniteState)` if any of `values` is non-finite.
    pub fn check_finite(
        subsystem: &'static str,
        field: &'static str,
        values: &[f64],
    ) -> Result<(), Self> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(Self::NonFiniteState { subsystem, field })
        }
    }
}

/// Returned when a single-flight resource is already in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resource busy: another simulation run holds it")]
pub struct BusyError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_rejects_zero_and_nan() {
        assert!(matches!(
            ValidationError::positive("dt", 0.0),
            Err(ValidationError::NonPositive { field: "dt", .. })
        ));
        assert!(matches!(
            ValidationError::positive("dt", f64::NAN),
            Err(ValidationError::NonFinite { field: "dt", .. })
        ));
        assert_eq!(ValidationError::positive("dt", 0.5), Ok(0.5));
    }

    #[test]
    fn test_in_range() {
        assert!(ValidationError::in_range("p", 1.5, 0.0, 1.0).is_err());
        assert_eq!(ValidationError::in_range("p", 1.0, 0.0, 1.0), Ok(1.0));
    }

    #[test]
    fn test_check_finite() {
        assert!(SubsystemError::check_finite("plant", "position", &[0.0, 1.0]).is_ok());
        let err = SubsystemError::check_finite("plant", "position", &[0.0, f64::INFINITY]);
        assert_eq!(
            err,
            Err(SubsystemError::NonFiniteState {
                subsystem: "plant",
                field: "position"
            })
        );
    }
}
