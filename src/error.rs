//! Error types for the minimization engine.
//!
//! Every fatal condition carries enough numeric context (gradient norm, step norm,
//! descent inner product, active strategy) to be diagnosed from the log alone.

use crate::linalg::LinAlgError;
use serde::Serialize;
use std::fmt;
use tracing::error;

/// Result alias used throughout the crate.
pub type SolverResult<T> = Result<T, SolverError>;

/// Machine-readable outcome attached to a `UserDefined` termination.
///
/// `Success` is also the code reported when the objective itself asks to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ErrorCode {
    #[default]
    Success,
    NanEncountered,
    StrategiesExhausted,
}

/// Why a descent strategy's proposal was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyFailure {
    /// The strategy reported it could not build a direction, or the direction is
    /// not a descent direction (`Δx·g >= 0`).
    InvalidDirection,
    /// The direction contained NaN or infinite entries.
    NonFiniteDirection,
    /// The line search could not find an acceptable step along the direction.
    LineSearchFailed,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyFailure::InvalidDirection => write!(f, "direction is not a descent direction"),
            StrategyFailure::NonFiniteDirection => write!(f, "Δx is nan or inf"),
            StrategyFailure::LineSearchFailed => write!(f, "line search failed"),
        }
    }
}

/// The error type for clear diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("[{strategy}][{line_search}] {quantity} is nan or inf at iteration {iteration}; stopping")]
    NanEncountered {
        quantity: &'static str,
        iteration: usize,
        strategy: String,
        line_search: String,
    },

    #[error(
        "[{strategy}][{line_search}] {failure} on last strategy (‖Δx‖={step_norm:e}; ‖g‖={grad_norm:e}; Δx⋅g={descent:e}); stopping"
    )]
    StrategiesExhausted {
        strategy: String,
        line_search: String,
        failure: StrategyFailure,
        step_norm: f64,
        grad_norm: f64,
        descent: f64,
    },

    #[error("[{solver}][{line_search}] Reached iteration limit (limit={limit})")]
    IterationLimit {
        solver: String,
        line_search: String,
        limit: usize,
    },

    #[error("[{solver}][{line_search}] Failed to find minimizer")]
    FailedToMinimize { solver: String, line_search: String },

    #[error("Invalid solver parameters: {0}")]
    InvalidParameters(String),

    #[error("Unrecognized solver type: {0}")]
    UnknownSolver(String),

    #[error("Unrecognized line search: {0}")]
    UnknownLineSearch(String),

    #[error("Invalid box constraints: {0}")]
    InvalidBounds(String),

    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON parameters: {0}")]
    Json(#[from] serde_json::Error),
}

impl SolverError {
    /// Log the error through `tracing::error!` and hand it back, so call sites can
    /// write `return Err(SolverError::...log())`.
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// The [`ErrorCode`] this error maps to when it ends a minimization.
    pub fn code(&self) -> ErrorCode {
        match self {
            SolverError::NanEncountered { .. } => ErrorCode::NanEncountered,
            SolverError::StrategiesExhausted { .. } => ErrorCode::StrategiesExhausted,
            _ => ErrorCode::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn test_exhausted_message_carries_diagnostics() {
        let err = SolverError::StrategiesExhausted {
            strategy: "GradientDescent".to_string(),
            line_search: "Armijo".to_string(),
            failure: StrategyFailure::LineSearchFailed,
            step_norm: 1.5,
            grad_norm: 2.0,
            descent: -3.0,
        };
        let message = err.to_string();
        assert_that(&message.contains("GradientDescent")).is_true();
        assert_that(&message.contains("line search failed")).is_true();
        assert_that(&message.contains("‖g‖=2e0")).is_true();
        assert_that(&err.code()).is_equal_to(ErrorCode::StrategiesExhausted);
    }

    #[test]
    fn test_linear_algebra_errors_convert() {
        let err: SolverError = LinAlgError::SingularMatrix.into();
        assert!(matches!(err, SolverError::LinearAlgebra(LinAlgError::SingularMatrix)));
        assert_that(&err.code()).is_equal_to(ErrorCode::Success);
    }
}
