//! Stopping thresholds, per-iteration metrics and the pure convergence check.

use serde::Serialize;
use std::fmt;

/// Termination status of a minimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Status {
    #[default]
    NotStarted,
    /// The loop should keep iterating.
    Continue,
    /// The maximum number of iterations was reached.
    IterationLimit,
    /// The norm of the last step fell below the threshold.
    StepTolerance,
    /// The energy change stayed below the threshold for long enough.
    FDeltaTolerance,
    /// The (projected) gradient norm fell below the threshold.
    GradNormTolerance,
    /// The objective or the engine ended the run; see the [`ErrorCode`](crate::error::ErrorCode).
    UserDefined,
}

impl Status {
    /// Anything but `Continue` and `NotStarted` ends the loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Continue | Status::NotStarted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotStarted => write!(f, "Solve hasn't started"),
            Status::Continue => write!(f, "Continue"),
            Status::IterationLimit => write!(f, "Iteration limit reached"),
            Status::StepTolerance => write!(f, "Change in parameter vector too small"),
            Status::FDeltaTolerance => write!(f, "Change in objective function too small"),
            Status::GradNormTolerance => write!(f, "Gradient vector norm too small"),
            Status::UserDefined => write!(f, "Stop requested by the objective or the solver"),
        }
    }
}

/// Either the stopping thresholds or the metrics of the current iteration.
///
/// The same struct is used for both so the comparison in [`check_convergence`] is
/// field-by-field. Metrics use `NaN` for "not measured yet".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Criteria {
    pub iterations: usize,
    pub x_delta: f64,
    pub f_delta: f64,
    pub grad_norm: f64,
    pub condition: f64,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            iterations: 0,
            x_delta: 0.0,
            f_delta: 0.0,
            grad_norm: 0.0,
            condition: 0.0,
        }
    }
}

impl Criteria {
    /// Fresh metrics at the start of a minimization.
    pub fn start() -> Self {
        let mut metrics = Self::default();
        metrics.reset_measurements();
        metrics
    }

    /// Forget the measured quantities but keep the iteration count.
    pub fn reset_measurements(&mut self) {
        self.x_delta = f64::NAN;
        self.f_delta = f64::NAN;
        self.grad_norm = f64::NAN;
        self.condition = f64::NAN;
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iters={} Δf={:e} ‖∇f‖={:e} ‖Δx‖={:e}",
            self.iterations, self.f_delta, self.grad_norm, self.x_delta
        )
    }
}

/// Compare the current metrics against the stopping thresholds.
///
/// Checks run in a fixed order: iteration limit, gradient norm, step norm, energy
/// change. Metrics that are `NaN` are skipped.
pub fn check_convergence(stop: &Criteria, current: &Criteria) -> Status {
    if current.iterations >= stop.iterations {
        return Status::IterationLimit;
    }
    if !current.grad_norm.is_nan() && current.grad_norm <= stop.grad_norm {
        return Status::GradNormTolerance;
    }
    if !current.x_delta.is_nan() && current.x_delta <= stop.x_delta {
        return Status::StepTolerance;
    }
    if !current.f_delta.is_nan() && current.f_delta <= stop.f_delta {
        return Status::FDeltaTolerance;
    }
    Status::Continue
}
