//! Step-length selection along a descent direction.
//!
//! Every line search shares the same scaffolding ([`LineSearchBase`]): pick the initial
//! step from the configuration and the objective's admissible step, shrink it until the
//! trial point is valid and finite, then hand over to the method-specific acceptance
//! loop. A failed search returns `NaN` and leaves the objective positioned at `x`.

mod backtracking;
mod wolfe;

pub use backtracking::{AcceptanceRule, Backtracking};
pub use wolfe::StrongWolfe;

use crate::error::{SolverError, SolverResult};
use crate::params::LineSearchParams;
use crate::problem::Problem;
use ndarray::Array1;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

/// Accumulated wall-clock time of a line search, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LineSearchTimings {
    pub checking_for_nan_inf: f64,
    pub classical_line_search: f64,
}

pub trait LineSearch {
    fn name(&self) -> &'static str;

    /// Scale for `delta_x`, or `NaN` if no acceptable step was found.
    fn line_search(
        &mut self,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        objective: &mut dyn Problem,
    ) -> f64;

    /// The most robust strategy gets the relaxed step limits.
    fn set_is_final_strategy(&mut self, is_final: bool);

    fn set_use_grad_norm_tol(&mut self, tol: f64);

    /// Trial steps evaluated since the last [`reset_times`](LineSearch::reset_times).
    fn iterations(&self) -> usize;

    fn timings(&self) -> LineSearchTimings;

    fn reset_times(&mut self);
}

/// Names accepted by [`create`].
pub fn available_methods() -> Vec<&'static str> {
    vec!["Backtracking", "Armijo", "None", "StrongWolfe"]
}

/// Build the line search named by `params.method`.
pub fn create(params: &LineSearchParams) -> SolverResult<Box<dyn LineSearch>> {
    let base = LineSearchBase::new(params);
    match params.method.as_str() {
        "Backtracking" => Ok(Box::new(Backtracking::new(base, AcceptanceRule::Decrease))),
        "Armijo" | "ArmijoBacktracking" => Ok(Box::new(Backtracking::new(
            base,
            AcceptanceRule::Armijo {
                c: params.armijo.c,
            },
        ))),
        "None" | "NoLineSearch" => Ok(Box::new(Backtracking::new(
            base,
            AcceptanceRule::EnergyIncrease {
                max_energy_incre: params.none.max_energy_incre,
            },
        ))),
        "StrongWolfe" => Ok(Box::new(StrongWolfe::new(
            base,
            params.strong_wolfe.c1,
            params.strong_wolfe.c2,
        ))),
        other => Err(SolverError::UnknownLineSearch(other.to_string()).log()),
    }
}

/// State and limits shared by every line search.
#[derive(Debug, Clone)]
pub struct LineSearchBase {
    pub min_step_size: f64,
    pub max_step_size_iter: usize,
    pub min_step_size_final: f64,
    pub max_step_size_iter_final: usize,
    pub default_init_step_size: f64,
    pub step_ratio: f64,
    pub use_grad_norm_tol: f64,
    is_final_strategy: bool,
    cur_iter: usize,
    iterations: usize,
    timings: LineSearchTimings,
}

/// What the scaffolding learned before the method-specific loop runs.
pub(crate) struct SearchStart {
    pub old_energy: f64,
    pub old_grad: Array1<f64>,
    pub use_grad_norm: bool,
    pub step_size: f64,
}

impl LineSearchBase {
    pub fn new(params: &LineSearchParams) -> Self {
        Self {
            min_step_size: params.min_step_size,
            max_step_size_iter: params.max_step_size_iter,
            min_step_size_final: params.min_step_size_final,
            max_step_size_iter_final: params.max_step_size_iter_final,
            default_init_step_size: params.default_init_step_size,
            step_ratio: params.step_ratio,
            use_grad_norm_tol: params.use_grad_norm_tol,
            is_final_strategy: false,
            cur_iter: 0,
            iterations: 0,
            timings: LineSearchTimings::default(),
        }
    }

    pub fn current_min_step_size(&self) -> f64 {
        if self.is_final_strategy {
            self.min_step_size_final
        } else {
            self.min_step_size
        }
    }

    pub fn current_max_step_size_iter(&self) -> usize {
        if self.is_final_strategy {
            self.max_step_size_iter_final
        } else {
            self.max_step_size_iter
        }
    }

    /// Whether another trial is allowed at `step_size`.
    pub(crate) fn can_shrink(&self, step_size: f64) -> bool {
        step_size > self.current_min_step_size() && self.cur_iter < self.current_max_step_size_iter()
    }

    pub(crate) fn count_trial(&mut self) {
        self.cur_iter += 1;
        self.iterations += 1;
    }

    /// Evaluate the start point, choose the initial step and shrink it until the trial
    /// point is admissible with a finite energy. `None` if no such step exists.
    pub(crate) fn begin(
        &mut self,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        objective: &mut dyn Problem,
    ) -> Option<SearchStart> {
        self.cur_iter = 0;

        let old_energy = objective.value(x);
        let mut old_grad = Array1::zeros(x.len());
        objective.gradient(x, &mut old_grad);
        let use_grad_norm = old_grad.dot(&old_grad).sqrt() < self.use_grad_norm_tol;

        let full_step = x + delta_x;
        let mut step_size = self
            .default_init_step_size
            .min(objective.max_step_size(x, &full_step));

        let start = Instant::now();
        loop {
            if !(step_size > 0.0) || !self.can_shrink(step_size) {
                self.timings.checking_for_nan_inf += start.elapsed().as_secs_f64();
                return None;
            }
            let trial = x + &(step_size * delta_x);
            if objective.is_step_valid(x, &trial) {
                objective.solution_changed(&trial);
                if objective.value(&trial).is_finite() {
                    break;
                }
            }
            step_size *= self.step_ratio;
            self.count_trial();
        }
        self.timings.checking_for_nan_inf += start.elapsed().as_secs_f64();

        Some(SearchStart {
            old_energy,
            old_grad,
            use_grad_norm,
            step_size,
        })
    }

    /// Position the objective at the accepted point, or back at `x` on failure.
    pub(crate) fn finish(
        &mut self,
        name: &str,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        step_size: f64,
        objective: &mut dyn Problem,
    ) -> f64 {
        if step_size.is_nan() {
            warn!(
                "[{}] failed to find a valid step (min step {:e}, {} trials)",
                name,
                self.current_min_step_size(),
                self.cur_iter
            );
            objective.solution_changed(x);
        } else {
            debug!("[{}] step size {:e} after {} trials", name, step_size, self.cur_iter);
            objective.solution_changed(&(x + &(step_size * delta_x)));
        }
        step_size
    }

    pub(crate) fn add_classical_time(&mut self, seconds: f64) {
        self.timings.classical_line_search += seconds;
    }

    pub fn set_is_final_strategy(&mut self, is_final: bool) {
        self.is_final_strategy = is_final;
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn timings(&self) -> LineSearchTimings {
        self.timings
    }

    pub fn reset_times(&mut self) {
        self.iterations = 0;
        self.timings = LineSearchTimings::default();
    }
}

#[cfg(test)]
pub(crate) mod test_problems {
    use crate::problem::Problem;
    use ndarray::Array1;

    /// `f(x) = 0.5 ‖x‖²`, optionally undefined past a radius.
    pub struct HalfSquaredNorm {
        pub invalid_beyond: Option<f64>,
        pub solution_changes: usize,
        pub last_position: Option<Array1<f64>>,
    }

    impl HalfSquaredNorm {
        pub fn new() -> Self {
            Self {
                invalid_beyond: None,
                solution_changes: 0,
                last_position: None,
            }
        }
    }

    impl Problem for HalfSquaredNorm {
        fn value(&mut self, x: &Array1<f64>) -> f64 {
            match self.invalid_beyond {
                Some(r) if x.dot(x).sqrt() > r => f64::NAN,
                _ => 0.5 * x.dot(x),
            }
        }

        fn gradient(&mut self, x: &Array1<f64>, grad: &mut Array1<f64>) {
            grad.assign(x);
        }

        fn solution_changed(&mut self, x: &Array1<f64>) {
            self.solution_changes += 1;
            self.last_position = Some(x.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_problems::HalfSquaredNorm;
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    fn params(method: &str) -> LineSearchParams {
        LineSearchParams {
            method: method.to_string(),
            ..LineSearchParams::default()
        }
    }

    #[test]
    fn test_factory_names() {
        for method in available_methods() {
            let search = create(&params(method)).unwrap();
            assert_that(&search.name()).is_equal_to(method);
        }
        assert!(matches!(
            create(&params("Bisection")),
            Err(SolverError::UnknownLineSearch(_))
        ));
    }

    #[test]
    fn test_begin_shrinks_past_nan_region() {
        let mut base = LineSearchBase::new(&params("Armijo"));
        let mut problem = HalfSquaredNorm::new();
        problem.invalid_beyond = Some(2.0);
        // x + dx lies at radius 5, x + 0.5 dx at radius 3, x + 0.25 dx at radius 2.
        let x = array![1.0, 0.0];
        let dx = array![4.0, 0.0];
        let start = base.begin(&x, &dx, &mut problem).unwrap();
        assert_that(&start.step_size).is_close_to(0.25, 1e-15);
        assert_that(&start.old_energy).is_close_to(0.5, 1e-15);
        assert_that(&base.iterations()).is_equal_to(2);
    }

    #[test]
    fn test_final_strategy_relaxes_limits() {
        let mut base = LineSearchBase::new(&params("Armijo"));
        assert_that(&base.current_max_step_size_iter()).is_equal_to(30);
        base.set_is_final_strategy(true);
        assert_that(&base.current_max_step_size_iter()).is_equal_to(100);
        assert_that(&base.current_min_step_size()).is_close_to(1e-20, 1e-30);
    }
}
