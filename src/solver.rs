//! The minimization engine.
//!
//! A [`Solver`] owns an ordered ladder of descent strategies and one line search.
//! Each iteration asks the active strategy for a direction, lets the line search
//! scale it, and checks the stopping criteria. A strategy that cannot produce a
//! usable direction or step first gets a chance to recover through
//! [`DescentStrategy::handle_error`]; after that the engine moves down the ladder to
//! the next, more robust strategy without recomputing the energy or gradient. A
//! fallback that succeeds for its iteration budget hands control back to the primary
//! strategy, and every strategy forgets its history.

use crate::box_solver::BoxConstraints;
use crate::criteria::{Criteria, Status, check_convergence};
use crate::descent_strategies::{self, DescentStrategy};
use crate::error::{ErrorCode, SolverError, SolverResult, StrategyFailure};
use crate::info::{SolverInfo, StrategyInfo, Timings};
use crate::line_search::{self, LineSearch};
use crate::params::SolverParams;
use crate::problem::Problem;
use ndarray::Array1;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A proposed direction the engine refused, with the numbers worth logging.
struct Rejection {
    failure: StrategyFailure,
    step_norm: f64,
    descent: f64,
}

fn vet_direction(
    direction: Option<Array1<f64>>,
    grad: &Array1<f64>,
    grad_norm: f64,
    require_descent: bool,
) -> Result<Array1<f64>, Rejection> {
    let Some(direction) = direction else {
        return Err(Rejection {
            failure: StrategyFailure::InvalidDirection,
            step_norm: f64::NAN,
            descent: f64::NAN,
        });
    };
    let step_norm = direction.dot(&direction).sqrt();
    let descent = direction.dot(grad);
    if direction.iter().any(|v| !v.is_finite()) {
        return Err(Rejection {
            failure: StrategyFailure::NonFiniteDirection,
            step_norm,
            descent,
        });
    }
    if require_descent && grad_norm != 0.0 && descent >= 0.0 {
        return Err(Rejection {
            failure: StrategyFailure::InvalidDirection,
            step_norm,
            descent,
        });
    }
    Ok(direction)
}

pub struct Solver {
    name: String,
    strategies: Vec<Box<dyn DescentStrategy>>,
    iterations_per_strategy: Vec<usize>,
    line_search: Box<dyn LineSearch>,
    box_constraints: Option<BoxConstraints>,

    stop: Criteria,
    current: Criteria,
    status: Status,
    error_code: ErrorCode,

    first_grad_norm_tol: f64,
    use_grad_norm_tol: f64,
    f_delta_step_tol: usize,
    allow_out_of_iterations: bool,
    debug_fd_eps: f64,
    solver_info_log: bool,
    export_energy: String,

    strategy_index: usize,
    previous_strategy_index: usize,
    strategy_iterations: usize,

    start_time: Instant,
    timings: Timings,
    info: SolverInfo,
}

impl Solver {
    /// An unconstrained solver for `params.solver`.
    ///
    /// `characteristic_length` scales the step, energy-change and gradient thresholds
    /// to the size of the problem.
    pub fn new(params: &SolverParams, characteristic_length: f64) -> SolverResult<Self> {
        params.validate()?;
        let strategies = descent_strategies::create_ladder(params)?;
        let line_search = line_search::create(&params.line_search)?;
        Self::with_strategies(params, strategies, line_search, characteristic_length)
    }

    /// A solver over an explicit ladder; index 0 is the primary strategy.
    pub fn with_strategies(
        params: &SolverParams,
        strategies: Vec<Box<dyn DescentStrategy>>,
        line_search: Box<dyn LineSearch>,
        characteristic_length: f64,
    ) -> SolverResult<Self> {
        if strategies.is_empty() {
            return Err(SolverError::InvalidParameters(
                "a solver needs at least one descent strategy".to_string(),
            ));
        }
        if !(characteristic_length > 0.0) {
            return Err(SolverError::InvalidParameters(format!(
                "characteristic length must be positive, got {characteristic_length}"
            )));
        }
        let iterations_per_strategy = params.iterations_per_strategy.resolve(strategies.len())?;

        let stop = Criteria {
            iterations: params.max_iterations,
            x_delta: params.x_delta * characteristic_length,
            f_delta: params.advanced.f_delta * characteristic_length,
            grad_norm: params.grad_norm * characteristic_length,
            condition: 0.0,
        };

        Ok(Self {
            name: params.solver.clone(),
            strategies,
            iterations_per_strategy,
            line_search,
            box_constraints: None,
            stop,
            current: Criteria::start(),
            status: Status::NotStarted,
            error_code: ErrorCode::Success,
            first_grad_norm_tol: params.first_grad_norm_tol * characteristic_length,
            use_grad_norm_tol: params.line_search.use_grad_norm_tol * characteristic_length,
            f_delta_step_tol: params.advanced.f_delta_step_tol,
            allow_out_of_iterations: params.allow_out_of_iterations,
            debug_fd_eps: params.debug_fd_eps,
            solver_info_log: params.solver_info_log,
            export_energy: params.export_energy.clone(),
            strategy_index: 0,
            previous_strategy_index: 0,
            strategy_iterations: 0,
            start_time: Instant::now(),
            timings: Timings::default(),
            info: SolverInfo::default(),
        })
    }

    /// Restrict the iterates to a box; strategies then receive the bounds.
    pub fn with_box_constraints(mut self, constraints: BoxConstraints) -> Self {
        self.box_constraints = Some(constraints);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn line_search_name(&self) -> &'static str {
        self.line_search.name()
    }

    pub fn current_strategy_name(&self) -> &'static str {
        self.strategies[self.strategy_index].name()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Metrics of the last iteration.
    pub fn criteria(&self) -> &Criteria {
        &self.current
    }

    /// The (scaled) stopping thresholds.
    pub fn stop_criteria(&self) -> &Criteria {
        &self.stop
    }

    pub fn info(&self) -> &SolverInfo {
        &self.info
    }

    fn reset(&mut self, ndof: usize) {
        self.current = Criteria::start();
        self.status = Status::NotStarted;
        self.error_code = ErrorCode::Success;
        self.strategy_index = 0;
        self.previous_strategy_index = 0;
        self.strategy_iterations = 0;
        for strategy in &mut self.strategies {
            strategy.reset(ndof);
            strategy.reset_times();
        }
        self.line_search.reset_times();
        self.timings = Timings::default();
        self.start_time = Instant::now();
    }

    fn grad_norm(&self, x: &Array1<f64>, grad: &Array1<f64>) -> f64 {
        match &self.box_constraints {
            Some(bc) => bc.projected_grad_norm(x, grad),
            None => grad.dot(grad).sqrt(),
        }
    }

    /// Minimize `objective` starting from `x`, which holds the last iterate on return.
    ///
    /// Returns the final [`Status`]. A callback that stops the run yields
    /// `Ok(Status::Continue)`. Running out of iterations is an error unless
    /// `allow_out_of_iterations` is set.
    pub fn minimize(
        &mut self,
        objective: &mut dyn Problem,
        x: &mut Array1<f64>,
    ) -> SolverResult<Status> {
        let ndof = x.len();
        if let Some(bc) = &self.box_constraints {
            bc.validate(ndof)?;
        }
        self.reset(ndof);

        self.line_search.set_use_grad_norm_tol(self.use_grad_norm_tol);
        objective.solution_changed(x);

        // The gradient-norm stop uses first_grad_norm_tol for the first iteration only.
        let mut stop = self.stop;
        stop.grad_norm = self.first_grad_norm_tol;

        let mut energy_log = if self.export_energy.is_empty() {
            None
        } else {
            Some(BufWriter::new(File::create(&self.export_energy)?))
        };

        objective.save_to_file(x);

        let initial_energy = objective.value(x);
        info!(
            "[{}][{}] Starting optimization with {} variables, f₀={:e} (stopping criteria: {})",
            self.name,
            self.line_search.name(),
            ndof,
            initial_energy,
            self.stop
        );
        self.update_solver_info(initial_energy);

        let mut old_energy = f64::NAN;
        let mut f_delta_streak = 0usize;
        let mut grad = Array1::zeros(ndof);

        loop {
            self.current.reset_measurements();

            let timer = Instant::now();
            let energy = objective.value(x);
            self.timings.obj_fun += timer.elapsed().as_secs_f64();
            if !energy.is_finite() {
                return Err(self.fail_on_nan("f(x)", energy));
            }

            let f_delta = (old_energy - energy).abs();
            self.current.f_delta = if f_delta_streak >= self.f_delta_step_tol {
                f_delta
            } else {
                f64::NAN
            };

            let timer = Instant::now();
            objective.gradient(x, &mut grad);
            self.timings.grad += timer.elapsed().as_secs_f64();

            let grad_norm = self.grad_norm(x, &grad);
            if !grad_norm.is_finite() {
                return Err(self.fail_on_nan("gradient", energy));
            }

            if self.debug_fd_eps > 0.0 {
                self.check_gradient(objective, x, &grad);
            }

            if let Some(log) = energy_log.as_mut() {
                writeln!(log, "{:.12e}, {:.12e}", energy, grad_norm)?;
            }

            self.current.grad_norm = grad_norm;
            self.status = check_convergence(&stop, &self.current);
            if self.status.is_terminal() {
                break;
            }

            let Some((delta_x, step_size)) = self.find_step(objective, x, &grad, grad_norm, energy, &stop)?
            else {
                break;
            };

            x.scaled_add(step_size, &delta_x);
            old_energy = energy;
            self.count_strategy_iteration(ndof);

            if objective.stop(x) {
                self.status = Status::UserDefined;
                self.error_code = ErrorCode::Success;
            }

            objective.post_step(self.current.iterations, x);

            if f_delta < self.stop.f_delta {
                f_delta_streak += 1;
            } else {
                f_delta_streak = 0;
            }

            debug!(
                "[{}][{}] iter={} f={:e} Δf={:e} ‖∇f‖={:e} ‖Δx‖={:e} Δx⋅∇f(x)={:e} step={:e} ‖step‖={:e}",
                self.name,
                self.line_search.name(),
                self.current.iterations,
                energy,
                f_delta,
                grad_norm,
                self.current.x_delta,
                delta_x.dot(&grad),
                step_size,
                step_size * self.current.x_delta
            );

            self.current.iterations += 1;
            if self.current.iterations >= self.stop.iterations && self.status == Status::Continue {
                self.status = Status::IterationLimit;
            }

            self.update_solver_info(energy);
            if self.solver_info_log {
                info!("[{}] {}", self.name, serde_json::to_string(&self.info)?);
            }
            objective.save_to_file(x);

            stop.grad_norm = self.stop.grad_norm;

            if !(objective.callback(&self.current, x) && self.status == Status::Continue) {
                break;
            }
        }

        self.finish(objective, x)
    }

    /// The inner retry loop: ask the active strategy for a direction and a step,
    /// escalating down the ladder on failure. `None` when the direction is small enough
    /// to stop.
    fn find_step(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        grad_norm: f64,
        energy: f64,
        stop: &Criteria,
    ) -> SolverResult<Option<(Array1<f64>, f64)>> {
        loop {
            let is_final = self.strategy_index + 1 == self.strategies.len();
            self.line_search.set_is_final_strategy(is_final);

            let direction = match &self.box_constraints {
                Some(bc) => {
                    let timer = Instant::now();
                    let lower = bc.lower_bound(x, true);
                    let upper = bc.upper_bound(x, true);
                    self.timings.constraint_set_update += timer.elapsed().as_secs_f64();
                    self.strategies[self.strategy_index]
                        .compute_boxed_update_direction(objective, x, grad, &lower, &upper)
                }
                None => self.strategies[self.strategy_index].compute_update_direction(objective, x, grad),
            };
            let require_descent = self.strategies[self.strategy_index].is_direction_descent();

            let delta_x = match vet_direction(direction, grad, grad_norm, require_descent) {
                Ok(delta_x) => delta_x,
                Err(rejection) => {
                    self.escalate(rejection, grad_norm, energy)?;
                    continue;
                }
            };

            self.current.x_delta = delta_x.dot(&delta_x).sqrt();
            self.status = check_convergence(stop, &self.current);
            if self.status.is_terminal() {
                return Ok(None);
            }

            let timer = Instant::now();
            let step_size = self.line_search.line_search(x, &delta_x, objective);
            self.timings.line_search += timer.elapsed().as_secs_f64();

            if step_size.is_nan() {
                let rejection = Rejection {
                    failure: StrategyFailure::LineSearchFailed,
                    step_norm: self.current.x_delta,
                    descent: delta_x.dot(grad),
                };
                self.escalate(rejection, grad_norm, energy)?;
                continue;
            }
            return Ok(Some((delta_x, step_size)));
        }
    }

    /// Give the failing strategy a chance to recover, otherwise move down the ladder.
    fn escalate(&mut self, rejection: Rejection, grad_norm: f64, energy: f64) -> SolverResult<()> {
        let failing = self.strategies[self.strategy_index].name();
        if self.strategies[self.strategy_index].handle_error() {
            debug!(
                "[{}][{}] {}; retrying after recovery",
                failing,
                self.line_search.name(),
                rejection.failure
            );
            return Ok(());
        }

        if self.strategy_index + 1 >= self.strategies.len() {
            self.status = Status::UserDefined;
            self.error_code = ErrorCode::StrategiesExhausted;
            self.update_solver_info(energy);
            return Err(SolverError::StrategiesExhausted {
                strategy: failing.to_string(),
                line_search: self.line_search.name().to_string(),
                failure: rejection.failure,
                step_norm: rejection.step_norm,
                grad_norm,
                descent: rejection.descent,
            }
            .log());
        }

        self.strategy_index += 1;
        debug!(
            "[{}][{}] {} (‖Δx‖={:e}; ‖g‖={:e}; Δx⋅g={:e}); reverting to {}",
            failing,
            self.line_search.name(),
            rejection.failure,
            rejection.step_norm,
            grad_norm,
            rejection.descent,
            self.current_strategy_name()
        );
        Ok(())
    }

    fn count_strategy_iteration(&mut self, ndof: usize) {
        if self.strategy_index != self.previous_strategy_index {
            self.strategy_iterations = 0;
        }
        self.strategy_iterations += 1;

        let budget = self.iterations_per_strategy[self.strategy_index];
        if self.strategy_index != 0 && self.strategy_iterations >= budget {
            debug!(
                "[{}] {} successful iterations with {}; returning to {}",
                self.name,
                self.strategy_iterations,
                self.current_strategy_name(),
                self.strategies[0].name()
            );
            self.strategy_index = 0;
            for strategy in &mut self.strategies {
                strategy.reset(ndof);
            }
        }
        self.previous_strategy_index = self.strategy_index;
    }

    /// Central difference along the normalized gradient. Leaves the objective at `x`.
    fn check_gradient(&self, objective: &mut dyn Problem, x: &Array1<f64>, grad: &Array1<f64>) -> bool {
        let norm = grad.dot(grad).sqrt();
        if norm == 0.0 {
            return true;
        }
        let direction = grad / norm;
        let eps = self.debug_fd_eps;

        let forward = x + &(eps * &direction);
        objective.solution_changed(&forward);
        let f_forward = objective.value(&forward);
        let backward = x - &(eps * &direction);
        objective.solution_changed(&backward);
        let f_backward = objective.value(&backward);
        objective.solution_changed(x);

        let fd = (f_forward - f_backward) / (2.0 * eps);
        let analytic = grad.dot(&direction);
        let diff = (fd - analytic).abs();
        let passed = diff < 1e-8 || diff < 0.1 * analytic.abs();
        if passed {
            info!(
                "[{}] Gradient check passed: finite difference {:e}, analytic {:e}",
                self.name, fd, analytic
            );
        } else {
            error!(
                "[{}] Gradient check failed: finite difference {:e}, analytic {:e}",
                self.name, fd, analytic
            );
        }
        passed
    }

    fn fail_on_nan(&mut self, quantity: &'static str, energy: f64) -> SolverError {
        self.status = Status::UserDefined;
        self.error_code = ErrorCode::NanEncountered;
        self.update_solver_info(energy);
        SolverError::NanEncountered {
            quantity,
            iteration: self.current.iterations,
            strategy: self.current_strategy_name().to_string(),
            line_search: self.line_search.name().to_string(),
        }
        .log()
    }

    fn update_solver_info(&mut self, energy: f64) {
        self.timings.total = self.start_time.elapsed().as_secs_f64();
        let per_iteration = self.current.iterations.max(1) as f64;

        let mut strategy_info = StrategyInfo::new();
        for strategy in &self.strategies {
            strategy.update_solver_info(&mut strategy_info, per_iteration);
        }
        let ls_timings = self.line_search.timings();

        self.info.solver = self.name.clone();
        self.info.line_search = self.line_search.name().to_string();
        self.info.strategy = self.current_strategy_name().to_string();
        self.info.status = self.status;
        self.info.error_code = self.error_code;
        self.info.energy = energy;
        self.info.set_metrics(&self.current);
        self.info.set_timings(&self.timings, per_iteration);
        self.info.line_search_iterations = self.line_search.iterations();
        self.info.line_search_time_checking_for_nan_inf = ls_timings.checking_for_nan_inf / per_iteration;
        self.info.line_search_time_classical_line_search =
            ls_timings.classical_line_search / per_iteration;
        self.info.strategy_info = strategy_info;
    }

    fn finish(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
    ) -> SolverResult<Status> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if self.status == Status::GradNormTolerance {
            info!(
                "[{}][{}] Finished: {} took {:.3}s ({})",
                self.name,
                self.line_search.name(),
                self.status,
                elapsed,
                self.current
            );
        } else {
            warn!(
                "[{}][{}] Finished: {} took {:.3}s ({})",
                self.name,
                self.line_search.name(),
                self.status,
                elapsed,
                self.current
            );
        }
        debug!(
            "[timing] grad {:.3}s, line search {:.3}s, constraint set update {:.3}s, obj fun {:.3}s",
            self.timings.grad, self.timings.line_search, self.timings.constraint_set_update, self.timings.obj_fun
        );

        let final_energy = objective.value(x);
        self.update_solver_info(final_energy);

        match self.status {
            Status::IterationLimit if !self.allow_out_of_iterations => Err(SolverError::IterationLimit {
                solver: self.name.clone(),
                line_search: self.line_search.name().to_string(),
                limit: self.stop.iterations,
            }
            .log()),
            Status::UserDefined if self.error_code != ErrorCode::Success => {
                Err(SolverError::FailedToMinimize {
                    solver: self.name.clone(),
                    line_search: self.line_search.name().to_string(),
                }
                .log())
            }
            status => Ok(status),
        }
    }
}
