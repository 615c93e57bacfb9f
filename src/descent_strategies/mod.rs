//! Descent strategies: the ways of turning a gradient into an update direction.
//!
//! A [`Solver`](crate::solver::Solver) holds an ordered ladder of strategies. Index 0
//! is the one named in the configuration; the last entry is the most robust fallback.

mod adam;
mod bfgs;
pub mod box_constraints;
mod gradient_descent;
mod lbfgs;
mod newton;

pub use adam::Adam;
pub use bfgs::Bfgs;
pub use box_constraints::{Lbfgsb, Mma};
pub use gradient_descent::GradientDescent;
pub use lbfgs::Lbfgs;
pub use newton::{Newton, RegularizedNewton};

use crate::error::{SolverError, SolverResult};
use crate::info::StrategyInfo;
use crate::params::SolverParams;
use crate::problem::Problem;
use ndarray::{Array1, Zip};

pub trait DescentStrategy {
    fn name(&self) -> &'static str;

    /// Drop all history; called at the start of a minimization and whenever the
    /// ladder returns to its primary strategy.
    fn reset(&mut self, ndof: usize);

    /// An update direction at `x`, or `None` if the strategy cannot produce one.
    fn compute_update_direction(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>>;

    /// An update direction that keeps `x + direction` inside `[lower, upper]`.
    ///
    /// The default clamps the unconstrained direction.
    fn compute_boxed_update_direction(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let direction = self.compute_update_direction(objective, x, grad)?;
        Some(clamp_direction(x, &direction, lower, upper))
    }

    /// Whether the engine may reject directions with `Δx·g >= 0`.
    fn is_direction_descent(&self) -> bool {
        true
    }

    /// Try to recover internally after a failure. `true` means "retry me".
    fn handle_error(&mut self) -> bool {
        false
    }

    fn update_solver_info(&self, _info: &mut StrategyInfo, _per_iteration: f64) {}

    fn reset_times(&mut self) {}
}

/// `clip(x + direction, lower, upper) - x`.
pub fn clamp_direction(
    x: &Array1<f64>,
    direction: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> Array1<f64> {
    let mut clamped = Array1::zeros(x.len());
    Zip::from(&mut clamped)
        .and(x)
        .and(direction)
        .and(lower)
        .and(upper)
        .for_each(|c, &xi, &di, &lo, &hi| *c = (xi + di).max(lo).min(hi) - xi);
    clamped
}

/// Names accepted by [`create_ladder`].
pub fn available_solvers() -> Vec<&'static str> {
    vec![
        "BFGS",
        "DenseNewton",
        "Newton",
        "GradientDescent",
        "StochasticGradientDescent",
        "L-BFGS",
        "ADAM",
        "StochasticADAM",
    ]
}

/// The unconstrained ladder for `params.solver`, always ending in gradient descent.
pub fn create_ladder(params: &SolverParams) -> SolverResult<Vec<Box<dyn DescentStrategy>>> {
    let mut ladder: Vec<Box<dyn DescentStrategy>> = Vec::new();
    match params.solver.as_str() {
        "BFGS" => ladder.push(Box::new(Bfgs::new())),
        "DenseNewton" | "dense_newton" | "Newton" | "SparseNewton" | "sparse_newton" => {
            ladder.push(Box::new(Newton::new(&params.newton)?));
            ladder.push(Box::new(RegularizedNewton::new(&params.newton)?));
        }
        "LBFGS" | "L-BFGS" => ladder.push(Box::new(Lbfgs::new(params.lbfgs.history_size))),
        "GradientDescent" | "gradient_descent" => {}
        "StochasticGradientDescent" | "stochastic_gradient_descent" => ladder.push(Box::new(
            GradientDescent::stochastic(params.stochastic_gradient_descent.erase_component_probability),
        )),
        "ADAM" | "adam" => ladder.push(Box::new(Adam::new(&params.adam))),
        "StochasticADAM" | "stochastic_adam" => {
            ladder.push(Box::new(Adam::stochastic(&params.stochastic_adam)))
        }
        other => return Err(SolverError::UnknownSolver(other.to_string()).log()),
    }
    ladder.push(Box::new(GradientDescent::new()));
    Ok(ladder)
}
