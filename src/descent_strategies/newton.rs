use super::DescentStrategy;
use crate::error::SolverResult;
use crate::info::StrategyInfo;
use crate::linalg::{LinearSolver, create_linear_solver};
use crate::params::NewtonParams;
use crate::problem::Problem;
use ndarray::{Array1, Array2};
use serde_json::json;
use std::time::Instant;
use tracing::debug;

/// Hessian assembly and factorization shared by both Newton flavours.
struct NewtonCore {
    linear_solver: Box<dyn LinearSolver>,
    assembly_time: f64,
    inverting_time: f64,
}

impl NewtonCore {
    fn new(params: &NewtonParams) -> SolverResult<Self> {
        Ok(Self {
            linear_solver: create_linear_solver(&params.linear_solver)?,
            assembly_time: 0.0,
            inverting_time: 0.0,
        })
    }

    /// Solve `(H + weight I) Δx = -g`.
    fn direction(
        &mut self,
        name: &str,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        weight: f64,
    ) -> Option<Array1<f64>> {
        let timer = Instant::now();
        let hessian = objective.hessian(x);
        self.assembly_time += timer.elapsed().as_secs_f64();

        let Some(mut hessian) = hessian else {
            debug!("[{}] objective provides no Hessian", name);
            return None;
        };
        if hessian.dim() != (x.len(), x.len()) {
            debug!("[{}] Hessian has shape {:?}, expected {}x{}", name, hessian.dim(), x.len(), x.len());
            return None;
        }
        if weight > 0.0 {
            hessian += &(Array2::<f64>::eye(x.len()) * weight);
        }

        let timer = Instant::now();
        let rhs = -grad;
        let solved = self.linear_solver.solve(&hessian, &rhs);
        self.inverting_time += timer.elapsed().as_secs_f64();

        match solved {
            Ok(direction) => Some(direction),
            Err(e) => {
                debug!("[{}] linear solve with {} failed: {}", name, self.linear_solver.name(), e);
                None
            }
        }
    }

    fn update_solver_info(&self, prefix: &str, info: &mut StrategyInfo, per_iteration: f64) {
        info.insert(
            format!("{prefix}_time_assembly"),
            json!(self.assembly_time / per_iteration),
        );
        info.insert(
            format!("{prefix}_time_inverting"),
            json!(self.inverting_time / per_iteration),
        );
    }

    fn reset_times(&mut self) {
        self.assembly_time = 0.0;
        self.inverting_time = 0.0;
    }
}

/// Newton's method on the dense Hessian returned by [`Problem::hessian`].
pub struct Newton {
    core: NewtonCore,
}

impl Newton {
    pub fn new(params: &NewtonParams) -> SolverResult<Self> {
        Ok(Self {
            core: NewtonCore::new(params)?,
        })
    }
}

impl DescentStrategy for Newton {
    fn name(&self) -> &'static str {
        "Newton"
    }

    fn reset(&mut self, _ndof: usize) {}

    fn compute_update_direction(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let name = self.name();
        self.core.direction(name, objective, x, grad, 0.0)
    }

    fn update_solver_info(&self, info: &mut StrategyInfo, per_iteration: f64) {
        self.core.update_solver_info("newton", info, per_iteration);
    }

    fn reset_times(&mut self) {
        self.core.reset_times();
    }
}

/// Newton's method on `H + w I`.
///
/// Each failure multiplies `w` by `reg_weight_inc`; once it would exceed
/// `reg_weight_max` the strategy gives up and `w` starts over at `reg_weight_min`.
pub struct RegularizedNewton {
    core: NewtonCore,
    reg_weight: f64,
    reg_weight_min: f64,
    reg_weight_max: f64,
    reg_weight_inc: f64,
}

impl RegularizedNewton {
    pub fn new(params: &NewtonParams) -> SolverResult<Self> {
        Ok(Self {
            core: NewtonCore::new(params)?,
            reg_weight: params.reg_weight_min,
            reg_weight_min: params.reg_weight_min,
            reg_weight_max: params.reg_weight_max,
            reg_weight_inc: params.reg_weight_inc,
        })
    }

    pub fn reg_weight(&self) -> f64 {
        self.reg_weight
    }
}

impl DescentStrategy for RegularizedNewton {
    fn name(&self) -> &'static str {
        "RegularizedNewton"
    }

    fn reset(&mut self, _ndof: usize) {
        self.reg_weight = self.reg_weight_min;
    }

    fn compute_update_direction(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let name = self.name();
        let weight = self.reg_weight;
        self.core.direction(name, objective, x, grad, weight)
    }

    fn handle_error(&mut self) -> bool {
        let next = self.reg_weight * self.reg_weight_inc;
        if next > self.reg_weight_max {
            self.reg_weight = self.reg_weight_min;
            return false;
        }
        debug!("[{}] increasing weight to {:e}", self.name(), next);
        self.reg_weight = next;
        true
    }

    fn update_solver_info(&self, info: &mut StrategyInfo, per_iteration: f64) {
        self.core
            .update_solver_info("regularized_newton", info, per_iteration);
        info.insert("reg_weight".to_string(), json!(self.reg_weight));
    }

    fn reset_times(&mut self) {
        self.core.reset_times();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    /// `f = ½ xᵀ A x - bᵀ x` with a fixed Hessian `A`.
    struct Quadratic {
        a: Array2<f64>,
        b: Array1<f64>,
    }

    impl Problem for Quadratic {
        fn value(&mut self, x: &Array1<f64>) -> f64 {
            0.5 * x.dot(&self.a.dot(x)) - self.b.dot(x)
        }

        fn gradient(&mut self, x: &Array1<f64>, grad: &mut Array1<f64>) {
            grad.assign(&(self.a.dot(x) - &self.b));
        }

        fn hessian(&mut self, _x: &Array1<f64>) -> Option<Array2<f64>> {
            Some(self.a.clone())
        }
    }

    #[test]
    fn test_newton_step_hits_minimizer() {
        let mut problem = Quadratic {
            a: array![[4.0, 1.0], [1.0, 3.0]],
            b: array![1.0, 2.0],
        };
        let x = array![5.0, -7.0];
        let mut grad = Array1::zeros(2);
        problem.gradient(&x, &mut grad);

        let mut newton = Newton::new(&NewtonParams::default()).unwrap();
        let d = newton.compute_update_direction(&mut problem, &x, &grad).unwrap();
        let x_star = &x + &d;
        let mut g_star = Array1::zeros(2);
        problem.gradient(&x_star, &mut g_star);
        assert_that(&g_star.dot(&g_star).sqrt()).is_less_than(1e-12);
    }

    #[test]
    fn test_no_hessian_means_no_direction() {
        let mut problem = crate::problem::FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let mut newton = Newton::new(&NewtonParams::default()).unwrap();
        let d = newton.compute_update_direction(&mut problem, &array![1.0], &array![2.0]);
        assert_that(&d.is_none()).is_true();
    }

    #[test]
    fn test_regularization_grows_then_gives_up() {
        let params = NewtonParams {
            reg_weight_min: 1e-2,
            reg_weight_max: 1.0,
            reg_weight_inc: 10.0,
            ..NewtonParams::default()
        };
        let mut newton = RegularizedNewton::new(&params).unwrap();
        assert_that(&newton.handle_error()).is_true();
        assert_that(&newton.reg_weight()).is_close_to(0.1, 1e-12);
        assert_that(&newton.handle_error()).is_true();
        assert_that(&newton.handle_error()).is_false();
        assert_that(&newton.reg_weight()).is_close_to(1e-2, 1e-15);
    }

    #[test]
    fn test_regularization_fixes_singular_hessian() {
        let mut problem = Quadratic {
            a: array![[1.0, 0.0], [0.0, 0.0]],
            b: array![0.0, 0.0],
        };
        let x = array![1.0, 1.0];
        let grad = array![1.0, 0.0];

        let mut plain = Newton::new(&NewtonParams::default()).unwrap();
        assert_that(&plain.compute_update_direction(&mut problem, &x, &grad).is_none()).is_true();

        let mut regularized = RegularizedNewton::new(&NewtonParams::default()).unwrap();
        let d = regularized
            .compute_update_direction(&mut problem, &x, &grad)
            .unwrap();
        assert_that(&d.dot(&grad)).is_less_than(0.0);
    }

    #[test]
    fn test_unknown_linear_solver() {
        let params = NewtonParams {
            linear_solver: "Pardiso".to_string(),
            ..NewtonParams::default()
        };
        assert_that(&Newton::new(&params).is_err()).is_true();
    }
}
