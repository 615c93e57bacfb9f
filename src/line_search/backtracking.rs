use super::{LineSearch, LineSearchBase, LineSearchTimings};
use crate::problem::Problem;
use ndarray::Array1;
use std::time::Instant;

/// When a backtracking trial point is accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcceptanceRule {
    /// Any strict energy decrease.
    Decrease,
    /// Sufficient decrease `f(x + t Δx) <= f(x) + c t Δx·∇f(x)`.
    Armijo { c: f64 },
    /// Accept unless the energy grows by more than `max_energy_incre · |f(x)|`.
    /// A negative value accepts every admissible step.
    EnergyIncrease { max_energy_incre: f64 },
}

/// Halves the step until the acceptance rule holds.
#[derive(Debug, Clone)]
pub struct Backtracking {
    base: LineSearchBase,
    rule: AcceptanceRule,
}

impl Backtracking {
    pub fn new(base: LineSearchBase, rule: AcceptanceRule) -> Self {
        Self { base, rule }
    }

    pub fn rule(&self) -> AcceptanceRule {
        self.rule
    }

    #[allow(clippy::too_many_arguments)]
    fn accepts(
        &self,
        objective: &mut dyn Problem,
        use_grad_norm: bool,
        old_energy: f64,
        old_grad: &Array1<f64>,
        delta_x: &Array1<f64>,
        new_x: &Array1<f64>,
        new_energy: f64,
        step_size: f64,
    ) -> bool {
        if let AcceptanceRule::EnergyIncrease { max_energy_incre } = self.rule {
            return max_energy_incre < 0.0
                || new_energy <= old_energy + old_energy.abs() * max_energy_incre;
        }
        if use_grad_norm {
            let mut new_grad = Array1::zeros(new_x.len());
            objective.gradient(new_x, &mut new_grad);
            return new_grad.dot(&new_grad) < old_grad.dot(old_grad);
        }
        match self.rule {
            AcceptanceRule::Decrease => new_energy < old_energy,
            AcceptanceRule::Armijo { c } => {
                new_energy <= old_energy + c * step_size * delta_x.dot(old_grad)
            }
            AcceptanceRule::EnergyIncrease { .. } => true,
        }
    }
}

impl LineSearch for Backtracking {
    fn name(&self) -> &'static str {
        match self.rule {
            AcceptanceRule::Decrease => "Backtracking",
            AcceptanceRule::Armijo { .. } => "Armijo",
            AcceptanceRule::EnergyIncrease { .. } => "None",
        }
    }

    fn line_search(
        &mut self,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        objective: &mut dyn Problem,
    ) -> f64 {
        let name = self.name();
        let Some(start) = self.base.begin(x, delta_x, objective) else {
            return self.base.finish(name, x, delta_x, f64::NAN, objective);
        };

        let timer = Instant::now();
        let mut step_size = start.step_size;
        let mut accepted = f64::NAN;
        while self.base.can_shrink(step_size) {
            let new_x = x + &(step_size * delta_x);
            objective.solution_changed(&new_x);

            if objective.is_step_valid(x, &new_x) {
                let new_energy = objective.value(&new_x);
                if new_energy.is_finite()
                    && self.accepts(
                        objective,
                        start.use_grad_norm,
                        start.old_energy,
                        &start.old_grad,
                        delta_x,
                        &new_x,
                        new_energy,
                        step_size,
                    )
                {
                    accepted = step_size;
                    break;
                }
            }

            step_size *= self.base.step_ratio;
            self.base.count_trial();
        }
        self.base.add_classical_time(timer.elapsed().as_secs_f64());

        self.base.finish(name, x, delta_x, accepted, objective)
    }

    fn set_is_final_strategy(&mut self, is_final: bool) {
        self.base.set_is_final_strategy(is_final);
    }

    fn set_use_grad_norm_tol(&mut self, tol: f64) {
        self.base.use_grad_norm_tol = tol;
    }

    fn iterations(&self) -> usize {
        self.base.iterations()
    }

    fn timings(&self) -> LineSearchTimings {
        self.base.timings()
    }

    fn reset_times(&mut self) {
        self.base.reset_times();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_problems::HalfSquaredNorm;
    use super::*;
    use crate::params::LineSearchParams;
    use ndarray::array;
    use spectral::prelude::*;

    fn search(rule: AcceptanceRule) -> Backtracking {
        Backtracking::new(LineSearchBase::new(&LineSearchParams::default()), rule)
    }

    #[test]
    fn test_armijo_accepts_full_newton_step() {
        let mut problem = HalfSquaredNorm::new();
        let x = array![2.0, -3.0];
        let dx = -&x;
        let t = search(AcceptanceRule::Armijo { c: 1e-4 }).line_search(&x, &dx, &mut problem);
        assert_that(&t).is_close_to(1.0, 1e-15);
        // The objective is left at the accepted point.
        let at = problem.last_position.unwrap();
        assert_that(&at.dot(&at)).is_close_to(0.0, 1e-15);
    }

    #[test]
    fn test_armijo_shrinks_overlong_step() {
        let mut problem = HalfSquaredNorm::new();
        let x = array![1.0];
        // Stepping by 4 lands at -3, far worse than 1; 0.5 lands at -1 (no decrease),
        // 0.25 lands at 0.
        let dx = array![-4.0];
        let t = search(AcceptanceRule::Armijo { c: 1e-4 }).line_search(&x, &dx, &mut problem);
        assert_that(&t).is_close_to(0.25, 1e-15);
        let new_x = &x + &(t * &dx);
        let decrease = 0.5 * new_x.dot(&new_x) - 0.5;
        assert_that(&decrease).is_less_than_or_equal_to(1e-4 * t * dx.dot(&x));
    }

    #[test]
    fn test_ascent_direction_fails_and_restores() {
        let mut problem = HalfSquaredNorm::new();
        let x = array![1.0, 1.0];
        let dx = array![1.0, 1.0];
        let mut ls = search(AcceptanceRule::Decrease);
        let t = ls.line_search(&x, &dx, &mut problem);
        assert_that(&t.is_nan()).is_true();
        assert_that(&problem.last_position.unwrap()).is_equal_to(x);
        assert_that(&ls.iterations()).is_equal_to(30);
    }

    #[test]
    fn test_energy_increase_rule() {
        let x = array![1.0];
        let dx = array![-3.0];
        // Full step lands at -2: energy 2.0 vs 0.5.
        let mut problem = HalfSquaredNorm::new();
        let t = search(AcceptanceRule::EnergyIncrease { max_energy_incre: -1.0 })
            .line_search(&x, &dx, &mut problem);
        assert_that(&t).is_close_to(1.0, 1e-15);

        let mut problem = HalfSquaredNorm::new();
        let t = search(AcceptanceRule::EnergyIncrease { max_energy_incre: 0.0 })
            .line_search(&x, &dx, &mut problem);
        // 0.5 lands at -0.5 with energy 0.125.
        assert_that(&t).is_close_to(0.5, 1e-15);
    }

    #[test]
    fn test_gradient_norm_criterion_near_optimum() {
        let mut problem = HalfSquaredNorm::new();
        let x = array![1e-3];
        let dx = array![-2e-3];
        let mut ls = search(AcceptanceRule::Decrease);
        ls.set_use_grad_norm_tol(1.0);
        // Full step reaches -1e-3: same gradient norm, rejected. Half step reaches 0.
        let t = ls.line_search(&x, &dx, &mut problem);
        assert_that(&t).is_close_to(0.5, 1e-15);
    }

    #[test]
    fn test_names() {
        assert_that(&search(AcceptanceRule::Decrease).name()).is_equal_to("Backtracking");
        assert_that(&search(AcceptanceRule::Armijo { c: 0.1 }).name()).is_equal_to("Armijo");
        assert_that(&search(AcceptanceRule::EnergyIncrease { max_energy_incre: 0.0 }).name())
            .is_equal_to("None");
    }
}
