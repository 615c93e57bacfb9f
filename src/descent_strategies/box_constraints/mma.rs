// Svanberg, "The method of moving asymptotes" (1987), bound-constrained case.

use crate::descent_strategies::DescentStrategy;
use crate::params::MmaParams;
use crate::problem::Problem;
use ndarray::Array1;
use tracing::debug;

const ALBEFA: f64 = 0.1;
const RAA0: f64 = 1e-5;

/// Method of moving asymptotes.
///
/// Around the current point each variable gets a convex approximation with poles at
/// the asymptotes `L < x < U`; the approximation is separable, so its minimizer over
/// the move-limited box has a closed form. The asymptotes widen while a variable keeps
/// moving in one direction and tighten when it oscillates.
///
/// The proposed point is not a descent step for the true objective, so this strategy
/// runs with the `None` line search.
#[derive(Debug, Clone)]
pub struct Mma {
    asymptote_init: f64,
    asymptote_incr: f64,
    asymptote_decr: f64,
    move_limit: f64,
    x_prev: Option<Array1<f64>>,
    x_prev2: Option<Array1<f64>>,
    lower_asymptote: Array1<f64>,
    upper_asymptote: Array1<f64>,
}

impl Mma {
    pub fn new(params: &MmaParams) -> Self {
        Self {
            asymptote_init: params.asymptote_init,
            asymptote_incr: params.asymptote_incr,
            asymptote_decr: params.asymptote_decr,
            move_limit: params.move_limit,
            x_prev: None,
            x_prev2: None,
            lower_asymptote: Array1::zeros(0),
            upper_asymptote: Array1::zeros(0),
        }
    }

    fn update_asymptotes(&mut self, x: &Array1<f64>, range: &Array1<f64>) {
        let n = x.len();
        match (&self.x_prev, &self.x_prev2) {
            (Some(x1), Some(x2)) if x1.len() == n && x2.len() == n && self.lower_asymptote.len() == n => {
                for i in 0..n {
                    let trend = (x[i] - x1[i]) * (x1[i] - x2[i]);
                    let factor = if trend > 0.0 {
                        self.asymptote_incr
                    } else if trend < 0.0 {
                        self.asymptote_decr
                    } else {
                        1.0
                    };
                    let r = range[i];
                    let lo = x[i] - factor * (x1[i] - self.lower_asymptote[i]);
                    let hi = x[i] + factor * (self.upper_asymptote[i] - x1[i]);
                    self.lower_asymptote[i] = lo.max(x[i] - 10.0 * r).min(x[i] - 0.01 * r);
                    self.upper_asymptote[i] = hi.max(x[i] + 0.01 * r).min(x[i] + 10.0 * r);
                }
            }
            _ => {
                self.lower_asymptote = x - &(range * self.asymptote_init);
                self.upper_asymptote = x + &(range * self.asymptote_init);
            }
        }
    }
}

impl DescentStrategy for Mma {
    fn name(&self) -> &'static str {
        "MMA"
    }

    fn reset(&mut self, _ndof: usize) {
        self.x_prev = None;
        self.x_prev2 = None;
        self.lower_asymptote = Array1::zeros(0);
        self.upper_asymptote = Array1::zeros(0);
    }

    /// MMA needs finite bounds.
    fn compute_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        _x: &Array1<f64>,
        _grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        debug!("[MMA] called without bounds");
        None
    }

    fn compute_boxed_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let range = upper - lower;
        if range.iter().any(|r| !r.is_finite() || *r < 0.0) {
            debug!("[MMA] bounds must be finite and ordered");
            return None;
        }
        self.update_asymptotes(x, &range);

        let mut target = Array1::zeros(x.len());
        for i in 0..x.len() {
            let r = range[i];
            if r == 0.0 {
                target[i] = lower[i];
                continue;
            }
            let (low, upp) = (self.lower_asymptote[i], self.upper_asymptote[i]);
            let alpha = lower[i]
                .max(low + ALBEFA * (x[i] - low))
                .max(x[i] - self.move_limit * r);
            let beta = upper[i]
                .min(upp - ALBEFA * (upp - x[i]))
                .min(x[i] + self.move_limit * r);

            let g_plus = grad[i].max(0.0);
            let g_minus = (-grad[i]).max(0.0);
            let p = (upp - x[i]).powi(2) * (1.001 * g_plus + 0.001 * g_minus + RAA0 / r);
            let q = (x[i] - low).powi(2) * (0.001 * g_plus + 1.001 * g_minus + RAA0 / r);
            let (sp, sq) = (p.sqrt(), q.sqrt());
            let minimizer = (sp * low + sq * upp) / (sp + sq);
            target[i] = minimizer.max(alpha).min(beta);
        }

        self.x_prev2 = self.x_prev.take();
        self.x_prev = Some(x.clone());
        Some(target - x)
    }

    fn is_direction_descent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnProblem;
    use ndarray::array;
    use spectral::prelude::*;

    fn projected_grad_norm(x: &Array1<f64>, g: &Array1<f64>, lo: f64, hi: f64) -> f64 {
        let projected = (x - g).mapv(|v| v.max(lo).min(hi)) - x;
        projected.dot(&projected).sqrt()
    }

    /// MMA steps, halved while they increase the energy, until the projected
    /// gradient is below `1e-6`.
    fn run(
        f: impl Fn(&Array1<f64>) -> (f64, Array1<f64>),
        x: &mut Array1<f64>,
        lo: f64,
        hi: f64,
    ) -> usize {
        let mut mma = Mma::new(&MmaParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let lower = Array1::from_elem(x.len(), lo);
        let upper = Array1::from_elem(x.len(), hi);
        for it in 0..100 {
            let (fx, g) = f(&*x);
            if projected_grad_norm(x, &g, lo, hi) <= 1e-6 {
                return it;
            }
            let d = mma
                .compute_boxed_update_direction(&mut problem, x, &g, &lower, &upper)
                .unwrap();
            let mut t = 1.0;
            while f(&(&*x + &(t * &d))).0 > fx {
                t *= 0.5;
            }
            x.scaled_add(t, &d);
            for xi in x.iter() {
                assert_that(xi).is_greater_than_or_equal_to(lo);
                assert_that(xi).is_less_than_or_equal_to(hi);
            }
        }
        100
    }

    #[test]
    fn test_interior_minimizer() {
        let mut x = array![4.0, 0.5];
        let f = |x: &Array1<f64>| {
            let r = x - 2.0;
            (r.dot(&r), 2.0 * r)
        };
        let iterations = run(f, &mut x, 0.0, 5.0);
        assert_that(&iterations).is_less_than(40);
        assert_that(&x[0]).is_close_to(2.0, 1e-5);
        assert_that(&x[1]).is_close_to(2.0, 1e-5);
    }

    #[test]
    fn test_minimizer_on_the_bounds() {
        let c = array![-1.0, 3.0, 7.0];
        let f = |x: &Array1<f64>| {
            let r = x - &c;
            (r.dot(&r), 2.0 * r)
        };
        let mut x = array![2.5, 2.5, 2.5];
        let iterations = run(f, &mut x, 0.0, 5.0);
        assert_that(&iterations).is_less_than(40);
        assert_that(&x[0]).is_close_to(0.0, 1e-5);
        assert_that(&x[1]).is_close_to(3.0, 1e-5);
        assert_that(&x[2]).is_close_to(5.0, 1e-5);
    }

    #[test]
    fn test_needs_bounds() {
        let mut mma = Mma::new(&MmaParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let x = array![1.0];
        assert_that(&mma.compute_update_direction(&mut problem, &x, &array![2.0]).is_none()).is_true();
        let unbounded = mma.compute_boxed_update_direction(
            &mut problem,
            &x,
            &array![2.0],
            &array![f64::NEG_INFINITY],
            &array![f64::INFINITY],
        );
        assert_that(&unbounded.is_none()).is_true();
        assert_that(&mma.is_direction_descent()).is_false();
    }

    #[test]
    fn test_first_step_respects_move_limit() {
        let mut mma = Mma::new(&MmaParams {
            move_limit: 0.1,
            ..MmaParams::default()
        });
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let d = mma
            .compute_boxed_update_direction(
                &mut problem,
                &array![5.0],
                &array![100.0],
                &array![0.0],
                &array![10.0],
            )
            .unwrap();
        assert_that(&d[0]).is_close_to(-1.0, 1e-12);
    }
}
