use super::DescentStrategy;
use crate::problem::Problem;
use ndarray::Array1;
use std::collections::VecDeque;
use tracing::trace;

/// One correction pair of the limited-memory approximation.
#[derive(Debug, Clone)]
struct Correction {
    s: Array1<f64>,
    y: Array1<f64>,
    rho: f64,
}

/// Limited-memory BFGS with the two-loop recursion.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    history_size: usize,
    history: VecDeque<Correction>,
    prev_x: Option<Array1<f64>>,
    prev_grad: Option<Array1<f64>>,
}

impl Lbfgs {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            history: VecDeque::new(),
            prev_x: None,
            prev_grad: None,
        }
    }

    /// Stored correction pairs.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn push_pair(&mut self, s: Array1<f64>, y: Array1<f64>) {
        let sy = s.dot(&y);
        if !(sy > f64::EPSILON * y.dot(&y)) {
            // Without positive curvature the stored pairs no longer describe the
            // objective; start over from steepest descent.
            trace!("L-BFGS: dropping history after pair with sᵀy={:e}", sy);
            self.history.clear();
            return;
        }
        if self.history.len() == self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(Correction { s, y, rho: 1.0 / sy });
    }

    /// `-H g`, newest pair last in the history.
    fn two_loop_recursion(&self, grad: &Array1<f64>) -> Array1<f64> {
        let mut q = grad.clone();
        let mut alpha = vec![0.0; self.history.len()];

        for (i, c) in self.history.iter().enumerate().rev() {
            alpha[i] = c.rho * c.s.dot(&q);
            q.scaled_add(-alpha[i], &c.y);
        }

        if let Some(newest) = self.history.back() {
            let yy = newest.y.dot(&newest.y);
            if yy > 0.0 {
                q *= newest.s.dot(&newest.y) / yy;
            }
        }

        for (i, c) in self.history.iter().enumerate() {
            let beta = c.rho * c.y.dot(&q);
            q.scaled_add(alpha[i] - beta, &c.s);
        }

        -q
    }
}

impl DescentStrategy for Lbfgs {
    fn name(&self) -> &'static str {
        "L-BFGS"
    }

    fn reset(&mut self, _ndof: usize) {
        self.history.clear();
        self.prev_x = None;
        self.prev_grad = None;
    }

    fn compute_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        if let (Some(prev_x), Some(prev_grad)) = (self.prev_x.take(), self.prev_grad.take()) {
            if prev_x.len() == x.len() {
                self.push_pair(x - &prev_x, grad - &prev_grad);
            }
        }
        self.prev_x = Some(x.clone());
        self.prev_grad = Some(grad.clone());

        Some(self.two_loop_recursion(grad))
    }

    fn handle_error(&mut self) -> bool {
        if !self.history.is_empty() {
            self.reset(0);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnProblem;
    use ndarray::array;
    use spectral::prelude::*;

    fn problem() -> FnProblem<impl Fn(&Array1<f64>) -> (f64, Array1<f64>)> {
        FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x))
    }

    #[test]
    fn test_newest_pair_satisfies_secant_condition() {
        let mut lbfgs = Lbfgs::new(6);
        let mut p = problem();
        lbfgs.compute_update_direction(&mut p, &array![0.0, 0.0], &array![0.0, 0.0]);
        let d = lbfgs
            .compute_update_direction(&mut p, &array![1.0, 2.0], &array![3.0, 1.0])
            .unwrap();
        assert_that(&d[0]).is_close_to(-1.0, 1e-12);
        assert_that(&d[1]).is_close_to(-2.0, 1e-12);
    }

    #[test]
    fn test_quadratic_directions_point_at_minimizer() {
        // On f = x₀² + 10 x₁² with exact steps along the directions, L-BFGS reaches
        // the minimizer in at most n + 1 directions.
        let grad = |x: &Array1<f64>| array![2.0 * x[0], 20.0 * x[1]];
        let hess_diag = array![2.0, 20.0];
        let mut lbfgs = Lbfgs::new(6);
        let mut p = problem();
        let mut x = array![3.0, 1.0];
        for _ in 0..3 {
            let g = grad(&x);
            let d = lbfgs.compute_update_direction(&mut p, &x, &g).unwrap();
            let curvature: f64 = (&d * &d * &hess_diag).sum();
            if curvature == 0.0 {
                break;
            }
            let t = -g.dot(&d) / curvature;
            x = &x + &(t * &d);
        }
        assert_that(&x[0].abs()).is_less_than(1e-10);
        assert_that(&x[1].abs()).is_less_than(1e-10);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut lbfgs = Lbfgs::new(3);
        let mut p = problem();
        for k in 0..10 {
            let x = array![k as f64];
            let g = array![2.0 * k as f64];
            lbfgs.compute_update_direction(&mut p, &x, &g);
        }
        assert_that(&lbfgs.history_len()).is_equal_to(3);
        assert_that(&lbfgs.handle_error()).is_true();
        assert_that(&lbfgs.history_len()).is_equal_to(0);
        assert_that(&lbfgs.handle_error()).is_false();

        // A retry stores a point again but still has no pairs to drop.
        lbfgs.compute_update_direction(&mut p, &array![9.0], &array![18.0]);
        assert_that(&lbfgs.handle_error()).is_false();
    }

    #[test]
    fn test_negative_curvature_clears_history() {
        let mut lbfgs = Lbfgs::new(6);
        let mut p = problem();
        lbfgs.compute_update_direction(&mut p, &array![0.0], &array![1.0]);
        lbfgs.compute_update_direction(&mut p, &array![1.0], &array![3.0]);
        assert_that(&lbfgs.history_len()).is_equal_to(1);
        let d = lbfgs
            .compute_update_direction(&mut p, &array![2.0], &array![2.0])
            .unwrap();
        assert_that(&lbfgs.history_len()).is_equal_to(0);
        assert_that(&d).is_equal_to(array![-2.0]);
    }
}
