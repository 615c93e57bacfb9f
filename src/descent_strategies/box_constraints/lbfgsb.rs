// Byrd, Lu, Nocedal & Zhu, "A Limited Memory Algorithm for Bound Constrained
// Optimization" (1995). The Hessian approximation is kept in compact form
// B = θI - W M Wᵀ with W = [Y, θS].

use crate::descent_strategies::DescentStrategy;
use crate::linalg::{DenseLu, LinearSolver};
use crate::params::LbfgsbParams;
use crate::problem::Problem;
use ndarray::{Array1, Array2, Zip};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Limited-memory BFGS matrix in compact representation.
#[derive(Debug, Clone)]
struct CompactBfgs {
    history_size: usize,
    s: VecDeque<Array1<f64>>,
    y: VecDeque<Array1<f64>>,
    theta: f64,
    /// `M⁻¹ = [[-D, Lᵀ], [L, θ SᵀS]]`, rebuilt whenever a pair is added.
    middle_inverse: Array2<f64>,
}

impl CompactBfgs {
    fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            s: VecDeque::new(),
            y: VecDeque::new(),
            theta: 1.0,
            middle_inverse: Array2::zeros((0, 0)),
        }
    }

    fn clear(&mut self) {
        self.s.clear();
        self.y.clear();
        self.theta = 1.0;
        self.middle_inverse = Array2::zeros((0, 0));
    }

    fn len(&self) -> usize {
        self.s.len()
    }

    fn push(&mut self, s: Array1<f64>, y: Array1<f64>) {
        let sy = s.dot(&y);
        self.theta = y.dot(&y) / sy;
        if self.s.len() == self.history_size {
            self.s.pop_front();
            self.y.pop_front();
        }
        self.s.push_back(s);
        self.y.push_back(y);

        let k = self.len();
        let mut m_inv = Array2::zeros((2 * k, 2 * k));
        for i in 0..k {
            m_inv[[i, i]] = -self.s[i].dot(&self.y[i]);
            for j in 0..i {
                let l_ij = self.s[i].dot(&self.y[j]);
                m_inv[[k + i, j]] = l_ij;
                m_inv[[j, k + i]] = l_ij;
            }
            for j in 0..k {
                m_inv[[k + i, k + j]] = self.theta * self.s[i].dot(&self.s[j]);
            }
        }
        self.middle_inverse = m_inv;
    }

    /// Entry `(i, a)` of `W`.
    fn w_entry(&self, i: usize, a: usize) -> f64 {
        let k = self.len();
        if a < k {
            self.y[a][i]
        } else {
            self.theta * self.s[a - k][i]
        }
    }

    fn w_row(&self, i: usize) -> Array1<f64> {
        (0..2 * self.len()).map(|a| self.w_entry(i, a)).collect()
    }

    /// `Wᵀ v`
    fn w_transpose_times(&self, v: &Array1<f64>) -> Array1<f64> {
        let ys = self.y.iter().map(|y| y.dot(v));
        let ss = self.s.iter().map(|s| self.theta * s.dot(v));
        ys.chain(ss).collect()
    }

    /// `W p`
    fn w_times(&self, p: &Array1<f64>, n: usize) -> Array1<f64> {
        let k = self.len();
        let mut out = Array1::zeros(n);
        for j in 0..k {
            out.scaled_add(p[j], &self.y[j]);
            out.scaled_add(self.theta * p[k + j], &self.s[j]);
        }
        out
    }

    /// `M v`, solved against the stored `M⁻¹`.
    fn middle_times(&self, v: &Array1<f64>) -> Option<Array1<f64>> {
        if v.is_empty() {
            return Some(Array1::zeros(0));
        }
        match DenseLu::default().solve(&self.middle_inverse, v) {
            Ok(mv) => Some(mv),
            Err(e) => {
                debug!("L-BFGS-B: middle matrix solve failed: {}", e);
                None
            }
        }
    }

    /// `B v`
    fn times(&self, v: &Array1<f64>) -> Option<Array1<f64>> {
        let mut out = v * self.theta;
        if self.len() > 0 {
            let m_wt_v = self.middle_times(&self.w_transpose_times(v))?;
            out -= &self.w_times(&m_wt_v, v.len());
        }
        Some(out)
    }
}

/// Bound-constrained L-BFGS.
///
/// Each direction is the generalized Cauchy point along the projected gradient path,
/// refined by minimizing the quadratic model over the variables the Cauchy point left
/// free. Free variables that leave the box are fixed at their bound and the subspace
/// step is recomputed, at most `max_submin` times.
#[derive(Debug, Clone)]
pub struct Lbfgsb {
    matrix: CompactBfgs,
    max_submin: usize,
    prev_x: Option<Array1<f64>>,
    prev_grad: Option<Array1<f64>>,
}

impl Lbfgsb {
    pub fn new(params: &LbfgsbParams) -> Self {
        Self {
            matrix: CompactBfgs::new(params.history_size),
            max_submin: params.max_submin,
            prev_x: None,
            prev_grad: None,
        }
    }

    /// Stored correction pairs.
    pub fn history_len(&self) -> usize {
        self.matrix.len()
    }

    fn generalized_cauchy_point(
        &self,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let n = x.len();
        let theta = self.matrix.theta;
        let mut d = Array1::zeros(n);
        let mut breakpoints = Vec::new();
        for i in 0..n {
            let t = if grad[i] < 0.0 && upper[i].is_finite() {
                (x[i] - upper[i]) / grad[i]
            } else if grad[i] > 0.0 && lower[i].is_finite() {
                (x[i] - lower[i]) / grad[i]
            } else {
                f64::INFINITY
            };
            if t > 0.0 {
                d[i] = -grad[i];
                if t.is_finite() {
                    breakpoints.push((t, i));
                }
            }
        }
        breakpoints.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xcp = x.clone();
        let mut f_prime = -d.dot(&d);
        if f_prime >= 0.0 {
            return Some(xcp);
        }

        let mut p = self.matrix.w_transpose_times(&d);
        let mut c = Array1::zeros(p.len());
        let mut f_second = -theta * f_prime - p.dot(&self.matrix.middle_times(&p)?);
        let mut dt_min = if f_second > 0.0 { -f_prime / f_second } else { 0.0 };
        let mut t_old = 0.0;

        for &(t, b) in &breakpoints {
            let dt = t - t_old;
            if dt_min < dt {
                break;
            }
            xcp[b] = if d[b] > 0.0 { upper[b] } else { lower[b] };
            let z_b = xcp[b] - x[b];
            let g_b = grad[b];
            c.scaled_add(dt, &p);

            let w_b = self.matrix.w_row(b);
            let m_c = self.matrix.middle_times(&c)?;
            let m_p = self.matrix.middle_times(&p)?;
            let m_w = self.matrix.middle_times(&w_b)?;

            f_prime += dt * f_second + g_b * g_b + theta * g_b * z_b - g_b * w_b.dot(&m_c);
            f_second -= theta * g_b * g_b + 2.0 * g_b * w_b.dot(&m_p) + g_b * g_b * w_b.dot(&m_w);
            p.scaled_add(g_b, &w_b);
            d[b] = 0.0;
            t_old = t;
            dt_min = if f_second > 0.0 { -f_prime / f_second } else { 0.0 };
        }

        t_old += dt_min.max(0.0);
        Zip::from(&mut xcp)
            .and(x)
            .and(&d)
            .for_each(|xc, &xi, &di| {
                if di != 0.0 {
                    *xc = xi + t_old * di;
                }
            });
        Some(xcp)
    }

    fn subspace_minimization(
        &self,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
        cauchy_point: Array1<f64>,
    ) -> Option<Array1<f64>> {
        let theta = self.matrix.theta;
        let k2 = 2 * self.matrix.len();
        let mut z = cauchy_point;
        let mut free: Vec<usize> = (0..x.len())
            .filter(|&i| lower[i] < z[i] && z[i] < upper[i])
            .collect();

        for pass in 0..self.max_submin {
            if free.is_empty() {
                break;
            }
            let bz = self.matrix.times(&(&z - x))?;
            let r: Array1<f64> = free.iter().map(|&i| grad[i] + bz[i]).collect();

            // Woodbury: B_F⁻¹ = I/θ + W_F (M⁻¹ - W_FᵀW_F/θ)⁻¹ W_Fᵀ / θ²
            let mut d_free = &r * (-1.0 / theta);
            if k2 > 0 {
                let w_free =
                    Array2::from_shape_fn((free.len(), k2), |(q, a)| self.matrix.w_entry(free[q], a));
                let inner = &self.matrix.middle_inverse - &(w_free.t().dot(&w_free) / theta);
                match DenseLu::default().solve(&inner, &w_free.t().dot(&r)) {
                    Ok(sol) => d_free.scaled_add(-1.0 / (theta * theta), &w_free.dot(&sol)),
                    Err(e) => trace!("L-BFGS-B: reduced system solve failed ({}); using θ⁻¹", e),
                }
            }

            let mut still_free = Vec::with_capacity(free.len());
            for (q, &i) in free.iter().enumerate() {
                z[i] += d_free[q];
                if z[i] < lower[i] || z[i] > upper[i] {
                    z[i] = z[i].max(lower[i]).min(upper[i]);
                } else {
                    still_free.push(i);
                }
            }
            if still_free.len() == free.len() {
                break;
            }
            trace!(
                "L-BFGS-B: subspace pass {} fixed {} variables",
                pass,
                free.len() - still_free.len()
            );
            free = still_free;
        }

        Zip::from(&mut z)
            .and(lower)
            .and(upper)
            .for_each(|zi, &lo, &hi| *zi = zi.max(lo).min(hi));
        Some(z)
    }
}

impl DescentStrategy for Lbfgsb {
    fn name(&self) -> &'static str {
        "L-BFGS-B"
    }

    fn reset(&mut self, _ndof: usize) {
        self.matrix.clear();
        self.prev_x = None;
        self.prev_grad = None;
    }

    fn compute_update_direction(
        &mut self,
        objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let lower = Array1::from_elem(x.len(), f64::NEG_INFINITY);
        let upper = Array1::from_elem(x.len(), f64::INFINITY);
        self.compute_boxed_update_direction(objective, x, grad, &lower, &upper)
    }

    fn compute_boxed_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let mut start = x.clone();
        Zip::from(&mut start)
            .and(lower)
            .and(upper)
            .for_each(|xi, &lo, &hi| *xi = xi.max(lo).min(hi));

        let has_history = match (self.prev_x.take(), self.prev_grad.take()) {
            (Some(prev_x), Some(prev_grad)) if prev_x.len() == x.len() => {
                let s = &start - &prev_x;
                let y = grad - &prev_grad;
                if s.dot(&y) > 1e-9 * y.dot(&y) {
                    self.matrix.push(s, y);
                } else {
                    trace!("L-BFGS-B: skipping pair with insufficient curvature");
                }
                true
            }
            _ => false,
        };
        self.prev_x = Some(start.clone());
        self.prev_grad = Some(grad.clone());

        let cauchy_point = self.generalized_cauchy_point(&start, grad, lower, upper)?;
        let target = if has_history {
            self.subspace_minimization(&start, grad, lower, upper, cauchy_point)?
        } else {
            cauchy_point
        };
        Some(target - x)
    }

    fn handle_error(&mut self) -> bool {
        if self.matrix.len() > 0 {
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

    fn projected_grad_norm(x: &Array1<f64>, g: &Array1<f64>, lo: f64, hi: f64) -> f64 {
        let projected = (x - g).mapv(|v| v.max(lo).min(hi)) - x;
        projected.dot(&projected).sqrt()
    }

    /// Armijo backtracking on `f`, returning the number of iterations used.
    fn run(
        f: impl Fn(&Array1<f64>) -> (f64, Array1<f64>),
        x: &mut Array1<f64>,
        lo: f64,
        hi: f64,
    ) -> usize {
        let mut solver = Lbfgsb::new(&LbfgsbParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let lower = Array1::from_elem(x.len(), lo);
        let upper = Array1::from_elem(x.len(), hi);
        for it in 0..50 {
            let (fx, g) = f(&*x);
            if projected_grad_norm(x, &g, lo, hi) <= 1e-8 {
                return it;
            }
            let d = solver
                .compute_boxed_update_direction(&mut problem, x, &g, &lower, &upper)
                .unwrap();
            let dg = d.dot(&g);
            assert_that(&dg).is_less_than(0.0);
            let mut t = 1.0;
            while f(&(&*x + &(t * &d))).0 > fx + 1e-4 * t * dg {
                t *= 0.5;
                assert_that(&t).is_greater_than(1e-10);
            }
            x.scaled_add(t, &d);
        }
        50
    }

    #[test]
    fn test_first_direction_without_bounds_is_steepest_descent() {
        let mut solver = Lbfgsb::new(&LbfgsbParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let d = solver
            .compute_update_direction(&mut problem, &array![1.0, -2.0], &array![2.0, -4.0])
            .unwrap();
        assert_that(&d[0]).is_close_to(-2.0, 1e-12);
        assert_that(&d[1]).is_close_to(4.0, 1e-12);
    }

    #[test]
    fn test_cauchy_point_walks_to_active_corner() {
        let mut x = array![3.0, 4.5, 2.0];
        let iterations = run(|x| (x.dot(x), 2.0 * x), &mut x, 1.0, 5.0);
        assert_that(&iterations).is_equal_to(1);
        for xi in x.iter() {
            assert_that(xi).is_close_to(1.0, 1e-12);
        }
    }

    #[test]
    fn test_mixed_active_and_free_variables() {
        let c = array![-1.0, 3.0, 7.0];
        let f = |x: &Array1<f64>| {
            let r = x - &c;
            (r.dot(&r), 2.0 * r)
        };
        let mut x = array![2.5, 2.5, 2.5];
        let iterations = run(f, &mut x, 0.0, 5.0);
        assert_that(&iterations).is_less_than_or_equal_to(5);
        assert_that(&x[0]).is_close_to(0.0, 1e-8);
        assert_that(&x[1]).is_close_to(3.0, 1e-8);
        assert_that(&x[2]).is_close_to(5.0, 1e-8);
    }

    #[test]
    fn test_start_outside_box_is_projected() {
        let mut solver = Lbfgsb::new(&LbfgsbParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let x = array![-3.0, 0.5];
        let d = solver
            .compute_boxed_update_direction(
                &mut problem,
                &x,
                &array![0.0, 0.0],
                &array![0.0, 0.0],
                &array![1.0, 1.0],
            )
            .unwrap();
        let target = &x + &d;
        assert_that(&target[0]).is_close_to(0.0, 1e-12);
        assert_that(&target[1]).is_close_to(0.5, 1e-12);
    }

    #[test]
    fn test_handle_error_clears_history() {
        let mut solver = Lbfgsb::new(&LbfgsbParams::default());
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        assert_that(&solver.handle_error()).is_false();
        solver.compute_update_direction(&mut problem, &array![1.0], &array![2.0]);
        solver.compute_update_direction(&mut problem, &array![0.5], &array![1.0]);
        assert_that(&solver.history_len()).is_equal_to(1);
        assert_that(&solver.handle_error()).is_true();
        assert_that(&solver.history_len()).is_equal_to(0);

        solver.compute_update_direction(&mut problem, &array![0.5], &array![1.0]);
        assert_that(&solver.handle_error()).is_false();
    }
}
