use super::{LineSearch, LineSearchBase, LineSearchTimings, SearchStart};
use crate::problem::Problem;
use ndarray::Array1;
use std::time::Instant;

/// A line search that finds a step satisfying the strong Wolfe conditions.
///
/// Bracketing follows Algorithm 3.5 of Nocedal & Wright and the zoom phase uses cubic
/// interpolation (Algorithm 3.6), falling back to bisection when the interpolant lands
/// too close to either end of the bracket. The step never grows past the admissible
/// step reported by the objective.
#[derive(Debug, Clone)]
pub struct StrongWolfe {
    base: LineSearchBase,
    c1: f64,
    c2: f64,
}

/// Energy and directional derivative at a trial step.
#[derive(Debug, Clone, Copy)]
struct Probe {
    f: f64,
    dphi: f64,
    grad_sq: f64,
}

fn probe(
    objective: &mut dyn Problem,
    x: &Array1<f64>,
    delta_x: &Array1<f64>,
    alpha: f64,
) -> Option<Probe> {
    let trial = x + &(alpha * delta_x);
    objective.solution_changed(&trial);
    if !objective.is_step_valid(x, &trial) {
        return None;
    }
    let f = objective.value(&trial);
    if !f.is_finite() {
        return None;
    }
    let mut grad = Array1::zeros(x.len());
    objective.gradient(&trial, &mut grad);
    Some(Probe {
        f,
        dphi: grad.dot(delta_x),
        grad_sq: grad.dot(&grad),
    })
}

/// Bracket end used by the zoom phase.
#[derive(Debug, Clone, Copy)]
struct End {
    alpha: f64,
    f: f64,
    dphi: f64,
}

impl StrongWolfe {
    pub fn new(base: LineSearchBase, c1: f64, c2: f64) -> Self {
        Self { base, c1, c2 }
    }

    fn sufficient_decrease(&self, start: &SearchStart, dphi0: f64, alpha: f64, p: &Probe) -> bool {
        if start.use_grad_norm {
            p.grad_sq < start.old_grad.dot(&start.old_grad)
        } else {
            p.f <= start.old_energy + self.c1 * alpha * dphi0
        }
    }

    fn curvature(&self, dphi0: f64, p: &Probe) -> bool {
        p.dphi.abs() <= self.c2 * dphi0.abs()
    }

    fn search(
        &mut self,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        objective: &mut dyn Problem,
        start: &SearchStart,
    ) -> f64 {
        let dphi0 = start.old_grad.dot(delta_x);
        if !(dphi0 < 0.0) {
            return f64::NAN;
        }

        let full_step = x + delta_x;
        let alpha_max = start.step_size.max(objective.max_step_size(x, &full_step));

        let mut alpha_i = start.step_size;
        let mut prev = End {
            alpha: 0.0,
            f: start.old_energy,
            dphi: dphi0,
        };

        while self.base.can_shrink(alpha_i) {
            self.base.count_trial();
            let Some(p) = probe(objective, x, delta_x, alpha_i) else {
                // Past the admissible region: the minimizer lies before this step.
                let hi = End {
                    alpha: alpha_i,
                    f: f64::INFINITY,
                    dphi: f64::NAN,
                };
                return self.zoom(x, delta_x, objective, start, dphi0, prev, hi);
            };
            let current = End {
                alpha: alpha_i,
                f: p.f,
                dphi: p.dphi,
            };

            if !self.sufficient_decrease(start, dphi0, alpha_i, &p)
                || (prev.alpha > 0.0 && p.f >= prev.f)
            {
                return self.zoom(x, delta_x, objective, start, dphi0, prev, current);
            }
            if self.curvature(dphi0, &p) {
                return alpha_i;
            }
            if p.dphi >= 0.0 {
                return self.zoom(x, delta_x, objective, start, dphi0, current, prev);
            }
            if alpha_i >= alpha_max {
                // Still descending at the largest admissible step.
                return alpha_i;
            }

            prev = current;
            alpha_i = (2.0 * alpha_i).min(alpha_max);
        }
        f64::NAN
    }

    #[allow(clippy::too_many_arguments)]
    fn zoom(
        &mut self,
        x: &Array1<f64>,
        delta_x: &Array1<f64>,
        objective: &mut dyn Problem,
        start: &SearchStart,
        dphi0: f64,
        mut lo: End,
        mut hi: End,
    ) -> f64 {
        while self.base.can_shrink((hi.alpha - lo.alpha).abs()) {
            self.base.count_trial();

            let d1 = lo.dphi + hi.dphi - 3.0 * (lo.f - hi.f) / (lo.alpha - hi.alpha);
            let d2_sq = d1.powi(2) - lo.dphi * hi.dphi;
            let cubic = if d2_sq.is_sign_positive() {
                let d2 = d2_sq.sqrt();
                hi.alpha
                    - (hi.alpha - lo.alpha) * (hi.dphi + d2 - d1) / (hi.dphi - lo.dphi + 2.0 * d2)
            } else {
                f64::NAN
            };

            let (a, b) = (lo.alpha.min(hi.alpha), lo.alpha.max(hi.alpha));
            let margin = 0.1 * (b - a);
            let alpha_j = if cubic.is_finite() && cubic > a + margin && cubic < b - margin {
                cubic
            } else {
                0.5 * (lo.alpha + hi.alpha)
            };

            let Some(p) = probe(objective, x, delta_x, alpha_j) else {
                hi = End {
                    alpha: alpha_j,
                    f: f64::INFINITY,
                    dphi: f64::NAN,
                };
                continue;
            };

            if !self.sufficient_decrease(start, dphi0, alpha_j, &p) || p.f >= lo.f {
                hi = End {
                    alpha: alpha_j,
                    f: p.f,
                    dphi: p.dphi,
                };
            } else {
                if self.curvature(dphi0, &p) {
                    return alpha_j;
                }
                if p.dphi * (hi.alpha - lo.alpha) >= 0.0 {
                    hi = lo;
                }
                lo = End {
                    alpha: alpha_j,
                    f: p.f,
                    dphi: p.dphi,
                };
            }
        }

        // The bracket collapsed. Its low end still satisfies sufficient decrease.
        if lo.alpha > 0.0 { lo.alpha } else { f64::NAN }
    }
}

impl LineSearch for StrongWolfe {
    fn name(&self) -> &'static str {
        "StrongWolfe"
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
        let step_size = self.search(x, delta_x, objective, &start);
        self.base.add_classical_time(timer.elapsed().as_secs_f64());

        self.base.finish(name, x, delta_x, step_size, objective)
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
