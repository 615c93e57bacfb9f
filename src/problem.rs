//! The objective contract the engine minimizes.

use crate::criteria::Criteria;
use ndarray::{Array1, Array2};

/// A differentiable objective.
///
/// Only [`value`](Problem::value) and [`gradient`](Problem::gradient) are required. The
/// rest are hooks with neutral defaults. Methods take `&mut self` so implementors can
/// cache, count evaluations, or keep buffers keyed on the last point they were told
/// about through [`solution_changed`](Problem::solution_changed).
pub trait Problem {
    /// Energy at `x`.
    fn value(&mut self, x: &Array1<f64>) -> f64;

    /// Gradient at `x`, written into `grad` (already sized to `x.len()`).
    fn gradient(&mut self, x: &Array1<f64>, grad: &mut Array1<f64>);

    /// Dense Hessian at `x`. Only the Newton strategies ask for it.
    fn hessian(&mut self, _x: &Array1<f64>) -> Option<Array2<f64>> {
        None
    }

    /// Called whenever the engine or a line search moves to a new trial point.
    fn solution_changed(&mut self, _x: &Array1<f64>) {}

    /// Whether the step from `x0` to `x1` is admissible at all (e.g. no inversion).
    fn is_step_valid(&mut self, _x0: &Array1<f64>, _x1: &Array1<f64>) -> bool {
        true
    }

    /// Upper bound on the step scale along `x1 - x0`.
    fn max_step_size(&mut self, _x0: &Array1<f64>, _x1: &Array1<f64>) -> f64 {
        1.0
    }

    /// Ask the engine to stop after the current iteration. This is a success.
    fn stop(&mut self, _x: &Array1<f64>) -> bool {
        false
    }

    /// Called after every accepted step.
    fn post_step(&mut self, _iteration: usize, _x: &Array1<f64>) {}

    /// Return `false` to cancel the minimization after the current iteration.
    fn callback(&mut self, _metrics: &Criteria, _x: &Array1<f64>) -> bool {
        true
    }

    /// Persist the iterate; called once at the start and after each iteration.
    fn save_to_file(&mut self, _x: &Array1<f64>) {}
}

/// Adapts a closure returning `(value, gradient)` to [`Problem`].
///
/// The last evaluation is cached so that asking for the value and then the gradient
/// at the same point evaluates the closure once.
pub struct FnProblem<F>
where
    F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    func: F,
    last: Option<(Array1<f64>, f64, Array1<f64>)>,
    evaluations: usize,
}

impl<F> FnProblem<F>
where
    F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            last: None,
            evaluations: 0,
        }
    }

    /// Number of times the closure has been called.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    fn evaluate(&mut self, x: &Array1<f64>) -> (f64, &Array1<f64>) {
        if !matches!(&self.last, Some((cached_x, _, _)) if cached_x == x) {
            self.last = None;
        }
        let func = &self.func;
        let evaluations = &mut self.evaluations;
        let (_, f, g) = self.last.get_or_insert_with(|| {
            *evaluations += 1;
            let (f, g) = func(x);
            (x.clone(), f, g)
        });
        (*f, g)
    }
}

impl<F> Problem for FnProblem<F>
where
    F: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn value(&mut self, x: &Array1<f64>) -> f64 {
        self.evaluate(x).0
    }

    fn gradient(&mut self, x: &Array1<f64>, grad: &mut Array1<f64>) {
        let (_, g) = self.evaluate(x);
        grad.assign(g);
    }
}
