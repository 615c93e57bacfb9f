use super::DescentStrategy;
use crate::problem::Problem;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Steepest descent, `-∇f`.
///
/// The stochastic flavour zeroes each component independently with probability
/// `erase_component_probability`.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    erase_component_probability: Option<f64>,
    rng: StdRng,
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientDescent {
    pub fn new() -> Self {
        Self {
            erase_component_probability: None,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn stochastic(erase_component_probability: f64) -> Self {
        Self {
            erase_component_probability: Some(erase_component_probability.clamp(0.0, 1.0)),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Fix the random stream, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

/// Zero each entry of `v` with probability `p`.
pub(crate) fn erase_components(v: &mut Array1<f64>, p: f64, rng: &mut StdRng) {
    for value in v.iter_mut() {
        if rng.random_bool(p) {
            *value = 0.0;
        }
    }
}

impl DescentStrategy for GradientDescent {
    fn name(&self) -> &'static str {
        if self.erase_component_probability.is_some() {
            "StochasticGradientDescent"
        } else {
            "GradientDescent"
        }
    }

    fn reset(&mut self, _ndof: usize) {}

    fn compute_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        _x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        let mut direction = -grad;
        if let Some(p) = self.erase_component_probability {
            erase_components(&mut direction, p, &mut self.rng);
        }
        Some(direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnProblem;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_negative_gradient() {
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x));
        let x = array![1.0, -2.0];
        let grad = array![2.0, -4.0];
        let d = GradientDescent::new()
            .compute_update_direction(&mut problem, &x, &grad)
            .unwrap();
        assert_that(&d).is_equal_to(array![-2.0, 4.0]);
    }

    #[test]
    fn test_stochastic_extremes() {
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.sum(), Array1::ones(x.len())));
        let x = Array1::zeros(50);
        let grad = Array1::ones(50);

        let mut keep_all = GradientDescent::stochastic(0.0).with_seed(7);
        let d = keep_all.compute_update_direction(&mut problem, &x, &grad).unwrap();
        assert_that(&d).is_equal_to(-&grad);

        let mut erase_all = GradientDescent::stochastic(1.0).with_seed(7);
        let d = erase_all.compute_update_direction(&mut problem, &x, &grad).unwrap();
        assert_that(&d.iter().all(|&v| v == 0.0)).is_true();
        assert_that(&erase_all.name()).is_equal_to("StochasticGradientDescent");
    }

    #[test]
    fn test_stochastic_keeps_descent_sign() {
        let mut problem = FnProblem::new(|x: &Array1<f64>| (x.sum(), Array1::ones(x.len())));
        let x = Array1::zeros(200);
        let grad = Array1::ones(200);
        let mut sgd = GradientDescent::stochastic(0.3).with_seed(42);
        let d = sgd.compute_update_direction(&mut problem, &x, &grad).unwrap();
        let kept = d.iter().filter(|&&v| v == -1.0).count();
        let erased = d.iter().filter(|&&v| v == 0.0).count();
        assert_that(&(kept + erased)).is_equal_to(200);
        assert_that(&kept).is_greater_than(100);
        assert_that(&erased).is_greater_than(20);
    }
}
