// Kingma & Ba, "Adam: A Method for Stochastic Optimization".

use super::DescentStrategy;
use super::gradient_descent::erase_components;
use crate::params::{AdamParams, StochasticAdamParams};
use crate::problem::Problem;
use ndarray::{Array1, Zip};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
pub struct Adam {
    alpha: f64,
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
    erase_component_probability: Option<f64>,
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
    rng: StdRng,
}

impl Adam {
    pub fn new(params: &AdamParams) -> Self {
        Self {
            alpha: params.alpha,
            beta_1: params.beta_1,
            beta_2: params.beta_2,
            epsilon: params.epsilon,
            erase_component_probability: None,
            m: Array1::zeros(0),
            v: Array1::zeros(0),
            t: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// ADAM on a gradient whose components are randomly erased.
    pub fn stochastic(params: &StochasticAdamParams) -> Self {
        Self {
            alpha: params.alpha,
            beta_1: params.beta_1,
            beta_2: params.beta_2,
            epsilon: params.epsilon,
            erase_component_probability: Some(params.erase_component_probability.clamp(0.0, 1.0)),
            m: Array1::zeros(0),
            v: Array1::zeros(0),
            t: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl DescentStrategy for Adam {
    fn name(&self) -> &'static str {
        if self.erase_component_probability.is_some() {
            "StochasticADAM"
        } else {
            "ADAM"
        }
    }

    fn reset(&mut self, ndof: usize) {
        self.m = Array1::zeros(ndof);
        self.v = Array1::zeros(ndof);
        self.t = 0;
    }

    fn compute_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        if self.m.len() != x.len() {
            self.reset(x.len());
        }

        let mut g = grad.clone();
        if let Some(p) = self.erase_component_probability {
            erase_components(&mut g, p, &mut self.rng);
        }

        self.t += 1;
        let (b1, b2) = (self.beta_1, self.beta_2);
        Zip::from(&mut self.m)
            .and(&mut self.v)
            .and(&g)
            .for_each(|m, v, &gi| {
                *m = b1 * *m + (1.0 - b1) * gi;
                *v = b2 * *v + (1.0 - b2) * gi * gi;
            });

        let m_correction = 1.0 - b1.powi(self.t);
        let v_correction = 1.0 - b2.powi(self.t);
        let mut direction = Array1::zeros(x.len());
        Zip::from(&mut direction)
            .and(&self.m)
            .and(&self.v)
            .for_each(|d, &m, &v| {
                let m_hat = m / m_correction;
                let v_hat = v / v_correction;
                *d = -self.alpha * m_hat / (v_hat.sqrt() + self.epsilon);
            });
        Some(direction)
    }

    /// The moment estimates may point uphill.
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

    fn problem() -> FnProblem<impl Fn(&Array1<f64>) -> (f64, Array1<f64>)> {
        FnProblem::new(|x: &Array1<f64>| (x.dot(x), 2.0 * x))
    }

    #[test]
    fn test_first_step_is_signed_alpha() {
        // After bias correction the first step is -alpha * g / (|g| + eps).
        let mut adam = Adam::new(&AdamParams {
            alpha: 0.1,
            ..AdamParams::default()
        });
        let x = array![1.0, -1.0];
        let grad = array![4.0, -0.5];
        let d = adam.compute_update_direction(&mut problem(), &x, &grad).unwrap();
        assert_that(&d[0]).is_close_to(-0.1, 1e-8);
        assert_that(&d[1]).is_close_to(0.1, 1e-7);
    }

    #[test]
    fn test_reset_clears_moments() {
        let mut adam = Adam::new(&AdamParams::default());
        let x = array![1.0];
        adam.compute_update_direction(&mut problem(), &x, &array![1.0]);
        adam.compute_update_direction(&mut problem(), &x, &array![-3.0]);
        adam.reset(1);
        let d = adam.compute_update_direction(&mut problem(), &x, &array![2.0]).unwrap();
        assert_that(&d[0]).is_close_to(-1.0, 1e-7);
        assert_that(&adam.is_direction_descent()).is_false();
    }

    #[test]
    fn test_moments_accumulate() {
        let mut adam = Adam::new(&AdamParams::default());
        let x = array![0.0];
        adam.compute_update_direction(&mut problem(), &x, &array![1.0]);
        let d = adam.compute_update_direction(&mut problem(), &x, &array![-1.0]).unwrap();
        // m̂ = (0.09 - 0.1) / 0.19 is small and negative, so the step is small and positive.
        assert_that(&d[0]).is_greater_than(0.0);
        assert_that(&d[0]).is_less_than(0.1);
    }

    #[test]
    fn test_stochastic_name() {
        let adam = Adam::stochastic(&StochasticAdamParams::default()).with_seed(1);
        assert_that(&adam.name()).is_equal_to("StochasticADAM");
    }
}
