//! Solver configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) deserializes into a
//! usable configuration. Keys mirror the JSON layout, e.g. `line_search.Armijo.c` or
//! `advanced.f_delta`.

use crate::box_solver::{Bounds, MaxChange};
use crate::error::{SolverError, SolverResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How many successful iterations a fallback strategy keeps control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IterationsPerStrategy {
    Uniform(usize),
    PerStrategy(Vec<usize>),
}

impl Default for IterationsPerStrategy {
    fn default() -> Self {
        IterationsPerStrategy::Uniform(5)
    }
}

impl IterationsPerStrategy {
    /// Expand to one budget per strategy, checking the array length.
    pub fn resolve(&self, num_strategies: usize) -> SolverResult<Vec<usize>> {
        match self {
            IterationsPerStrategy::Uniform(n) => Ok(vec![*n; num_strategies]),
            IterationsPerStrategy::PerStrategy(v) if v.len() == num_strategies => Ok(v.clone()),
            IterationsPerStrategy::PerStrategy(v) => Err(SolverError::InvalidParameters(format!(
                "iterations_per_strategy has {} entries but the solver has {} strategies",
                v.len(),
                num_strategies
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub solver: String,
    pub max_iterations: usize,
    pub x_delta: f64,
    pub grad_norm: f64,
    /// Gradient tolerance for the first iteration only.
    pub first_grad_norm_tol: f64,
    pub allow_out_of_iterations: bool,
    pub iterations_per_strategy: IterationsPerStrategy,
    /// Finite-difference step for the gradient check; `0` disables it.
    pub debug_fd_eps: f64,
    pub solver_info_log: bool,
    /// Path of the `energy, grad_norm` export; empty disables it.
    pub export_energy: String,
    pub advanced: AdvancedParams,
    pub line_search: LineSearchParams,
    #[serde(rename = "LBFGS")]
    pub lbfgs: LbfgsParams,
    #[serde(rename = "LBFGSB")]
    pub lbfgsb: LbfgsbParams,
    #[serde(rename = "Newton")]
    pub newton: NewtonParams,
    #[serde(rename = "ADAM")]
    pub adam: AdamParams,
    #[serde(rename = "StochasticADAM")]
    pub stochastic_adam: StochasticAdamParams,
    #[serde(rename = "StochasticGradientDescent")]
    pub stochastic_gradient_descent: StochasticGradientDescentParams,
    #[serde(rename = "MMA")]
    pub mma: MmaParams,
    pub box_constraints: BoxConstraintParams,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            solver: "LBFGS".to_string(),
            max_iterations: 500,
            x_delta: 0.0,
            grad_norm: 1e-8,
            first_grad_norm_tol: 1e-10,
            allow_out_of_iterations: false,
            iterations_per_strategy: IterationsPerStrategy::default(),
            debug_fd_eps: 0.0,
            solver_info_log: false,
            export_energy: String::new(),
            advanced: AdvancedParams::default(),
            line_search: LineSearchParams::default(),
            lbfgs: LbfgsParams::default(),
            lbfgsb: LbfgsbParams::default(),
            newton: NewtonParams::default(),
            adam: AdamParams::default(),
            stochastic_adam: StochasticAdamParams::default(),
            stochastic_gradient_descent: StochasticGradientDescentParams::default(),
            mma: MmaParams::default(),
            box_constraints: BoxConstraintParams::default(),
        }
    }
}

impl SolverParams {
    pub fn from_json(value: &serde_json::Value) -> SolverResult<Self> {
        let params: Self = serde_json::from_value(value.clone())?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_str(text: &str) -> SolverResult<Self> {
        let params: Self = serde_json::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SolverResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_solver(mut self, solver: &str) -> Self {
        self.solver = solver.to_string();
        self
    }

    pub fn with_line_search(mut self, method: &str) -> Self {
        self.line_search.method = method.to_string();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_grad_norm(mut self, grad_norm: f64) -> Self {
        self.grad_norm = grad_norm;
        self
    }

    pub fn with_first_grad_norm_tol(mut self, tol: f64) -> Self {
        self.first_grad_norm_tol = tol;
        self
    }

    pub fn with_x_delta(mut self, x_delta: f64) -> Self {
        self.x_delta = x_delta;
        self
    }

    pub fn with_f_delta(mut self, f_delta: f64, f_delta_step_tol: usize) -> Self {
        self.advanced.f_delta = f_delta;
        self.advanced.f_delta_step_tol = f_delta_step_tol;
        self
    }

    pub fn with_iterations_per_strategy(mut self, budget: IterationsPerStrategy) -> Self {
        self.iterations_per_strategy = budget;
        self
    }

    pub fn with_allow_out_of_iterations(mut self, allow: bool) -> Self {
        self.allow_out_of_iterations = allow;
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.box_constraints.bounds = Some(bounds);
        self
    }

    pub fn with_max_change(mut self, max_change: MaxChange) -> Self {
        self.box_constraints.max_change = Some(max_change);
        self
    }

    /// Reject thresholds the engine cannot work with.
    pub fn validate(&self) -> SolverResult<()> {
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidParameters(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let tolerances = [
            ("x_delta", self.x_delta),
            ("grad_norm", self.grad_norm),
            ("first_grad_norm_tol", self.first_grad_norm_tol),
            ("advanced.f_delta", self.advanced.f_delta),
        ];
        for (name, value) in tolerances {
            if !(value >= 0.0) {
                return Err(SolverError::InvalidParameters(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        let ls = &self.line_search;
        if !(ls.step_ratio > 0.0 && ls.step_ratio < 1.0) {
            return Err(SolverError::InvalidParameters(format!(
                "line_search.step_ratio must be in (0, 1), got {}",
                ls.step_ratio
            )));
        }
        if !(ls.default_init_step_size > 0.0) {
            return Err(SolverError::InvalidParameters(
                "line_search.default_init_step_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedParams {
    pub f_delta: f64,
    /// Consecutive small-Δf iterations required before Δf may stop the run.
    pub f_delta_step_tol: usize,
}

impl Default for AdvancedParams {
    fn default() -> Self {
        Self {
            f_delta: 0.0,
            f_delta_step_tol: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchParams {
    pub method: String,
    /// Below this gradient norm, acceptance compares gradient norms; negative disables.
    pub use_grad_norm_tol: f64,
    pub min_step_size: f64,
    pub max_step_size_iter: usize,
    pub min_step_size_final: f64,
    pub max_step_size_iter_final: usize,
    pub default_init_step_size: f64,
    pub step_ratio: f64,
    #[serde(rename = "Armijo")]
    pub armijo: ArmijoParams,
    #[serde(rename = "None")]
    pub none: NoLineSearchParams,
    #[serde(rename = "StrongWolfe")]
    pub strong_wolfe: StrongWolfeParams,
}

impl Default for LineSearchParams {
    fn default() -> Self {
        Self {
            method: "Armijo".to_string(),
            use_grad_norm_tol: -1.0,
            min_step_size: 1e-10,
            max_step_size_iter: 30,
            min_step_size_final: 1e-20,
            max_step_size_iter_final: 100,
            default_init_step_size: 1.0,
            step_ratio: 0.5,
            armijo: ArmijoParams::default(),
            none: NoLineSearchParams::default(),
            strong_wolfe: StrongWolfeParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmijoParams {
    pub c: f64,
}

impl Default for ArmijoParams {
    fn default() -> Self {
        Self { c: 1e-4 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoLineSearchParams {
    /// Allowed relative energy increase; negative accepts anything.
    pub max_energy_incre: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrongWolfeParams {
    pub c1: f64,
    pub c2: f64,
}

impl Default for StrongWolfeParams {
    fn default() -> Self {
        Self { c1: 1e-4, c2: 0.9 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsParams {
    pub history_size: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self { history_size: 6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsbParams {
    pub history_size: usize,
    /// Subspace-minimization passes per direction.
    pub max_submin: usize,
}

impl Default for LbfgsbParams {
    fn default() -> Self {
        Self {
            history_size: 6,
            max_submin: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonParams {
    pub linear_solver: String,
    pub reg_weight_min: f64,
    pub reg_weight_max: f64,
    pub reg_weight_inc: f64,
}

impl Default for NewtonParams {
    fn default() -> Self {
        Self {
            linear_solver: "LU".to_string(),
            reg_weight_min: 1e-8,
            reg_weight_max: 1e8,
            reg_weight_inc: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamParams {
    pub alpha: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub epsilon: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StochasticAdamParams {
    pub alpha: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub epsilon: f64,
    pub erase_component_probability: f64,
}

impl Default for StochasticAdamParams {
    fn default() -> Self {
        let adam = AdamParams::default();
        Self {
            alpha: adam.alpha,
            beta_1: adam.beta_1,
            beta_2: adam.beta_2,
            epsilon: adam.epsilon,
            erase_component_probability: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StochasticGradientDescentParams {
    pub erase_component_probability: f64,
}

impl Default for StochasticGradientDescentParams {
    fn default() -> Self {
        Self {
            erase_component_probability: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmaParams {
    pub asymptote_init: f64,
    pub asymptote_incr: f64,
    pub asymptote_decr: f64,
    /// Fraction of the box width a variable may move per iteration.
    pub move_limit: f64,
}

impl Default for MmaParams {
    fn default() -> Self {
        Self {
            asymptote_init: 0.5,
            asymptote_incr: 1.2,
            asymptote_decr: 0.7,
            move_limit: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxConstraintParams {
    pub bounds: Option<Bounds>,
    pub max_change: Option<MaxChange>,
}
