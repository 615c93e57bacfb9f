//! Telemetry snapshot refreshed after every iteration of a minimization.

use crate::criteria::{Criteria, Status};
use crate::error::{ErrorCode, SolverResult};
use serde::Serialize;

/// Per-strategy entries (timings, regularization weight, ...), keyed by name.
pub type StrategyInfo = serde_json::Map<String, serde_json::Value>;

/// Accumulated wall-clock time per phase of the engine loop, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timings {
    pub total: f64,
    pub grad: f64,
    pub line_search: f64,
    pub constraint_set_update: f64,
    pub obj_fun: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverInfo {
    pub solver: String,
    pub line_search: String,
    pub strategy: String,
    pub status: Status,
    pub error_code: ErrorCode,
    pub energy: f64,
    pub iterations: usize,
    #[serde(rename = "xDelta")]
    pub x_delta: f64,
    #[serde(rename = "fDelta")]
    pub f_delta: f64,
    #[serde(rename = "gradNorm")]
    pub grad_norm: f64,
    pub condition: f64,
    pub total_time: f64,
    /// Per-iteration averages.
    pub time_grad: f64,
    pub time_line_search: f64,
    pub time_constraint_set_update: f64,
    pub time_obj_fun: f64,
    pub line_search_iterations: usize,
    pub line_search_time_checking_for_nan_inf: f64,
    pub line_search_time_classical_line_search: f64,
    #[serde(flatten)]
    pub strategy_info: StrategyInfo,
}

impl SolverInfo {
    pub(crate) fn set_metrics(&mut self, metrics: &Criteria) {
        self.iterations = metrics.iterations;
        self.x_delta = metrics.x_delta;
        self.f_delta = metrics.f_delta;
        self.grad_norm = metrics.grad_norm;
        self.condition = metrics.condition;
    }

    pub(crate) fn set_timings(&mut self, timings: &Timings, per_iteration: f64) {
        self.total_time = timings.total;
        self.time_grad = timings.grad / per_iteration;
        self.time_line_search = timings.line_search / per_iteration;
        self.time_constraint_set_update = timings.constraint_set_update / per_iteration;
        self.time_obj_fun = timings.obj_fun / per_iteration;
    }

    pub fn to_json(&self) -> SolverResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn test_keys_and_flattened_strategy_entries() {
        let mut info = SolverInfo {
            solver: "L-BFGS".to_string(),
            status: Status::GradNormTolerance,
            ..SolverInfo::default()
        };
        info.set_metrics(&Criteria {
            iterations: 4,
            x_delta: 0.5,
            f_delta: 0.25,
            grad_norm: 1e-9,
            condition: 0.0,
        });
        info.strategy_info.insert("reg_weight".to_string(), json!(1e-8));

        let value = info.to_json().unwrap();
        assert_that(&value["iterations"]).is_equal_to(json!(4));
        assert_that(&value["xDelta"]).is_equal_to(json!(0.5));
        assert_that(&value["status"]).is_equal_to(json!("GradNormTolerance"));
        assert_that(&value["error_code"]).is_equal_to(json!("Success"));
        assert_that(&value["reg_weight"]).is_equal_to(json!(1e-8));
    }

    #[test]
    fn test_times_are_averaged_per_iteration() {
        let mut info = SolverInfo::default();
        let timings = Timings {
            total: 3.0,
            grad: 2.0,
            line_search: 1.0,
            constraint_set_update: 0.0,
            obj_fun: 4.0,
        };
        info.set_timings(&timings, 2.0);
        assert_that(&info.total_time).is_close_to(3.0, 1e-12);
        assert_that(&info.time_grad).is_close_to(1.0, 1e-12);
        assert_that(&info.time_obj_fun).is_close_to(2.0, 1e-12);
    }
}
