//! Bound constraints `lower <= x <= upper`, optionally tightened by a per-iteration
//! cap on how far each variable may move, and the factory for the solvers that
//! honour them natively.

use crate::descent_strategies::{DescentStrategy, Lbfgsb, Mma};
use crate::error::{SolverError, SolverResult};
use crate::line_search;
use crate::params::SolverParams;
use crate::solver::Solver;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

/// Bounds given either for all variables at once or per variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bounds {
    Uniform(f64, f64),
    PerVariable(Vec<f64>, Vec<f64>),
}

/// Largest allowed change of a variable in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxChange {
    Uniform(f64),
    PerVariable(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxConstraints {
    bounds: Bounds,
    max_change: Option<MaxChange>,
}

impl BoxConstraints {
    pub fn new(bounds: Bounds, max_change: Option<MaxChange>) -> SolverResult<Self> {
        let constraints = Self { bounds, max_change };
        constraints.check_values()?;
        Ok(constraints)
    }

    fn check_values(&self) -> SolverResult<()> {
        let pairs: Vec<(f64, f64)> = match &self.bounds {
            Bounds::Uniform(lo, hi) => vec![(*lo, *hi)],
            Bounds::PerVariable(lo, hi) => {
                if lo.len() != hi.len() {
                    return Err(SolverError::InvalidBounds(format!(
                        "{} lower bounds but {} upper bounds",
                        lo.len(),
                        hi.len()
                    )));
                }
                lo.iter().copied().zip(hi.iter().copied()).collect()
            }
        };
        if let Some((lo, hi)) = pairs.iter().find(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi) {
            return Err(SolverError::InvalidBounds(format!(
                "lower bound {lo} is not below upper bound {hi}"
            )));
        }
        let changes: &[f64] = match &self.max_change {
            None => &[],
            Some(MaxChange::Uniform(c)) => std::slice::from_ref(c),
            Some(MaxChange::PerVariable(c)) => c,
        };
        if let Some(c) = changes.iter().find(|c| !(**c > 0.0)) {
            return Err(SolverError::InvalidBounds(format!(
                "max_change must be positive, got {c}"
            )));
        }
        Ok(())
    }

    /// Check per-variable lists against the problem size.
    pub fn validate(&self, ndof: usize) -> SolverResult<()> {
        if let Bounds::PerVariable(lo, _) = &self.bounds {
            if lo.len() != ndof {
                return Err(SolverError::InvalidBounds(format!(
                    "bounds have {} entries but the problem has {} variables",
                    lo.len(),
                    ndof
                )));
            }
        }
        if let Some(MaxChange::PerVariable(c)) = &self.max_change {
            if c.len() != ndof {
                return Err(SolverError::InvalidBounds(format!(
                    "max_change has {} entries but the problem has {} variables",
                    c.len(),
                    ndof
                )));
            }
        }
        Ok(())
    }

    fn bound(&self, i: usize, upper: bool) -> f64 {
        match (&self.bounds, upper) {
            (Bounds::Uniform(lo, _), false) => *lo,
            (Bounds::Uniform(_, hi), true) => *hi,
            (Bounds::PerVariable(lo, _), false) => lo[i],
            (Bounds::PerVariable(_, hi), true) => hi[i],
        }
    }

    fn max_change(&self, i: usize) -> f64 {
        match &self.max_change {
            None => f64::INFINITY,
            Some(MaxChange::Uniform(c)) => *c,
            Some(MaxChange::PerVariable(c)) => c[i],
        }
    }

    pub fn lower_bound(&self, x: &Array1<f64>, consider_max_change: bool) -> Array1<f64> {
        Array1::from_shape_fn(x.len(), |i| {
            let lo = self.bound(i, false);
            if consider_max_change {
                lo.max(x[i] - self.max_change(i))
            } else {
                lo
            }
        })
    }

    pub fn upper_bound(&self, x: &Array1<f64>, consider_max_change: bool) -> Array1<f64> {
        Array1::from_shape_fn(x.len(), |i| {
            let hi = self.bound(i, true);
            if consider_max_change {
                hi.min(x[i] + self.max_change(i))
            } else {
                hi
            }
        })
    }

    /// `‖clip(x - g, lower, upper) - x‖`, zero at a KKT point of the box.
    pub fn projected_grad_norm(&self, x: &Array1<f64>, grad: &Array1<f64>) -> f64 {
        let lower = self.lower_bound(x, false);
        let upper = self.upper_bound(x, false);
        let mut projected = x - grad;
        Zip::from(&mut projected)
            .and(x)
            .and(&lower)
            .and(&upper)
            .for_each(|p, &xi, &lo, &hi| *p = p.max(lo).min(hi) - xi);
        projected.dot(&projected).sqrt()
    }
}

/// Names accepted by [`create`].
pub fn available_box_solvers() -> Vec<&'static str> {
    vec!["L-BFGS-B", "MMA"]
}

/// Build a bound-constrained solver from `params.solver` and `params.box_constraints`.
pub fn create(params: &SolverParams, characteristic_length: f64) -> SolverResult<Solver> {
    params.validate()?;
    let strategies: Vec<Box<dyn DescentStrategy>> = match params.solver.as_str() {
        "LBFGSB" | "L-BFGS-B" => vec![Box::new(Lbfgsb::new(&params.lbfgsb))],
        "MMA" => {
            if params.line_search.method != "None" {
                return Err(SolverError::InvalidParameters(format!(
                    "MMA needs the \"None\" line search, got \"{}\"",
                    params.line_search.method
                ))
                .log());
            }
            vec![Box::new(Mma::new(&params.mma))]
        }
        other => return Err(SolverError::UnknownSolver(other.to_string()).log()),
    };

    let bounds = params.box_constraints.bounds.clone().ok_or_else(|| {
        SolverError::InvalidBounds("box_constraints.bounds is required".to_string()).log()
    })?;
    let constraints = BoxConstraints::new(bounds, params.box_constraints.max_change.clone())?;
    let line_search = line_search::create(&params.line_search)?;
    Ok(Solver::with_strategies(params, strategies, line_search, characteristic_length)?
        .with_box_constraints(constraints))
}
