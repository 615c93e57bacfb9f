//! Gradient-based minimization with a ladder of fallback descent strategies.
//!
//! A [`Solver`] minimizes a differentiable [`Problem`] by repeatedly asking a descent
//! strategy (BFGS, L-BFGS, Newton, ADAM, gradient descent, ...) for an update direction
//! and scaling it with a line search. When the active strategy produces an unusable
//! direction, or the line search finds no acceptable step, the solver falls back to the
//! next, more robust strategy and returns to the primary one after a configurable
//! number of successful iterations. Box constraints are handled by L-BFGS-B and MMA.
//!
//! It features:
//! - Backtracking, Armijo, Strong Wolfe and "None" line searches.
//! - Convergence on step size, energy change (after a streak of small changes) and
//!   gradient norm, all scaled by a characteristic length.
//! - JSON configuration with defaults for every field, and a JSON telemetry snapshot.
//! - `tracing` events for every iteration and strategy change.
//!
//! # Example
//! Minimize the Rosenbrock function with BFGS.
//!
//! ```
//! use descent_ladder::{FnProblem, Solver, SolverParams, Status};
//! use ndarray::{array, Array1};
//!
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let a = 1.0;
//!     let b = 100.0;
//!     let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
//!         2.0 * b * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let params = SolverParams::default()
//!     .with_solver("BFGS")
//!     .with_max_iterations(200);
//! let mut solver = Solver::new(&params, 1.0).expect("valid parameters");
//!
//! let mut x = array![-1.2, 1.0];
//! let status = solver
//!     .minimize(&mut FnProblem::new(rosenbrock), &mut x)
//!     .expect("BFGS failed to solve");
//!
//! println!(
//!     "Found minimum at {} in {} iterations.",
//!     x,
//!     solver.criteria().iterations
//! );
//!
//! assert_eq!(status, Status::GradNormTolerance);
//! assert!((x[0] - 1.0).abs() < 1e-4);
//! assert!((x[1] - 1.0).abs() < 1e-4);
//! ```

pub mod box_solver;
pub mod criteria;
pub mod descent_strategies;
pub mod error;
pub mod info;
pub mod line_search;
pub mod linalg;
pub mod logger;
pub mod params;
pub mod problem;
pub mod solver;

pub use box_solver::{BoxConstraints, Bounds, MaxChange};
pub use criteria::{Criteria, Status};
pub use error::{ErrorCode, SolverError, SolverResult};
pub use info::SolverInfo;
pub use logger::{init_logger, init_logger_with_level};
pub use params::SolverParams;
pub use problem::{FnProblem, Problem};
pub use solver::Solver;
