//! Dense linear-system backends for the Newton strategies.

use ndarray::{Array1, Array2};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinAlgError {
    #[error("matrix is singular")]
    SingularMatrix,
    #[error("matrix is not positive definite")]
    NotPositiveDefinite,
    #[error("dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    #[error("unknown linear solver: {0}")]
    UnknownSolver(String),
}

/// Solves `A x = b` for a square dense `A`.
pub trait LinearSolver {
    fn name(&self) -> &'static str;

    fn solve(&mut self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinAlgError>;
}

/// Names accepted by [`create_linear_solver`].
pub fn available_linear_solvers() -> Vec<&'static str> {
    vec!["LU", "Cholesky"]
}

/// Build a backend by name. An empty name picks LU.
pub fn create_linear_solver(name: &str) -> Result<Box<dyn LinearSolver>, LinAlgError> {
    match name {
        "" | "LU" | "DenseLU" => Ok(Box::new(DenseLu::default())),
        "Cholesky" | "DenseCholesky" | "LLT" => Ok(Box::new(DenseCholesky)),
        other => Err(LinAlgError::UnknownSolver(other.to_string())),
    }
}

fn check_dims(a: &Array2<f64>, b: &Array1<f64>) -> Result<usize, LinAlgError> {
    let (rows, cols) = a.dim();
    if rows != cols || b.len() != rows {
        return Err(LinAlgError::DimensionMismatch {
            rows,
            cols,
            rhs: b.len(),
        });
    }
    Ok(rows)
}

/// LU factorization with partial pivoting.
#[derive(Debug, Clone)]
pub struct DenseLu {
    /// Pivots with magnitude below this are treated as zero.
    pub pivot_tolerance: f64,
}

impl Default for DenseLu {
    fn default() -> Self {
        Self {
            pivot_tolerance: 1e-12,
        }
    }
}

impl LinearSolver for DenseLu {
    fn name(&self) -> &'static str {
        "LU"
    }

    fn solve(&mut self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinAlgError> {
        let n = check_dims(a, b)?;
        let mut lu = a.clone();
        let mut perm: Vec<usize> = (0..n).collect();

        for col in 0..n {
            let mut max_row = col;
            let mut max_val = lu[[col, col]].abs();
            for row in (col + 1)..n {
                let v = lu[[row, col]].abs();
                if v > max_val {
                    max_val = v;
                    max_row = row;
                }
            }
            if !(max_val >= self.pivot_tolerance) {
                return Err(LinAlgError::SingularMatrix);
            }
            if max_row != col {
                for j in 0..n {
                    lu.swap([col, j], [max_row, j]);
                }
                perm.swap(col, max_row);
            }

            let pivot = lu[[col, col]];
            for row in (col + 1)..n {
                let factor = lu[[row, col]] / pivot;
                lu[[row, col]] = factor;
                for j in (col + 1)..n {
                    lu[[row, j]] -= factor * lu[[col, j]];
                }
            }
        }

        // Forward substitution with unit lower triangle.
        let mut y: Array1<f64> = perm.iter().map(|&p| b[p]).collect();
        for i in 1..n {
            for j in 0..i {
                y[i] -= lu[[i, j]] * y[j];
            }
        }

        let mut x = Array1::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for j in (i + 1)..n {
                sum -= lu[[i, j]] * x[j];
            }
            x[i] = sum / lu[[i, i]];
        }
        Ok(x)
    }
}

/// Cholesky factorization `A = L Lᵀ`; fails on matrices that are not positive definite.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseCholesky;

impl LinearSolver for DenseCholesky {
    fn name(&self) -> &'static str {
        "Cholesky"
    }

    fn solve(&mut self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinAlgError> {
        let n = check_dims(a, b)?;
        let mut l = Array2::<f64>::zeros((n, n));

        for j in 0..n {
            let mut diag = a[[j, j]];
            for k in 0..j {
                diag -= l[[j, k]] * l[[j, k]];
            }
            if !(diag > 0.0) || !diag.is_finite() {
                return Err(LinAlgError::NotPositiveDefinite);
            }
            let ljj = diag.sqrt();
            l[[j, j]] = ljj;
            for i in (j + 1)..n {
                let mut sum = a[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                l[[i, j]] = sum / ljj;
            }
        }

        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= l[[i, k]] * y[k];
            }
            y[i] = sum / l[[i, i]];
        }
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= l[[k, i]] * x[k];
            }
            x[i] = sum / l[[i, i]];
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_lu_needs_pivoting() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let b = array![3.0, 7.0];
        let x = DenseLu::default().solve(&a, &b).unwrap();
        assert_that(&x[0]).is_close_to(7.0, 1e-12);
        assert_that(&x[1]).is_close_to(3.0, 1e-12);
    }

    #[test]
    fn test_lu_3x3() {
        let a = array![[2.0, 1.0, -1.0], [-3.0, -1.0, 2.0], [-2.0, 1.0, 2.0]];
        let b = array![8.0, -11.0, -3.0];
        let x = DenseLu::default().solve(&a, &b).unwrap();
        assert_that(&x[0]).is_close_to(2.0, 1e-10);
        assert_that(&x[1]).is_close_to(3.0, 1e-10);
        assert_that(&x[2]).is_close_to(-1.0, 1e-10);
    }

    #[test]
    fn test_lu_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let result = DenseLu::default().solve(&a, &array![1.0, 2.0]);
        assert_that(&result).is_err_containing(LinAlgError::SingularMatrix);
    }

    #[test]
    fn test_cholesky_spd() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = DenseCholesky.solve(&a, &b).unwrap();
        let residual = &a.dot(&x) - &b;
        assert_that(&residual.dot(&residual).sqrt()).is_less_than(1e-12);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 0.0], [0.0, -1.0]];
        let result = DenseCholesky.solve(&a, &array![1.0, 1.0]);
        assert_that(&result).is_err_containing(LinAlgError::NotPositiveDefinite);
    }

    #[test]
    fn test_dimension_mismatch_and_factory() {
        let a = array![[1.0, 0.0], [0.0, 1.0]];
        let result = DenseLu::default().solve(&a, &array![1.0]);
        assert!(matches!(result, Err(LinAlgError::DimensionMismatch { rhs: 1, .. })));
        assert_that(&create_linear_solver("Cholesky").unwrap().name()).is_equal_to("Cholesky");
        assert_that(&create_linear_solver("").unwrap().name()).is_equal_to("LU");
        assert!(create_linear_solver("Hypre").is_err());
    }
}
