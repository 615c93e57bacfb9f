use super::DescentStrategy;
use crate::problem::Problem;
use ndarray::{Array1, Array2, Axis};
use tracing::trace;

/// Dense BFGS on the inverse Hessian.
///
/// The first update scales the identity by `sᵀy / yᵀy`. Later updates are cautious
/// (Li & Fukushima): a pair only updates the approximation when
/// `sᵀy / ‖s‖² >= 1e-6 ‖g‖`, so noisy curvature cannot corrupt it.
#[derive(Debug, Clone, Default)]
pub struct Bfgs {
    prev_x: Option<Array1<f64>>,
    prev_grad: Option<Array1<f64>>,
    h_inv: Option<Array2<f64>>,
}

impl Bfgs {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, s: &Array1<f64>, y: &Array1<f64>, g_norm: f64) {
        let n = s.len();
        let sy = s.dot(y);
        if !(sy > 1e-14) {
            trace!("BFGS: skipping pair with sᵀy={:e}", sy);
            return;
        }

        let h_inv = self.h_inv.get_or_insert_with(|| {
            let yy = y.dot(y);
            if yy > 0.0 {
                Array2::<f64>::eye(n) * (sy / yy)
            } else {
                Array2::<f64>::eye(n)
            }
        });

        let s_norm_sq = s.dot(s);
        if !(s_norm_sq > 1e-16 && sy / s_norm_sq >= 1e-6 * g_norm) {
            return;
        }

        // H ← H - ρ(Hy)sᵀ - ρs(Hy)ᵀ + (ρ²yᵀHy + ρ)ssᵀ
        let rho = 1.0 / sy;
        let h_y = h_inv.dot(y);
        let y_h_y = y.dot(&h_y);

        let s_col = s.view().insert_axis(Axis(1));
        let s_row = s.view().insert_axis(Axis(0));
        let h_y_col = h_y.view().insert_axis(Axis(1));
        let h_y_row = h_y.view().insert_axis(Axis(0));

        h_inv.scaled_add(-rho, &h_y_col.dot(&s_row));
        h_inv.scaled_add(-rho, &s_col.dot(&h_y_row));
        h_inv.scaled_add(rho * rho * y_h_y + rho, &s_col.dot(&s_row));
    }
}

impl DescentStrategy for Bfgs {
    fn name(&self) -> &'static str {
        "BFGS"
    }

    fn reset(&mut self, _ndof: usize) {
        self.prev_x = None;
        self.prev_grad = None;
        self.h_inv = None;
    }

    fn compute_update_direction(
        &mut self,
        _objective: &mut dyn Problem,
        x: &Array1<f64>,
        grad: &Array1<f64>,
    ) -> Option<Array1<f64>> {
        if let (Some(prev_x), Some(prev_grad)) = (self.prev_x.take(), self.prev_grad.take()) {
            if prev_x.len() == x.len() {
                let s = x - &prev_x;
                let y = grad - &prev_grad;
                self.update(&s, &y, grad.dot(grad).sqrt());
            }
        }
        self.prev_x = Some(x.clone());
        self.prev_grad = Some(grad.clone());

        let direction = match &self.h_inv {
            Some(h_inv) if h_inv.nrows() == x.len() => -h_inv.dot(grad),
            _ => -grad,
        };
        Some(direction)
    }

    /// Forget the curvature history once before giving up. Without a stored
    /// approximation the direction is already `-g` and a retry cannot help.
    fn handle_error(&mut self) -> bool {
        if self.h_inv.is_some() {
            self.reset(0);
            true
        } else {
            false
        }
    }
}
