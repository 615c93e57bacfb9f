//! Strategies that honour simple bounds `lower <= x <= upper` on their own instead of
//! clamping an unconstrained direction.

mod lbfgsb;
mod mma;

pub use lbfgsb::Lbfgsb;
pub use mma::Mma;
