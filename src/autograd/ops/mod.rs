//! Backward implementations for operations
//!
//! Each operation has a corresponding backward struct that implements
//! `GradFn` to compute gradients during the backward pass.
//!
//! # Structure
//!
//! - `arithmetic`: element-wise addition (gradient accumulation)
//! - `log_matmul`: dense log-semiring product and its double-backward
//! - `banded`: band extraction, dense projection, transpose and the banded
//!   log-semiring product with its double-backward

mod arithmetic;
mod banded;
mod log_matmul;

pub use arithmetic::*;
pub use banded::*;
pub use log_matmul::*;

/// Which first-order output a double-backward node differentiates
///
/// The second-order map is linear in the upstream gradients of `dA` and `dB`,
/// so one node per operand and the engine's accumulation give the joint
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Gradient of the left operand (`dA` / `dX`)
    Lhs,
    /// Gradient of the right operand (`dB` / `dY`)
    Rhs,
}
