//! # logbmm
//!
//! **Batched matrix multiplication in the log semiring, dense and banded,
//! with first- and second-order gradients.**
//!
//! The log semiring replaces `(×, +)` by `(+, logsumexp)`:
//!
//! ```text
//! C[b, i, k] = log Σ_j exp(A[b, i, j] + B[b, j, k])
//! ```
//!
//! This is the inner step of forward algorithms over chains and lattices,
//! where scores live in log space and underflow forbids a plain product.
//!
//! ## Features
//!
//! - **Dense**: [`ops::log_matmul`] over `(batch, n, m) × (batch, m, p)`
//! - **Banded**: [`sparse::BandedMatrix`] keeps `lu + ld + 1` diagonals per
//!   row; [`sparse::banded_log_matmul`] only touches band entries
//! - **Autograd**: [`autograd::Var`] records the graph; gradients can be
//!   differentiated once more (Hessian-vector products)
//!
//! ## Quick Start
//!
//! ```
//! use logbmm::prelude::*;
//!
//! let a = Var::new(Tensor::rand(&[2, 4, 3]), true);
//! let b = Var::new(Tensor::rand(&[2, 3, 5]), true);
//! let c = var_log_matmul(&a, &b)?;
//!
//! let grads = grad(&[&c], &[Tensor::ones(&[2, 4, 5])])?;
//! assert_eq!(grads.get(a.id()).unwrap().shape(), &[2, 4, 3]);
//! # Ok::<(), logbmm::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): kernels split their output rows across threads

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod autograd;
pub mod error;
pub mod ops;
pub mod sparse;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::autograd::{
        BandedVar, Var, backward, backward_with_graph, grad, grad_with_graph, var_banded_log_matmul,
        var_log_matmul,
    };
    pub use crate::error::{Error, Result};
    pub use crate::ops::{LogSumExp, log_matmul};
    pub use crate::sparse::{Band, BandedMatrix, banded_log_matmul};
    pub use crate::tensor::Tensor;
}
