//! Log-semiring operations
//!
//! The log semiring replaces `(×, +)` with `(+, logsumexp)`; its zero is `-inf`
//! and its one is `0`. Every multiply in this crate reduces through the
//! [`LogSumExp`] accumulator.
//!
//! ```text
//! logsumexp         LogSumExp accumulator, softmax weights
//! log_matmul        C[b,i,k] = logsumexp_j(A[b,i,j] + B[b,j,k])
//!   ├── log_matmul_backward         (dA, dB) from dC
//!   └── log_matmul_double_backward  second-order rule for (dA, dB)
//! ```
//!
//! Banded counterparts live in [`crate::sparse`].

mod log_matmul;
mod logsumexp;
pub(crate) mod parallel;

pub use log_matmul::{log_matmul, log_matmul_backward, log_matmul_double_backward};
#[cfg(feature = "rayon")]
pub use logsumexp::par_logsumexp;
pub use logsumexp::{LogSumExp, logsumexp, softmax, softmax_weight};
