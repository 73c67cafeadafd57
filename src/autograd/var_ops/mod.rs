//! Operations on Var that build the computation graph
//!
//! These functions perform forward computation and create the appropriate
//! backward functions for gradient tracking.
//!
//! # Example
//!
//! ```
//! use logbmm::autograd::{Var, backward_with_graph, grad, var_log_matmul};
//! use logbmm::tensor::Tensor;
//!
//! let a = Var::new(Tensor::rand(&[1, 1, 3]), true);
//! let b = Var::new(Tensor::rand(&[1, 3, 1]), true);
//! let c = var_log_matmul(&a, &b)?;
//!
//! // First-order gradients that can themselves be differentiated
//! let grads = backward_with_graph(&c)?;
//! let grad_a = grads.get_var(a.id()).unwrap();
//!
//! // Second order: d/dB of <dA, 1>
//! let second = grad(&[grad_a], &[Tensor::ones(&[1, 1, 3])])?;
//! assert_eq!(second.get(b.id()).unwrap().shape(), &[1, 3, 1]);
//! # Ok::<(), logbmm::error::Error>(())
//! ```

mod arithmetic;
mod banded;
mod log_matmul;

pub use arithmetic::var_add;
pub use banded::{var_band_transpose, var_banded_log_matmul, var_extract_band, var_to_dense};
pub use log_matmul::var_log_matmul;

pub(crate) use banded::{var_gather_band, var_scatter_band, var_transpose_band};
