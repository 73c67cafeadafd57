//! Automatic differentiation (autograd)
//!
//! Reverse-mode automatic differentiation over the log-semiring operations.
//! Operations on [`Var`] record a [`GradFn`] per output; [`backward`] and
//! [`grad`] walk that graph in reverse topological order.
//!
//! Gradients from [`backward_with_graph`] / [`grad_with_graph`] are `Var`s
//! themselves, so feeding one back into [`grad`] yields second-order
//! derivatives. Both products (dense and banded) support this; asking for a
//! third order returns `Error::NotImplemented`.

mod backward;
mod grad_fn;
mod grad_store;
mod var;
mod var_grad_store;

pub mod ops;
mod var_ops;

pub use backward::{backward, backward_with_graph, grad, grad_with_graph};
pub use grad_fn::GradFn;
pub use grad_store::GradStore;
pub use var::{BandedVar, Var};
pub use var_grad_store::VarGradStore;
pub use var_ops::{
    var_add, var_band_transpose, var_banded_log_matmul, var_extract_band, var_log_matmul,
    var_to_dense,
};
