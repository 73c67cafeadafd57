//! Tensor types
//!
//! This module provides the `Tensor` type: a contiguous, row-major `f64`
//! buffer with a shape and a process-unique identity used by autograd.

mod core;
mod id;
mod shape;

pub use core::Tensor;
pub use id::TensorId;
pub use shape::Shape;
