//! Gradient function trait

use super::Var;
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorId};
use std::sync::Arc;

/// Custom differentiation rule attached to the output of an operation
///
/// A rule provides up to three entry points:
/// the forward pass is the `var_*` function that creates it, [`backward`]
/// maps the upstream gradient to input gradients, and [`backward_var`] does
/// the same while recording its own graph so the result can be differentiated
/// again (double-backward).
///
/// [`backward`]: GradFn::backward
/// [`backward_var`]: GradFn::backward_var
pub trait GradFn: Send + Sync {
    /// Compute gradients for input tensors given the gradient of the output
    ///
    /// Returns one optional gradient per input; `None` means no gradient
    /// flows to that input.
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>>;

    /// Differentiable version of [`GradFn::backward`]
    ///
    /// The returned gradients carry their own `GradFn`s. Rules that do not
    /// support another level of differentiation keep this default.
    fn backward_var(&self, _grad_output: &Var) -> Result<Vec<Option<Var>>> {
        Err(Error::NotImplemented {
            feature: "differentiable backward for this operation",
        })
    }

    /// Get the IDs of input tensors
    fn inputs(&self) -> &[TensorId];

    /// Get the grad_fns of input tensors for graph traversal
    ///
    /// `None` marks a leaf input.
    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        vec![None; self.inputs().len()]
    }

    /// Get tensors saved during forward pass
    fn saved_tensors(&self) -> &[Tensor] {
        &[]
    }

    /// Human-readable name for debugging
    fn name(&self) -> &'static str;
}
