//! Element-wise arithmetic on variables

use crate::autograd::Var;
use crate::autograd::ops::AddBackward;
use crate::error::Result;
use std::sync::Arc;
use tracing::trace;

/// Add two variables: z = a + b
///
/// Creates AddBackward for gradient computation. The engine uses this to
/// accumulate gradients that must stay differentiable.
pub fn var_add(a: &Var, b: &Var) -> Result<Var> {
    let output = a.tensor().add(b.tensor())?;
    trace!(shape = ?output.shape(), "var_add");

    if a.requires_grad() || b.requires_grad() {
        let grad_fn = AddBackward::new(a.id(), b.id(), a.grad_fn().cloned(), b.grad_fn().cloned());
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}
