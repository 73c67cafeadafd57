//! Backward implementation for element-wise addition

use crate::autograd::{GradFn, Var};
use crate::error::Result;
use crate::tensor::{Tensor, TensorId};
use std::sync::Arc;

// ============================================================================
// AddBackward
// ============================================================================

/// Backward for element-wise addition: z = a + b
///
/// Gradients:
/// - dL/da = dL/dz (pass through)
/// - dL/db = dL/dz (pass through)
pub struct AddBackward {
    input_ids: [TensorId; 2],
    input_grad_fns: [Option<Arc<dyn GradFn>>; 2],
}

impl AddBackward {
    /// Create a new AddBackward
    pub fn new(
        a_id: TensorId,
        b_id: TensorId,
        a_grad_fn: Option<Arc<dyn GradFn>>,
        b_grad_fn: Option<Arc<dyn GradFn>>,
    ) -> Self {
        Self {
            input_ids: [a_id, b_id],
            input_grad_fns: [a_grad_fn, b_grad_fn],
        }
    }
}

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad_output.clone()), Some(grad_output.clone())])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grad_output.clone()), Some(grad_output.clone())])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        self.input_grad_fns.to_vec()
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}
