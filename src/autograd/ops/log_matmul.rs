//! Backward implementations for the dense log-semiring product
//!
//! `C = A ⊗ B` with `C[b,i,k] = logsumexp_j(A[b,i,j] + B[b,j,k])`.

use super::Operand;
use crate::autograd::{GradFn, Var};
use crate::error::Result;
use crate::ops::{log_matmul_backward, log_matmul_double_backward};
use crate::tensor::{Tensor, TensorId};
use std::sync::Arc;

// ============================================================================
// LogMatmulBackward
// ============================================================================

/// Backward for the dense log-semiring product: C = A ⊗ B
///
/// With softmax weights `w[i,j,k] = exp(A[i,j] + B[j,k] - C[i,k])`:
/// - dL/dA[i,j] = Σ_k dL/dC[i,k] · w[i,j,k]
/// - dL/dB[j,k] = Σ_i dL/dC[i,k] · w[i,j,k]
///
/// `backward_var` attaches a [`LogMatmulGradBackward`] to each result, making
/// the rule twice differentiable.
pub struct LogMatmulBackward {
    input_ids: [TensorId; 2],
    saved_tensors: [Tensor; 3], // [a, b, c]
    input_grad_fns: [Option<Arc<dyn GradFn>>; 2],
}

impl LogMatmulBackward {
    /// Create a new LogMatmulBackward
    pub fn new(
        a_id: TensorId,
        b_id: TensorId,
        a: Tensor,
        b: Tensor,
        output: Tensor,
        a_grad_fn: Option<Arc<dyn GradFn>>,
        b_grad_fn: Option<Arc<dyn GradFn>>,
    ) -> Self {
        Self {
            input_ids: [a_id, b_id],
            saved_tensors: [a, b, output],
            input_grad_fns: [a_grad_fn, b_grad_fn],
        }
    }
}

impl GradFn for LogMatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let [a, b, c] = &self.saved_tensors;
        let (grad_a, grad_b) = log_matmul_backward(a, b, c, grad_output)?;
        Ok(vec![Some(grad_a), Some(grad_b)])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        let [a, b, c] = &self.saved_tensors;
        let (grad_a, grad_b) = log_matmul_backward(a, b, c, grad_output.tensor())?;

        let node = |operand| -> Arc<dyn GradFn> {
            Arc::new(LogMatmulGradBackward {
                operand,
                input_ids: [self.input_ids[0], self.input_ids[1], grad_output.id()],
                saved_tensors: [
                    a.clone(),
                    b.clone(),
                    c.clone(),
                    grad_output.tensor().clone(),
                ],
                input_grad_fns: [
                    self.input_grad_fns[0].clone(),
                    self.input_grad_fns[1].clone(),
                    grad_output.grad_fn().cloned(),
                ],
            })
        };

        Ok(vec![
            Some(Var::from_op(grad_a, node(Operand::Lhs))),
            Some(Var::from_op(grad_b, node(Operand::Rhs))),
        ])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor] {
        &self.saved_tensors
    }

    fn name(&self) -> &'static str {
        "LogMatmulBackward"
    }
}

// ============================================================================
// LogMatmulGradBackward
// ============================================================================

/// Double-backward for the dense log-semiring product
///
/// Output is `dA` or `dB` (per [`Operand`]) as a function of
/// `(A, B, dL/dC)`. Given the upstream gradient of that output it returns
/// gradients for all three, see [`log_matmul_double_backward`].
pub struct LogMatmulGradBackward {
    operand: Operand,
    input_ids: [TensorId; 3],
    saved_tensors: [Tensor; 4], // [a, b, c, grad_c]
    input_grad_fns: [Option<Arc<dyn GradFn>>; 3],
}

impl GradFn for LogMatmulGradBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let [a, b, c, grad_c] = &self.saved_tensors;
        let (upstream_a, upstream_b) = match self.operand {
            Operand::Lhs => (Some(grad_output), None),
            Operand::Rhs => (None, Some(grad_output)),
        };
        let (h_a, h_b, h_grad_c) =
            log_matmul_double_backward(a, b, c, grad_c, upstream_a, upstream_b)?;
        Ok(vec![Some(h_a), Some(h_b), Some(h_grad_c)])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor] {
        &self.saved_tensors
    }

    fn name(&self) -> &'static str {
        match self.operand {
            Operand::Lhs => "LogMatmulGradABackward",
            Operand::Rhs => "LogMatmulGradBBackward",
        }
    }
}
