//! Dense log-semiring product on variables

use crate::autograd::Var;
use crate::autograd::ops::LogMatmulBackward;
use crate::error::Result;
use crate::ops::log_matmul;
use std::sync::Arc;
use tracing::trace;

/// Log-semiring batched product: C = A ⊗ B
///
/// Creates LogMatmulBackward, which supports first- and second-order
/// differentiation.
pub fn var_log_matmul(a: &Var, b: &Var) -> Result<Var> {
    let output = log_matmul(a.tensor(), b.tensor())?;
    trace!(shape = ?output.shape(), "var_log_matmul");

    if a.requires_grad() || b.requires_grad() {
        let grad_fn = LogMatmulBackward::new(
            a.id(),
            b.id(),
            a.tensor().clone(),
            b.tensor().clone(),
            output.clone(),
            a.grad_fn().cloned(),
            b.grad_fn().cloned(),
        );
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{backward, backward_with_graph, grad};
    use crate::tensor::Tensor;

    #[test]
    fn test_var_log_matmul_backward() {
        // c = log(e^1 · e^3 + e^2 · e^4)
        let a = Var::new(Tensor::from_slice(&[1.0, 2.0], &[1, 1, 2]), true);
        let b = Var::new(Tensor::from_slice(&[3.0, 4.0], &[1, 2, 1]), true);

        let c = var_log_matmul(&a, &b).unwrap();
        let expected = (4.0f64.exp() + 6.0f64.exp()).ln();
        assert!((c.tensor().to_vec()[0] - expected).abs() < 1e-12);

        let grads = backward(&c).unwrap();
        let w1 = (4.0 - expected).exp();
        let w2 = (6.0 - expected).exp();
        let grad_a = grads.get(a.id()).unwrap().to_vec();
        let grad_b = grads.get(b.id()).unwrap().to_vec();
        assert!((grad_a[0] - w1).abs() < 1e-12 && (grad_a[1] - w2).abs() < 1e-12);
        assert_eq!(grad_a, grad_b);
    }

    #[test]
    fn test_var_log_matmul_second_order() {
        // Scalar c = logsumexp(a1 + b1, a2 + b2), so dc/da_j = w_j and
        // d²c/da_j db_l = w_j (δ_jl - w_l)
        let a = Var::new(Tensor::from_slice(&[0.3, -0.2], &[1, 1, 2]), true);
        let b = Var::new(Tensor::from_slice(&[0.1, 0.5], &[1, 2, 1]), true);
        let c = var_log_matmul(&a, &b).unwrap();

        let first = backward_with_graph(&c).unwrap();
        let grad_a = first.get_var(a.id()).unwrap();
        let w = grad_a.tensor().to_vec();

        // contract dA with (1, 0): picks d/d(a,b) of w_1
        let second = grad(&[grad_a], &[Tensor::from_slice(&[1.0, 0.0], &[1, 1, 2])]).unwrap();
        let h_a = second.get(a.id()).unwrap().to_vec();
        let h_b = second.get(b.id()).unwrap().to_vec();
        let expected = [w[0] * (1.0 - w[0]), -w[0] * w[1]];
        for (got, want) in h_a.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
        for (got, want) in h_b.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_var_log_matmul_no_grad() {
        let a = Var::new(Tensor::zeros(&[1, 2, 2]), false);
        let c = var_log_matmul(&a, &a).unwrap();
        assert!(!c.requires_grad());
    }
}
