//! Gradient storage for second-order differentiation
//!
//! Stores gradients as `Var`s instead of raw `Tensor`s, so the gradient
//! computation can be differentiated again.

use super::{GradStore, Var};
use crate::error::Result;
use crate::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Storage for gradients as differentiable variables
///
/// Produced by [`backward_with_graph`](super::backward_with_graph) and
/// [`grad_with_graph`](super::grad_with_graph).
///
/// # Example
///
/// ```
/// # use logbmm::autograd::{Var, grad, grad_with_graph, var_log_matmul};
/// # use logbmm::tensor::Tensor;
/// let a = Var::new(Tensor::rand(&[1, 3, 4]), true);
/// let b = Var::new(Tensor::rand(&[1, 4, 2]), true);
/// let c = var_log_matmul(&a, &b)?;
///
/// // First backward keeps its graph
/// let upstream = Var::new(Tensor::rand(&[1, 3, 2]), true);
/// let grads = grad_with_graph(&[&c], &[upstream.clone()])?;
/// let grad_a = grads.get_var(a.id()).unwrap();
///
/// // Differentiate dA again with respect to a, b and the upstream gradient
/// let second = grad(&[grad_a], &[Tensor::rand(&[1, 3, 4])])?;
/// assert!(second.get(b.id()).is_some());
/// # Ok::<(), logbmm::error::Error>(())
/// ```
pub struct VarGradStore {
    grads: HashMap<TensorId, Var>,
}

impl VarGradStore {
    /// Create a new empty gradient store
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Get the gradient Var for a tensor
    pub fn get_var(&self, id: TensorId) -> Option<&Var> {
        self.grads.get(&id)
    }

    /// Get the gradient tensor for a tensor
    pub fn get(&self, id: TensorId) -> Option<&Tensor> {
        self.grads.get(&id).map(|v| v.tensor())
    }

    /// Number of stored gradients
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Accumulate a gradient Var using a fallible addition function
    ///
    /// The addition function should be a `var_*` op so the sum stays
    /// differentiable.
    pub fn try_accumulate<F>(&mut self, id: TensorId, grad: Var, add_fn: F) -> Result<()>
    where
        F: FnOnce(Var, Var) -> Result<Var>,
    {
        use std::collections::hash_map::Entry;

        match self.grads.entry(id) {
            Entry::Occupied(mut entry) => {
                let accumulated = add_fn(entry.get().clone(), grad)?;
                entry.insert(accumulated);
            }
            Entry::Vacant(entry) => {
                entry.insert(grad);
            }
        }
        Ok(())
    }

    /// Detach all gradients into a regular [`GradStore`]
    pub fn to_grad_store(self) -> GradStore {
        let mut store = GradStore::new();
        for (id, var) in self.grads {
            store.insert(id, var.tensor().clone());
        }
        store
    }
}

impl Default for VarGradStore {
    fn default() -> Self {
        Self::new()
    }
}
