//! Gradient storage and accumulation

use crate::error::Result;
use crate::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Gradients computed during a backward pass, keyed by tensor ID
///
/// A tensor used several times in the graph has its gradients summed.
pub struct GradStore {
    grads: HashMap<TensorId, Tensor>,
}

impl GradStore {
    /// Create a new empty gradient store
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Get the gradient for a tensor
    pub fn get(&self, id: TensorId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    /// Insert a gradient (overwrites if exists)
    pub fn insert(&mut self, id: TensorId, grad: Tensor) {
        self.grads.insert(id, grad);
    }

    /// Number of stored gradients
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Add `grad` to the gradient stored for `id`, or store it
    pub fn accumulate(&mut self, id: TensorId, grad: Tensor) -> Result<()> {
        if let Some(existing) = self.grads.remove(&id) {
            self.grads.insert(id, existing.add(&grad)?);
        } else {
            self.grads.insert(id, grad);
        }
        Ok(())
    }
}

impl Default for GradStore {
    fn default() -> Self {
        Self::new()
    }
}
