//! Variable: tensor with gradient tracking

use super::GradFn;
use crate::error::Result;
use crate::sparse::{Band, BandedMatrix};
use crate::tensor::{Tensor, TensorId};
use std::sync::Arc;

/// A tensor that tracks gradients for automatic differentiation
///
/// `Var` wraps a `Tensor` and optionally records how it was created
/// (via `grad_fn`), enabling reverse-mode autodiff. Clones are handles to the
/// same graph node and share its ID.
pub struct Var {
    /// The underlying tensor data
    tensor: Tensor,

    /// Unique identifier for graph tracking
    id: TensorId,

    /// Whether this variable requires gradient computation
    requires_grad: bool,

    /// Function to compute gradients (None for leaf tensors)
    grad_fn: Option<Arc<dyn GradFn>>,
}

impl Var {
    /// Create a leaf variable (no gradient function)
    pub fn new(tensor: Tensor, requires_grad: bool) -> Self {
        Self {
            id: tensor.id(),
            tensor,
            requires_grad,
            grad_fn: None,
        }
    }

    /// Create from an operation result with a gradient function
    pub fn from_op(tensor: Tensor, grad_fn: Arc<dyn GradFn>) -> Self {
        Self {
            id: TensorId::new(),
            tensor,
            requires_grad: true,
            grad_fn: Some(grad_fn),
        }
    }

    /// Get the tensor ID
    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Access the underlying tensor
    #[inline]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Check if this variable requires gradients
    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Get the gradient function (if any)
    #[inline]
    pub fn grad_fn(&self) -> Option<&Arc<dyn GradFn>> {
        self.grad_fn.as_ref()
    }

    /// Detach from the computation graph
    ///
    /// Returns a new leaf variable that doesn't track gradients.
    pub fn detach(&self) -> Self {
        Self {
            tensor: self.tensor.clone(),
            id: TensorId::new(),
            requires_grad: false,
            grad_fn: None,
        }
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Get the number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.tensor.numel()
    }
}

impl Clone for Var {
    fn clone(&self) -> Self {
        Self {
            tensor: self.tensor.clone(),
            id: self.id,
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.clone(),
        }
    }
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.id)
            .field("shape", &self.tensor.shape())
            .field("requires_grad", &self.requires_grad)
            .field("grad_fn", &self.grad_fn.as_ref().map(|g| g.name()))
            .finish()
    }
}

/// A [`Var`] holding band storage, together with its band geometry
///
/// The wrapped variable is the `(batch, rows, lu + ld + 1)` storage tensor;
/// gradients with respect to it use the same layout.
#[derive(Clone, Debug)]
pub struct BandedVar {
    var: Var,
    band: Band,
    cols: usize,
}

impl BandedVar {
    /// Leaf variable over an existing banded matrix
    pub fn new(matrix: BandedMatrix, requires_grad: bool) -> Self {
        let (band, cols) = (matrix.band(), matrix.cols());
        Self {
            var: Var::new(matrix.into_data(), requires_grad),
            band,
            cols,
        }
    }

    /// Attach band geometry to a variable holding band storage
    pub fn from_var(var: Var, band: Band, cols: usize) -> Result<Self> {
        BandedMatrix::new(var.tensor().clone(), band, cols)?;
        Ok(Self { var, band, cols })
    }

    pub(crate) fn from_parts(var: Var, band: Band, cols: usize) -> Self {
        Self { var, band, cols }
    }

    /// The storage variable
    #[inline]
    pub fn var(&self) -> &Var {
        &self.var
    }

    /// ID of the storage variable
    #[inline]
    pub fn id(&self) -> TensorId {
        self.var.id()
    }

    /// Band descriptor
    #[inline]
    pub fn band(&self) -> Band {
        self.band
    }

    /// Number of columns of the represented matrix
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Current value as a [`BandedMatrix`]
    pub fn matrix(&self) -> BandedMatrix {
        BandedMatrix::from_parts(self.var.tensor().clone(), self.band, self.cols)
    }
}
