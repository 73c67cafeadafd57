//! Core Tensor type

use super::{Shape, TensorId};
use crate::error::{Error, Result};
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Contiguous, row-major `f64` array
///
/// Values live in an `Arc<[f64]>`, so cloning a tensor is cheap and never
/// copies data. A clone receives a fresh [`TensorId`]; autograd treats it as
/// a distinct node.
///
/// Log-domain tensors may hold `-inf`, the zero of the log semiring.
///
/// # Example
///
/// ```
/// use logbmm::tensor::Tensor;
///
/// let t = Tensor::from_slice(&[0.0, 1.0, 2.0, 3.0], &[1, 2, 2]);
/// assert_eq!(t.dims3("t").unwrap(), [1, 2, 2]);
/// ```
pub struct Tensor {
    /// Unique ID for autograd tracking
    id: TensorId,
    data: Arc<[f64]>,
    shape: Shape,
}

impl Tensor {
    /// Create a tensor from a slice of data
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of the `shape` dimensions.
    /// For a fallible alternative, use [`Self::try_from_slice`].
    pub fn from_slice(data: &[f64], shape: &[usize]) -> Self {
        Self::try_from_slice(data, shape).expect("Tensor::from_slice failed")
    }

    /// Create a tensor from a slice of data (fallible version)
    pub fn try_from_slice(data: &[f64], shape: &[usize]) -> Result<Self> {
        Self::try_from_vec(data.to_vec(), shape)
    }

    /// Create a tensor taking ownership of `data`
    pub fn try_from_vec(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self::from_parts(data, Shape::from(shape)))
    }

    /// Length is checked by callers inside the crate.
    pub(crate) fn from_parts(data: Vec<f64>, shape: Shape) -> Self {
        debug_assert_eq!(data.len(), shape.numel());
        Self {
            id: TensorId::new(),
            data: data.into(),
            shape,
        }
    }

    /// Create a tensor filled with `value`
    pub fn full(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self::from_parts(vec![value; len], Shape::from(shape))
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with the log-semiring zero (`-inf`)
    pub fn neg_inf(shape: &[usize]) -> Self {
        Self::full(shape, f64::NEG_INFINITY)
    }

    /// Uniform samples in `[0, 1)` from the thread-local generator
    pub fn rand(shape: &[usize]) -> Self {
        Self::rand_with(shape, &mut rand::rng())
    }

    /// Uniform samples in `[0, 1)` from a caller-supplied generator
    pub fn rand_with<G: Rng + ?Sized>(shape: &[usize], rng: &mut G) -> Self {
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| rng.random::<f64>()).collect();
        Self::from_parts(data, Shape::from(shape))
    }

    // ===== Accessors =====

    /// Get the tensor ID
    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Get the total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Borrow the underlying row-major buffer
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy the data into a `Vec`
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// Interpret the tensor as a `(batch, rows, cols)` stack of matrices
    ///
    /// `arg` names the operand in the error message.
    pub fn dims3(&self, arg: &'static str) -> Result<[usize; 3]> {
        match *self.shape() {
            [batch, rows, cols] => Ok([batch, rows, cols]),
            _ => Err(Error::InvalidArgument {
                arg,
                reason: format!(
                    "expected a 3-D (batch, rows, cols) tensor, got shape {:?}",
                    self.shape()
                ),
            }),
        }
    }

    /// Element-wise sum of two tensors of identical shape
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        if self.shape() != other.shape() {
            return Err(Error::shape_mismatch(self.shape(), other.shape()));
        }
        let data = self
            .as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Self::from_parts(data, self.shape.clone()))
    }

    /// Largest absolute element-wise difference, for tests and diagnostics
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<f64> {
        if self.shape() != other.shape() {
            return Err(Error::shape_mismatch(self.shape(), other.shape()));
        }
        Ok(self
            .as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| {
                if a == b {
                    // covers matching infinities
                    0.0
                } else {
                    (a - b).abs()
                }
            })
            .fold(0.0, f64::max))
    }
}

impl Clone for Tensor {
    /// Clone shares the same buffer under a new ID
    fn clone(&self) -> Self {
        Self {
            id: TensorId::new(),
            data: Arc::clone(&self.data),
            shape: self.shape.clone(),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .finish()
    }
}
