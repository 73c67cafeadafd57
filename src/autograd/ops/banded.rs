//! Backward implementations for banded storage and the banded log-semiring
//! product
//!
//! The index-mapping rules (extract, to-dense, transpose) are linear with
//! linear adjoints, so their `backward_var` is built from the same mappings
//! and can be differentiated any number of times.

use super::Operand;
use crate::autograd::var_ops::{var_gather_band, var_scatter_band, var_transpose_band};
use crate::autograd::{GradFn, Var};
use crate::error::Result;
use crate::sparse::{
    Band, BandedMatrix, banded_log_matmul_backward, banded_log_matmul_double_backward,
    gather_band, scatter_band, transpose_band,
};
use crate::tensor::{Tensor, TensorId};
use std::sync::Arc;

// ============================================================================
// ExtractBandBackward
// ============================================================================

/// Backward for band extraction: X = band(D)
///
/// dL/dD scatters dL/dX back to its dense positions; off-band entries get 0.
pub struct ExtractBandBackward {
    input_id: [TensorId; 1],
    band: Band,
    cols: usize,
    input_grad_fn: Option<Arc<dyn GradFn>>,
}

impl ExtractBandBackward {
    /// Create a new ExtractBandBackward for a dense input with `cols` columns
    pub fn new(
        input_id: TensorId,
        band: Band,
        cols: usize,
        input_grad_fn: Option<Arc<dyn GradFn>>,
    ) -> Self {
        Self {
            input_id: [input_id],
            band,
            cols,
            input_grad_fn,
        }
    }
}

impl GradFn for ExtractBandBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(scatter_band(
            grad_output,
            self.band,
            self.cols,
            0.0,
        ))])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        let grad = var_scatter_band(grad_output, self.band, self.cols, 0.0)?;
        Ok(vec![Some(grad)])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_id
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        vec![self.input_grad_fn.clone()]
    }

    fn name(&self) -> &'static str {
        "ExtractBandBackward"
    }
}

// ============================================================================
// ToDenseBackward
// ============================================================================

/// Backward for dense projection: D = dense(X)
///
/// dL/dX gathers the band entries of dL/dD; padding slots get 0.
pub struct ToDenseBackward {
    input_id: [TensorId; 1],
    band: Band,
    input_grad_fn: Option<Arc<dyn GradFn>>,
}

impl ToDenseBackward {
    /// Create a new ToDenseBackward
    pub fn new(input_id: TensorId, band: Band, input_grad_fn: Option<Arc<dyn GradFn>>) -> Self {
        Self {
            input_id: [input_id],
            band,
            input_grad_fn,
        }
    }
}

impl GradFn for ToDenseBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(gather_band(grad_output, self.band, 0.0)?)])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(var_gather_band(grad_output, self.band, 0.0)?)])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_id
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        vec![self.input_grad_fn.clone()]
    }

    fn name(&self) -> &'static str {
        "ToDenseBackward"
    }
}

// ============================================================================
// BandTransposeBackward
// ============================================================================

/// Backward for band transpose: T = Xᵀ
///
/// The adjoint of a transpose is the transpose back, applied to the
/// gradient's band storage.
pub struct BandTransposeBackward {
    input_id: [TensorId; 1],
    /// Band of the transposed output
    band: Band,
    /// Columns of the transposed output (rows of the input)
    cols: usize,
    input_grad_fn: Option<Arc<dyn GradFn>>,
}

impl BandTransposeBackward {
    /// Create a new BandTransposeBackward from the output geometry
    pub fn new(
        input_id: TensorId,
        band: Band,
        cols: usize,
        input_grad_fn: Option<Arc<dyn GradFn>>,
    ) -> Self {
        Self {
            input_id: [input_id],
            band,
            cols,
            input_grad_fn,
        }
    }
}

impl GradFn for BandTransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(transpose_band(
            grad_output,
            self.band,
            self.cols,
            0.0,
        ))])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        let grad = var_transpose_band(grad_output, self.band, self.cols, 0.0)?;
        Ok(vec![Some(grad)])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_id
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn>>> {
        vec![self.input_grad_fn.clone()]
    }

    fn name(&self) -> &'static str {
        "BandTransposeBackward"
    }
}

// ============================================================================
// BandedLogMatmulBackward
// ============================================================================

/// Band geometry of a saved product `Z = X ⊗ Y`
#[derive(Debug, Clone, Copy)]
struct ProductGeometry {
    x_band: Band,
    x_cols: usize,
    y_band: Band,
    y_cols: usize,
    z_band: Band,
}

impl ProductGeometry {
    fn of(x: &BandedMatrix, y: &BandedMatrix, z: &BandedMatrix) -> Self {
        Self {
            x_band: x.band(),
            x_cols: x.cols(),
            y_band: y.band(),
            y_cols: y.cols(),
            z_band: z.band(),
        }
    }

    /// Rebuild `(x, y, z)` from their saved storage tensors
    fn matrices(
        &self,
        x: &Tensor,
        y: &Tensor,
        z: &Tensor,
    ) -> (BandedMatrix, BandedMatrix, BandedMatrix) {
        (
            BandedMatrix::from_parts(x.clone(), self.x_band, self.x_cols),
            BandedMatrix::from_parts(y.clone(), self.y_band, self.y_cols),
            BandedMatrix::from_parts(z.clone(), self.z_band, self.y_cols),
        )
    }
}

/// Backward for the banded log-semiring product: Z = X ⊗ Y
///
/// Same rule as [`LogMatmulBackward`](super::LogMatmulBackward), evaluated
/// over band-local terms only. Gradients come back in the band layouts of
/// `X` and `Y`.
pub struct BandedLogMatmulBackward {
    input_ids: [TensorId; 2],
    geometry: ProductGeometry,
    saved_tensors: [Tensor; 3], // [x, y, z] band storage
    input_grad_fns: [Option<Arc<dyn GradFn>>; 2],
}

impl BandedLogMatmulBackward {
    /// Create a new BandedLogMatmulBackward
    pub fn new(
        x_id: TensorId,
        y_id: TensorId,
        x: &BandedMatrix,
        y: &BandedMatrix,
        output: &BandedMatrix,
        x_grad_fn: Option<Arc<dyn GradFn>>,
        y_grad_fn: Option<Arc<dyn GradFn>>,
    ) -> Self {
        Self {
            input_ids: [x_id, y_id],
            geometry: ProductGeometry::of(x, y, output),
            saved_tensors: [x.data().clone(), y.data().clone(), output.data().clone()],
            input_grad_fns: [x_grad_fn, y_grad_fn],
        }
    }
}

impl GradFn for BandedLogMatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let [x, y, z] = &self.saved_tensors;
        let (x, y, z) = self.geometry.matrices(x, y, z);
        let (grad_x, grad_y) = banded_log_matmul_backward(&x, &y, &z, grad_output)?;
        Ok(vec![Some(grad_x), Some(grad_y)])
    }

    fn backward_var(&self, grad_output: &Var) -> Result<Vec<Option<Var>>> {
        let [x_data, y_data, z_data] = &self.saved_tensors;
        let (x, y, z) = self.geometry.matrices(x_data, y_data, z_data);
        let (grad_x, grad_y) = banded_log_matmul_backward(&x, &y, &z, grad_output.tensor())?;

        let saved = [
            x_data.clone(),
            y_data.clone(),
            z_data.clone(),
            grad_output.tensor().clone(),
        ];
        let node = |operand| -> Arc<dyn GradFn> {
            Arc::new(BandedLogMatmulGradBackward {
                operand,
                input_ids: [self.input_ids[0], self.input_ids[1], grad_output.id()],
                geometry: self.geometry,
                saved_tensors: saved.clone(),
                input_grad_fns: [
                    self.input_grad_fns[0].clone(),
                    self.input_grad_fns[1].clone(),
                    grad_output.grad_fn().cloned(),
                ],
            })
        };

        Ok(vec![
            Some(Var::from_op(grad_x, node(Operand::Lhs))),
            Some(Var::from_op(grad_y, node(Operand::Rhs))),
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
        "BandedLogMatmulBackward"
    }
}

// ============================================================================
// BandedLogMatmulGradBackward
// ============================================================================

/// Double-backward for the banded log-semiring product
///
/// Differentiates `dX` or `dY` with respect to `(X, Y, dL/dZ)`.
pub struct BandedLogMatmulGradBackward {
    operand: Operand,
    input_ids: [TensorId; 3],
    geometry: ProductGeometry,
    saved_tensors: [Tensor; 4], // [x, y, z, grad_z]
    input_grad_fns: [Option<Arc<dyn GradFn>>; 3],
}

impl GradFn for BandedLogMatmulGradBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Option<Tensor>>> {
        let [x, y, z, grad_z] = &self.saved_tensors;
        let (x, y, z) = self.geometry.matrices(x, y, z);
        let (upstream_x, upstream_y) = match self.operand {
            Operand::Lhs => (Some(grad_output), None),
            Operand::Rhs => (None, Some(grad_output)),
        };
        let (h_x, h_y, h_grad_z) =
            banded_log_matmul_double_backward(&x, &y, &z, grad_z, upstream_x, upstream_y)?;
        Ok(vec![Some(h_x), Some(h_y), Some(h_grad_z)])
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
            Operand::Lhs => "BandedLogMatmulGradXBackward",
            Operand::Rhs => "BandedLogMatmulGradYBackward",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::banded_log_matmul;

    #[test]
    fn test_extract_band_backward_scatters_with_zero() {
        let dense_id = TensorId::new();
        let backward = ExtractBandBackward::new(dense_id, Band::new(0, 1), 2, None);
        // band storage (1, 2, 2): row 0 slot 0 is padding
        let grad = Tensor::from_slice(&[7.0, 1.0, 2.0, 3.0], &[1, 2, 2]);
        let grads = backward.backward(&grad).unwrap();
        assert_eq!(
            grads[0].as_ref().unwrap().to_vec(),
            vec![1.0, 0.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_to_dense_backward_zeroes_padding() {
        let backward = ToDenseBackward::new(TensorId::new(), Band::new(1, 1), None);
        let grad = Tensor::ones(&[1, 2, 2]);
        let grads = backward.backward(&grad).unwrap();
        assert_eq!(
            grads[0].as_ref().unwrap().to_vec(),
            vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_banded_backward_var_matches_backward() {
        let dense = Tensor::from_slice(
            &[0.1, 0.4, -0.3, 0.2, 0.0, 0.7, 0.5, -0.1, 0.3],
            &[1, 3, 3],
        );
        let x = BandedMatrix::from_dense(&dense, Band::new(1, 1)).unwrap();
        let y = BandedMatrix::from_dense(&dense, Band::new(0, 1)).unwrap();
        let z = banded_log_matmul(&x, &y, Band::new(1, 2)).unwrap();
        let backward =
            BandedLogMatmulBackward::new(TensorId::new(), TensorId::new(), &x, &y, &z, None, None);

        let upstream = Var::new(Tensor::ones(z.data().shape()), false);
        let plain = backward.backward(upstream.tensor()).unwrap();
        let tracked = backward.backward_var(&upstream).unwrap();
        for (p, t) in plain.iter().zip(&tracked) {
            assert_eq!(p.as_ref().unwrap().to_vec(), t.as_ref().unwrap().tensor().to_vec());
        }
        let names: Vec<_> = tracked
            .iter()
            .map(|t| t.as_ref().unwrap().grad_fn().unwrap().name())
            .collect();
        assert_eq!(
            names,
            ["BandedLogMatmulGradXBackward", "BandedLogMatmulGradYBackward"]
        );

        let grad_fn = tracked[0].as_ref().unwrap().grad_fn().unwrap();
        let saved = grad_fn.saved_tensors();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[0].to_vec(), x.data().to_vec());
        assert_eq!(saved[2].to_vec(), z.data().to_vec());
        assert_eq!(saved[3].shape(), z.data().shape());
    }
}
