//! Banded storage and banded log-semiring product on variables

use crate::autograd::ops::{
    BandTransposeBackward, BandedLogMatmulBackward, ExtractBandBackward, ToDenseBackward,
};
use crate::autograd::{BandedVar, Var};
use crate::error::Result;
use crate::sparse::{Band, banded_log_matmul, gather_band, scatter_band, transpose_band};
use std::sync::Arc;
use tracing::trace;

/// Keep the `band` diagonals of a dense `(batch, rows, cols)` variable
///
/// Creates ExtractBandBackward; off-band entries of the input get a zero
/// gradient.
pub fn var_extract_band(dense: &Var, band: Band) -> Result<BandedVar> {
    let [_, _, cols] = dense.tensor().dims3("dense")?;
    let data = var_gather_band(dense, band, f64::NEG_INFINITY)?;
    Ok(BandedVar::from_parts(data, band, cols))
}

/// Dense projection of a banded variable; off-band entries are `-inf`
///
/// Creates ToDenseBackward; padding slots get a zero gradient.
pub fn var_to_dense(banded: &BandedVar) -> Result<Var> {
    var_scatter_band(
        banded.var(),
        banded.band(),
        banded.cols(),
        f64::NEG_INFINITY,
    )
}

/// Transpose of a banded variable (band limits swap)
///
/// Creates BandTransposeBackward.
pub fn var_band_transpose(banded: &BandedVar) -> Result<BandedVar> {
    let rows = banded.var().shape()[1];
    let data = var_transpose_band(
        banded.var(),
        banded.band(),
        banded.cols(),
        f64::NEG_INFINITY,
    )?;
    Ok(BandedVar::from_parts(data, banded.band().transposed(), rows))
}

/// Banded log-semiring product restricted to the output band `out`
///
/// Creates BandedLogMatmulBackward, which supports first- and second-order
/// differentiation. See [`banded_log_matmul`] for the truncation rules.
pub fn var_banded_log_matmul(x: &BandedVar, y: &BandedVar, out: Band) -> Result<BandedVar> {
    let (xm, ym) = (x.matrix(), y.matrix());
    let output = banded_log_matmul(&xm, &ym, out)?;
    let cols = output.cols();
    trace!(x_band = %x.band(), y_band = %y.band(), %out, "var_banded_log_matmul");

    let var = if x.var().requires_grad() || y.var().requires_grad() {
        let grad_fn = BandedLogMatmulBackward::new(
            x.id(),
            y.id(),
            &xm,
            &ym,
            &output,
            x.var().grad_fn().cloned(),
            y.var().grad_fn().cloned(),
        );
        Var::from_op(output.into_data(), Arc::new(grad_fn))
    } else {
        Var::new(output.into_data(), false)
    };
    Ok(BandedVar::from_parts(var, out, cols))
}

// ============================================================================
// Differentiable index mappings
//
// Shared by the public ops above (fill `-inf`) and by the backward rules,
// which map gradients with fill `0`.
// ============================================================================

pub(crate) fn var_gather_band(dense: &Var, band: Band, fill: f64) -> Result<Var> {
    let [_, _, cols] = dense.tensor().dims3("dense")?;
    trace!(%band, cols, "var_gather_band");
    let output = gather_band(dense.tensor(), band, fill)?;

    if dense.requires_grad() {
        let grad_fn = ExtractBandBackward::new(dense.id(), band, cols, dense.grad_fn().cloned());
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}

pub(crate) fn var_scatter_band(data: &Var, band: Band, cols: usize, fill: f64) -> Result<Var> {
    data.tensor().dims3("data")?;
    trace!(%band, cols, "var_scatter_band");
    let output = scatter_band(data.tensor(), band, cols, fill);

    if data.requires_grad() {
        let grad_fn = ToDenseBackward::new(data.id(), band, data.grad_fn().cloned());
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}

pub(crate) fn var_transpose_band(data: &Var, band: Band, cols: usize, fill: f64) -> Result<Var> {
    let [_, rows, _] = data.tensor().dims3("data")?;
    trace!(%band, rows, cols, "var_transpose_band");
    let output = transpose_band(data.tensor(), band, cols, fill);

    if data.requires_grad() {
        let grad_fn =
            BandTransposeBackward::new(data.id(), band.transposed(), rows, data.grad_fn().cloned());
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}
