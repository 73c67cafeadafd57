//! Banded matrix storage
//!
//! A batch of `rows × cols` matrices restricted to a diagonal band is stored
//! as a dense `(batch, rows, lu + ld + 1)` tensor. Entry `[b, i, k]` is the
//! element at row `i`, column `i + k - ld`. Slots whose column falls outside
//! `[0, cols)` are padding: they hold `-inf` after construction through this
//! module and are never read by any kernel.
//!
//! ```text
//! dense (lu=1, ld=1)        banded
//! [a b . .]                 [-∞ a b]
//! [c d e .]        ──►      [ c d e]
//! [. f g h]                 [ f g h]
//! [. . i j]                 [ i j -∞]
//! ```

use super::band::Band;
use crate::error::{Error, Result};
use crate::ops::parallel::for_each_row;
use crate::tensor::{Shape, Tensor};
use tracing::trace;

/// Batched banded matrix in log space
#[derive(Clone, Debug)]
pub struct BandedMatrix {
    data: Tensor,
    band: Band,
    cols: usize,
}

impl BandedMatrix {
    /// Wrap raw band storage of shape `(batch, rows, band.width())`
    ///
    /// Padding slots are not inspected; whatever they hold is ignored.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `data` is not 3-D, `InvalidBand` if its last
    /// dimension is not `lu + ld + 1`.
    pub fn new(data: Tensor, band: Band, cols: usize) -> Result<Self> {
        let [_, _, width] = data.dims3("data")?;
        if width != band.width() {
            return Err(Error::invalid_band(
                band.lu as isize,
                band.ld as isize,
                format!(
                    "storage width {} does not match lu + ld + 1 = {}",
                    width,
                    band.width()
                ),
            ));
        }
        Ok(Self { data, band, cols })
    }

    /// Square banded matrix (`cols == rows`)
    pub fn square(data: Tensor, band: Band) -> Result<Self> {
        let [_, rows, _] = data.dims3("data")?;
        Self::new(data, band, rows)
    }

    /// Geometry already validated by the caller.
    pub(crate) fn from_parts(data: Tensor, band: Band, cols: usize) -> Self {
        debug_assert_eq!(data.shape().last().copied(), Some(band.width()));
        Self { data, band, cols }
    }

    /// Keep the `band` diagonals of a dense `(batch, rows, cols)` tensor
    pub fn from_dense(dense: &Tensor, band: Band) -> Result<Self> {
        let [_, _, cols] = dense.dims3("dense")?;
        let data = gather_band(dense, band, f64::NEG_INFINITY)?;
        Ok(Self::from_parts(data, band, cols))
    }

    /// Band storage `(batch, rows, lu + ld + 1)`
    #[inline]
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    /// Consume into band storage
    pub fn into_data(self) -> Tensor {
        self.data
    }

    /// Band descriptor
    #[inline]
    pub fn band(&self) -> Band {
        self.band
    }

    /// Batch size
    #[inline]
    pub fn batch(&self) -> usize {
        self.data.shape()[0]
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.data.shape()[1]
    }

    /// Number of columns of the represented matrix
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Dense `(batch, rows, cols)` projection; off-band entries are `-inf`
    pub fn to_dense(&self) -> Tensor {
        scatter_band(&self.data, self.band, self.cols, f64::NEG_INFINITY)
    }

    /// Transposed matrix: rows and columns swap, so do `lu` and `ld`
    pub fn transpose(&self) -> BandedMatrix {
        let data = transpose_band(&self.data, self.band, self.cols, f64::NEG_INFINITY);
        Self::from_parts(data, self.band.transposed(), self.rows())
    }

    /// Re-store under the wider band `band`, filling new slots with `-inf`
    ///
    /// # Errors
    ///
    /// `InvalidBand` if `band` drops any diagonal of the current band.
    pub fn band_pad(&self, band: Band) -> Result<BandedMatrix> {
        if !self.band.is_within(&band) {
            return Err(Error::invalid_band(
                band.lu as isize,
                band.ld as isize,
                format!("padding cannot narrow {}", self.band),
            ));
        }
        let data = rebase_band(&self.data, self.band, band, self.cols);
        Ok(Self::from_parts(data, band, self.cols))
    }

    /// Log-semiring product keeping the full output band
    /// `(lu_x + lu_y, ld_x + ld_y)`
    pub fn log_matmul(&self, rhs: &BandedMatrix) -> Result<BandedMatrix> {
        super::banded_log_matmul(self, rhs, self.band.product(&rhs.band))
    }
}

/// Extract the `lu` / `ld` diagonals of a dense `(batch, n, m)` tensor
///
/// Returns the `(batch, n, lu + ld + 1)` band storage and its descriptor.
pub fn extract_band(dense: &Tensor, lu: usize, ld: usize) -> Result<(Tensor, Band)> {
    let banded = BandedMatrix::from_dense(dense, Band::new(lu, ld))?;
    let band = banded.band();
    Ok((banded.into_data(), band))
}

/// Dense projection of a banded matrix
pub fn to_dense(banded: &BandedMatrix) -> Tensor {
    banded.to_dense()
}

// ============================================================================
// Index-mapping kernels
//
// `fill` is `-inf` for values and `0` for gradients, where the same mappings
// act as each other's adjoints.
// ============================================================================

/// Dense `(batch, rows, cols)` → band `(batch, rows, width)`
pub(crate) fn gather_band(dense: &Tensor, band: Band, fill: f64) -> Result<Tensor> {
    let [batch, rows, cols] = dense.dims3("dense")?;
    let width = band.width();
    trace!(batch, rows, cols, lu = band.lu, ld = band.ld, "gather_band");

    let src = dense.as_slice();
    let mut out = vec![fill; batch * rows * width];
    for_each_row(&mut out, width, |r, row| {
        let i = r % rows;
        let dense_row = &src[r * cols..(r + 1) * cols];
        for (k, slot) in row.iter_mut().enumerate() {
            let col = band.column(i, k);
            if (0..cols as isize).contains(&col) {
                *slot = dense_row[col as usize];
            }
        }
    });
    Ok(Tensor::from_parts(out, Shape::from([batch, rows, width])))
}

/// Band `(batch, rows, width)` → dense `(batch, rows, cols)`
pub(crate) fn scatter_band(data: &Tensor, band: Band, cols: usize, fill: f64) -> Tensor {
    let shape = data.shape();
    let (batch, rows, width) = (shape[0], shape[1], shape[2]);
    trace!(batch, rows, cols, lu = band.lu, ld = band.ld, "scatter_band");

    let src = data.as_slice();
    let mut out = vec![fill; batch * rows * cols];
    for_each_row(&mut out, cols, |r, row| {
        let i = r % rows;
        let band_row = &src[r * width..(r + 1) * width];
        for (col, slot) in row.iter_mut().enumerate() {
            if let Some(k) = band.slot(i, col) {
                *slot = band_row[k];
            }
        }
    });
    Tensor::from_parts(out, Shape::from([batch, rows, cols]))
}

/// Band storage of `M` → band storage of `Mᵀ` (band limits swap)
pub(crate) fn transpose_band(data: &Tensor, band: Band, cols: usize, fill: f64) -> Tensor {
    let shape = data.shape();
    let (batch, rows, width) = (shape[0], shape[1], shape[2]);
    let t_band = band.transposed();

    let src = data.as_slice();
    let mut out = vec![fill; batch * cols * width];
    for_each_row(&mut out, width, |r, row| {
        let (bi, c) = (r / cols, r % cols);
        for (k, slot) in row.iter_mut().enumerate() {
            // row c of Mᵀ at slot k is M[src_row, c]
            let src_row = t_band.column(c, k);
            if (0..rows as isize).contains(&src_row) {
                let src_row = src_row as usize;
                *slot = src[(bi * rows + src_row) * width + (width - 1 - k)];
            }
        }
    });
    Tensor::from_parts(out, Shape::from([batch, cols, width]))
}

/// Move band storage from `from` to a band `to` that contains it
fn rebase_band(data: &Tensor, from: Band, to: Band, cols: usize) -> Tensor {
    let shape = data.shape();
    let (batch, rows, from_width) = (shape[0], shape[1], shape[2]);
    let width = to.width();

    let src = data.as_slice();
    let mut out = vec![f64::NEG_INFINITY; batch * rows * width];
    for_each_row(&mut out, width, |r, row| {
        let i = r % rows;
        for (k, slot) in row.iter_mut().enumerate() {
            let col = to.column(i, k);
            if !(0..cols as isize).contains(&col) {
                continue;
            }
            if let Some(src_k) = from.slot(i, col as usize) {
                *slot = src[r * from_width + src_k];
            }
        }
    });
    Tensor::from_parts(out, Shape::from([batch, rows, width]))
}
