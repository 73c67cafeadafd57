//! Banded log-semiring matrix multiplication
//!
//! For `X` (`n × m`, band `x`) and `Y` (`m × p`, band `y`) the product
//! `Z[i,c] = logsumexp_j(X[i,j] + Y[j,c])` can only be finite on diagonals
//! `c - i ∈ [-(x.ld + y.ld), x.lu + y.lu]`. The caller picks the output band;
//! diagonals outside it are dropped and diagonals beyond the product band
//! come out as `-inf`.
//!
//! Every kernel walks band-local coordinates only:
//!
//! ```text
//! output slot (i, ko)  →  c = i + ko - out.ld
//! inner j  ∈ [i - x.ld, i + x.lu] ∩ [c - y.lu, c + y.ld] ∩ [0, m)
//! kx = j - i + x.ld,   ky = c - j + y.ld
//! ```
//!
//! The gradient rules are those of [`crate::ops::log_matmul_backward`] and
//! [`crate::ops::log_matmul_double_backward`] restricted to these terms.

use super::band::Band;
use super::banded::BandedMatrix;
use crate::error::{Error, Result};
use crate::ops::parallel::for_each_row;
use crate::ops::{LogSumExp, log_matmul, softmax_weight};
use crate::tensor::{Shape, Tensor};
use tracing::trace;

/// Validated geometry of a banded product
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct BandedDims {
    batch: usize,
    n: usize,
    m: usize,
    p: usize,
    x: Band,
    y: Band,
    out: Band,
}

impl BandedDims {
    fn new(x: &BandedMatrix, y: &BandedMatrix, out: Band) -> Result<Self> {
        if y.batch() != x.batch() || y.rows() != x.cols() {
            return Err(Error::shape_mismatch(
                &[x.batch(), x.cols(), y.band().width()],
                y.data().shape(),
            ));
        }
        Ok(Self {
            batch: x.batch(),
            n: x.rows(),
            m: x.cols(),
            p: y.cols(),
            x: x.band(),
            y: y.band(),
            out,
        })
    }

    /// Geometry of an earlier product `z = x ⊗ y`
    fn of_product(x: &BandedMatrix, y: &BandedMatrix, z: &BandedMatrix) -> Result<Self> {
        let dims = Self::new(x, y, z.band())?;
        let expected = dims.out_shape();
        if z.data().shape() != expected || z.cols() != dims.p {
            return Err(Error::shape_mismatch(&expected, z.data().shape()));
        }
        Ok(dims)
    }

    fn out_shape(&self) -> [usize; 3] {
        [self.batch, self.n, self.out.width()]
    }

    /// `(j, kx, ky)` for every inner index feeding output slot `(i, ko)`
    fn terms(&self, i: usize, ko: usize) -> impl Iterator<Item = (usize, usize, usize)> {
        let (x_lu, x_ld) = self.x.signed();
        let (y_lu, y_ld) = self.y.signed();
        let i = i as isize;
        let c = self.out.column(i as usize, ko);

        let lo = (i - x_ld).max(c - y_lu).max(0);
        let hi = if (0..self.p as isize).contains(&c) {
            (i + x_lu).min(c + y_ld).min(self.m as isize - 1)
        } else {
            lo - 1
        };
        (lo..=hi).map(move |j| {
            (
                j as usize,
                (j - i + x_ld) as usize,
                (c - j + y_ld) as usize,
            )
        })
    }

    /// `(i, kx, ko)` for every output row that reads `Y` slot `(j, ky)`
    fn terms_of_y(&self, j: usize, ky: usize) -> impl Iterator<Item = (usize, usize, usize)> {
        let (x_lu, x_ld) = self.x.signed();
        let (out_lu, out_ld) = self.out.signed();
        let j = j as isize;
        let c = self.y.column(j as usize, ky);

        let lo = (j - x_lu).max(c - out_lu).max(0);
        let hi = if (0..self.p as isize).contains(&c) {
            (j + x_ld).min(c + out_ld).min(self.n as isize - 1)
        } else {
            lo - 1
        };
        (lo..=hi).map(move |i| {
            (
                i as usize,
                (j - i + x_ld) as usize,
                (c - i + out_ld) as usize,
            )
        })
    }
}

/// Borrowed forward state shared by the backward kernels
struct Saved<'a> {
    dims: BandedDims,
    x: &'a [f64],
    y: &'a [f64],
    z: &'a [f64],
    grad: &'a [f64],
}

impl Saved<'_> {
    #[inline]
    fn x_idx(&self, bi: usize, i: usize, kx: usize) -> usize {
        (bi * self.dims.n + i) * self.dims.x.width() + kx
    }

    #[inline]
    fn y_idx(&self, bi: usize, j: usize, ky: usize) -> usize {
        (bi * self.dims.m + j) * self.dims.y.width() + ky
    }

    #[inline]
    fn z_idx(&self, bi: usize, i: usize, ko: usize) -> usize {
        (bi * self.dims.n + i) * self.dims.out.width() + ko
    }

    #[inline]
    fn weight(&self, bi: usize, i: usize, ko: usize, term: (usize, usize, usize)) -> f64 {
        let (j, kx, ky) = term;
        softmax_weight(
            self.x[self.x_idx(bi, i, kx)] + self.y[self.y_idx(bi, j, ky)],
            self.z[self.z_idx(bi, i, ko)],
        )
    }
}

/// Banded log-semiring product restricted to the output band `out`
///
/// Equivalent to projecting both operands to dense form, applying
/// [`log_matmul`] and extracting `out`, but touches only band entries.
/// Requesting a band narrower than `x.band().product(&y.band())` silently
/// drops the outer diagonals.
///
/// # Errors
///
/// `ShapeMismatch` when batch sizes differ or `x.cols() != y.rows()`.
pub fn banded_log_matmul(x: &BandedMatrix, y: &BandedMatrix, out: Band) -> Result<BandedMatrix> {
    let dims = BandedDims::new(x, y, out)?;
    let BandedDims { batch, n, m, p, .. } = dims;
    let width = out.width();
    trace!(
        batch, n, m, p,
        x_lu = dims.x.lu, x_ld = dims.x.ld,
        y_lu = dims.y.lu, y_ld = dims.y.ld,
        out_lu = out.lu, out_ld = out.ld,
        "banded_log_matmul"
    );

    let xs = x.data().as_slice();
    let ys = y.data().as_slice();
    let (wx, wy) = (dims.x.width(), dims.y.width());
    let mut z = vec![0.0; batch * n * width];

    for_each_row(&mut z, width, |r, row| {
        let (bi, i) = (r / n, r % n);
        for (ko, slot) in row.iter_mut().enumerate() {
            let mut acc = LogSumExp::new();
            for (j, kx, ky) in dims.terms(i, ko) {
                acc.push(xs[r * wx + kx] + ys[(bi * m + j) * wy + ky]);
            }
            *slot = acc.finish();
        }
    });

    Ok(BandedMatrix::from_parts(
        Tensor::from_parts(z, Shape::from(dims.out_shape())),
        out,
        p,
    ))
}

/// Reference path: dense projection, [`log_matmul`], band extraction
pub fn banded_log_matmul_via_dense(
    x: &BandedMatrix,
    y: &BandedMatrix,
    out: Band,
) -> Result<BandedMatrix> {
    BandedDims::new(x, y, out)?;
    let dense = log_matmul(&x.to_dense(), &y.to_dense())?;
    BandedMatrix::from_dense(&dense, out)
}

/// First-order rule for [`banded_log_matmul`]
///
/// `z` is the forward result and `grad_z` the upstream gradient in `z`'s band
/// storage layout. Returns `(dX, dY)` in the band layouts of `x` and `y`;
/// padding slots receive zero.
pub fn banded_log_matmul_backward(
    x: &BandedMatrix,
    y: &BandedMatrix,
    z: &BandedMatrix,
    grad_z: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let dims = BandedDims::of_product(x, y, z)?;
    if grad_z.shape() != dims.out_shape() {
        return Err(Error::shape_mismatch(&dims.out_shape(), grad_z.shape()));
    }
    let BandedDims { batch, n, m, .. } = dims;
    trace!(batch, n, m, p = dims.p, "banded_log_matmul_backward");

    let saved = Saved {
        dims,
        x: x.data().as_slice(),
        y: y.data().as_slice(),
        z: z.data().as_slice(),
        grad: grad_z.as_slice(),
    };
    let (wx, wy, wo) = (dims.x.width(), dims.y.width(), dims.out.width());

    let mut grad_x = vec![0.0; batch * n * wx];
    for_each_row(&mut grad_x, wx, |r, row| {
        let (bi, i) = (r / n, r % n);
        for ko in 0..wo {
            let g = saved.grad[saved.z_idx(bi, i, ko)];
            for term in dims.terms(i, ko) {
                row[term.1] += g * saved.weight(bi, i, ko, term);
            }
        }
    });

    let mut grad_y = vec![0.0; batch * m * wy];
    for_each_row(&mut grad_y, wy, |r, row| {
        let (bi, j) = (r / m, r % m);
        for (ky, slot) in row.iter_mut().enumerate() {
            *slot = dims
                .terms_of_y(j, ky)
                .map(|(i, kx, ko)| {
                    saved.grad[saved.z_idx(bi, i, ko)] * saved.weight(bi, i, ko, (j, kx, ky))
                })
                .sum();
        }
    });

    Ok((
        Tensor::from_parts(grad_x, Shape::from([batch, n, wx])),
        Tensor::from_parts(grad_y, Shape::from([batch, m, wy])),
    ))
}

/// Second-order rule for [`banded_log_matmul`]
///
/// Given upstream gradients of `dX` and `dY` (band layouts of `x` and `y`),
/// returns the gradients with respect to `(x, y, grad_z)`. A missing
/// upstream gradient is treated as zero.
pub fn banded_log_matmul_double_backward(
    x: &BandedMatrix,
    y: &BandedMatrix,
    z: &BandedMatrix,
    grad_z: &Tensor,
    grad_grad_x: Option<&Tensor>,
    grad_grad_y: Option<&Tensor>,
) -> Result<(Tensor, Tensor, Tensor)> {
    let dims = BandedDims::of_product(x, y, z)?;
    if grad_z.shape() != dims.out_shape() {
        return Err(Error::shape_mismatch(&dims.out_shape(), grad_z.shape()));
    }
    for (upstream, operand) in [(grad_grad_x, x), (grad_grad_y, y)] {
        if let Some(t) = upstream {
            if t.shape() != operand.data().shape() {
                return Err(Error::shape_mismatch(operand.data().shape(), t.shape()));
            }
        }
    }
    let BandedDims { batch, n, m, .. } = dims;
    trace!(batch, n, m, p = dims.p, "banded_log_matmul_double_backward");

    let saved = Saved {
        dims,
        x: x.data().as_slice(),
        y: y.data().as_slice(),
        z: z.data().as_slice(),
        grad: grad_z.as_slice(),
    };
    let (wx, wy, wo) = (dims.x.width(), dims.y.width(), dims.out.width());
    let ggx = grad_grad_x.map(Tensor::as_slice);
    let ggy = grad_grad_y.map(Tensor::as_slice);
    let u = |bi: usize, i: usize, (j, kx, ky): (usize, usize, usize)| -> f64 {
        ggx.map_or(0.0, |g| g[saved.x_idx(bi, i, kx)])
            + ggy.map_or(0.0, |g| g[saved.y_idx(bi, j, ky)])
    };

    let mut u_bar = vec![0.0; batch * n * wo];
    for_each_row(&mut u_bar, wo, |r, row| {
        let (bi, i) = (r / n, r % n);
        for (ko, slot) in row.iter_mut().enumerate() {
            *slot = dims
                .terms(i, ko)
                .map(|term| saved.weight(bi, i, ko, term) * u(bi, i, term))
                .sum();
        }
    });

    let coupled = |bi: usize, i: usize, ko: usize, term: (usize, usize, usize)| -> f64 {
        let w = saved.weight(bi, i, ko, term);
        if w == 0.0 {
            return 0.0;
        }
        let o = saved.z_idx(bi, i, ko);
        saved.grad[o] * w * (u(bi, i, term) - u_bar[o])
    };

    let mut h_x = vec![0.0; batch * n * wx];
    for_each_row(&mut h_x, wx, |r, row| {
        let (bi, i) = (r / n, r % n);
        for ko in 0..wo {
            for term in dims.terms(i, ko) {
                row[term.1] += coupled(bi, i, ko, term);
            }
        }
    });

    let mut h_y = vec![0.0; batch * m * wy];
    for_each_row(&mut h_y, wy, |r, row| {
        let (bi, j) = (r / m, r % m);
        for (ky, slot) in row.iter_mut().enumerate() {
            *slot = dims
                .terms_of_y(j, ky)
                .map(|(i, kx, ko)| coupled(bi, i, ko, (j, kx, ky)))
                .sum();
        }
    });

    Ok((
        Tensor::from_parts(h_x, Shape::from([batch, n, wx])),
        Tensor::from_parts(h_y, Shape::from([batch, m, wy])),
        Tensor::from_parts(u_bar, Shape::from([batch, n, wo])),
    ))
}
