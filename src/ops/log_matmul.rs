//! Dense batched matrix multiplication in the log semiring
//!
//! `C[b,i,k] = logsumexp_j(A[b,i,j] + B[b,j,k])`, computed with a fused loop and
//! a streaming [`LogSumExp`] accumulator, so the `(batch, n, m, p)` broadcast
//! tensor is never materialised.
//!
//! # Gradients
//!
//! With softmax weights `w[i,j,k] = exp(A[i,j] + B[j,k] - C[i,k])` and upstream
//! gradient `g = dL/dC`:
//!
//! ```text
//! dA[i,j] = Σ_k g[i,k] · w[i,j,k]
//! dB[j,k] = Σ_i g[i,k] · w[i,j,k]
//! ```
//!
//! Differentiating `<gA, dA> + <gB, dB>` a second time, with
//! `u[i,j,k] = gA[i,j] + gB[j,k]` and `ū[i,k] = Σ_j w[i,j,k] · u[i,j,k]`:
//!
//! ```text
//! d/dg[i,k] = ū[i,k]
//! d/dA[i,j] = Σ_k g[i,k] · w[i,j,k] · (u[i,j,k] - ū[i,k])
//! d/dB[j,k] = Σ_i g[i,k] · w[i,j,k] · (u[i,j,k] - ū[i,k])
//! ```

use super::logsumexp::{LogSumExp, softmax_weight};
use super::parallel::for_each_row;
use crate::error::{Error, Result};
use crate::tensor::{Shape, Tensor};
use tracing::trace;

/// Validated operand dimensions: `A` is `(batch, n, m)`, `B` is `(batch, m, p)`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct MatmulDims {
    batch: usize,
    n: usize,
    m: usize,
    p: usize,
}

impl MatmulDims {
    fn new(a: &Tensor, b: &Tensor) -> Result<Self> {
        let [batch, n, m] = a.dims3("a")?;
        let [b_batch, b_rows, p] = b.dims3("b")?;
        if b_batch != batch || b_rows != m {
            return Err(Error::shape_mismatch(&[batch, m, p], b.shape()));
        }
        Ok(Self { batch, n, m, p })
    }

    fn out_shape(&self) -> [usize; 3] {
        [self.batch, self.n, self.p]
    }

    fn check_out(&self, t: &Tensor) -> Result<()> {
        if t.shape() != self.out_shape() {
            return Err(Error::shape_mismatch(&self.out_shape(), t.shape()));
        }
        Ok(())
    }
}

/// Borrowed forward state shared by the backward kernels
struct Saved<'a> {
    dims: MatmulDims,
    a: &'a [f64],
    b: &'a [f64],
    c: &'a [f64],
    grad: &'a [f64],
}

impl Saved<'_> {
    #[inline]
    fn a(&self, bi: usize, i: usize, j: usize) -> f64 {
        self.a[(bi * self.dims.n + i) * self.dims.m + j]
    }

    #[inline]
    fn b(&self, bi: usize, j: usize, k: usize) -> f64 {
        self.b[(bi * self.dims.m + j) * self.dims.p + k]
    }

    #[inline]
    fn out_idx(&self, bi: usize, i: usize, k: usize) -> usize {
        (bi * self.dims.n + i) * self.dims.p + k
    }

    /// Softmax weight of `j` in the reduction producing `C[bi,i,k]`
    #[inline]
    fn weight(&self, bi: usize, i: usize, j: usize, k: usize) -> f64 {
        softmax_weight(
            self.a(bi, i, j) + self.b(bi, j, k),
            self.c[self.out_idx(bi, i, k)],
        )
    }
}

/// Batched log-semiring matrix multiplication
///
/// `a` is `(batch, n, m)` and `b` is `(batch, m, p)`; the result is
/// `(batch, n, p)`. Rows whose contributions are all `-inf` produce `-inf`.
///
/// # Errors
///
/// `InvalidArgument` for non 3-D operands, `ShapeMismatch` when the batch or
/// inner dimensions differ.
pub fn log_matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dims = MatmulDims::new(a, b)?;
    let MatmulDims { batch, n, m, p } = dims;
    trace!(batch, n, m, p, "log_matmul");

    let a = a.as_slice();
    let b = b.as_slice();
    let mut out = vec![0.0; batch * n * p];

    // One row of C per (batch, i); row index r = bi * n + i
    for_each_row(&mut out, p, |r, out_row| {
        let bi = r / n;
        let a_row = &a[r * m..(r + 1) * m];
        let b_mat = &b[bi * m * p..(bi + 1) * m * p];
        for (k, slot) in out_row.iter_mut().enumerate() {
            let mut acc = LogSumExp::new();
            for (j, &a_val) in a_row.iter().enumerate() {
                acc.push(a_val + b_mat[j * p + k]);
            }
            *slot = acc.finish();
        }
    });

    Ok(Tensor::from_parts(out, Shape::from(dims.out_shape())))
}

/// First-order rule for [`log_matmul`]
///
/// Takes the forward operands `a`, `b`, the forward result `c` and the
/// upstream gradient `grad_c`; returns `(dA, dB)` shaped like `a` and `b`.
pub fn log_matmul_backward(
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
    grad_c: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let dims = MatmulDims::new(a, b)?;
    dims.check_out(c)?;
    dims.check_out(grad_c)?;
    let MatmulDims { batch, n, m, p } = dims;
    trace!(batch, n, m, p, "log_matmul_backward");

    let saved = Saved {
        dims,
        a: a.as_slice(),
        b: b.as_slice(),
        c: c.as_slice(),
        grad: grad_c.as_slice(),
    };

    let mut grad_a = vec![0.0; batch * n * m];
    for_each_row(&mut grad_a, m, |r, row| {
        let (bi, i) = (r / n, r % n);
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = (0..p)
                .map(|k| saved.grad[saved.out_idx(bi, i, k)] * saved.weight(bi, i, j, k))
                .sum();
        }
    });

    let mut grad_b = vec![0.0; batch * m * p];
    for_each_row(&mut grad_b, p, |r, row| {
        let (bi, j) = (r / m, r % m);
        for (k, slot) in row.iter_mut().enumerate() {
            *slot = (0..n)
                .map(|i| saved.grad[saved.out_idx(bi, i, k)] * saved.weight(bi, i, j, k))
                .sum();
        }
    });

    Ok((
        Tensor::from_parts(grad_a, Shape::from([batch, n, m])),
        Tensor::from_parts(grad_b, Shape::from([batch, m, p])),
    ))
}

/// Second-order rule for [`log_matmul`]
///
/// Given the upstream gradients `grad_grad_a` (for `dA`) and `grad_grad_b`
/// (for `dB`) of the first-order outputs, returns the gradients with respect
/// to the three inputs of [`log_matmul_backward`]: `(a, b, grad_c)`.
/// A missing upstream gradient is treated as zero.
pub fn log_matmul_double_backward(
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
    grad_c: &Tensor,
    grad_grad_a: Option<&Tensor>,
    grad_grad_b: Option<&Tensor>,
) -> Result<(Tensor, Tensor, Tensor)> {
    let dims = MatmulDims::new(a, b)?;
    dims.check_out(c)?;
    dims.check_out(grad_c)?;
    if let Some(gga) = grad_grad_a {
        if gga.shape() != a.shape() {
            return Err(Error::shape_mismatch(a.shape(), gga.shape()));
        }
    }
    if let Some(ggb) = grad_grad_b {
        if ggb.shape() != b.shape() {
            return Err(Error::shape_mismatch(b.shape(), ggb.shape()));
        }
    }
    let MatmulDims { batch, n, m, p } = dims;
    trace!(batch, n, m, p, "log_matmul_double_backward");

    let saved = Saved {
        dims,
        a: a.as_slice(),
        b: b.as_slice(),
        c: c.as_slice(),
        grad: grad_c.as_slice(),
    };
    let gga = grad_grad_a.map(Tensor::as_slice);
    let ggb = grad_grad_b.map(Tensor::as_slice);
    let u = |bi: usize, i: usize, j: usize, k: usize| -> f64 {
        gga.map_or(0.0, |g| g[(bi * n + i) * m + j]) + ggb.map_or(0.0, |g| g[(bi * m + j) * p + k])
    };

    // ū[i,k] = Σ_j w·u, which is also the gradient for grad_c
    let mut u_bar = vec![0.0; batch * n * p];
    for_each_row(&mut u_bar, p, |r, row| {
        let (bi, i) = (r / n, r % n);
        for (k, slot) in row.iter_mut().enumerate() {
            *slot = (0..m)
                .map(|j| saved.weight(bi, i, j, k) * u(bi, i, j, k))
                .sum();
        }
    });

    let coupled = |bi: usize, i: usize, j: usize, k: usize| -> f64 {
        let o = saved.out_idx(bi, i, k);
        let w = saved.weight(bi, i, j, k);
        if w == 0.0 {
            return 0.0;
        }
        saved.grad[o] * w * (u(bi, i, j, k) - u_bar[o])
    };

    let mut h_a = vec![0.0; batch * n * m];
    for_each_row(&mut h_a, m, |r, row| {
        let (bi, i) = (r / n, r % n);
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = (0..p).map(|k| coupled(bi, i, j, k)).sum();
        }
    });

    let mut h_b = vec![0.0; batch * m * p];
    for_each_row(&mut h_b, p, |r, row| {
        let (bi, j) = (r / m, r % m);
        for (k, slot) in row.iter_mut().enumerate() {
            *slot = (0..n).map(|i| coupled(bi, i, j, k)).sum();
        }
    });

    Ok((
        Tensor::from_parts(h_a, Shape::from([batch, n, m])),
        Tensor::from_parts(h_b, Shape::from([batch, m, p])),
        Tensor::from_parts(u_bar, Shape::from([batch, n, p])),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEG_INF: f64 = f64::NEG_INFINITY;

    #[test]
    fn test_log_matmul_1x2x1() {
        // C = log(e^(1+3) + e^(2+4))
        let a = Tensor::from_slice(&[1.0, 2.0], &[1, 1, 2]);
        let b = Tensor::from_slice(&[3.0, 4.0], &[1, 2, 1]);
        let c = log_matmul(&a, &b).unwrap();
        let expected = (4f64.exp() + 6f64.exp()).ln();
        assert_eq!(c.shape(), &[1, 1, 1]);
        assert!((c.as_slice()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_log_matmul_identity() {
        // The log-semiring identity has 0 on the diagonal and -inf elsewhere
        let a = Tensor::from_slice(&[0.5, -1.0, 2.0, 0.25], &[1, 2, 2]);
        let eye = Tensor::from_slice(&[0.0, NEG_INF, NEG_INF, 0.0], &[1, 2, 2]);
        let c = log_matmul(&a, &eye).unwrap();
        assert_eq!(c.to_vec(), a.to_vec());
    }

    #[test]
    fn test_log_matmul_shape_errors() {
        let a = Tensor::zeros(&[2, 3, 4]);
        let wrong_inner = Tensor::zeros(&[2, 5, 4]);
        assert_eq!(
            log_matmul(&a, &wrong_inner).unwrap_err(),
            Error::shape_mismatch(&[2, 4, 4], &[2, 5, 4])
        );

        let wrong_batch = Tensor::zeros(&[3, 4, 4]);
        assert!(matches!(
            log_matmul(&a, &wrong_batch),
            Err(Error::ShapeMismatch { .. })
        ));

        let flat = Tensor::zeros(&[4, 4]);
        assert!(matches!(
            log_matmul(&a, &flat),
            Err(Error::InvalidArgument { arg: "b", .. })
        ));
    }

    #[test]
    fn test_all_neg_inf_row_gives_neutral_output_and_zero_grad() {
        let a = Tensor::from_slice(&[NEG_INF, NEG_INF, 0.3, 0.4], &[1, 2, 2]);
        let b = Tensor::from_slice(&[0.1, 0.2, 0.3, 0.4], &[1, 2, 2]);
        let c = log_matmul(&a, &b).unwrap();
        assert_eq!(&c.as_slice()[..2], &[NEG_INF, NEG_INF]);
        assert!(c.as_slice()[2..].iter().all(|v| v.is_finite()));

        let grad_c = Tensor::ones(&[1, 2, 2]);
        let (grad_a, grad_b) = log_matmul_backward(&a, &b, &c, &grad_c).unwrap();
        assert_eq!(&grad_a.as_slice()[..2], &[0.0, 0.0]);
        assert!(grad_a.as_slice().iter().all(|v| v.is_finite()));
        assert!(grad_b.as_slice().iter().all(|v| v.is_finite()));

        let gg = Tensor::ones(&[1, 2, 2]);
        let (h_a, h_b, h_g) =
            log_matmul_double_backward(&a, &b, &c, &grad_c, Some(&gg), Some(&gg)).unwrap();
        assert_eq!(&h_a.as_slice()[..2], &[0.0, 0.0]);
        assert_eq!(&h_g.as_slice()[..2], &[0.0, 0.0]);
        assert!(h_b.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_backward_rows_of_softmax_sum_to_upstream() {
        // Σ_j dA[i,j] = Σ_k g[i,k] because the weights over j sum to one
        let a = Tensor::from_slice(&[0.1, 0.9, 0.4, 0.2, 0.5, 0.3], &[1, 2, 3]);
        let b = Tensor::from_slice(&[0.7, 0.2, 0.6, 0.8, 0.1, 0.4], &[1, 3, 2]);
        let c = log_matmul(&a, &b).unwrap();
        let grad_c = Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 2]);
        let (grad_a, grad_b) = log_matmul_backward(&a, &b, &c, &grad_c).unwrap();

        let ga = grad_a.as_slice();
        assert!((ga[0..3].iter().sum::<f64>() - 3.0).abs() < 1e-12);
        assert!((ga[3..6].iter().sum::<f64>() - 7.0).abs() < 1e-12);
        assert!((grad_b.as_slice().iter().sum::<f64>() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_backward_rejects_bad_upstream_shape() {
        let a = Tensor::zeros(&[1, 2, 3]);
        let b = Tensor::zeros(&[1, 3, 2]);
        let c = log_matmul(&a, &b).unwrap();
        let bad = Tensor::zeros(&[1, 2, 3]);
        assert_eq!(
            log_matmul_backward(&a, &b, &c, &bad).unwrap_err(),
            Error::shape_mismatch(&[1, 2, 2], &[1, 2, 3])
        );
    }

    #[test]
    fn test_double_backward_without_upstream_is_zero() {
        let a = Tensor::from_slice(&[0.1, 0.9, 0.4, 0.2], &[1, 2, 2]);
        let b = Tensor::from_slice(&[0.7, 0.2, 0.6, 0.8], &[1, 2, 2]);
        let c = log_matmul(&a, &b).unwrap();
        let g = Tensor::ones(&[1, 2, 2]);
        let (h_a, h_b, h_g) = log_matmul_double_backward(&a, &b, &c, &g, None, None).unwrap();
        for t in [h_a, h_b, h_g] {
            assert!(t.as_slice().iter().all(|&v| v == 0.0));
        }
    }
}
