//! Common test utilities
#![allow(dead_code)]

use logbmm::sparse::Band;
use logbmm::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Assert two f64 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|. Equal values (including
/// matching infinities) always pass.
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x == y {
            continue;
        }
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Deterministic generator for reproducible inputs
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Uniform samples in `[-scale, scale)`
pub fn uniform(rng: &mut StdRng, shape: &[usize], scale: f64) -> Tensor {
    let len: usize = shape.iter().product();
    let data: Vec<f64> = (0..len)
        .map(|_| scale * (2.0 * rng.random::<f64>() - 1.0))
        .collect();
    Tensor::from_slice(&data, shape)
}

/// Numerically stable logsumexp written out independently of the crate
fn naive_logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Reference product: materialise `A[b,i,j] + B[b,j,k]` as a
/// `(batch, n, m, p)` grid, then reduce over `j`
pub fn reference_log_matmul(a: &Tensor, b: &Tensor) -> Vec<f64> {
    let (batch, n, m) = (a.shape()[0], a.shape()[1], a.shape()[2]);
    let p = b.shape()[2];
    let (a, b) = (a.as_slice(), b.as_slice());

    let mut grid = vec![0.0; batch * n * m * p];
    for bi in 0..batch {
        for i in 0..n {
            for j in 0..m {
                for k in 0..p {
                    grid[((bi * n + i) * m + j) * p + k] =
                        a[(bi * n + i) * m + j] + b[(bi * m + j) * p + k];
                }
            }
        }
    }

    let mut out = Vec::with_capacity(batch * n * p);
    for bi in 0..batch {
        for i in 0..n {
            for k in 0..p {
                let column: Vec<f64> = (0..m)
                    .map(|j| grid[((bi * n + i) * m + j) * p + k])
                    .collect();
                out.push(naive_logsumexp(&column));
            }
        }
    }
    out
}

/// Reference first-order gradients from the materialised softmax tensor
pub fn reference_grads(a: &Tensor, b: &Tensor, grad_c: &Tensor) -> (Vec<f64>, Vec<f64>) {
    let (batch, n, m) = (a.shape()[0], a.shape()[1], a.shape()[2]);
    let p = b.shape()[2];
    let c = reference_log_matmul(a, b);
    let (a, b, g) = (a.as_slice(), b.as_slice(), grad_c.as_slice());

    let mut grad_a = vec![0.0; batch * n * m];
    let mut grad_b = vec![0.0; batch * m * p];
    for bi in 0..batch {
        for i in 0..n {
            for j in 0..m {
                for k in 0..p {
                    let o = (bi * n + i) * p + k;
                    let score = a[(bi * n + i) * m + j] + b[(bi * m + j) * p + k];
                    if score == f64::NEG_INFINITY {
                        continue;
                    }
                    let w = (score - c[o]).exp();
                    grad_a[(bi * n + i) * m + j] += g[o] * w;
                    grad_b[(bi * m + j) * p + k] += g[o] * w;
                }
            }
        }
    }
    (grad_a, grad_b)
}

/// Central finite differences of a scalar function at `x`
pub fn central_difference(x: &[f64], eps: f64, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let mut shifted = x.to_vec();
    (0..x.len())
        .map(|idx| {
            shifted[idx] = x[idx] + eps;
            let up = f(&shifted);
            shifted[idx] = x[idx] - eps;
            let down = f(&shifted);
            shifted[idx] = x[idx];
            (up - down) / (2.0 * eps)
        })
        .collect()
}

/// Inner product of two equally sized buffers
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Band slots of a dense `(batch, rows, cols)` tensor; padding slots get 0
pub fn band_slots(dense: &Tensor, band: Band) -> Vec<f64> {
    let (batch, rows, cols) = (dense.shape()[0], dense.shape()[1], dense.shape()[2]);
    let src = dense.as_slice();
    let mut out = Vec::with_capacity(batch * rows * band.width());
    for bi in 0..batch {
        for i in 0..rows {
            for k in 0..band.width() {
                let col = band.column(i, k);
                out.push(if (0..cols as isize).contains(&col) {
                    src[(bi * rows + i) * cols + col as usize]
                } else {
                    0.0
                });
            }
        }
    }
    out
}

/// Dense `(batch, rows, cols)` tensor from band storage; off-band entries 0
pub fn dense_from_slots(data: &Tensor, band: Band, cols: usize) -> Tensor {
    let (batch, rows, width) = (data.shape()[0], data.shape()[1], data.shape()[2]);
    let src = data.as_slice();
    let mut out = vec![0.0; batch * rows * cols];
    for bi in 0..batch {
        for i in 0..rows {
            for col in 0..cols {
                if let Some(k) = band.slot(i, col) {
                    out[(bi * rows + i) * cols + col] = src[(bi * rows + i) * width + k];
                }
            }
        }
    }
    Tensor::from_slice(&out, &[batch, rows, cols])
}

/// Random band storage whose padding slots hold 0
pub fn band_upstream(
    rng: &mut StdRng,
    batch: usize,
    rows: usize,
    cols: usize,
    band: Band,
) -> Tensor {
    let dense = uniform(rng, &[batch, rows, cols], 1.0);
    let slots = band_slots(&dense, band);
    Tensor::from_slice(&slots, &[batch, rows, band.width()])
}
