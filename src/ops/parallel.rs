//! Row-parallel execution helper shared by all kernels

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Run `f(row, out_row)` over every `row_len`-sized row of `out`.
///
/// Rows are independent output slices, so with the `rayon` feature they are
/// processed on the global thread pool; otherwise sequentially.
pub(crate) fn for_each_row<F>(out: &mut [f64], row_len: usize, f: F)
where
    F: Fn(usize, &mut [f64]) + Send + Sync,
{
    if row_len == 0 || out.is_empty() {
        return;
    }

    #[cfg(feature = "rayon")]
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, chunk)| f(row, chunk));

    #[cfg(not(feature = "rayon"))]
    out.chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, chunk)| f(row, chunk));
}
