//! Numerically stable log-sum-exp reduction
//!
//! The accumulator keeps a running maximum and the sum of `exp(x - max)`.
//! Two partial accumulators combine with
//!
//! ```text
//! merge((m1, s1), (m2, s2)) = (M, s1·exp(m1 - M) + s2·exp(m2 - M)),  M = max(m1, m2)
//! ```
//!
//! which is associative and commutative, so partial reductions may be
//! produced by any number of workers and merged in any order.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Streaming log-sum-exp accumulator
///
/// `-inf` inputs are the semiring zero and are skipped. An accumulator that
/// has seen no finite value finishes to `-inf`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LogSumExp {
    max: f64,
    sum: f64,
}

impl LogSumExp {
    /// Accumulator over an empty sequence
    pub const EMPTY: Self = Self {
        max: f64::NEG_INFINITY,
        sum: 0.0,
    };

    /// Create an empty accumulator
    #[inline]
    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Running maximum (`-inf` while empty)
    #[inline]
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Sum of `exp(x - max)` over the values seen so far
    #[inline]
    pub fn scaled_sum(&self) -> f64 {
        self.sum
    }

    /// Fold one value into the accumulator
    #[inline]
    pub fn push(&mut self, value: f64) {
        if value == f64::NEG_INFINITY {
            return;
        }
        if value > self.max {
            // rescale the old sum to the new maximum; 0 * exp(-inf) stays 0
            self.sum = self.sum * (self.max - value).exp() + 1.0;
            self.max = value;
        } else {
            self.sum += (value - self.max).exp();
        }
    }

    /// Combine two partial accumulators
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        if other.max == f64::NEG_INFINITY {
            return self;
        }
        if self.max == f64::NEG_INFINITY {
            return other;
        }
        let max = self.max.max(other.max);
        Self {
            max,
            sum: self.sum * (self.max - max).exp() + other.sum * (other.max - max).exp(),
        }
    }

    /// `log(sum(exp(values)))`
    #[inline]
    pub fn finish(self) -> f64 {
        if self.max == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            self.max + self.sum.ln()
        }
    }
}

impl Default for LogSumExp {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Extend<f64> for LogSumExp {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl FromIterator<f64> for LogSumExp {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::EMPTY;
        acc.extend(iter);
        acc
    }
}

/// `log(sum(exp(values)))`, `-inf` for an empty or all-`-inf` slice
pub fn logsumexp(values: &[f64]) -> f64 {
    values.iter().copied().collect::<LogSumExp>().finish()
}

/// Parallel tree reduction of [`logsumexp`] over the rayon pool
#[cfg(feature = "rayon")]
pub fn par_logsumexp(values: &[f64]) -> f64 {
    values
        .par_iter()
        .fold(LogSumExp::new, |mut acc, &value| {
            acc.push(value);
            acc
        })
        .reduce(LogSumExp::new, LogSumExp::merge)
        .finish()
}

/// Local derivative of a log-sum-exp reduction: `exp(score - total)`
///
/// A `-inf` score never contributes, so its weight is `0` even when `total`
/// is also `-inf`.
#[inline]
pub fn softmax_weight(score: f64, total: f64) -> f64 {
    if score == f64::NEG_INFINITY {
        0.0
    } else {
        (score - total).exp()
    }
}

/// Softmax weights of `values`; all zeros when every value is `-inf`
pub fn softmax(values: &[f64]) -> Vec<f64> {
    let total = logsumexp(values);
    values.iter().map(|&v| softmax_weight(v, total)).collect()
}
