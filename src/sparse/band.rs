//! Band descriptor

use crate::error::{Error, Result};
use std::fmt;

/// Diagonal limits of a banded matrix
///
/// `lu` diagonals strictly above the main diagonal and `ld` strictly below it
/// are retained, so each row stores `lu + ld + 1` slots. Slot `k` of row `i`
/// holds column `i + k - ld`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Band {
    /// Diagonals above the main diagonal
    pub lu: usize,
    /// Diagonals below the main diagonal
    pub ld: usize,
}

impl Band {
    /// Create a band descriptor
    pub const fn new(lu: usize, ld: usize) -> Self {
        Self { lu, ld }
    }

    /// Only the main diagonal
    pub const fn diagonal() -> Self {
        Self { lu: 0, ld: 0 }
    }

    /// Band descriptor from signed limits, as handed over by hosts that use
    /// signed integers for sizes
    pub fn try_from_signed(lu: i64, ld: i64) -> Result<Self> {
        if lu < 0 || ld < 0 {
            return Err(Error::invalid_band(
                lu as isize,
                ld as isize,
                "band limits must be non-negative",
            ));
        }
        Ok(Self::new(lu as usize, ld as usize))
    }

    /// Number of stored slots per row
    #[inline]
    pub const fn width(&self) -> usize {
        self.lu + self.ld + 1
    }

    /// Band of a log-product: limits add up
    #[inline]
    pub const fn product(&self, rhs: &Band) -> Band {
        Band::new(self.lu + rhs.lu, self.ld + rhs.ld)
    }

    /// Band of the transposed matrix
    #[inline]
    pub const fn transposed(&self) -> Band {
        Band::new(self.ld, self.lu)
    }

    /// Whether every diagonal of `self` is also kept by `other`
    #[inline]
    pub fn is_within(&self, other: &Band) -> bool {
        self.lu <= other.lu && self.ld <= other.ld
    }

    /// Column held by slot `k` of `row`; may fall outside the matrix
    #[inline]
    pub fn column(&self, row: usize, k: usize) -> isize {
        row as isize + k as isize - self.ld as isize
    }

    /// Slot of `(row, col)` if it lies inside the band
    #[inline]
    pub fn slot(&self, row: usize, col: usize) -> Option<usize> {
        let k = col as isize - row as isize + self.ld as isize;
        (0..self.width() as isize)
            .contains(&k)
            .then_some(k as usize)
    }

    pub(crate) fn signed(&self) -> (isize, isize) {
        (self.lu as isize, self.ld as isize)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "band(lu={}, ld={})", self.lu, self.ld)
    }
}
