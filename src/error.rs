//! Error types for logbmm

use thiserror::Error;

/// Result type alias using logbmm's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in logbmm operations
///
/// Every error is raised before any output buffer is allocated, so a failed
/// call never leaves partial results behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Shape mismatch in an operation
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Band descriptor cannot describe the given storage or operands
    #[error("Invalid band (lu={lu}, ld={ld}): {reason}")]
    InvalidBand {
        /// Diagonals above the main diagonal
        lu: isize,
        /// Diagonals below the main diagonal
        ld: isize,
        /// Reason for invalidity
        reason: String,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Feature not yet implemented
    #[error("Not implemented: {feature}")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: &'static str,
    },
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an invalid band error
    pub fn invalid_band(lu: isize, ld: isize, reason: impl Into<String>) -> Self {
        Self::InvalidBand {
            lu,
            ld,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_cause() {
        let err = Error::shape_mismatch(&[2, 3, 4], &[2, 5, 4]);
        assert_eq!(
            err.to_string(),
            "Shape mismatch: expected [2, 3, 4], got [2, 5, 4]"
        );

        let err = Error::invalid_band(1, 2, "width 3 does not match lu + ld + 1 = 4");
        assert!(err.to_string().contains("lu=1, ld=2"));
    }
}
