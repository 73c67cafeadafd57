//! Banded matrices in the log semiring
//!
//! A banded matrix keeps only a fixed number of diagonals around the main
//! diagonal. Products of banded matrices are banded again, with the band
//! limits adding up, which is what chain and lattice dynamic programs need.
//!
//! # Usage
//!
//! ```
//! use logbmm::sparse::{Band, BandedMatrix, banded_log_matmul};
//! use logbmm::tensor::Tensor;
//!
//! let x = BandedMatrix::from_dense(&Tensor::rand(&[2, 6, 6]), Band::new(1, 1))?;
//! let y = BandedMatrix::from_dense(&Tensor::rand(&[2, 6, 6]), Band::new(2, 0))?;
//!
//! // Full product band is (1 + 2, 1 + 0)
//! let z = banded_log_matmul(&x, &y, x.band().product(&y.band()))?;
//! assert_eq!(z.data().shape(), &[2, 6, 5]);
//! # Ok::<(), logbmm::error::Error>(())
//! ```

mod band;
mod banded;
mod log_matmul;

pub use band::Band;
pub use banded::{BandedMatrix, extract_band, to_dense};
pub(crate) use banded::{gather_band, scatter_band, transpose_band};
pub use log_matmul::{
    banded_log_matmul, banded_log_matmul_backward, banded_log_matmul_double_backward,
    banded_log_matmul_via_dense,
};
