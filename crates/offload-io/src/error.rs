//! Error types for bitmap I/O.

use std::io;

use offload_compute::ComputeError;
use thiserror::Error;

/// Bitmap I/O error.
#[derive(Debug, Error)]
pub enum IoError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Decoding failed.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Encoding failed.
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Image too large for the bitmap format.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: String,
        /// Actual dimensions.
        actual: String,
    },

    /// Decoded samples did not form a valid grid.
    #[error(transparent)]
    Compute(#[from] ComputeError),
}

/// Result type for bitmap I/O.
pub type IoResult<T> = Result<T, IoError>;
