//! Error types for the shared forecast types.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised while parsing or constructing shared types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommonError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid cycle hour '{0}': expected one of 0, 6, 12, 18")]
    InvalidCycle(String),

    #[error("Invalid date '{0}': expected YYYYMMDD")]
    InvalidDate(String),

    #[error("Grid size mismatch: {len} values for {ni}x{nj} grid")]
    GridSizeMismatch { len: usize, ni: usize, nj: usize },

    #[error("Image size mismatch: {len} bytes for {width}x{height} RGB image")]
    ImageSizeMismatch {
        len: usize,
        width: usize,
        height: usize,
    },
}
