//! Error types for field decoding.

use thiserror::Error;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Failures while reading a grid file.
///
/// A selector that matches no record is not an error; see
/// [`crate::FieldDecoder::read_field`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read grid file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse GRIB2 data: {0}")]
    Parse(String),

    #[error("Failed to unpack record {index}: {message}")]
    Unpack { index: usize, message: String },

    #[error("Invalid grid: {0}")]
    InvalidGrid(#[from] forecast_common::CommonError),
}
