use forecast_common::CommonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid image: {0}")]
    Common(#[from] CommonError),

    #[error("Image too large to stage: {width}x{height}")]
    TooLarge { width: usize, height: usize },

    #[error("Pixel buffer does not match {width}x{height}")]
    BufferMismatch { width: usize, height: usize },
}

pub type EncodeResult<T> = Result<T, EncodeError>;
