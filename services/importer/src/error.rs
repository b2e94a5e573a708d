//! Error types for the importer.

use std::path::PathBuf;

use field_decoder::{DecodeError, FieldSelector};
use forecast_common::{CommonError, Parameter};
use rgb_encoder::EncodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Retrieval failed for {target}: {message}")]
    Retrieval { target: String, message: String },

    #[error("No field matching {selector:?} in {}", .path.display())]
    DecodeMiss {
        path: PathBuf,
        selector: FieldSelector,
    },

    #[error("No image could be encoded for {parameter:?}")]
    EncodingGap { parameter: Parameter },

    #[error("Tiling failed: {0}")]
    Tiling(String),

    #[error("Retention sweep failed on {}: {source}", .path.display())]
    Janitor {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Staging error: {0}")]
    Staging(#[from] EncodeError),

    #[error("Invalid value: {0}")]
    Invalid(#[from] CommonError),

    #[error("Job store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ImportError {
    pub fn retrieval(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retrieval {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Errors that skip one request without failing the whole job.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ImportError::DecodeMiss { .. } | ImportError::EncodingGap { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Planning(_) => "planning",
            ImportError::Retrieval { .. } => "retrieval",
            ImportError::DecodeMiss { .. } => "decode_miss",
            ImportError::EncodingGap { .. } => "encoding_gap",
            ImportError::Tiling(_) => "tiling",
            ImportError::Janitor { .. } => "janitor",
            ImportError::Io(_) => "io",
            ImportError::Decode(_) => "decode",
            ImportError::Staging(_) => "staging",
            ImportError::Invalid(_) => "invalid",
            ImportError::Store(_) => "store",
        }
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
