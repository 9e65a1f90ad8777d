use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a page from being processed.
///
/// Per-fragment problems (a crop that fails to write, a batch the model
/// rejects) are logged and skipped instead.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Failed to read image {path:?}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OcrError>;
