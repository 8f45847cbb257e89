use std::path::PathBuf;
use thiserror::Error;

use crate::config::{BackendType, PipelineClass};

pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("Backend {0:?} is not available or enabled")]
    BackendUnavailable(BackendType),

    /// The persisted config document exists but cannot be parsed. Never recovered from.
    #[error("Config document {} is corrupt: {source}", .path.display())]
    ConfigCorruption {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Backend {backend:?} cannot build a {class} pipeline")]
    UnsupportedTask {
        backend: BackendType,
        class: PipelineClass,
    },

    /// Anything raised while the external pipeline runs, passed through as-is.
    #[error("Pipeline invocation failed: {0}")]
    PipelineInvocation(String),

    #[error("Requested {requested} images but the pipeline returned {produced}")]
    ImageCountMismatch { requested: u32, produced: u32 },

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<image::ImageError> for GenerationError {
    fn from(err: image::ImageError) -> Self {
        GenerationError::Image(err.to_string())
    }
}

impl GenerationError {
    /// True for errors caused by the caller's input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GenerationError::InvalidConfig(_)
                | GenerationError::Image(_)
                | GenerationError::UnsupportedTask { .. }
        )
    }
}
