use std::path::PathBuf;
use thiserror::Error;

use crate::queue::UploadError;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Fallback root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub type Result<T> = std::result::Result<T, FallbackError>;
