//! Storage error types.

use flatwiki_core::AppError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName(msg) => AppError::InvalidInput(msg),
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Metadata(msg) => AppError::Internal(msg),
            StoreError::Io(e) => AppError::Io(e),
        }
    }
}
