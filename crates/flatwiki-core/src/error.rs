//! Error types module
//!
//! All errors crossing a pipeline boundary are unified under [`AppError`].
//! Low-level I/O and process errors are translated into these variants at
//! the boundary; they never surface to callers as raw sources.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upload rejected by scanner: {0}")]
    ScanRejected(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    /// Client-facing message. Internal details (I/O paths, cipher errors)
    /// are replaced with a generic message; user-caused rejections pass
    /// their description through.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::ScanRejected(msg) => msg.clone(),
            AppError::Crypto(_) | AppError::Internal(_) | AppError::Io(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Whether the error was caused by the request rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_)
                | AppError::NotFound(_)
                | AppError::Unauthorized(_)
                | AppError::ScanRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_pass_their_message_through() {
        let err = AppError::InvalidInput("extension not allowed".to_string());
        assert_eq!(err.user_message(), "extension not allowed");
        assert!(err.is_user_error());
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = AppError::Internal("scrypt parameter out of range".to_string());
        assert_eq!(err.user_message(), "Internal server error");
        assert!(!err.is_user_error());

        let err = AppError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.user_message(), "Internal server error");
    }
}
