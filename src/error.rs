//! Error types for Mnemo

use thiserror::Error;

/// Result type alias for Mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;

/// Main error type for Mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Index not built: {0}")]
    IndexNotBuilt(&'static str),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MnemoError {
    /// Check if the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, MnemoError::Provider(_) | MnemoError::Http(_))
    }

    /// HTTP status code used by the server boundary
    pub fn status_code(&self) -> u16 {
        match self {
            MnemoError::InvalidInput(_) => 400,
            MnemoError::Provider(_) | MnemoError::Http(_) => 503,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MnemoError::Provider("timeout".into()).is_retryable());
        assert!(!MnemoError::InvalidInput("top_k".into()).is_retryable());
        assert!(!MnemoError::Config("missing store".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(MnemoError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(MnemoError::Provider("x".into()).status_code(), 503);
        assert_eq!(MnemoError::Internal("x".into()).status_code(), 500);
    }
}
