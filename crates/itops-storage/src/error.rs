use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by document store backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable
    #[error("Failed to connect to document store: {0}")]
    Connection(String),

    /// Authentication rejected
    #[error("Document store authentication failed: {0}")]
    Authentication(String),

    /// Request timed out
    #[error("Document store request timed out")]
    Timeout,

    /// Document does not exist
    #[error("Document {id} not found in {index}")]
    NotFound { index: String, id: String },

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Document store error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StoreError> for itops_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => itops_core::Error::NotFound(err.to_string()),
            StoreError::Timeout => itops_core::Error::Timeout(err.to_string()),
            StoreError::Serialization(msg) => itops_core::Error::Storage(format!("serialization: {msg}")),
            other => itops_core::Error::Storage(other.to_string()),
        }
    }
}
