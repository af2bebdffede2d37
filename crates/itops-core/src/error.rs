//! Error types shared by every pipeline stage.
//!
//! Each variant is a kind tag. Worker loops use [`Error::is_fatal`] to decide
//! whether to exit and [`Error::is_cancellation`] to keep superseded work out
//! of failure counters.

use thiserror::Error;

/// Result type alias using the core [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input (bad payload, missing field)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity state contradicts a pipeline invariant
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Transient failure of an external collaborator (graph, agent, broker)
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Document store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Work was cancelled (shutdown or superseded task)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Work exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unrecoverable for the current worker loop
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a dependency error
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// True when the work was cancelled rather than failed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// True when the error must terminate the worker loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Invariant(_) => "invariant",
            Self::Dependency(_) => "dependency",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Fatal(_) => "fatal",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}
