//! Client error types

use thiserror::Error;

/// Errors from the knowledge-graph query API
#[derive(Debug, Error)]
pub enum GraphError {
    /// Connection error
    #[error("Failed to connect to knowledge graph: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Knowledge graph authentication failed: {0}")]
    Authentication(String),

    /// Request timeout
    #[error("Knowledge graph request timed out")]
    Timeout,

    /// Rate limited
    #[error("Rate limited by knowledge graph")]
    RateLimited,

    /// Invalid request
    #[error("Invalid graph request: {0}")]
    InvalidRequest(String),

    /// Response body could not be decoded
    #[error("Graph serialization error: {0}")]
    Serialization(String),

    /// Missing knowledge network id or similar
    #[error("Knowledge graph not configured: {0}")]
    NotConfigured(String),

    /// Any other non-success status
    #[error("Knowledge graph internal error: {0}")]
    InternalError(String),
}

/// Errors from the reasoning agent API
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to connect to agent: {0}")]
    Connection(String),

    #[error("Agent authentication failed: {0}")]
    Authentication(String),

    /// The call exceeded the agent call timeout
    #[error("Agent call timed out")]
    Timeout,

    #[error("Rate limited by agent")]
    RateLimited,

    #[error("Agent serialization error: {0}")]
    Serialization(String),

    /// The envelope carried no answer text
    #[error("Agent returned an empty answer")]
    EmptyAnswer,

    /// Neither JSON nor pattern extraction produced usable fields
    #[error("Agent answer could not be parsed: {0}")]
    Unparseable(String),

    /// Agent disabled or missing app id / key
    #[error("Agent not configured: {0}")]
    NotConfigured(String),

    #[error("Agent internal error: {0}")]
    InternalError(String),
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Label used on the agent call counter
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unparseable(_) | Self::EmptyAnswer => "unparseable",
            Self::NotConfigured(_) => "disabled",
            _ => "error",
        }
    }
}

/// Transport-level failure shared by both clients
#[derive(Debug)]
pub(crate) enum HttpFailure {
    Connection(String),
    Timeout,
    Authentication(String),
    RateLimited,
    InvalidRequest(String),
    Decode(String),
    Status(u16, String),
}

impl From<HttpFailure> for GraphError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Connection(msg) => Self::Connection(msg),
            HttpFailure::Timeout => Self::Timeout,
            HttpFailure::Authentication(msg) => Self::Authentication(msg),
            HttpFailure::RateLimited => Self::RateLimited,
            HttpFailure::InvalidRequest(msg) => Self::InvalidRequest(msg),
            HttpFailure::Decode(msg) => Self::Serialization(msg),
            HttpFailure::Status(status, body) => {
                Self::InternalError(format!("Status {}: {}", status, body))
            }
        }
    }
}

impl From<HttpFailure> for AgentError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Connection(msg) => Self::Connection(msg),
            HttpFailure::Timeout => Self::Timeout,
            HttpFailure::Authentication(msg) => Self::Authentication(msg),
            HttpFailure::RateLimited => Self::RateLimited,
            HttpFailure::InvalidRequest(msg) => Self::InternalError(msg),
            HttpFailure::Decode(msg) => Self::Serialization(msg),
            HttpFailure::Status(status, body) => {
                Self::InternalError(format!("Status {}: {}", status, body))
            }
        }
    }
}

impl From<GraphError> for itops_core::Error {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Timeout => Self::Timeout(err.to_string()),
            GraphError::NotConfigured(msg) => Self::Config(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<AgentError> for itops_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Timeout => Self::Timeout(err.to_string()),
            AgentError::NotConfigured(msg) => Self::Config(msg),
            AgentError::Unparseable(msg) => Self::Validation(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}
