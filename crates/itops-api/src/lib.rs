//! # ITOps API
//!
//! HTTP surface of the alert analysis pipeline, served under [`BASE_PATH`]:
//!
//! - **Events**: webhook intake onto the raw events topic
//! - **Queries**: events, fault points and problems by id
//! - **Problems**: manual close, root cause override and RCA callbacks
//! - **Debug**: how one problem was assembled from its events

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

use itops_correlation::ProblemStage;
use itops_ingestion::MessagePublisher;
use itops_storage::Repositories;
use std::sync::Arc;

pub use error::{ApiError, ErrorResponse};
pub use routes::{create_router, BASE_PATH};
pub use server::{serve, ApiServer};

/// Shared by every handler
#[derive(Debug, Clone)]
pub struct ApiState {
    pub repos: Repositories,
    pub problems: Arc<ProblemStage>,
    /// Producer of the raw events topic
    pub publisher: Arc<dyn MessagePublisher>,
}

impl ApiState {
    pub fn new(repos: Repositories, problems: Arc<ProblemStage>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            repos,
            problems,
            publisher,
        }
    }
}

/// Commonly used items
pub mod prelude {
    pub use crate::error::ApiError;
    pub use crate::routes::create_router;
    pub use crate::server::ApiServer;
    pub use crate::ApiState;
}

#[cfg(test)]
pub(crate) mod testkit;
