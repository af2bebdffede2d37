//! # ITOps Platform
//!
//! Clients for the external platform services the pipeline depends on:
//!
//! - **Graph**: subgraph and object-info queries against the knowledge network
//! - **Spatial**: one-hop topological correlation of fault points with problems
//! - **Agent**: causal reasoning and summary generation with lenient parsing

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod agent;
pub mod error;
pub mod graph;
pub mod http;

pub use error::{AgentError, GraphError};

/// Commonly used items
pub mod prelude {
    pub use crate::agent::{AgentApi, AgentClient, CausalEdge};
    pub use crate::error::{AgentError, GraphError};
    pub use crate::graph::{GraphClient, GraphQuery, InMemoryGraph, SpatialChecker};
    pub use crate::http::{Credentials, PlatformHttp, StaticCredentials};
}
