//! # ITOps Correlation
//!
//! The three stages that turn raw alerts into problems:
//!
//! - **Ingest**: standardize each `raw_events` message and persist it
//! - **FaultPoint**: converge events per `(entity, failure mode)` and expire
//!   stale fault points
//! - **Problem**: correlate fault points in time and topology, merge
//!   overlapping problems, close them on recovery and expire stale ones
//!
//! [`CorrelationService`] wires the stages together and runs their loops.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod fault_point;
pub mod handler;
pub mod ingest;
pub mod problem;
pub mod service;
pub mod sweeper;

pub use fault_point::FaultPointStage;
pub use handler::{FaultPointHandler, ProblemHandler};
pub use ingest::IngestStage;
pub use problem::{ProblemStage, RECOVERED_CLOSE_NOTES, SYSTEM_CLOSER};
pub use service::CorrelationService;
pub use sweeper::{run_sweeper, Sweeper};

/// Commonly used items
pub mod prelude {
    pub use crate::handler::{FaultPointHandler, ProblemHandler};
    pub use crate::service::CorrelationService;
    pub use crate::{FaultPointStage, IngestStage, ProblemStage};
}

#[cfg(test)]
pub(crate) mod testkit;
