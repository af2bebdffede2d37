//! # ITOps RCA
//!
//! Root cause analysis for problems produced by the correlation stages:
//!
//! - **Recall**: one-hop topology around the problem's entities
//! - **Causal reasoning**: pairwise agent calls, validated and adjusted for
//!   timing and causal history
//! - **Conflicts**: one persisted causal object per fault point pair
//! - **Election**: the root cause among the resolved causal graph
//! - **Context**: occurrence summary, backtrace and impacted network
//! - **Engine**: batched scheduling, cancellation of superseded runs and
//!   callback delivery

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod analyzer;
pub mod callback;
pub mod causal;
pub mod conflict;
pub mod context;
pub mod engine;
pub mod recall;
pub mod root_cause;

pub use analyzer::{ProblemAnalyzer, RootCauseAnalyzer};
pub use callback::{CallbackSink, HttpSink, InProcessSink, CALLBACK_PATH};
pub use engine::{RcaEngine, TaskRegistry};

/// Commonly used items
pub mod prelude {
    pub use crate::analyzer::{ProblemAnalyzer, RootCauseAnalyzer};
    pub use crate::callback::{CallbackSink, HttpSink, InProcessSink};
    pub use crate::engine::RcaEngine;
    pub use crate::recall::{GraphRecall, RecallContext};
}

#[cfg(test)]
pub(crate) mod testkit;
