//! # ITOps Core
//!
//! Shared building blocks for the alert analysis pipeline:
//!
//! - **Model**: raw events, fault points, problems and causal entities
//! - **Config**: YAML configuration, the mutable business config and its manager
//! - **Errors**: the kind-tagged [`Error`] used across every crate boundary
//! - **Ids**: the process-monotonic 64-bit id generator

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod idgen;
pub mod model;
pub mod timex;

pub use error::{Error, Result};

/// Commonly used items
pub mod prelude {
    pub use crate::config::{AppConfig, Config, ConfigManager};
    pub use crate::error::{Error, Result};
    pub use crate::idgen::{IdGenerator, SequenceIdGenerator};
    pub use crate::model::{
        CloseType, EventStatus, FaultCausalObject, FaultCausalRelation, FaultPointObject,
        FaultPointRelation, FaultStatus, Problem, ProblemEvent, ProblemStatus, RawEvent,
        RcaCallback, RcaStatus, Severity,
    };
}
