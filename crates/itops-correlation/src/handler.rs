//! Capabilities the stages expose to each other and to the outer surfaces.

use async_trait::async_trait;
use itops_core::model::{CloseType, FaultPointObject, ProblemStatus, RawEvent, RcaCallback};
use itops_core::Result;
use std::fmt::Debug;

/// Receives standardized events from the ingest stage
#[async_trait]
pub trait FaultPointHandler: Send + Sync + Debug {
    async fn handle_event(&self, event: &RawEvent) -> Result<()>;
}

/// Problem-side operations reachable from the fault-point stage, the RCA
/// engine and the HTTP API
#[async_trait]
pub trait ProblemHandler: Send + Sync + Debug {
    /// Correlate a converged fault point into a new or existing problem
    async fn handle_fault_point(&self, fp: &FaultPointObject) -> Result<()>;

    /// A fault point recovered; close its problem once every fault point has
    async fn handle_fault_point_recovered(&self, fault_id: u64) -> Result<()>;

    /// Apply a finished RCA run. In-progress callbacks are ignored.
    async fn handle_rca_callback(&self, callback: &RcaCallback) -> Result<()>;

    /// Close an open problem
    async fn close_problem(
        &self,
        problem_id: u64,
        close_type: CloseType,
        status: ProblemStatus,
        notes: &str,
        closed_by: &str,
    ) -> Result<()>;
}
