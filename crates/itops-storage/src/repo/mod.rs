//! Typed repositories over a [`DocumentStore`].
//!
//! Each entity has a capability trait and a store-backed implementation.
//! [`Repositories`] wires one of each around a shared store.

mod causal;
mod fault_point;
mod problem;
mod raw_event;

pub use causal::{
    FaultCausalRelationRepository, FaultCausalRepository, StoreFaultCausalRelationRepository,
    StoreFaultCausalRepository,
};
pub use fault_point::{
    FaultPointRelationRepository, FaultPointRepository, StoreFaultPointRelationRepository,
    StoreFaultPointRepository,
};
pub use problem::{ProblemRepository, StoreProblemRepository, MAX_MERGE_HOPS};
pub use raw_event::{RawEventRepository, StoreRawEventRepository};

use crate::{DocumentStore, StoreError};
use itops_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub const RAW_EVENT_BASE: &str = "itops_raw_event";
pub const FAULT_POINT_BASE: &str = "itops_fault_point_object";
pub const FAULT_POINT_RELATION_BASE: &str = "itops_fault_point_relation";
pub const PROBLEM_BASE: &str = "itops_problem";
pub const FAULT_CAUSAL_BASE: &str = "itops_fault_causal";
pub const FAULT_CAUSAL_RELATION_BASE: &str = "itops_fault_causal_relation";

/// Physical index names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    pub raw_event: String,
    pub fault_point: String,
    pub fault_point_relation: String,
    pub problem: String,
    pub fault_causal: String,
    pub fault_causal_relation: String,
}

impl IndexNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            raw_event: format!("{prefix}{RAW_EVENT_BASE}"),
            fault_point: format!("{prefix}{FAULT_POINT_BASE}"),
            fault_point_relation: format!("{prefix}{FAULT_POINT_RELATION_BASE}"),
            problem: format!("{prefix}{PROBLEM_BASE}"),
            fault_causal: format!("{prefix}{FAULT_CAUSAL_BASE}"),
            fault_causal_relation: format!("{prefix}{FAULT_CAUSAL_RELATION_BASE}"),
        }
    }
}

impl Default for IndexNames {
    fn default() -> Self {
        Self::with_prefix("mdl-")
    }
}

/// One repository per entity, sharing a store
#[derive(Debug, Clone)]
pub struct Repositories {
    pub raw_events: Arc<dyn RawEventRepository>,
    pub fault_points: Arc<dyn FaultPointRepository>,
    pub fault_point_relations: Arc<dyn FaultPointRelationRepository>,
    pub problems: Arc<dyn ProblemRepository>,
    pub fault_causals: Arc<dyn FaultCausalRepository>,
    pub fault_causal_relations: Arc<dyn FaultCausalRelationRepository>,
}

impl Repositories {
    pub fn from_store(store: Arc<dyn DocumentStore>, names: IndexNames) -> Self {
        Self {
            raw_events: Arc::new(StoreRawEventRepository::new(store.clone(), names.raw_event)),
            fault_points: Arc::new(StoreFaultPointRepository::new(
                store.clone(),
                names.fault_point,
            )),
            fault_point_relations: Arc::new(StoreFaultPointRelationRepository::new(
                store.clone(),
                names.fault_point_relation,
            )),
            problems: Arc::new(StoreProblemRepository::new(store.clone(), names.problem)),
            fault_causals: Arc::new(StoreFaultCausalRepository::new(
                store.clone(),
                names.fault_causal,
            )),
            fault_causal_relations: Arc::new(StoreFaultCausalRelationRepository::new(
                store,
                names.fault_causal_relation,
            )),
        }
    }

    /// Repositories over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(crate::memory::MemoryStore::new()), IndexNames::default())
    }
}

pub(crate) fn decode_all<T: DeserializeOwned>(docs: Vec<Value>) -> Result<Vec<T>> {
    docs.into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(Error::from))
        .collect()
}

pub(crate) fn id_strings(ids: &[u64]) -> Vec<String> {
    ids.iter().map(u64::to_string).collect()
}

/// Apply the same partial update to many documents. Item failures are
/// logged; the batch is not aborted.
pub(crate) async fn bulk_set(
    store: &dyn DocumentStore,
    index: &str,
    ids: &[u64],
    partial: Value,
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let updates = ids
        .iter()
        .map(|id| (id.to_string(), partial.clone()))
        .collect();
    let outcome = store.bulk_update(index, updates).await?;
    for (id, reason) in &outcome.failed {
        warn!(index, id = %id, reason = %reason, "Bulk update item failed");
    }
    Ok(())
}

/// Map the store's not-found into `Ok(false)`.
pub(crate) fn found(result: std::result::Result<(), StoreError>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
