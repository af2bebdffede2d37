//! # ITOps Storage
//!
//! Persistence layer for the alert analysis pipeline.
//!
//! This crate provides:
//! - The [`DocumentStore`] capability (get/mget/search/index/update/bulk)
//! - An in-memory store used by default and in tests
//! - An OpenSearch-compatible HTTP store
//! - Typed repositories for every persisted entity, wired by [`Repositories`]

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod envelope;
pub mod error;
pub mod memory;
pub mod opensearch;
pub mod query;
pub mod repo;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

pub use error::{StoreError, StoreResult};
pub use repo::Repositories;

/// Maximum documents returned by one search
pub const MAX_QUERY_SIZE: usize = 5000;

/// Outcome of a bulk partial update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Documents updated
    pub succeeded: usize,
    /// `(document id, reason)` for every failed item
    pub failed: Vec<(String, String)>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Generic JSON document store with at-least-once write semantics
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Fetch one document
    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Fetch many documents; missing ids are skipped
    async fn mget(&self, index: &str, ids: &[String]) -> StoreResult<Vec<Value>>;

    /// Run a filtered, sorted, size-capped search
    async fn search(&self, index: &str, request: &query::SearchRequest) -> StoreResult<Vec<Value>>;

    /// Create or fully replace a document
    async fn index(&self, index: &str, id: &str, document: Value) -> StoreResult<()>;

    /// Merge fields into an existing document
    async fn update(&self, index: &str, id: &str, partial: Value) -> StoreResult<()>;

    /// Merge fields into many documents, reporting per-item failures
    async fn bulk_update(&self, index: &str, updates: Vec<(String, Value)>) -> StoreResult<BulkOutcome>;

    /// Count documents matching all filters
    async fn count(&self, index: &str, filters: &[query::Filter]) -> StoreResult<u64>;

    /// Health check
    async fn health_check(&self) -> StoreResult<()>;
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::memory::MemoryStore;
    pub use crate::opensearch::{OpenSearchStore, OpenSearchStoreConfig};
    pub use crate::query::{Filter, SearchRequest, SortOrder};
    pub use crate::repo::{
        FaultCausalRelationRepository, FaultCausalRepository, FaultPointRelationRepository,
        FaultPointRepository, IndexNames, ProblemRepository, RawEventRepository, Repositories,
    };
    pub use crate::{BulkOutcome, DocumentStore, StoreError, StoreResult};
}
