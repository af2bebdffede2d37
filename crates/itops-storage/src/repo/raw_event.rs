use super::{bulk_set, decode_all, id_strings, RAW_EVENT_BASE};
use crate::envelope;
use crate::query::{Filter, SearchRequest};
use crate::DocumentStore;
use async_trait::async_trait;
use chrono::Utc;
use itops_core::model::RawEvent;
use itops_core::Result;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;

/// Raw event persistence
#[async_trait]
pub trait RawEventRepository: Send + Sync + Debug {
    async fn upsert(&self, event: &RawEvent) -> Result<()>;

    /// Backfill `fault_id` onto events
    async fn update_fault_id(&self, event_ids: &[u64], fault_id: u64) -> Result<()>;

    /// Backfill `problem_id` onto events
    async fn update_problem_id(&self, event_ids: &[u64], problem_id: u64) -> Result<()>;

    async fn query_by_ids(&self, event_ids: &[u64]) -> Result<Vec<RawEvent>>;

    /// Events whose upstream id is one of `provider_ids`
    async fn query_by_provider_id(&self, provider_ids: &[u64]) -> Result<Vec<RawEvent>>;
}

#[derive(Debug)]
pub struct StoreRawEventRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreRawEventRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl RawEventRepository for StoreRawEventRepository {
    async fn upsert(&self, event: &RawEvent) -> Result<()> {
        let id = event.event_id.to_string();
        let doc = envelope::wrap(event, RAW_EVENT_BASE, &id, Utc::now())?;
        self.store.index(&self.index, &id, doc).await?;
        Ok(())
    }

    async fn update_fault_id(&self, event_ids: &[u64], fault_id: u64) -> Result<()> {
        let partial = envelope::partial([("fault_id", json!(fault_id))], Utc::now());
        bulk_set(self.store.as_ref(), &self.index, event_ids, partial).await
    }

    async fn update_problem_id(&self, event_ids: &[u64], problem_id: u64) -> Result<()> {
        let partial = envelope::partial([("problem_id", json!(problem_id))], Utc::now());
        bulk_set(self.store.as_ref(), &self.index, event_ids, partial).await
    }

    async fn query_by_ids(&self, event_ids: &[u64]) -> Result<Vec<RawEvent>> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.mget(&self.index, &id_strings(event_ids)).await?;
        decode_all(docs)
    }

    async fn query_by_provider_id(&self, provider_ids: &[u64]) -> Result<Vec<RawEvent>> {
        if provider_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = SearchRequest::new()
            .filter(Filter::terms("event_provider_id", provider_ids.iter().copied()))
            .sort("event_timestamp", crate::query::SortOrder::Asc);
        let docs = self.store.search(&self.index, &request).await?;
        decode_all(docs)
    }
}

