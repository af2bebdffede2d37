use super::{decode_all, found, FAULT_CAUSAL_BASE, FAULT_CAUSAL_RELATION_BASE};
use crate::envelope;
use crate::query::{Filter, SearchRequest, SortOrder};
use crate::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::model::{FaultCausalObject, FaultCausalRelation};
use itops_core::{Error, Result};
use std::fmt::Debug;
use std::sync::Arc;

/// Causal object persistence
#[async_trait]
pub trait FaultCausalRepository: Send + Sync + Debug {
    async fn upsert(&self, causal: &FaultCausalObject) -> Result<()>;

    /// Overwrite an existing causal object. Fails with not-found if absent.
    async fn update(&self, causal: &FaultCausalObject) -> Result<()>;

    async fn query_by_ids(&self, causal_ids: &[String]) -> Result<Vec<FaultCausalObject>>;

    /// Causal objects whose source or target is one of `fault_ids`
    async fn find_among_fault_points(&self, fault_ids: &[u64]) -> Result<Vec<FaultCausalObject>>;

    /// Causal objects touched at or after `since`
    async fn find_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<FaultCausalObject>>;
}

#[derive(Debug)]
pub struct StoreFaultCausalRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreFaultCausalRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl FaultCausalRepository for StoreFaultCausalRepository {
    async fn upsert(&self, causal: &FaultCausalObject) -> Result<()> {
        let doc = envelope::wrap(causal, FAULT_CAUSAL_BASE, &causal.causal_id, Utc::now())?;
        self.store.index(&self.index, &causal.causal_id, doc).await?;
        Ok(())
    }

    async fn update(&self, causal: &FaultCausalObject) -> Result<()> {
        let partial = serde_json::to_value(causal)?;
        if found(self.store.update(&self.index, &causal.causal_id, partial).await)? {
            Ok(())
        } else {
            Err(Error::not_found(format!("fault causal {}", causal.causal_id)))
        }
    }

    async fn query_by_ids(&self, causal_ids: &[String]) -> Result<Vec<FaultCausalObject>> {
        if causal_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.mget(&self.index, causal_ids).await?;
        decode_all(docs)
    }

    async fn find_among_fault_points(&self, fault_ids: &[u64]) -> Result<Vec<FaultCausalObject>> {
        if fault_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = fault_ids.iter().copied();
        let as_source = SearchRequest::new()
            .filter(Filter::terms("causal_source_fault_id", ids.clone()))
            .sort("s_update_time", SortOrder::Desc);
        let as_target = SearchRequest::new()
            .filter(Filter::terms("causal_target_fault_id", ids))
            .sort("s_update_time", SortOrder::Desc);

        let mut causals: Vec<FaultCausalObject> =
            decode_all(self.store.search(&self.index, &as_source).await?)?;
        for causal in decode_all::<FaultCausalObject>(
            self.store.search(&self.index, &as_target).await?,
        )? {
            if !causals.iter().any(|c| c.causal_id == causal.causal_id) {
                causals.push(causal);
            }
        }
        Ok(causals)
    }

    async fn find_updated_since(&self, since: DateTime<Utc>) -> Result<Vec<FaultCausalObject>> {
        let request = SearchRequest::new()
            .filter(Filter::gte("s_update_time", since))
            .sort("s_update_time", SortOrder::Desc);
        decode_all(self.store.search(&self.index, &request).await?)
    }
}

/// Causal edge persistence
#[async_trait]
pub trait FaultCausalRelationRepository: Send + Sync + Debug {
    async fn upsert(&self, relation: &FaultCausalRelation) -> Result<()>;

    async fn update(&self, relation: &FaultCausalRelation) -> Result<()>;

    async fn query_by_ids(&self, relation_ids: &[String]) -> Result<Vec<FaultCausalRelation>>;

    /// Edges from `source_object_id` to `target_object_id`
    async fn query_by_entity_pair(
        &self,
        source_object_id: &str,
        target_object_id: &str,
    ) -> Result<Vec<FaultCausalRelation>>;
}

#[derive(Debug)]
pub struct StoreFaultCausalRelationRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreFaultCausalRelationRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl FaultCausalRelationRepository for StoreFaultCausalRelationRepository {
    async fn upsert(&self, relation: &FaultCausalRelation) -> Result<()> {
        let doc = envelope::wrap(
            relation,
            FAULT_CAUSAL_RELATION_BASE,
            &relation.relation_id,
            Utc::now(),
        )?;
        self.store.index(&self.index, &relation.relation_id, doc).await?;
        Ok(())
    }

    async fn update(&self, relation: &FaultCausalRelation) -> Result<()> {
        let partial = serde_json::to_value(relation)?;
        if found(
            self.store
                .update(&self.index, &relation.relation_id, partial)
                .await,
        )? {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "fault causal relation {}",
                relation.relation_id
            )))
        }
    }

    async fn query_by_ids(&self, relation_ids: &[String]) -> Result<Vec<FaultCausalRelation>> {
        if relation_ids.is_empty() {
            return Ok(Vec::new());
        }
        decode_all(self.store.mget(&self.index, relation_ids).await?)
    }

    async fn query_by_entity_pair(
        &self,
        source_object_id: &str,
        target_object_id: &str,
    ) -> Result<Vec<FaultCausalRelation>> {
        let request = SearchRequest::new()
            .filter(Filter::term("source_object_id", source_object_id))
            .filter(Filter::term("target_object_id", target_object_id))
            .sort("relation_update_time", SortOrder::Desc);
        decode_all(self.store.search(&self.index, &request).await?)
    }
}
