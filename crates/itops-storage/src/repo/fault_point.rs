use super::{bulk_set, decode_all, found, id_strings, FAULT_POINT_BASE, FAULT_POINT_RELATION_BASE};
use crate::envelope;
use crate::query::{Filter, SearchRequest, SortOrder};
use crate::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::model::{FaultPointObject, FaultPointRelation, FaultStatus};
use itops_core::Result;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;

/// Fault point persistence
#[async_trait]
pub trait FaultPointRepository: Send + Sync + Debug {
    /// The most recent occurred fault point for `(entity, mode)` whose
    /// latest time is not older than `threshold`
    async fn find_open_by_entity_and_mode(
        &self,
        entity_object_id: &str,
        fault_mode: &str,
        threshold: DateTime<Utc>,
    ) -> Result<Option<FaultPointObject>>;

    async fn upsert(&self, fp: &FaultPointObject) -> Result<()>;

    /// Transition to expired. Returns false when the fault point is gone.
    async fn make_expired(&self, fault_id: u64) -> Result<bool>;

    async fn update_problem_id(&self, fault_ids: &[u64], problem_id: u64) -> Result<()>;

    /// Transition to recovered at `recovered_at`
    async fn make_recovered(&self, fault_id: u64, recovered_at: DateTime<Utc>) -> Result<bool>;

    async fn query_by_ids(&self, fault_ids: &[u64]) -> Result<Vec<FaultPointObject>>;

    /// Fault points active at any point of `[start, end]`
    async fn find_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FaultPointObject>>;

    /// The fault point whose `relation_event_ids` contains `event_id`
    async fn find_by_event_id(&self, event_id: u64) -> Result<Option<FaultPointObject>>;

    /// Occurred fault points not updated since `threshold`
    async fn find_expired_occurred(&self, threshold: DateTime<Utc>) -> Result<Vec<FaultPointObject>>;
}

#[derive(Debug)]
pub struct StoreFaultPointRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreFaultPointRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl FaultPointRepository for StoreFaultPointRepository {
    async fn find_open_by_entity_and_mode(
        &self,
        entity_object_id: &str,
        fault_mode: &str,
        threshold: DateTime<Utc>,
    ) -> Result<Option<FaultPointObject>> {
        let request = SearchRequest::new()
            .filter(Filter::term("entity_object_id", entity_object_id))
            .filter(Filter::term("fault_mode", fault_mode))
            .filter(Filter::term("fault_status", FaultStatus::Occurred))
            .filter(Filter::gte("fault_latest_time", threshold))
            .sort("fault_latest_time", SortOrder::Desc)
            .size(1);
        let docs = self.store.search(&self.index, &request).await?;
        Ok(decode_all(docs)?.into_iter().next())
    }

    async fn upsert(&self, fp: &FaultPointObject) -> Result<()> {
        let id = fp.fault_id.to_string();
        let doc = envelope::wrap(fp, FAULT_POINT_BASE, &id, Utc::now())?;
        self.store.index(&self.index, &id, doc).await?;
        Ok(())
    }

    async fn make_expired(&self, fault_id: u64) -> Result<bool> {
        let now = Utc::now();
        let partial = envelope::partial(
            [
                ("fault_status", json!(FaultStatus::Expired)),
                ("fault_update_time", json!(now)),
            ],
            now,
        );
        found(
            self.store
                .update(&self.index, &fault_id.to_string(), partial)
                .await,
        )
    }

    async fn update_problem_id(&self, fault_ids: &[u64], problem_id: u64) -> Result<()> {
        let partial = envelope::partial([("problem_id", json!(problem_id))], Utc::now());
        bulk_set(self.store.as_ref(), &self.index, fault_ids, partial).await
    }

    async fn make_recovered(&self, fault_id: u64, recovered_at: DateTime<Utc>) -> Result<bool> {
        let now = Utc::now();
        let partial = envelope::partial(
            [
                ("fault_status", json!(FaultStatus::Recovered)),
                ("fault_recovery_time", json!(recovered_at)),
                ("fault_update_time", json!(now)),
            ],
            now,
        );
        found(
            self.store
                .update(&self.index, &fault_id.to_string(), partial)
                .await,
        )
    }

    async fn query_by_ids(&self, fault_ids: &[u64]) -> Result<Vec<FaultPointObject>> {
        if fault_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.mget(&self.index, &id_strings(fault_ids)).await?;
        decode_all(docs)
    }

    async fn find_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FaultPointObject>> {
        let request = SearchRequest::new()
            .filter(Filter::gte("fault_latest_time", start))
            .filter(Filter::not(Filter::Range {
                field: "fault_occur_time".to_string(),
                gte: None,
                gt: Some(json!(end)),
                lte: None,
                lt: None,
            }))
            .sort("fault_occur_time", SortOrder::Asc);
        let docs = self.store.search(&self.index, &request).await?;
        decode_all(docs)
    }

    async fn find_by_event_id(&self, event_id: u64) -> Result<Option<FaultPointObject>> {
        let request = SearchRequest::new()
            .filter(Filter::term("relation_event_ids", event_id))
            .sort("fault_update_time", SortOrder::Desc)
            .size(1);
        let docs = self.store.search(&self.index, &request).await?;
        Ok(decode_all(docs)?.into_iter().next())
    }

    async fn find_expired_occurred(&self, threshold: DateTime<Utc>) -> Result<Vec<FaultPointObject>> {
        let request = SearchRequest::new()
            .filter(Filter::term("fault_status", FaultStatus::Occurred))
            .filter(Filter::lt("fault_latest_time", threshold))
            .sort("fault_latest_time", SortOrder::Asc);
        let docs = self.store.search(&self.index, &request).await?;
        decode_all(docs)
    }
}

/// Entity → fault point edges
#[async_trait]
pub trait FaultPointRelationRepository: Send + Sync + Debug {
    async fn upsert(&self, relation: &FaultPointRelation) -> Result<()>;
}

#[derive(Debug)]
pub struct StoreFaultPointRelationRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreFaultPointRelationRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl FaultPointRelationRepository for StoreFaultPointRelationRepository {
    async fn upsert(&self, relation: &FaultPointRelation) -> Result<()> {
        let id = relation.relation_id.to_string();
        let doc = envelope::wrap(relation, FAULT_POINT_RELATION_BASE, &id, Utc::now())?;
        self.store.index(&self.index, &id, doc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{Duration, TimeZone};
    use itops_core::model::{EventStatus, RawEvent, Severity};

    fn repo() -> StoreFaultPointRepository {
        StoreFaultPointRepository::new(Arc::new(MemoryStore::new()), "fp".into())
    }

    fn fault(id: u64, entity: &str, latest: DateTime<Utc>) -> FaultPointObject {
        let event = RawEvent {
            event_id: id * 10,
            recovery_id: 0,
            event_provider_id: id,
            event_timestamp: latest,
            event_title: "t".into(),
            event_content: String::new(),
            event_occur_time: Some(latest),
            event_recovery_time: None,
            event_type: "system.cpu.util".into(),
            event_status: EventStatus::Occurred,
            event_level: Severity::Major,
            event_source: String::new(),
            entity_object_name: entity.into(),
            entity_object_class: "host".into(),
            entity_object_id: entity.into(),
            entity_object_ip: String::new(),
            entity_object_port: String::new(),
            entity_object_mac: String::new(),
            raw_event_msg: String::new(),
            problem_id: 0,
            fault_id: 0,
        };
        FaultPointObject::open(id, &event, latest)
    }

    #[tokio::test]
    async fn test_find_open_respects_threshold_and_status() {
        let repo = repo();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        repo.upsert(&fault(1, "srv-A", now - Duration::minutes(90))).await.unwrap();
        repo.upsert(&fault(2, "srv-A", now - Duration::minutes(10))).await.unwrap();
        repo.upsert(&fault(3, "srv-B", now)).await.unwrap();

        let threshold = now - Duration::hours(1);
        let found = repo
            .find_open_by_entity_and_mode("srv-A", "system.cpu.util", threshold)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.fault_id, 2);

        assert!(repo.make_expired(2).await.unwrap());
        assert!(repo
            .find_open_by_entity_and_mode("srv-A", "system.cpu.util", threshold)
            .await
            .unwrap()
            .is_none());
        assert!(!repo.make_expired(99).await.unwrap());
    }

    #[tokio::test]
    async fn test_recovery_and_event_lookup() {
        let repo = repo();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        repo.upsert(&fault(1, "srv-A", now)).await.unwrap();

        let fp = repo.find_by_event_id(10).await.unwrap().unwrap();
        assert_eq!(fp.fault_id, 1);
        assert!(repo.find_by_event_id(11).await.unwrap().is_none());

        let at = now + Duration::minutes(30);
        assert!(repo.make_recovered(1, at).await.unwrap());
        let fp = repo.query_by_ids(&[1]).await.unwrap().remove(0);
        assert_eq!(fp.fault_status, FaultStatus::Recovered);
        assert_eq!(fp.fault_recovery_time, Some(at));
    }

    #[tokio::test]
    async fn test_sweeper_and_window_queries() {
        let repo = repo();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        repo.upsert(&fault(1, "a", now - Duration::minutes(70))).await.unwrap();
        repo.upsert(&fault(2, "b", now - Duration::minutes(5))).await.unwrap();

        let stale = repo
            .find_expired_occurred(now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale.iter().map(|f| f.fault_id).collect::<Vec<_>>(), vec![1]);

        let window = repo
            .find_in_window(now - Duration::minutes(30), now)
            .await
            .unwrap();
        assert_eq!(window.iter().map(|f| f.fault_id).collect::<Vec<_>>(), vec![2]);

        repo.update_problem_id(&[1, 2], 77).await.unwrap();
        let fps = repo.query_by_ids(&[1, 2]).await.unwrap();
        assert!(fps.iter().all(|f| f.problem_id == 77));
    }
}
