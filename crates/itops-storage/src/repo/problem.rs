use super::{decode_all, found, id_strings, PROBLEM_BASE};
use crate::envelope;
use crate::query::{Filter, SearchRequest, SortOrder};
use crate::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use itops_core::model::{CloseType, Problem, ProblemStatus, RcaCallback, RcaStatus};
use itops_core::{Error, Result};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Maximum merge pointers followed when resolving a problem
pub const MAX_MERGE_HOPS: usize = 8;

/// Problem persistence
#[async_trait]
pub trait ProblemRepository: Send + Sync + Debug {
    /// Open problems whose latest time is at or after `window_start`, most
    /// recent first
    async fn find_correlated(&self, window_start: DateTime<Utc>) -> Result<Vec<Problem>>;

    /// Open problems created within `max_age` still waiting for RCA
    async fn find_pending_rca(&self, max_age: Duration) -> Result<Vec<Problem>>;

    /// Open problems whose latest time is before `threshold`
    async fn find_expired_open(&self, threshold: DateTime<Utc>) -> Result<Vec<Problem>>;

    async fn upsert(&self, problem: &Problem) -> Result<()>;

    /// Apply an RCA result. Rejects callbacks whose status is not success.
    async fn update_root_cause(&self, problem_id: u64, cb: &RcaCallback) -> Result<()>;

    async fn update_root_cause_object_id(
        &self,
        problem_id: u64,
        object_id: &str,
        fault_id: u64,
    ) -> Result<bool>;

    /// Replace the event id set, optionally extending the latest time
    async fn update_relation_event_ids(
        &self,
        problem_id: u64,
        event_ids: &[u64],
        latest_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn mark_closed(
        &self,
        problem_id: u64,
        close_type: CloseType,
        status: ProblemStatus,
        duration_secs: u64,
        notes: &str,
        closed_by: &str,
    ) -> Result<bool>;

    /// System-close as merged into `main_id`, recording the forward pointer
    async fn mark_merged(&self, problem_id: u64, main_id: u64) -> Result<bool>;

    async fn mark_expired(&self, problem_id: u64) -> Result<bool>;

    async fn query_by_ids(&self, problem_ids: &[u64]) -> Result<Vec<Problem>>;

    /// Empty the aggregation, root-cause and RCA fields
    async fn clear_merged_problem_data(&self, problem_id: u64) -> Result<bool>;

    /// Fetch a problem, following merge pointers to the surviving one.
    async fn resolve(&self, problem_id: u64) -> Result<Option<Problem>> {
        let mut id = problem_id;
        for _ in 0..=MAX_MERGE_HOPS {
            let Some(problem) = self.query_by_ids(&[id]).await?.into_iter().next() else {
                return Ok(None);
            };
            match (problem.problem_status, problem.problem_merged_into) {
                (ProblemStatus::Merged, Some(next)) if next != id => {
                    debug!(from = id, to = next, "Following merge pointer");
                    id = next;
                }
                _ => return Ok(Some(problem)),
            }
        }
        Err(Error::invariant(format!(
            "merge chain from problem {problem_id} exceeds {MAX_MERGE_HOPS} hops"
        )))
    }
}

#[derive(Debug)]
pub struct StoreProblemRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl StoreProblemRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: String) -> Self {
        Self { store, index }
    }

    async fn patch(&self, problem_id: u64, fields: Vec<(&'static str, Value)>) -> Result<bool> {
        let partial = envelope::partial(fields, Utc::now());
        found(
            self.store
                .update(&self.index, &problem_id.to_string(), partial)
                .await,
        )
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<Problem>> {
        let docs = self.store.search(&self.index, &request).await?;
        decode_all(docs)
    }
}

#[async_trait]
impl ProblemRepository for StoreProblemRepository {
    async fn find_correlated(&self, window_start: DateTime<Utc>) -> Result<Vec<Problem>> {
        self.search(
            SearchRequest::new()
                .filter(Filter::term("problem_status", ProblemStatus::Open))
                .filter(Filter::gte("problem_latest_time", window_start))
                .sort("problem_latest_time", SortOrder::Desc),
        )
        .await
    }

    async fn find_pending_rca(&self, max_age: Duration) -> Result<Vec<Problem>> {
        self.search(
            SearchRequest::new()
                .filter(Filter::term("problem_status", ProblemStatus::Open))
                .filter(Filter::term("rca_status", RcaStatus::Pending))
                .filter(Filter::gte("problem_create_timestamp", Utc::now() - max_age))
                .sort("problem_create_timestamp", SortOrder::Asc),
        )
        .await
    }

    async fn find_expired_open(&self, threshold: DateTime<Utc>) -> Result<Vec<Problem>> {
        self.search(
            SearchRequest::new()
                .filter(Filter::term("problem_status", ProblemStatus::Open))
                .filter(Filter::lt("problem_latest_time", threshold))
                .sort("problem_latest_time", SortOrder::Asc),
        )
        .await
    }

    async fn upsert(&self, problem: &Problem) -> Result<()> {
        let id = problem.problem_id.to_string();
        let doc = envelope::wrap(problem, PROBLEM_BASE, &id, Utc::now())?;
        self.store.index(&self.index, &id, doc).await?;
        Ok(())
    }

    async fn update_root_cause(&self, problem_id: u64, cb: &RcaCallback) -> Result<()> {
        if cb.rca_status != RcaStatus::Success {
            return Err(Error::validation(format!(
                "problem {problem_id}: rca status {:?} is not success",
                cb.rca_status
            )));
        }
        let updated = self
            .patch(
                problem_id,
                vec![
                    ("root_cause_object_id", json!(cb.root_cause_object_id)),
                    ("root_cause_fault_id", json!(cb.root_cause_fault_id)),
                    ("rca_results", json!(cb.rca_results)),
                    ("rca_status", json!(cb.rca_status)),
                    ("rca_start_time", json!(cb.rca_start_time)),
                    ("rca_end_time", json!(cb.rca_end_time)),
                    ("problem_name", json!(cb.problem_name)),
                    ("problem_description", json!(cb.problem_description)),
                    ("problem_update_time", json!(Utc::now())),
                ],
            )
            .await?;
        if updated {
            Ok(())
        } else {
            Err(Error::not_found(format!("problem {problem_id}")))
        }
    }

    async fn update_root_cause_object_id(
        &self,
        problem_id: u64,
        object_id: &str,
        fault_id: u64,
    ) -> Result<bool> {
        self.patch(
            problem_id,
            vec![
                ("root_cause_object_id", json!(object_id)),
                ("root_cause_fault_id", json!(fault_id)),
                ("problem_update_time", json!(Utc::now())),
            ],
        )
        .await
    }

    async fn update_relation_event_ids(
        &self,
        problem_id: u64,
        event_ids: &[u64],
        latest_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut fields = vec![
            ("relation_event_ids", json!(event_ids)),
            ("problem_update_time", json!(Utc::now())),
        ];
        if let Some(latest) = latest_time {
            fields.push(("problem_latest_time", json!(latest)));
        }
        if self.patch(problem_id, fields).await? {
            Ok(())
        } else {
            Err(Error::not_found(format!("problem {problem_id}")))
        }
    }

    async fn mark_closed(
        &self,
        problem_id: u64,
        close_type: CloseType,
        status: ProblemStatus,
        duration_secs: u64,
        notes: &str,
        closed_by: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut fields = vec![
            ("problem_status", json!(status)),
            ("problem_close_type", json!(close_type)),
            ("problem_close_notes", json!(notes)),
            ("problem_closed_by", json!(closed_by)),
            ("problem_close_time", json!(now)),
            ("problem_update_time", json!(now)),
        ];
        if duration_secs > 0 {
            fields.push(("problem_duration", json!(duration_secs)));
        }
        self.patch(problem_id, fields).await
    }

    async fn mark_merged(&self, problem_id: u64, main_id: u64) -> Result<bool> {
        let closed = self
            .mark_closed(
                problem_id,
                CloseType::System,
                ProblemStatus::Merged,
                0,
                &Problem::merged_notes(main_id),
                "system",
            )
            .await?;
        if !closed {
            return Ok(false);
        }
        self.patch(problem_id, vec![("problem_merged_into", json!(main_id))])
            .await
    }

    async fn mark_expired(&self, problem_id: u64) -> Result<bool> {
        self.patch(
            problem_id,
            vec![
                ("problem_status", json!(ProblemStatus::Expired)),
                ("problem_update_time", json!(Utc::now())),
            ],
        )
        .await
    }

    async fn query_by_ids(&self, problem_ids: &[u64]) -> Result<Vec<Problem>> {
        if problem_ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.mget(&self.index, &id_strings(problem_ids)).await?;
        decode_all(docs)
    }

    async fn clear_merged_problem_data(&self, problem_id: u64) -> Result<bool> {
        self.patch(
            problem_id,
            vec![
                ("relation_fp_ids", json!([])),
                ("relation_event_ids", json!([])),
                ("affected_entity_ids", json!([])),
                ("root_cause_object_id", json!("")),
                ("root_cause_fault_id", json!(0)),
                ("rca_results", json!("")),
                ("rca_status", Value::Null),
                ("rca_start_time", Value::Null),
                ("rca_end_time", Value::Null),
                ("problem_update_time", json!(Utc::now())),
            ],
        )
        .await
    }
}
