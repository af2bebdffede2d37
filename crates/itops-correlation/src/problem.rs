//! Problem correlation.
//!
//! A fault point joins the most recent open problem that overlaps it in time
//! (`problem_latest_time` within the problem expiration window) and space
//! (an affected entity within one topology hop). When several problems
//! qualify they are merged into the most recent one; the others are closed
//! as merged and keep a pointer to the survivor.

use crate::handler::ProblemHandler;
use crate::sweeper::Sweeper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::config::{ConfigManager, ExpirationConfig};
use itops_core::idgen::IdGenerator;
use itops_core::model::{
    push_unique, CloseType, FaultPointObject, FaultStatus, Problem, ProblemEvent, ProblemStatus,
    RcaCallback,
};
use itops_core::timex::{chrono_duration, seconds_between};
use itops_core::{Error, Result};
use itops_ingestion::MessagePublisher;
use itops_platform::graph::SpatialChecker;
use itops_storage::Repositories;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Close notes written when every fault point of a problem recovered
pub const RECOVERED_CLOSE_NOTES: &str = "所有故障点已恢复";

/// `closed_by` of system closes
pub const SYSTEM_CLOSER: &str = "system";

/// Correlates fault points into problems and owns problem lifecycle writes
#[derive(Debug)]
pub struct ProblemStage {
    repos: Repositories,
    ids: Arc<dyn IdGenerator>,
    config: Arc<ConfigManager>,
    spatial: SpatialChecker,
    publisher: Arc<dyn MessagePublisher>,
}

impl ProblemStage {
    pub fn new(
        repos: Repositories,
        ids: Arc<dyn IdGenerator>,
        config: Arc<ConfigManager>,
        spatial: SpatialChecker,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            repos,
            ids,
            config,
            spatial,
            publisher,
        }
    }

    fn expiration(&self) -> ExpirationConfig {
        self.config.snapshot().app_config.problem.expiration.clone()
    }

    /// Fold the other problems and `fp` into `main`, persist it, then retire
    /// the others.
    async fn merge(
        &self,
        mut main: Problem,
        others: &[Problem],
        fp: &FaultPointObject,
        now: DateTime<Utc>,
    ) -> Result<Problem> {
        for other in others {
            main.absorb_problem(other);
        }
        main.absorb_fault_point(fp);
        main.refresh_duration();
        main.problem_update_time = now;
        self.repos.problems.upsert(&main).await?;

        for other in others {
            if let Err(e) = self.retire(other, main.problem_id).await {
                error!(
                    problem_id = other.problem_id,
                    main_problem_id = main.problem_id,
                    error = %e,
                    "Failed to retire merged problem"
                );
            }
        }
        if !others.is_empty() {
            info!(
                problem_id = main.problem_id,
                merged = others.len(),
                fault_points = main.relation_ids.len(),
                "Problems merged"
            );
        }
        Ok(main)
    }

    /// Point a merged-away problem's children at `main_id`, then close it.
    async fn retire(&self, other: &Problem, main_id: u64) -> Result<()> {
        if let Err(e) = self
            .repos
            .fault_points
            .update_problem_id(&other.relation_ids, main_id)
            .await
        {
            warn!(problem_id = other.problem_id, error = %e, "Failed to retarget fault points");
        }
        if let Err(e) = self
            .repos
            .raw_events
            .update_problem_id(&other.relation_event_ids, main_id)
            .await
        {
            warn!(problem_id = other.problem_id, error = %e, "Failed to retarget events");
        }
        self.repos
            .problems
            .clear_merged_problem_data(other.problem_id)
            .await?;
        self.repos.problems.mark_merged(other.problem_id, main_id).await?;
        debug!(problem_id = other.problem_id, main_problem_id = main_id, "Problem retired");
        Ok(())
    }

    async fn publish(&self, problem_id: u64) {
        let body = match serde_json::to_vec(&ProblemEvent { problem_id }) {
            Ok(body) => body,
            Err(e) => {
                error!(problem_id, error = %e, "Failed to encode problem event");
                return;
            }
        };
        if let Err(e) = self
            .publisher
            .publish(problem_id.to_string().as_bytes(), &body)
            .await
        {
            error!(problem_id, error = %e, "Failed to publish problem event");
        }
    }

    /// Set the root cause by hand
    pub async fn override_root_cause(
        &self,
        problem_id: u64,
        root_cause_object_id: &str,
        root_cause_fault_id: u64,
    ) -> Result<()> {
        let updated = self
            .repos
            .problems
            .update_root_cause_object_id(problem_id, root_cause_object_id, root_cause_fault_id)
            .await?;
        if !updated {
            return Err(Error::not_found(format!("problem {problem_id}")));
        }
        info!(problem_id, root_cause_object_id, root_cause_fault_id, "Root cause overridden");
        Ok(())
    }
}

#[async_trait]
impl ProblemHandler for ProblemStage {
    #[instrument(skip(self, fp), fields(service = "problem", fault_id = fp.fault_id))]
    async fn handle_fault_point(&self, fp: &FaultPointObject) -> Result<()> {
        let window_start = fp.fault_latest_time - chrono_duration(self.expiration().expiration_time);
        let candidates = self.repos.problems.find_correlated(window_start).await?;
        let correlated = self.spatial.filter_correlated(fp, candidates).await?;
        let now = Utc::now();

        let (problem, event_ids) = match correlated.split_first() {
            Some((main, others)) => {
                let main = self.merge(main.clone(), others, fp, now).await?;
                let event_ids = main.relation_event_ids.clone();
                (main, event_ids)
            }
            None => {
                let problem = Problem::open(self.ids.next_id(), fp, now);
                self.repos.problems.upsert(&problem).await?;
                info!(problem_id = problem.problem_id, "Problem opened");
                (problem, fp.relation_event_ids.clone())
            }
        };

        self.publish(problem.problem_id).await;
        self.repos
            .fault_points
            .update_problem_id(&[fp.fault_id], problem.problem_id)
            .await?;
        self.repos
            .raw_events
            .update_problem_id(&event_ids, problem.problem_id)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(service = "problem"))]
    async fn handle_fault_point_recovered(&self, fault_id: u64) -> Result<()> {
        let Some(fp) = self
            .repos
            .fault_points
            .query_by_ids(&[fault_id])
            .await?
            .into_iter()
            .next()
        else {
            debug!("Recovered fault point not found");
            return Ok(());
        };
        if fp.problem_id == 0 {
            debug!("Recovered fault point has no problem");
            return Ok(());
        }
        let Some(problem) = self.repos.problems.resolve(fp.problem_id).await? else {
            debug!(problem_id = fp.problem_id, "Problem of recovered fault point not found");
            return Ok(());
        };
        if !problem.is_open() {
            debug!(problem_id = problem.problem_id, status = ?problem.problem_status, "Problem no longer open");
            return Ok(());
        }

        let mut event_ids = problem.relation_event_ids.clone();
        for id in &fp.relation_event_ids {
            push_unique(&mut event_ids, *id);
        }
        let latest = problem.problem_latest_time.max(fp.fault_latest_time);
        self.repos
            .problems
            .update_relation_event_ids(problem.problem_id, &event_ids, Some(latest))
            .await?;

        let fault_points = self.repos.fault_points.query_by_ids(&problem.relation_ids).await?;
        let all_recovered = !fault_points.is_empty()
            && fault_points
                .iter()
                .all(|fp| fp.fault_status == FaultStatus::Recovered);
        if !all_recovered {
            return Ok(());
        }

        let duration = seconds_between(problem.problem_occur_time, latest).max(0) as u64;
        self.repos
            .problems
            .mark_closed(
                problem.problem_id,
                CloseType::System,
                ProblemStatus::Closed,
                duration,
                RECOVERED_CLOSE_NOTES,
                SYSTEM_CLOSER,
            )
            .await?;
        info!(problem_id = problem.problem_id, duration_secs = duration, "Problem closed on recovery");
        Ok(())
    }

    #[instrument(skip(self, callback), fields(service = "problem", problem_id = callback.problem_id))]
    async fn handle_rca_callback(&self, callback: &RcaCallback) -> Result<()> {
        if callback.in_progress {
            debug!("RCA still in progress, ignoring callback");
            return Ok(());
        }
        let problem = self
            .repos
            .problems
            .resolve(callback.problem_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("problem {}", callback.problem_id)))?;
        if problem.problem_id != callback.problem_id {
            info!(
                main_problem_id = problem.problem_id,
                "Problem was merged during RCA, dropping result"
            );
            return Ok(());
        }

        self.repos
            .problems
            .update_root_cause(callback.problem_id, callback)
            .await?;
        info!(
            root_cause_fault_id = callback.root_cause_fault_id,
            root_cause_object_id = %callback.root_cause_object_id,
            "Root cause recorded"
        );
        Ok(())
    }

    #[instrument(skip(self, notes), fields(service = "problem"))]
    async fn close_problem(
        &self,
        problem_id: u64,
        close_type: CloseType,
        status: ProblemStatus,
        notes: &str,
        closed_by: &str,
    ) -> Result<()> {
        let problem = self
            .repos
            .problems
            .query_by_ids(&[problem_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("problem {problem_id}")))?;
        if !problem.is_open() {
            return Err(Error::validation(format!(
                "problem {problem_id} is {}, only open problems can be closed",
                problem.problem_status.as_str()
            )));
        }
        self.repos
            .problems
            .mark_closed(problem_id, close_type, status, 0, notes, closed_by)
            .await?;
        info!(closed_by, "Problem closed");
        Ok(())
    }
}

#[async_trait]
impl Sweeper for ProblemStage {
    fn kind(&self) -> &'static str {
        "problem"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expiration = self.expiration();
        if !expiration.enabled {
            debug!("Problem expiration disabled");
            return Ok(0);
        }
        let threshold = now - chrono_duration(expiration.expiration_time);
        let stale = self.repos.problems.find_expired_open(threshold).await?;

        let mut expired = 0;
        for problem in &stale {
            match self.repos.problems.mark_expired(problem.problem_id).await {
                Ok(true) => expired += 1,
                Ok(false) => debug!(problem_id = problem.problem_id, "Problem vanished before expiry"),
                Err(e) => warn!(problem_id = problem.problem_id, error = %e, "Failed to expire problem"),
            }
        }
        if !stale.is_empty() {
            info!(candidates = stale.len(), expired, "Problems expired");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{event_on, Pipeline};
    use crate::FaultPointHandler;
    use chrono::Duration;
    use itops_core::model::{RcaStatus, MERGED_NOTES_PREFIX};

    async fn alert(pipeline: &Pipeline, entity: &str, provider_id: u64) -> FaultPointObject {
        let event = event_on(entity, "system.cpu.util", provider_id);
        pipeline.repos.raw_events.upsert(&event).await.unwrap();
        pipeline.fault_points.handle_event(&event).await.unwrap();
        let stored = pipeline.repos.raw_events.query_by_ids(&[event.event_id]).await.unwrap();
        pipeline.fault_point(stored[0].fault_id).await
    }

    #[tokio::test]
    async fn test_new_problem_is_published() {
        let pipeline = Pipeline::new();
        let fp = alert(&pipeline, "srv-A", 1).await;
        assert!(fp.problem_id > 0);

        let published = pipeline.published.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, fp.problem_id.to_string());
        let event: ProblemEvent = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(event.problem_id, fp.problem_id);
    }

    #[tokio::test]
    async fn test_unrelated_entities_open_separate_problems() {
        let pipeline = Pipeline::new();
        let a = alert(&pipeline, "srv-A", 1).await;
        let c = alert(&pipeline, "srv-C", 2).await;
        assert_ne!(a.problem_id, c.problem_id);
    }

    #[tokio::test]
    async fn test_bridge_fault_point_merges_problems() {
        let pipeline = Pipeline::new();
        let a = alert(&pipeline, "srv-A", 1).await;
        let c = alert(&pipeline, "srv-C", 2).await;
        assert_ne!(a.problem_id, c.problem_id);

        // srv-B neighbours both srv-A and srv-C
        let b = alert(&pipeline, "srv-B", 3).await;
        let survivor = pipeline.problem(b.problem_id).await;
        assert_eq!(survivor.problem_status, ProblemStatus::Open);
        assert_eq!(survivor.relation_ids.len(), 3);
        assert_eq!(survivor.affected_entity_ids.len(), 3);

        let merged_id = if survivor.problem_id == a.problem_id {
            c.problem_id
        } else {
            a.problem_id
        };
        let merged = pipeline.problem(merged_id).await;
        assert_eq!(merged.problem_status, ProblemStatus::Merged);
        assert!(merged.relation_ids.is_empty());
        assert!(merged.relation_event_ids.is_empty());
        assert!(merged.affected_entity_ids.is_empty());
        assert!(merged.problem_close_notes.starts_with(MERGED_NOTES_PREFIX));
        assert_eq!(merged.problem_merged_into, Some(survivor.problem_id));

        for id in &survivor.relation_ids {
            assert_eq!(pipeline.fault_point(*id).await.problem_id, survivor.problem_id);
        }
        let events = pipeline
            .repos
            .raw_events
            .query_by_ids(&survivor.relation_event_ids)
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.problem_id == survivor.problem_id));
    }

    #[tokio::test]
    async fn test_rca_callback_rules() {
        let pipeline = Pipeline::new();
        let fp = alert(&pipeline, "srv-A", 1).await;
        let now = Utc::now();
        let mut callback = RcaCallback {
            problem_id: fp.problem_id,
            root_cause_object_id: "srv-A".into(),
            root_cause_fault_id: fp.fault_id,
            rca_results: "{}".into(),
            rca_start_time: now,
            rca_end_time: now,
            rca_status: RcaStatus::Success,
            in_progress: true,
            problem_name: "CPU".into(),
            problem_description: "CPU saturated".into(),
        };

        pipeline.problems.handle_rca_callback(&callback).await.unwrap();
        assert_eq!(pipeline.problem(fp.problem_id).await.root_cause_fault_id, 0);

        callback.in_progress = false;
        callback.rca_status = RcaStatus::Failed;
        assert!(pipeline.problems.handle_rca_callback(&callback).await.is_err());

        callback.rca_status = RcaStatus::Success;
        pipeline.problems.handle_rca_callback(&callback).await.unwrap();
        let problem = pipeline.problem(fp.problem_id).await;
        assert_eq!(problem.root_cause_fault_id, fp.fault_id);
        assert_eq!(problem.root_cause_object_id, "srv-A");
        assert_eq!(problem.problem_description, "CPU saturated");
    }

    #[tokio::test]
    async fn test_manual_close_requires_open_problem() {
        let pipeline = Pipeline::new();
        let fp = alert(&pipeline, "srv-A", 1).await;
        pipeline
            .problems
            .close_problem(fp.problem_id, CloseType::Manual, ProblemStatus::Closed, "done", "ops")
            .await
            .unwrap();
        let problem = pipeline.problem(fp.problem_id).await;
        assert_eq!(problem.problem_status, ProblemStatus::Closed);
        assert_eq!(problem.problem_close_type, Some(CloseType::Manual));
        assert_eq!(problem.problem_closed_by, "ops");

        let again = pipeline
            .problems
            .close_problem(fp.problem_id, CloseType::Manual, ProblemStatus::Closed, "", "ops")
            .await;
        assert!(matches!(again, Err(Error::Validation(_))));
        assert!(matches!(
            pipeline
                .problems
                .close_problem(1, CloseType::Manual, ProblemStatus::Closed, "", "ops")
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_override_root_cause() {
        let pipeline = Pipeline::new();
        let fp = alert(&pipeline, "srv-A", 1).await;
        pipeline
            .problems
            .override_root_cause(fp.problem_id, "srv-Z", 77)
            .await
            .unwrap();
        let problem = pipeline.problem(fp.problem_id).await;
        assert_eq!(problem.root_cause_object_id, "srv-Z");
        assert_eq!(problem.root_cause_fault_id, 77);
        assert!(pipeline.problems.override_root_cause(1, "x", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_sweeper_expires_stale_problems() {
        let pipeline = Pipeline::new();
        let fp = alert(&pipeline, "srv-A", 1).await;
        let later = Utc::now() + Duration::hours(3);
        assert_eq!(pipeline.problems.sweep(later).await.unwrap(), 1);
        let problem = pipeline.problem(fp.problem_id).await;
        assert_eq!(problem.problem_status, ProblemStatus::Expired);
        assert!(problem.problem_close_time.is_none());
    }
}
