//! Fault-point convergence.
//!
//! Alerts converge per `(entity_object_id, event_type)` into one occurred
//! fault point while it stays within the expiration window. Recoveries are
//! matched back to their alert through the upstream provider id.

use crate::handler::{FaultPointHandler, ProblemHandler};
use crate::sweeper::Sweeper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::config::{ConfigManager, ExpirationConfig};
use itops_core::idgen::IdGenerator;
use itops_core::model::{FaultPointObject, FaultPointRelation, FaultStatus, RawEvent};
use itops_core::timex::chrono_duration;
use itops_core::Result;
use itops_storage::Repositories;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Converges events into fault points and hands them to the problem stage
#[derive(Debug)]
pub struct FaultPointStage {
    repos: Repositories,
    ids: Arc<dyn IdGenerator>,
    config: Arc<ConfigManager>,
    problems: Arc<dyn ProblemHandler>,
}

impl FaultPointStage {
    pub fn new(
        repos: Repositories,
        ids: Arc<dyn IdGenerator>,
        config: Arc<ConfigManager>,
        problems: Arc<dyn ProblemHandler>,
    ) -> Self {
        Self {
            repos,
            ids,
            config,
            problems,
        }
    }

    fn expiration(&self) -> ExpirationConfig {
        self.config.snapshot().app_config.fault_point.expiration.clone()
    }

    /// Keep only the most recent occurred fault point per `(entity, mode)`
    /// inside the window; the others are expired.
    async fn reconcile_duplicates(&self, threshold: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let active = self.repos.fault_points.find_in_window(threshold, now).await?;
        let mut newest: HashMap<(&str, &str), &FaultPointObject> = HashMap::new();
        let mut duplicates = Vec::new();
        for fp in active.iter().filter(|fp| fp.fault_status == FaultStatus::Occurred) {
            match newest.entry((fp.entity_object_id.as_str(), fp.fault_mode.as_str())) {
                Entry::Vacant(slot) => {
                    slot.insert(fp);
                }
                Entry::Occupied(mut slot) => {
                    let kept = slot.get();
                    if (fp.fault_latest_time, fp.fault_id) > (kept.fault_latest_time, kept.fault_id) {
                        duplicates.push(slot.insert(fp).fault_id);
                    } else {
                        duplicates.push(fp.fault_id);
                    }
                }
            }
        }

        let mut reconciled = 0;
        for fault_id in duplicates {
            match self.repos.fault_points.make_expired(fault_id).await {
                Ok(true) => reconciled += 1,
                Ok(false) => debug!(fault_id, "Duplicate fault point vanished"),
                Err(e) => warn!(fault_id, error = %e, "Failed to expire duplicate fault point"),
            }
        }
        if reconciled > 0 {
            warn!(reconciled, "Duplicate occurred fault points expired");
        }
        Ok(reconciled)
    }

    #[instrument(skip(self, event), fields(service = "fault_point", event_id = event.event_id))]
    async fn handle_alert(&self, event: &RawEvent) -> Result<()> {
        let now = Utc::now();
        let threshold = now - chrono_duration(self.expiration().expiration_time);
        let existing = self
            .repos
            .fault_points
            .find_open_by_entity_and_mode(&event.entity_object_id, &event.event_type, threshold)
            .await?;

        let fp = match existing {
            Some(mut fp) => {
                fp.absorb_alert(event, now);
                self.repos.fault_points.upsert(&fp).await?;
                debug!(fault_id = fp.fault_id, events = fp.relation_event_ids.len(), "Event converged");
                fp
            }
            None => {
                let fp = FaultPointObject::open(self.ids.next_id(), event, now);
                self.repos.fault_points.upsert(&fp).await?;
                let relation = FaultPointRelation::for_fault_point(self.ids.next_id(), &fp, now);
                self.repos.fault_point_relations.upsert(&relation).await?;
                info!(
                    fault_id = fp.fault_id,
                    entity = %fp.entity_object_id,
                    fault_mode = %fp.fault_mode,
                    "Fault point opened"
                );
                fp
            }
        };

        self.repos
            .raw_events
            .update_fault_id(&[event.event_id], fp.fault_id)
            .await?;
        self.problems.handle_fault_point(&fp).await
    }

    #[instrument(skip(self, event), fields(service = "fault_point", event_id = event.event_id, recovery_id = event.recovery_id))]
    async fn handle_recovery(&self, event: &RawEvent) -> Result<()> {
        let originals = self
            .repos
            .raw_events
            .query_by_provider_id(&[event.recovery_id])
            .await?;
        if originals.is_empty() {
            info!("No alert matches recovery event, discarding");
            return Ok(());
        }

        for original in &originals {
            let Some(mut fp) = self
                .repos
                .fault_points
                .find_by_event_id(original.event_id)
                .await?
            else {
                debug!(original_event_id = original.event_id, "Alert has no fault point");
                continue;
            };

            if fp.is_active() {
                fp.absorb_recovery(event, Utc::now());
                self.repos.fault_points.upsert(&fp).await?;
                info!(
                    fault_id = fp.fault_id,
                    recovered_at = ?fp.fault_recovery_time,
                    "Fault point recovered"
                );
            } else {
                debug!(fault_id = fp.fault_id, status = ?fp.fault_status, "Fault point already terminal");
            }

            self.repos
                .raw_events
                .update_fault_id(&[event.event_id], fp.fault_id)
                .await?;
            if fp.problem_id != 0 {
                if let Err(e) = self
                    .repos
                    .raw_events
                    .update_problem_id(&[event.event_id], fp.problem_id)
                    .await
                {
                    warn!(problem_id = fp.problem_id, error = %e, "Failed to link recovery event to problem");
                }
            }

            self.problems.handle_fault_point_recovered(fp.fault_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FaultPointHandler for FaultPointStage {
    async fn handle_event(&self, event: &RawEvent) -> Result<()> {
        if event.is_recovery() {
            self.handle_recovery(event).await
        } else {
            self.handle_alert(event).await
        }
    }
}

#[async_trait]
impl Sweeper for FaultPointStage {
    fn kind(&self) -> &'static str {
        "fault_point"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let expiration = self.expiration();
        if !expiration.enabled {
            debug!("Fault point expiration disabled");
            return Ok(0);
        }
        let threshold = now - chrono_duration(expiration.expiration_time);
        let stale = self.repos.fault_points.find_expired_occurred(threshold).await?;

        let mut expired = 0;
        for fp in &stale {
            match self.repos.fault_points.make_expired(fp.fault_id).await {
                Ok(true) => expired += 1,
                Ok(false) => debug!(fault_id = fp.fault_id, "Fault point vanished before expiry"),
                Err(e) => warn!(fault_id = fp.fault_id, error = %e, "Failed to expire fault point"),
            }
        }
        if !stale.is_empty() {
            info!(candidates = stale.len(), expired, "Fault points expired");
        }
        Ok(expired + self.reconcile_duplicates(threshold, now).await?)
    }
}
