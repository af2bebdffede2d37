use super::event::RawEvent;
use super::push_unique;
use super::types::{FaultStatus, Severity};
use crate::timex::seconds_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object class recorded for fault points in relation documents.
pub const FAULT_POINT_CLASS: &str = "fault_point_object";

/// Convergence state per `(entity_object_id, fault_mode)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPointObject {
    pub fault_id: u64,
    #[serde(default)]
    pub fault_name: String,
    pub fault_create_time: DateTime<Utc>,
    pub fault_update_time: DateTime<Utc>,
    pub fault_status: FaultStatus,
    pub fault_occur_time: DateTime<Utc>,
    pub fault_latest_time: DateTime<Utc>,
    /// Seconds between occur and latest time
    #[serde(default)]
    pub fault_duration_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_recovery_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity_object_class: String,
    #[serde(default)]
    pub entity_object_name: String,
    pub entity_object_id: String,
    #[serde(default)]
    pub relation_event_ids: Vec<u64>,
    pub fault_mode: String,
    pub fault_level: Severity,
    #[serde(default)]
    pub fault_description: String,
    #[serde(default)]
    pub problem_id: u64,
}

impl FaultPointObject {
    /// Open a new fault point from its first alert event.
    pub fn open(fault_id: u64, event: &RawEvent, now: DateTime<Utc>) -> Self {
        let occur = event.effective_time();
        let mut fp = Self {
            fault_id,
            fault_name: event.event_title.clone(),
            fault_create_time: now,
            fault_update_time: now,
            fault_status: FaultStatus::Occurred,
            fault_occur_time: occur,
            fault_latest_time: occur,
            fault_duration_time: 0,
            fault_recovery_time: None,
            entity_object_class: event.entity_object_class.clone(),
            entity_object_name: event.entity_object_name.clone(),
            entity_object_id: event.entity_object_id.clone(),
            relation_event_ids: vec![event.event_id],
            fault_mode: event.event_type.clone(),
            fault_level: event.event_level,
            fault_description: event.event_content.clone(),
            problem_id: 0,
        };
        fp.refresh_duration();
        fp
    }

    /// Fold a further alert event into this fault point.
    pub fn absorb_alert(&mut self, event: &RawEvent, now: DateTime<Utc>) {
        self.extend_latest(event.effective_time());
        push_unique(&mut self.relation_event_ids, event.event_id);
        self.fault_level = self.fault_level.min(event.event_level);
        self.fault_update_time = now;
        self.refresh_duration();
    }

    /// Fold a recovery event in and mark the fault point recovered.
    pub fn absorb_recovery(&mut self, event: &RawEvent, now: DateTime<Utc>) {
        let recovered_at = event.event_recovery_time.unwrap_or(now);
        self.extend_latest(recovered_at);
        push_unique(&mut self.relation_event_ids, event.event_id);
        self.fault_status = FaultStatus::Recovered;
        self.fault_recovery_time = Some(recovered_at);
        self.fault_update_time = now;
        self.refresh_duration();
    }

    /// Move `fault_latest_time` forward, never backwards.
    pub fn extend_latest(&mut self, at: DateTime<Utc>) {
        if at > self.fault_latest_time {
            self.fault_latest_time = at;
        }
    }

    pub fn refresh_duration(&mut self) {
        self.fault_duration_time = seconds_between(self.fault_occur_time, self.fault_latest_time);
    }

    pub fn is_active(&self) -> bool {
        self.fault_status == FaultStatus::Occurred
    }
}

/// Edge from an entity object to one of its fault points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPointRelation {
    pub relation_id: u64,
    pub relation_class: String,
    pub relation_create_time: DateTime<Utc>,
    pub relation_update_time: DateTime<Utc>,
    pub source_object_id: String,
    pub source_object_class: String,
    pub target_object_id: String,
    pub target_object_class: String,
}

impl FaultPointRelation {
    pub fn for_fault_point(relation_id: u64, fp: &FaultPointObject, now: DateTime<Utc>) -> Self {
        Self {
            relation_id,
            relation_class: fp.entity_object_class.clone(),
            relation_create_time: now,
            relation_update_time: now,
            source_object_id: fp.entity_object_id.clone(),
            source_object_class: fp.entity_object_class.clone(),
            target_object_id: fp.fault_id.to_string(),
            target_object_class: FAULT_POINT_CLASS.to_string(),
        }
    }
}
