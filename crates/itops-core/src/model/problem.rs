use super::fault::FaultPointObject;
use super::push_unique;
use super::types::{CloseType, ProblemStatus, RcaStatus, Severity};
use crate::timex::seconds_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Close notes prefix written on problems merged into another.
pub const MERGED_NOTES_PREFIX: &str = "合并到问题";

/// Aggregated incident spanning one or more fault points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: u64,
    #[serde(default)]
    pub problem_name: String,
    pub problem_create_timestamp: DateTime<Utc>,
    pub problem_update_time: DateTime<Utc>,
    pub problem_occur_time: DateTime<Utc>,
    pub problem_latest_time: DateTime<Utc>,
    /// Seconds between occur and latest time
    #[serde(default)]
    pub problem_duration: u64,
    #[serde(default)]
    pub problem_description: String,
    pub problem_status: ProblemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_close_type: Option<CloseType>,
    #[serde(default)]
    pub problem_close_notes: String,
    #[serde(default)]
    pub problem_closed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_close_time: Option<DateTime<Utc>>,
    pub problem_level: Severity,
    #[serde(default)]
    pub affected_entity_ids: Vec<String>,
    /// Fault point ids
    #[serde(rename = "relation_fp_ids", default)]
    pub relation_ids: Vec<u64>,
    #[serde(default)]
    pub relation_event_ids: Vec<u64>,
    #[serde(default)]
    pub root_cause_object_id: String,
    #[serde(default)]
    pub root_cause_fault_id: u64,
    /// Serialized RCA context
    #[serde(default)]
    pub rca_results: String,
    #[serde(default)]
    pub rca_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rca_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rca_status: Option<RcaStatus>,
    /// Surviving problem id once this one has been merged away
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_merged_into: Option<u64>,
}

impl Problem {
    /// Open a new problem whose sole content is `fp`.
    pub fn open(problem_id: u64, fp: &FaultPointObject, now: DateTime<Utc>) -> Self {
        let mut problem = Self {
            problem_id,
            problem_name: fp.fault_name.clone(),
            problem_create_timestamp: now,
            problem_update_time: now,
            problem_occur_time: fp.fault_occur_time,
            problem_latest_time: fp.fault_latest_time,
            problem_duration: 0,
            problem_description: String::new(),
            problem_status: ProblemStatus::Open,
            problem_close_type: None,
            problem_close_notes: String::new(),
            problem_closed_by: String::new(),
            problem_close_time: None,
            problem_level: fp.fault_level,
            affected_entity_ids: vec![fp.entity_object_id.clone()],
            relation_ids: vec![fp.fault_id],
            relation_event_ids: fp.relation_event_ids.clone(),
            root_cause_object_id: String::new(),
            root_cause_fault_id: 0,
            rca_results: String::new(),
            rca_start_time: None,
            rca_end_time: None,
            rca_status: Some(RcaStatus::Pending),
            problem_merged_into: None,
        };
        problem.refresh_duration();
        problem
    }

    /// Union another problem's content into this one.
    pub fn absorb_problem(&mut self, other: &Problem) {
        for id in &other.relation_ids {
            push_unique(&mut self.relation_ids, *id);
        }
        for id in &other.relation_event_ids {
            push_unique(&mut self.relation_event_ids, *id);
        }
        for entity in &other.affected_entity_ids {
            push_unique(&mut self.affected_entity_ids, entity.clone());
        }
        if other.problem_occur_time < self.problem_occur_time {
            self.problem_occur_time = other.problem_occur_time;
        }
        if other.problem_latest_time > self.problem_latest_time {
            self.problem_latest_time = other.problem_latest_time;
        }
        self.problem_level = self.problem_level.min(other.problem_level);
    }

    /// Fold a fault point into this problem.
    pub fn absorb_fault_point(&mut self, fp: &FaultPointObject) {
        push_unique(&mut self.relation_ids, fp.fault_id);
        for id in &fp.relation_event_ids {
            push_unique(&mut self.relation_event_ids, *id);
        }
        push_unique(&mut self.affected_entity_ids, fp.entity_object_id.clone());
        if fp.fault_occur_time < self.problem_occur_time {
            self.problem_occur_time = fp.fault_occur_time;
        }
        if fp.fault_latest_time > self.problem_latest_time {
            self.problem_latest_time = fp.fault_latest_time;
        }
        self.problem_level = self.problem_level.min(fp.fault_level);
    }

    pub fn refresh_duration(&mut self) {
        self.problem_duration =
            seconds_between(self.problem_occur_time, self.problem_latest_time) as u64;
    }

    pub fn is_open(&self) -> bool {
        self.problem_status == ProblemStatus::Open
    }

    pub fn merged_notes(main_id: u64) -> String {
        format!("{MERGED_NOTES_PREFIX}{main_id}")
    }
}

/// RCA outcome delivered back to the problem stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaCallback {
    pub problem_id: u64,
    #[serde(default)]
    pub root_cause_object_id: String,
    #[serde(default)]
    pub root_cause_fault_id: u64,
    /// JSON string of the RCA results
    #[serde(default)]
    pub rca_results: String,
    pub rca_start_time: DateTime<Utc>,
    pub rca_end_time: DateTime<Utc>,
    pub rca_status: RcaStatus,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub problem_name: String,
    #[serde(default)]
    pub problem_description: String,
}
