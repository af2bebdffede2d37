use super::types::{EventStatus, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One delivered alert after standardization.
///
/// `fault_id` and `problem_id` are zero until the event has been converged
/// into a fault point and a problem respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: u64,
    /// Upstream id of the alert this event recovers (recovery events only)
    #[serde(default)]
    pub recovery_id: u64,
    /// Upstream alert id
    pub event_provider_id: u64,
    /// Ingestion time
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub event_title: String,
    #[serde(default)]
    pub event_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_occur_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_recovery_time: Option<DateTime<Utc>>,
    /// Failure mode tag
    pub event_type: String,
    pub event_status: EventStatus,
    pub event_level: Severity,
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub entity_object_name: String,
    #[serde(default)]
    pub entity_object_class: String,
    #[serde(default)]
    pub entity_object_id: String,
    #[serde(default)]
    pub entity_object_ip: String,
    #[serde(default)]
    pub entity_object_port: String,
    #[serde(default)]
    pub entity_object_mac: String,
    #[serde(default)]
    pub raw_event_msg: String,
    #[serde(default)]
    pub problem_id: u64,
    #[serde(default)]
    pub fault_id: u64,
}

impl RawEvent {
    /// The instant the alert describes: occur time when known, else ingestion time.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.event_occur_time.unwrap_or(self.event_timestamp)
    }

    pub fn is_recovery(&self) -> bool {
        self.event_status == EventStatus::Recovered
    }
}

/// Message published on the problem-events stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemEvent {
    pub problem_id: u64,
}
