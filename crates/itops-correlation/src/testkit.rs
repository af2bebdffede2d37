//! Shared fixtures for stage and scenario tests.

use crate::{FaultPointStage, IngestStage, ProblemStage};
use async_trait::async_trait;
use chrono::Utc;
use itops_core::config::{Config, ConfigManager};
use itops_core::idgen::{IdGenerator, SequenceIdGenerator};
use itops_core::model::{EventStatus, FaultPointObject, Problem, RawEvent, Severity};
use itops_ingestion::standardizer::ZabbixWebhookStandardizer;
use itops_ingestion::{MessagePublisher, StaticObjects, StreamError};
use itops_platform::graph::{InMemoryGraph, SpatialChecker};
use itops_storage::Repositories;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const CLASS: &str = "Server";

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1_000);

/// Keeps every published `(key, value)`
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub(crate) fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.messages.lock())
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        self.messages
            .lock()
            .push((String::from_utf8_lossy(key).into_owned(), value.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        Ok(())
    }
}

/// `srv-A -- srv-B -- srv-C`, plus `srv-D` with no neighbours
pub(crate) fn topology() -> InMemoryGraph {
    InMemoryGraph::new()
        .with_node("srv-A", CLASS, "host-A")
        .with_node("srv-B", CLASS, "host-B")
        .with_node("srv-C", CLASS, "host-C")
        .with_node("srv-D", CLASS, "host-D")
        .with_edge("depends_on", "srv-A", "srv-B")
        .with_edge("depends_on", "srv-B", "srv-C")
}

pub(crate) fn config_manager(enabled: bool, fault_point_secs: u64, problem_secs: u64) -> Arc<ConfigManager> {
    let mut config = Config::default();
    config.app_config.fault_point.expiration.enabled = enabled;
    config.app_config.fault_point.expiration.expiration_time = Duration::from_secs(fault_point_secs);
    config.app_config.problem.expiration.enabled = enabled;
    config.app_config.problem.expiration.expiration_time = Duration::from_secs(problem_secs);
    ConfigManager::with_config(PathBuf::from("/nonexistent/itops/config.yaml"), config).unwrap()
}

/// All three stages over in-memory repositories
#[derive(Debug)]
pub(crate) struct Pipeline {
    pub(crate) repos: Repositories,
    pub(crate) published: Arc<RecordingPublisher>,
    pub(crate) problems: Arc<ProblemStage>,
    pub(crate) fault_points: Arc<FaultPointStage>,
    pub(crate) ingest: IngestStage,
}

impl Pipeline {
    /// Fault points expire after 1h, problems after 2h
    pub(crate) fn new() -> Self {
        Self::with_expirations(true, 3600, 7200)
    }

    pub(crate) fn with_expirations(enabled: bool, fault_point_secs: u64, problem_secs: u64) -> Self {
        let repos = Repositories::in_memory();
        let ids: Arc<dyn IdGenerator> = Arc::new(SequenceIdGenerator::new());
        let config = config_manager(enabled, fault_point_secs, problem_secs);
        let published = Arc::new(RecordingPublisher::default());

        let problems = Arc::new(ProblemStage::new(
            repos.clone(),
            ids.clone(),
            config.clone(),
            SpatialChecker::new(Arc::new(topology())),
            published.clone(),
        ));
        let fault_points = Arc::new(FaultPointStage::new(
            repos.clone(),
            ids.clone(),
            config,
            problems.clone(),
        ));
        let objects = StaticObjects::new()
            .with("host-A", CLASS, "srv-A")
            .with("host-B", CLASS, "srv-B")
            .with("host-C", CLASS, "srv-C");
        let ingest = IngestStage::new(
            Arc::new(ZabbixWebhookStandardizer::new(ids, Arc::new(objects))),
            repos.raw_events.clone(),
            fault_points.clone(),
        );

        Self {
            repos,
            published,
            problems,
            fault_points,
            ingest,
        }
    }

    pub(crate) async fn fault_point(&self, fault_id: u64) -> FaultPointObject {
        self.repos
            .fault_points
            .query_by_ids(&[fault_id])
            .await
            .unwrap()
            .pop()
            .unwrap()
    }

    pub(crate) async fn problem(&self, problem_id: u64) -> Problem {
        self.repos
            .problems
            .query_by_ids(&[problem_id])
            .await
            .unwrap()
            .pop()
            .unwrap()
    }
}

/// Alert on `entity` stamped now
pub(crate) fn event_on(entity: &str, fault_mode: &str, provider_id: u64) -> RawEvent {
    let now = Utc::now();
    RawEvent {
        event_id: NEXT_EVENT_ID.fetch_add(1, Ordering::SeqCst),
        recovery_id: 0,
        event_provider_id: provider_id,
        event_timestamp: now,
        event_title: format!("{fault_mode} on {entity}"),
        event_content: String::new(),
        event_occur_time: Some(now),
        event_recovery_time: None,
        event_type: fault_mode.to_string(),
        event_status: EventStatus::Occurred,
        event_level: Severity::Major,
        event_source: "test".to_string(),
        entity_object_name: entity.to_string(),
        entity_object_class: CLASS.to_string(),
        entity_object_id: entity.to_string(),
        entity_object_ip: String::new(),
        entity_object_port: String::new(),
        entity_object_mac: String::new(),
        raw_event_msg: String::new(),
        problem_id: 0,
        fault_id: 0,
    }
}

/// Zabbix webhook body on `host`. Recoveries carry `recovery_id` and a
/// 12:30 recovery time; alerts occur at 12:00.
pub(crate) fn zabbix_payload(host: &str, status: &str, event_id: u64, recovery_id: u64) -> String {
    let (severity, recovery_time, recovery_id) = if recovery_id == 0 {
        ("High", "", String::new())
    } else {
        ("Information", "2025-01-01 12:30:00", recovery_id.to_string())
    };
    serde_json::json!({
        "timestamp": "1735732800",
        "description": "CPU使用率过高",
        "event_id": event_id.to_string(),
        "recovery_id": recovery_id,
        "event_name": "CPU告警",
        "occur_time": "2025-01-01 12:00:00",
        "recovery_time": recovery_time,
        "event_severity": severity,
        "event_status": status,
        "entity_object_name": host,
        "ip": "192.168.1.100",
        "item_key": "system.cpu.util",
        "item_name": "CPU utilization",
        "item_value": "95%"
    })
    .to_string()
}
