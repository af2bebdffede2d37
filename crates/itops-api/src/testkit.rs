//! Router harness over in-memory repositories.

use crate::{create_router, ApiState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use itops_core::config::{ApiConfig, Config, ConfigManager};
use itops_core::idgen::SequenceIdGenerator;
use itops_core::model::{EventStatus, FaultPointObject, FaultStatus, Problem, RawEvent, Severity};
use itops_correlation::ProblemStage;
use itops_ingestion::{MessagePublisher, StreamError};
use itops_platform::graph::{InMemoryGraph, SpatialChecker};
use itops_storage::Repositories;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Keeps every published `(key, value)`; can be told to fail once
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub(crate) fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(StreamError::Publish("broker down".into()));
        }
        self.messages
            .lock()
            .push((String::from_utf8_lossy(key).into_owned(), value.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        Ok(())
    }
}

pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn raw_event(event_id: u64) -> RawEvent {
    RawEvent {
        event_id,
        recovery_id: 0,
        event_provider_id: event_id + 10_000,
        event_timestamp: noon(),
        event_title: format!("CPU告警 {event_id}"),
        event_content: String::new(),
        event_occur_time: Some(noon()),
        event_recovery_time: None,
        event_type: "system.cpu.util".to_string(),
        event_status: EventStatus::Occurred,
        event_level: Severity::Major,
        event_source: "test".to_string(),
        entity_object_name: "srv-A".to_string(),
        entity_object_class: "host".to_string(),
        entity_object_id: "srv-A".to_string(),
        entity_object_ip: String::new(),
        entity_object_port: String::new(),
        entity_object_mac: String::new(),
        raw_event_msg: String::new(),
        problem_id: 10,
        fault_id: 0,
    }
}

pub(crate) fn fault_point(fault_id: u64, minutes: i64, event_ids: &[u64]) -> FaultPointObject {
    let occur = noon() + Duration::minutes(minutes);
    FaultPointObject {
        fault_id,
        fault_name: format!("CPU告警 {fault_id}"),
        fault_create_time: occur,
        fault_update_time: occur,
        fault_status: FaultStatus::Occurred,
        fault_occur_time: occur,
        fault_latest_time: occur,
        fault_duration_time: 0,
        fault_recovery_time: None,
        entity_object_class: "host".to_string(),
        entity_object_name: "srv-A".to_string(),
        entity_object_id: "srv-A".to_string(),
        relation_event_ids: event_ids.to_vec(),
        fault_mode: "system.cpu.util".to_string(),
        fault_level: Severity::Major,
        fault_description: String::new(),
        problem_id: 10,
    }
}

/// Problem 10 over fault points 1 and 2, events 100, 101 and 200
pub(crate) fn seeded_problem() -> (Problem, Vec<FaultPointObject>, Vec<RawEvent>) {
    let fps = vec![fault_point(1, 0, &[100, 101]), fault_point(2, 5, &[200])];
    let mut problem = Problem::open(10, &fps[0], noon());
    problem.absorb_fault_point(&fps[1]);
    problem.refresh_duration();
    let events = vec![raw_event(100), raw_event(101), raw_event(200)];
    (problem, fps, events)
}

pub(crate) struct Harness {
    pub(crate) repos: Repositories,
    pub(crate) raw_events: Arc<RecordingPublisher>,
    router: Router,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_api_config(ApiConfig::default())
    }

    pub(crate) fn with_body_limit(max_body_bytes: usize) -> Self {
        Self::with_api_config(ApiConfig {
            max_body_bytes,
            ..ApiConfig::default()
        })
    }

    fn with_api_config(api: ApiConfig) -> Self {
        let repos = Repositories::in_memory();
        let config = ConfigManager::with_config(PathBuf::from("/nonexistent/itops/config.yaml"), Config::default()).unwrap();
        let problems = Arc::new(ProblemStage::new(
            repos.clone(),
            Arc::new(SequenceIdGenerator::new()),
            config,
            SpatialChecker::new(Arc::new(InMemoryGraph::new())),
            Arc::new(RecordingPublisher::default()),
        ));
        let raw_events = Arc::new(RecordingPublisher::default());
        let state = ApiState::new(repos.clone(), problems, raw_events.clone());
        Self {
            repos,
            raw_events,
            router: create_router(state, &api),
        }
    }

    pub(crate) async fn seed(&self) -> Problem {
        let (problem, fps, events) = seeded_problem();
        for event in &events {
            self.repos.raw_events.upsert(event).await.unwrap();
        }
        for fp in &fps {
            self.repos.fault_points.upsert(fp).await.unwrap();
        }
        self.repos.problems.upsert(&problem).await.unwrap();
        problem
    }

    pub(crate) async fn problem(&self, problem_id: u64) -> Problem {
        self.repos.problems.query_by_ids(&[problem_id]).await.unwrap().pop().unwrap()
    }

    /// Send a request below the base path; non-JSON bodies come back as a
    /// JSON string
    pub(crate) async fn send(&self, method: Method, path: &str, body: Option<&str>) -> (StatusCode, Value) {
        let body = body.unwrap_or_default().to_string();
        let request = Request::builder()
            .method(method)
            .uri(format!("{}{path}", crate::BASE_PATH))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, json)
    }
}
