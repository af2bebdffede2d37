//! Shared fixtures for analysis and engine tests.

use crate::callback::CallbackSink;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use itops_core::model::{
    FaultPointObject, FaultStatus, Occurrence, Problem, RcaCallback, Severity,
};
use itops_core::Result;
use itops_platform::agent::{AgentApi, CausalEdge};
use itops_platform::graph::InMemoryGraph;
use itops_platform::AgentError;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;

pub(crate) const CLASS: &str = "host";

/// `srv-A -> srv-B -> srv-C`, plus `srv-D` with no neighbours
pub(crate) fn topology() -> InMemoryGraph {
    InMemoryGraph::new()
        .with_node("srv-A", CLASS, "host-A")
        .with_node("srv-B", CLASS, "host-B")
        .with_node("srv-C", CLASS, "host-C")
        .with_node("srv-D", CLASS, "host-D")
        .with_edge("depends_on", "srv-A", "srv-B")
        .with_edge("depends_on", "srv-B", "srv-C")
}

pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// Active Major fault point on `entity`, occurring `minutes` after noon
pub(crate) fn fault_point(fault_id: u64, entity: &str, minutes: i64) -> FaultPointObject {
    let occur = noon() + Duration::minutes(minutes);
    FaultPointObject {
        fault_id,
        fault_name: format!("CPU告警 on {entity}"),
        fault_create_time: occur,
        fault_update_time: occur,
        fault_status: FaultStatus::Occurred,
        fault_occur_time: occur,
        fault_latest_time: occur,
        fault_duration_time: 0,
        fault_recovery_time: None,
        entity_object_class: CLASS.to_string(),
        entity_object_name: entity.to_string(),
        entity_object_id: entity.to_string(),
        relation_event_ids: vec![fault_id * 100],
        fault_mode: "system.cpu.util".to_string(),
        fault_level: Severity::Major,
        fault_description: String::new(),
        problem_id: 0,
    }
}

/// Open problem holding `fault_points`
pub(crate) fn problem_over(problem_id: u64, fault_points: &[FaultPointObject]) -> Problem {
    let mut problem = Problem::open(problem_id, &fault_points[0], noon());
    for fp in &fault_points[1..] {
        problem.absorb_fault_point(fp);
    }
    problem.refresh_duration();
    problem
}

/// Agent that replays scripted causal answers in order
#[derive(Debug, Default)]
pub(crate) struct ScriptedAgent {
    causal: Mutex<VecDeque<CausalEdge>>,
    summary: Mutex<Option<Occurrence>>,
    causal_calls: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedAgent {
    pub(crate) fn with_causal(edges: Vec<CausalEdge>) -> Self {
        Self {
            causal: Mutex::new(edges.into()),
            ..Default::default()
        }
    }

    pub(crate) fn with_summary(self, occurrence: Occurrence) -> Self {
        *self.summary.lock() = Some(occurrence);
        self
    }

    pub(crate) fn push_causal(&self, edge: CausalEdge) {
        self.causal.lock().push_back(edge);
    }

    pub(crate) fn causal_queries(&self) -> Vec<Map<String, Value>> {
        self.causal_calls.lock().clone()
    }
}

#[async_trait]
impl AgentApi for ScriptedAgent {
    async fn causal(&self, custom_querys: &Map<String, Value>) -> std::result::Result<CausalEdge, AgentError> {
        self.causal_calls.lock().push(custom_querys.clone());
        self.causal.lock().pop_front().ok_or(AgentError::EmptyAnswer)
    }

    async fn summary(&self, _custom_querys: &Map<String, Value>) -> std::result::Result<Occurrence, AgentError> {
        self.summary
            .lock()
            .clone()
            .ok_or_else(|| AgentError::NotConfigured("summary".into()))
    }
}

pub(crate) fn edge(source_id: u64, target_id: u64, confidence: f64) -> CausalEdge {
    CausalEdge {
        source_id,
        target_id,
        confidence,
        reason: format!("{source_id} overloads {target_id}"),
    }
}

/// Keeps every delivered callback
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    delivered: Mutex<Vec<RcaCallback>>,
}

impl RecordingSink {
    pub(crate) fn delivered(&self) -> Vec<RcaCallback> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn deliver(&self, callback: &RcaCallback) -> Result<()> {
        self.delivered.lock().push(callback.clone());
        Ok(())
    }
}
