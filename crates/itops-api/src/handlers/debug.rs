//! Trace of how a problem was assembled.
//!
//! - GET /debug/problem/:problem_id/tree

use crate::handlers::parse_problem_id;
use crate::handlers::problems::load_problem;
use crate::{ApiError, ApiState};
use axum::extract::{Path, State};
use axum::Json;
use itops_core::model::{FaultPointObject, Problem, ProblemStatus, RawEvent, Severity};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
pub struct TreeStatistics {
    pub problem_id: u64,
    pub fault_count: usize,
    pub event_count: usize,
    pub problem_status: ProblemStatus,
    pub problem_level: Severity,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemTree {
    pub problem: Problem,
    pub fault_points: Vec<FaultPointObject>,
    pub events: Vec<RawEvent>,
    pub statistics: TreeStatistics,
    /// Event intake, convergence, correlation and, once known, root cause
    pub trace_path: Vec<Value>,
}

fn trace_path(problem: &Problem, fault_points: &[FaultPointObject], events: &[RawEvent]) -> Vec<Value> {
    let mut steps = vec![
        json!({
            "step": 1,
            "stage": "事件接收",
            "description": format!("接收到 {} 个原始事件", events.len()),
            "event_ids": events.iter().map(|e| e.event_id).collect::<Vec<_>>(),
        }),
        json!({
            "step": 2,
            "stage": "故障点收敛",
            "description": format!("收敛为 {} 个故障点", fault_points.len()),
            "fault_ids": fault_points.iter().map(|fp| fp.fault_id).collect::<Vec<_>>(),
        }),
        json!({
            "step": 3,
            "stage": "问题关联",
            "description": format!("关联到问题 {}", problem.problem_id),
            "problem_id": problem.problem_id,
            "status": problem.problem_status,
        }),
    ];
    if !problem.root_cause_object_id.is_empty() {
        steps.push(json!({
            "step": 4,
            "stage": "根因分析",
            "description": "已识别根因对象",
            "root_cause_object": problem.root_cause_object_id,
            "root_cause_fault_id": problem.root_cause_fault_id,
        }));
    }
    steps
}

/// GET /debug/problem/:problem_id/tree
#[instrument(skip(state), fields(service = "api"))]
pub async fn problem_tree(
    State(state): State<Arc<ApiState>>,
    Path(problem_id): Path<String>,
) -> Result<Json<ProblemTree>, ApiError> {
    let problem_id = parse_problem_id(&problem_id)?;
    let problem = load_problem(&state, problem_id).await?;
    let fault_points = state.repos.fault_points.query_by_ids(&problem.relation_ids).await?;
    let events = state.repos.raw_events.query_by_ids(&problem.relation_event_ids).await?;

    let statistics = TreeStatistics {
        problem_id,
        fault_count: fault_points.len(),
        event_count: events.len(),
        problem_status: problem.problem_status,
        problem_level: problem.problem_level,
        duration_seconds: problem.problem_duration,
    };
    let trace_path = trace_path(&problem, &fault_points, &events);
    Ok(Json(ProblemTree {
        problem,
        fault_points,
        events,
        statistics,
        trace_path,
    }))
}
