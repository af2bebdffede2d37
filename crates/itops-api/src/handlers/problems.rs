//! Problem lifecycle endpoints.
//!
//! - POST /problems/:problem_id/close - Manual close of an open problem
//! - POST /problems/:problem_id/root-cause - Manual root cause
//! - POST /problems/rca-callback - Results of an RCA run

use crate::handlers::parse_problem_id;
use crate::{ApiError, ApiState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use itops_core::model::{CloseType, Problem, ProblemStatus, RcaCallback};
use itops_correlation::ProblemHandler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CloseProblemRequest {
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub closed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseProblemResponse {
    pub problem_id: u64,
    pub status: String,
    pub events_closed: usize,
    pub faults_closed: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootCauseRequest {
    #[serde(default)]
    pub root_cause_object_id: String,
    #[serde(default)]
    pub root_cause_fault_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseResponse {
    pub problem_id: u64,
    pub root_cause_object_id: String,
    pub root_cause_fault_id: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaCallbackResponse {
    pub problem_id: u64,
    pub status: String,
}

// =============================================================================
// HANDLERS
// =============================================================================

const PROBLEM_MISSING: &str = "问题不存在";

pub(crate) async fn load_problem(state: &ApiState, problem_id: u64) -> Result<Problem, ApiError> {
    state
        .repos
        .problems
        .query_by_ids(&[problem_id])
        .await?
        .pop()
        .ok_or_else(|| ApiError::NotFound(PROBLEM_MISSING.to_string()))
}

fn missing_problem(err: itops_core::Error) -> ApiError {
    match err {
        itops_core::Error::NotFound(_) => ApiError::NotFound(PROBLEM_MISSING.to_string()),
        other => other.into(),
    }
}

/// POST /problems/:problem_id/close
#[instrument(skip(state, payload), fields(service = "api"))]
pub async fn close_problem(
    State(state): State<Arc<ApiState>>,
    Path(problem_id): Path<String>,
    payload: Result<Json<CloseProblemRequest>, JsonRejection>,
) -> Result<Json<CloseProblemResponse>, ApiError> {
    let problem_id = parse_problem_id(&problem_id)?;
    let Json(request) = payload.map_err(ApiError::invalid_body)?;
    if request.closed_by.trim().is_empty() {
        return Err(ApiError::BadRequest("请求参数验证失败: closed_by 不能为空".to_string()));
    }

    let problem = load_problem(&state, problem_id).await?;
    if !problem.is_open() {
        return Err(ApiError::BadRequest(format!(
            "问题状态为 {}，不允许关闭",
            problem.problem_status.as_str()
        )));
    }

    state
        .problems
        .close_problem(
            problem_id,
            CloseType::Manual,
            ProblemStatus::Closed,
            &request.notes,
            &request.closed_by,
        )
        .await
        .map_err(missing_problem)?;
    info!(problem_id, closed_by = %request.closed_by, "Problem closed by hand");

    Ok(Json(CloseProblemResponse {
        problem_id,
        status: "closed".to_string(),
        events_closed: problem.relation_event_ids.len(),
        faults_closed: problem.relation_ids.len(),
    }))
}

/// POST /problems/:problem_id/root-cause
#[instrument(skip(state, payload), fields(service = "api"))]
pub async fn update_root_cause(
    State(state): State<Arc<ApiState>>,
    Path(problem_id): Path<String>,
    payload: Result<Json<RootCauseRequest>, JsonRejection>,
) -> Result<Json<RootCauseResponse>, ApiError> {
    let problem_id = parse_problem_id(&problem_id)?;
    let Json(request) = payload.map_err(ApiError::invalid_body)?;
    if request.root_cause_object_id.trim().is_empty() || request.root_cause_fault_id == 0 {
        return Err(ApiError::BadRequest(
            "请求参数验证失败: root_cause_object_id 与 root_cause_fault_id 不能为空".to_string(),
        ));
    }

    state
        .problems
        .override_root_cause(problem_id, &request.root_cause_object_id, request.root_cause_fault_id)
        .await
        .map_err(missing_problem)?;

    Ok(Json(RootCauseResponse {
        problem_id,
        root_cause_object_id: request.root_cause_object_id,
        root_cause_fault_id: request.root_cause_fault_id,
        status: "updated".to_string(),
    }))
}

/// POST /problems/rca-callback
///
/// 404 when the problem is gone, 400 for a non-success final status.
#[instrument(skip(state, payload), fields(service = "api"))]
pub async fn rca_callback(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<RcaCallback>, JsonRejection>,
) -> Result<Json<RcaCallbackResponse>, ApiError> {
    let Json(callback) = payload.map_err(ApiError::invalid_body)?;
    if callback.problem_id == 0 {
        return Err(ApiError::BadRequest("problem_id 必须是有效的数字".to_string()));
    }

    state
        .problems
        .handle_rca_callback(&callback)
        .await
        .map_err(missing_problem)?;

    Ok(Json(RcaCallbackResponse {
        problem_id: callback.problem_id,
        status: "accepted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::testkit::{noon, Harness};
    use axum::http::{Method, StatusCode};
    use chrono::Duration;
    use itops_core::model::{CloseType, ProblemStatus, RcaCallback, RcaStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_close_open_problem() {
        let h = Harness::new();
        h.seed().await;

        let body = json!({"notes": "误报", "closed_by": "ops"}).to_string();
        let (status, json) = h.send(Method::POST, "/problems/10/close", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "closed");
        assert_eq!(json["events_closed"], 3);
        assert_eq!(json["faults_closed"], 2);

        let problem = h.problem(10).await;
        assert_eq!(problem.problem_status, ProblemStatus::Closed);
        assert_eq!(problem.problem_close_type, Some(CloseType::Manual));
        assert_eq!(problem.problem_closed_by, "ops");
        assert_eq!(problem.problem_close_notes, "误报");

        // Second close: no longer open
        let (status, json) = h.send(Method::POST, "/problems/10/close", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "问题状态为 1，不允许关闭");
    }

    #[tokio::test]
    async fn test_close_validates_input() {
        let h = Harness::new();
        h.seed().await;

        let (status, json) = h.send(Method::POST, "/problems/0/close", Some(r#"{"closed_by":"ops"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "problem_id 必须是有效的数字");

        let (status, json) = h.send(Method::POST, "/problems/10/close", Some(r#"{"notes":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("请求参数验证失败"));

        let (status, _) = h.send(Method::POST, "/problems/10/close", Some("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = h.send(Method::POST, "/problems/99/close", Some(r#"{"closed_by":"ops"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "问题不存在");
    }

    #[tokio::test]
    async fn test_root_cause_override() {
        let h = Harness::new();
        h.seed().await;

        let body = json!({"root_cause_object_id": "srv-A", "root_cause_fault_id": 2}).to_string();
        let (status, json) = h.send(Method::POST, "/problems/10/root-cause", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "updated");
        let problem = h.problem(10).await;
        assert_eq!(problem.root_cause_object_id, "srv-A");
        assert_eq!(problem.root_cause_fault_id, 2);

        let (status, _) = h.send(Method::POST, "/problems/99/root-cause", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h
            .send(Method::POST, "/problems/10/root-cause", Some(r#"{"root_cause_object_id":"srv-A"}"#))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn callback(problem_id: u64, rca_status: RcaStatus) -> RcaCallback {
        RcaCallback {
            problem_id,
            root_cause_object_id: "srv-A".into(),
            root_cause_fault_id: 1,
            rca_results: "{}".into(),
            rca_start_time: noon(),
            rca_end_time: noon() + Duration::seconds(30),
            rca_status,
            in_progress: false,
            problem_name: "CPU 过载".into(),
            problem_description: "srv-A CPU 持续过载".into(),
        }
    }

    #[tokio::test]
    async fn test_rca_callback_is_applied() {
        let h = Harness::new();
        h.seed().await;

        let body = serde_json::to_string(&callback(10, RcaStatus::Success)).unwrap();
        let (status, json) = h.send(Method::POST, "/problems/rca-callback", Some(body.as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["problem_id"], 10);

        let problem = h.problem(10).await;
        assert_eq!(problem.root_cause_fault_id, 1);
        assert_eq!(problem.rca_status, Some(RcaStatus::Success));
        assert_eq!(problem.problem_name, "CPU 过载");
    }

    #[tokio::test]
    async fn test_rca_callback_rejections() {
        let h = Harness::new();
        h.seed().await;

        let missing = serde_json::to_string(&callback(99, RcaStatus::Success)).unwrap();
        let (status, _) = h.send(Method::POST, "/problems/rca-callback", Some(missing.as_str())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let failed = serde_json::to_string(&callback(10, RcaStatus::Failed)).unwrap();
        let (status, _) = h.send(Method::POST, "/problems/rca-callback", Some(failed.as_str())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.problem(10).await.root_cause_fault_id, 0);
    }
}
