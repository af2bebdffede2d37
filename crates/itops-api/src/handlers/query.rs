//! Lookups by id.
//!
//! - GET /events/info/:event_ids
//! - GET /fault-points/info/:fault_ids
//! - GET /problems/info/:problem_ids

use crate::handlers::parse_ids;
use crate::{ApiError, ApiState};
use axum::extract::{Path, State};
use axum::Json;
use itops_core::model::{FaultPointObject, Problem, RawEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// List envelope of the info endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

fn required_ids(raw: &str, name: &str) -> Result<Vec<u64>, ApiError> {
    let ids = parse_ids(raw);
    if ids.is_empty() {
        return Err(ApiError::BadRequest(format!("{name} 参数格式错误")));
    }
    Ok(ids)
}

/// GET /events/info/:event_ids
#[instrument(skip(state), fields(service = "api"))]
pub async fn get_events(
    State(state): State<Arc<ApiState>>,
    Path(event_ids): Path<String>,
) -> Result<Json<Items<RawEvent>>, ApiError> {
    let ids = required_ids(&event_ids, "event_ids")?;
    let items = state.repos.raw_events.query_by_ids(&ids).await?;
    Ok(Json(Items { items }))
}

/// GET /fault-points/info/:fault_ids
#[instrument(skip(state), fields(service = "api"))]
pub async fn get_fault_points(
    State(state): State<Arc<ApiState>>,
    Path(fault_ids): Path<String>,
) -> Result<Json<Items<FaultPointObject>>, ApiError> {
    let ids = required_ids(&fault_ids, "fault_ids")?;
    let items = state.repos.fault_points.query_by_ids(&ids).await?;
    Ok(Json(Items { items }))
}

/// GET /problems/info/:problem_ids
#[instrument(skip(state), fields(service = "api"))]
pub async fn get_problems(
    State(state): State<Arc<ApiState>>,
    Path(problem_ids): Path<String>,
) -> Result<Json<Items<Problem>>, ApiError> {
    let ids = required_ids(&problem_ids, "problem_ids")?;
    let items = state.repos.problems.query_by_ids(&ids).await?;
    Ok(Json(Items { items }))
}
