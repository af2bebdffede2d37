//! API route definitions.
//!
//! Everything is nested under [`BASE_PATH`]:
//!
//! ## Events
//! - `POST /events` - Webhook intake
//! - `GET /events/info/:event_ids` - Raw events by id
//!
//! ## Fault points and problems
//! - `GET /fault-points/info/:fault_ids`
//! - `GET /problems/info/:problem_ids`
//! - `POST /problems/:problem_id/close` - Manual close
//! - `POST /problems/:problem_id/root-cause` - Manual root cause
//! - `POST /problems/rca-callback` - RCA results
//!
//! ## Infrastructure
//! - `GET /debug/problem/:problem_id/tree`
//! - `GET /health`

use crate::handlers::{debug::*, events::*, health::*, problems::*, query::*};
use crate::ApiState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use itops_core::config::ApiConfig;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Prefix of every route
pub const BASE_PATH: &str = "/api/itops-alert-analysis/v1";

/// Create the API router
pub fn create_router(state: ApiState, config: &ApiConfig) -> Router {
    let state = Arc::new(state);

    let api = Router::new()
        .route("/events", post(ingest_events))
        .route("/events/info/:event_ids", get(get_events))
        .route("/fault-points/info/:fault_ids", get(get_fault_points))
        .route("/problems/info/:problem_ids", get(get_problems))
        .route("/problems/rca-callback", post(rca_callback))
        .route("/problems/:problem_id/close", post(close_problem))
        .route("/problems/:problem_id/root-cause", post(update_root_cause))
        .route("/debug/problem/:problem_id/tree", get(problem_tree))
        .route("/health", get(health))
        .with_state(state);

    Router::new()
        .nest(BASE_PATH, api)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
}
