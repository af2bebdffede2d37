//! Webhook intake.
//!
//! - POST /events - Publish a raw alert body onto the raw events topic

use crate::{ApiError, ApiState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Acknowledgement of a published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub status: String,
    /// Message key, the intake time in nanoseconds
    pub key: String,
}

// =============================================================================
// HANDLER
// =============================================================================

/// POST /events
///
/// The body is published untouched; standardization happens in the ingest
/// stage. Returns 202 once the broker has the message.
#[instrument(skip(state, body), fields(service = "api", bytes = body.len()))]
pub async fn ingest_events(State(state): State<Arc<ApiState>>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("请求体不能为空".to_string()));
    }

    let key = Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string();
    if let Err(e) = state.publisher.publish(key.as_bytes(), &body).await {
        error!(error = %e, "Failed to publish raw event");
        metrics::counter!("itops_api_events_total", "outcome" => "failed").increment(1);
        return Err(ApiError::Internal(format!("发布事件失败: {e}")));
    }
    metrics::counter!("itops_api_events_total", "outcome" => "accepted").increment(1);
    debug!(key, "Raw event accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            status: "accepted".to_string(),
            key,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use axum::http::Method;

    #[tokio::test]
    async fn test_event_is_published() {
        let h = Harness::new();
        let body = r#"{"eventid":"1","status":"PROBLEM"}"#;
        let (status, json) = h.send(Method::POST, "/events", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "accepted");

        let published = h.raw_events.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, json["key"].as_str().unwrap());
        assert_eq!(published[0].1, body.as_bytes());
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let h = Harness::new();
        let (status, json) = h.send(Method::POST, "/events", Some("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "请求体不能为空");
        assert!(h.raw_events.take().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let h = Harness::with_body_limit(16);
        let (status, _) = h.send(Method::POST, "/events", Some("x".repeat(64).as_str())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.raw_events.take().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_internal_error() {
        let h = Harness::new();
        h.raw_events.fail_next();
        let (status, json) = h.send(Method::POST, "/events", Some("{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().starts_with("发布事件失败"));
    }
}
