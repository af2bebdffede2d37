//! Delivery of finished RCA runs back to the problem stage.

use async_trait::async_trait;
use itops_core::model::RcaCallback;
use itops_core::{Error, Result};
use itops_correlation::ProblemHandler;
use reqwest::StatusCode;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Route of the callback endpoint under the API base URL
pub const CALLBACK_PATH: &str = "/api/itops-alert-analysis/v1/problems/rca-callback";

/// Destination for RCA results
#[async_trait]
pub trait CallbackSink: Send + Sync + Debug {
    async fn deliver(&self, callback: &RcaCallback) -> Result<()>;
}

/// Hands callbacks straight to the problem stage
#[derive(Debug, Clone)]
pub struct InProcessSink {
    problems: Arc<dyn ProblemHandler>,
}

impl InProcessSink {
    pub fn new(problems: Arc<dyn ProblemHandler>) -> Self {
        Self { problems }
    }
}

#[async_trait]
impl CallbackSink for InProcessSink {
    async fn deliver(&self, callback: &RcaCallback) -> Result<()> {
        self.problems.handle_rca_callback(callback).await
    }
}

/// POSTs callbacks to a running API
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("callback client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}{CALLBACK_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CallbackSink for HttpSink {
    async fn deliver(&self, callback: &RcaCallback) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(callback)
            .send()
            .await
            .map_err(|e| Error::dependency(format!("rca callback: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(problem_id = callback.problem_id, "RCA callback delivered");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::not_found(format!("problem {}: {body}", callback.problem_id)),
            StatusCode::BAD_REQUEST => Error::validation(format!("rca callback rejected: {body}")),
            other => Error::dependency(format!("rca callback returned {other}: {body}")),
        })
    }
}
