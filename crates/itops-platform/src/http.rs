//! HTTP plumbing shared by the graph and agent clients.

use crate::error::HttpFailure;
use itops_core::config::{ConfigManager, PlatformConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const USER_AGENT: &str = "itops-alert-analysis";

/// Source of the credentials and knowledge network id. Both may change at
/// runtime when the business config is refreshed.
pub trait Credentials: Send + Sync + Debug {
    /// Value of the `Authorization` header
    fn authorization(&self) -> String;

    fn knowledge_id(&self) -> String;
}

impl Credentials for ConfigManager {
    fn authorization(&self) -> String {
        self.snapshot().app_config.credentials.authorization.clone()
    }

    fn knowledge_id(&self) -> String {
        self.snapshot().app_config.knowledge_network.knowledge_id.clone()
    }
}

/// Fixed credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub authorization: String,
    pub knowledge_id: String,
}

impl StaticCredentials {
    pub fn new(authorization: impl Into<String>, knowledge_id: impl Into<String>) -> Self {
        Self {
            authorization: authorization.into(),
            knowledge_id: knowledge_id.into(),
        }
    }
}

impl Credentials for StaticCredentials {
    fn authorization(&self) -> String {
        self.authorization.clone()
    }

    fn knowledge_id(&self) -> String {
        self.knowledge_id.clone()
    }
}

/// Base URL, pooled client and credentials
#[derive(Debug, Clone)]
pub struct PlatformHttp {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn Credentials>,
}

impl PlatformHttp {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        insecure_skip_verify: bool,
        credentials: Arc<dyn Credentials>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    pub fn from_config(
        config: &PlatformConfig,
        credentials: Arc<dyn Credentials>,
    ) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.base_url,
            config.timeout,
            config.insecure_skip_verify,
            credentials,
        )
    }

    pub fn credentials(&self) -> &Arc<dyn Credentials> {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body with the method override header set to GET, as the
    /// query APIs expect.
    pub(crate) async fn query<B, T>(&self, path: &str, body: &B) -> Result<T, HttpFailure>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self
            .client
            .post(self.url(path))
            .header("x-http-method-override", "GET")
            .header("authorization", self.credentials.authorization())
            .json(body);
        self.execute(builder).await
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, HttpFailure>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self
            .client
            .post(self.url(path))
            .header("Authorization", self.credentials.authorization())
            .header("Content-Type", "application/json")
            .json(body);
        self.execute(builder).await
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpFailure> {
        let builder = self
            .client
            .get(self.url(path))
            .header("authorization", self.credentials.authorization());
        self.execute(builder).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, HttpFailure> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpFailure::Timeout
            } else {
                HttpFailure::Connection(e.to_string())
            }
        })?;

        match response.status().as_u16() {
            200 | 201 => response
                .json()
                .await
                .map_err(|e| HttpFailure::Decode(e.to_string())),
            401 | 403 => {
                error!("Platform authentication failed");
                let body = response.text().await.unwrap_or_default();
                Err(HttpFailure::Authentication(body))
            }
            429 => {
                warn!("Rate limited by platform");
                Err(HttpFailure::RateLimited)
            }
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(HttpFailure::InvalidRequest(body))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!(status, body = %body, "Platform error");
                Err(HttpFailure::Status(status, body))
            }
        }
    }
}
