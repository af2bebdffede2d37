//! Service configuration.
//!
//! `config.yaml` carries deployment settings. Business tunables live in a
//! sibling `data/app_config.yaml` that may be rewritten at runtime by the
//! remote refresher; see [`ConfigManager`].

mod manager;
mod remote;

pub use manager::ConfigManager;
pub use remote::{RemoteAppConfig, RemoteExpiration, RemotePolicy};

use crate::error::{Error, Result};
use crate::timex::humane;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default raw-event source type
pub const DEFAULT_SOURCE_TYPE: &str = "zabbix_webhook";

// ============================================================================
// DEPLOYMENT CONFIG
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP API
    pub api: ApiConfig,
    /// Logging defaults (CLI flags take precedence)
    pub log: LogConfig,
    /// Message stream topics
    pub kafka: KafkaConfig,
    /// Knowledge graph and agent platform
    pub platform: PlatformConfig,
    /// Connection details of dependent services
    #[serde(rename = "depServices")]
    pub dep_services: DepServicesConfig,
    /// Document store selection
    pub storage: StorageConfig,
    /// Remote business config service
    pub app_config_service: AppConfigServiceConfig,
    /// Correlation stage timers
    pub correlation: CorrelationConfig,
    /// Object-class cache
    pub object_cache: ObjectCacheConfig,
    /// RCA engine tuning
    pub rca: RcaConfig,
    /// Business config loaded from `data/app_config.yaml`
    #[serde(skip)]
    pub app_config: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Per-request timeout
    #[serde(with = "humane")]
    pub request_timeout: Duration,
    /// Maximum accepted webhook body in bytes
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 13047,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Message transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// In-process broker
    Memory,
    /// Kafka (requires the `kafka` feature)
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub transport: Transport,
    /// Raw events (HTTP -> correlation)
    pub raw_events: StreamConfig,
    /// Problem events (correlation -> RCA)
    pub problem_events: StreamConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Memory,
            raw_events: StreamConfig {
                topic: "itops_alert_raw_event".to_string(),
                consumer_group: "itops-alert-analysis-correlation".to_string(),
            },
            problem_events: StreamConfig {
                topic: "itops_alert_problem_event".to_string(),
                consumer_group: "itops-alert-analysis-rca".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub topic: String,
    pub consumer_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL shared by graph and agent APIs
    pub base_url: String,
    /// Default request timeout for graph calls
    #[serde(with = "humane")]
    pub timeout: Duration,
    /// Accept invalid TLS certificates
    pub insecure_skip_verify: bool,
    pub agents: AgentsConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            insecure_skip_verify: false,
            agents: AgentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub problem_summary: AgentConfig,
    pub causal_analysis: AgentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    pub app_id: String,
    pub agent_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepServicesConfig {
    pub mq: MqConfig,
    pub opensearch: OpenSearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqConfig {
    #[serde(rename = "mqHost")]
    pub mq_host: String,
    #[serde(rename = "mqPort")]
    pub mq_port: u16,
    #[serde(rename = "mqType")]
    pub mq_type: String,
    /// `plaintext` or `sasl_plaintext`
    pub protocol: String,
    pub auth: MqAuthConfig,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            mq_host: "localhost".to_string(),
            mq_port: 9092,
            mq_type: "kafka".to_string(),
            protocol: "plaintext".to_string(),
            auth: MqAuthConfig::default(),
        }
    }
}

impl MqConfig {
    pub fn brokers(&self) -> String {
        self.mq_host
            .split(',')
            .map(|host| format!("{}:{}", host.trim(), self.mq_port))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn sasl_enabled(&self) -> bool {
        self.protocol.to_ascii_lowercase().starts_with("sasl")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MqAuthConfig {
    /// PLAIN, SCRAM-SHA-256 or SCRAM-SHA-512
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub user: String,
    pub password: String,
    #[serde(with = "humane")]
    pub timeout: Duration,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            protocol: "http".to_string(),
            user: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl OpenSearchConfig {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Document store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    OpenSearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Index name prefix
    pub index_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            index_prefix: "mdl-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfigServiceConfig {
    /// URL returning [`RemoteAppConfig`] JSON
    pub endpoint: String,
    #[serde(with = "humane")]
    pub refresh_interval: Duration,
    pub enabled: bool,
}

impl Default for AppConfigServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            refresh_interval: Duration::from_secs(30),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Period of both expiration sweepers
    #[serde(with = "humane")]
    pub sweep_interval: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectCacheConfig {
    #[serde(with = "humane")]
    pub refresh_interval: Duration,
    /// Objects fetched per page
    pub page_size: usize,
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RcaConfig {
    /// Batching window for problem events
    #[serde(with = "humane")]
    pub batch_window: Duration,
    /// Problems analyzed concurrently per batch
    pub max_concurrent: usize,
    /// Deadline for one problem analysis
    #[serde(with = "humane")]
    pub task_timeout: Duration,
    /// Deadline for one agent call
    #[serde(with = "humane")]
    pub agent_call_timeout: Duration,
    /// Concurrent agent calls per problem
    pub max_concurrent_analysis: usize,
    /// Re-enqueue problems still pending RCA on startup
    pub resume_pending: bool,
    /// Deliver results over HTTP to this API base instead of in-process
    pub callback_url: String,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_secs(300),   // 5 minutes
            max_concurrent: 10,
            task_timeout: Duration::from_secs(7200),  // 120 minutes
            agent_call_timeout: Duration::from_secs(900), // 15 minutes
            max_concurrent_analysis: 15,
            resume_pending: true,
            callback_url: String::new(),
        }
    }
}

// ============================================================================
// BUSINESS CONFIG
// ============================================================================

/// Mutable business configuration (`data/app_config.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub credentials: CredentialsConfig,
    pub knowledge_network: KnowledgeNetworkConfig,
    pub ingest: IngestConfig,
    pub fault_point: ExpirationPolicy,
    pub problem: ExpirationPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            knowledge_network: KnowledgeNetworkConfig::default(),
            ingest: IngestConfig {
                source: SourceConfig {
                    source_type: DEFAULT_SOURCE_TYPE.to_string(),
                },
            },
            fault_point: ExpirationPolicy::default(),
            problem: ExpirationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Full `Authorization` header value
    pub authorization: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeNetworkConfig {
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicy {
    pub expiration: ExpirationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub enabled: bool,
    #[serde(with = "humane")]
    pub expiration_time: Duration,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiration_time: Duration::from_secs(3600), // 1 hour
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    /// Load `config.yaml` and its sibling `data/app_config.yaml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("read {}: {e}", path.display())))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("parse {}: {e}", path.display())))?;

        let app_path = app_config_path(path);
        config.app_config = load_or_init_app_config(&app_path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.port == 0 {
            return Err(Error::config("api.port must be non-zero"));
        }
        if self.kafka.raw_events.topic.is_empty() || self.kafka.problem_events.topic.is_empty() {
            return Err(Error::config("kafka topics must be set"));
        }
        if self.rca.max_concurrent == 0 || self.rca.max_concurrent_analysis == 0 {
            return Err(Error::config("rca concurrency limits must be positive"));
        }
        if self.rca.batch_window.is_zero() {
            return Err(Error::config("rca.batch_window must be positive"));
        }
        if self.correlation.sweep_interval.is_zero() {
            return Err(Error::config("correlation.sweep_interval must be positive"));
        }
        if self.dep_services.mq.sasl_enabled() {
            let mechanism = self.dep_services.mq.auth.mechanism.to_ascii_uppercase();
            if !matches!(mechanism.as_str(), "PLAIN" | "SCRAM-SHA-256" | "SCRAM-SHA-512") {
                return Err(Error::config(format!("unsupported SASL mechanism {mechanism:?}")));
            }
        }
        if self.app_config_service.enabled && self.app_config_service.endpoint.is_empty() {
            return Err(Error::config("app_config_service.endpoint is required when enabled"));
        }
        self.app_config.validate()
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ingest.source.source_type.trim().is_empty() {
            return Err(Error::config("ingest.source.type must be set"));
        }
        for (name, policy) in [("fault_point", &self.fault_point), ("problem", &self.problem)] {
            if policy.expiration.enabled && policy.expiration.expiration_time.is_zero() {
                return Err(Error::config(format!(
                    "{name}.expiration.expiration_time must be positive"
                )));
            }
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let app: AppConfig = serde_yaml::from_str(&raw)?;
        Ok(app)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// `<dir of config.yaml>/data/app_config.yaml`
pub fn app_config_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("data")
        .join("app_config.yaml")
}

fn load_or_init_app_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return AppConfig::from_file(path)
            .map_err(|e| Error::config(format!("parse {}: {e}", path.display())));
    }

    let defaults = AppConfig::default();
    match defaults.save(path) {
        Ok(()) => info!(path = %path.display(), "Wrote default app config"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write default app config"),
    }
    Ok(defaults)
}
