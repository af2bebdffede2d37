use super::{AppConfig, ExpirationConfig, ExpirationPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Business config as served by the alert manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteAppConfig {
    pub platform: RemotePlatform,
    pub knowledge_network: RemoteKnowledgeNetwork,
    pub fault_point_policy: RemotePolicy,
    pub problem_policy: RemotePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotePlatform {
    pub auth_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteKnowledgeNetwork {
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotePolicy {
    pub expiration: RemoteExpiration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteExpiration {
    /// `d`, `h` or `m`
    pub time_type: String,
    pub time_relativity: i64,
}

impl RemoteExpiration {
    /// Relativity ≤ 0 falls back to 1; unknown units are hours.
    pub fn to_duration(&self) -> Duration {
        let amount = if self.time_relativity <= 0 {
            1
        } else {
            self.time_relativity as u64
        };
        let unit = match self.time_type.trim().to_ascii_lowercase().as_str() {
            "d" => 86_400,
            "m" => 60,
            _ => 3_600,
        };
        Duration::from_secs(amount.saturating_mul(unit))
    }
}

impl RemoteAppConfig {
    /// Convert into the local business config. Fields the remote does not
    /// carry (source type, enabled flags) are kept from `current`.
    pub fn to_app_config(&self, current: &AppConfig) -> AppConfig {
        let mut app = current.clone();
        app.credentials.authorization = format!("Bearer {}", self.platform.auth_token);
        app.knowledge_network.knowledge_id = self.knowledge_network.knowledge_id.clone();
        app.fault_point = ExpirationPolicy {
            expiration: ExpirationConfig {
                enabled: current.fault_point.expiration.enabled,
                expiration_time: self.fault_point_policy.expiration.to_duration(),
            },
        };
        app.problem = ExpirationPolicy {
            expiration: ExpirationConfig {
                enabled: current.problem.expiration.enabled,
                expiration_time: self.problem_policy.expiration.to_duration(),
            },
        };
        app
    }
}
