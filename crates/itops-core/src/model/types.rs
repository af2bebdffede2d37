//! Enumerated tags with their persisted wire values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity. Lower values are more severe, so `min` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Severity {
    Emergency = 1,
    Critical = 2,
    Major = 3,
    Warning = 4,
    Normal = 5,
}

impl Severity {
    /// Map an upstream Zabbix severity name.
    pub fn from_zabbix(name: &str) -> Self {
        match name.trim() {
            "Disaster" => Self::Emergency,
            "High" => Self::Critical,
            "Average" => Self::Major,
            "Warning" => Self::Warning,
            _ => Self::Normal,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Normal
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Emergency),
            2 => Ok(Self::Critical),
            3 => Ok(Self::Major),
            4 => Ok(Self::Warning),
            5 => Ok(Self::Normal),
            other => Err(format!("invalid severity {other}")),
        }
    }
}

impl From<Severity> for u8 {
    fn from(value: Severity) -> Self {
        value as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emergency => "emergency",
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Warning => "warning",
            Self::Normal => "normal",
        };
        f.write_str(name)
    }
}

/// Raw event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "1")]
    Occurred,
    #[serde(rename = "2")]
    Recovered,
}

impl EventStatus {
    /// Map an upstream Zabbix status label; anything unknown is an occurrence.
    pub fn from_zabbix(label: &str) -> Self {
        match label.trim() {
            "恢复" => Self::Recovered,
            _ => Self::Occurred,
        }
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Occurred
    }
}

/// Fault point status. `Recovered` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultStatus {
    #[serde(rename = "1")]
    Occurred,
    #[serde(rename = "2")]
    Recovered,
    #[serde(rename = "3")]
    Expired,
}

impl FaultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Occurred => "1",
            Self::Recovered => "2",
            Self::Expired => "3",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Occurred)
    }
}

impl Default for FaultStatus {
    fn default() -> Self {
        Self::Occurred
    }
}

/// Problem status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemStatus {
    #[serde(rename = "0")]
    Open,
    #[serde(rename = "1")]
    Closed,
    #[serde(rename = "2")]
    Expired,
    #[serde(rename = "3")]
    Merged,
}

impl ProblemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "0",
            Self::Closed => "1",
            Self::Expired => "2",
            Self::Merged => "3",
        }
    }
}

impl Default for ProblemStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Who closed a problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseType {
    #[serde(rename = "1")]
    System,
    #[serde(rename = "2")]
    Manual,
}

/// Root cause analysis status, persisted as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RcaStatus {
    Pending = 1,
    Running = 2,
    Success = 3,
    Failed = 4,
    Cancelled = 5,
}

impl TryFrom<u8> for RcaStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Running),
            3 => Ok(Self::Success),
            4 => Ok(Self::Failed),
            5 => Ok(Self::Cancelled),
            other => Err(format!("invalid rca status {other}")),
        }
    }
}

impl From<RcaStatus> for u8 {
    fn from(value: RcaStatus) -> Self {
        value as u8
    }
}

/// Direction of a causal relation edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalRelationClass {
    /// fault point --has_cause--> causal object
    HasCause,
    /// causal object --has_effect--> fault point
    HasEffect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_values() {
        assert_eq!(serde_json::to_value(FaultStatus::Expired).unwrap(), json!("3"));
        assert_eq!(serde_json::to_value(ProblemStatus::Open).unwrap(), json!("0"));
        assert_eq!(serde_json::to_value(CloseType::Manual).unwrap(), json!("2"));
        assert_eq!(serde_json::to_value(RcaStatus::Success).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(Severity::Critical).unwrap(), json!(2));
        assert_eq!(
            serde_json::to_value(CausalRelationClass::HasEffect).unwrap(),
            json!("has_effect")
        );
    }

    #[test]
    fn test_severity_ordering_and_mapping() {
        assert!(Severity::Emergency < Severity::Normal);
        assert_eq!(Severity::Critical.min(Severity::Warning), Severity::Critical);
        assert_eq!(Severity::from_zabbix("Disaster"), Severity::Emergency);
        assert_eq!(Severity::from_zabbix("Information"), Severity::Normal);
        assert!(serde_json::from_value::<Severity>(json!(9)).is_err());
    }

    #[test]
    fn test_event_status_mapping() {
        assert_eq!(EventStatus::from_zabbix("恢复"), EventStatus::Recovered);
        assert_eq!(EventStatus::from_zabbix("发生"), EventStatus::Occurred);
        assert_eq!(EventStatus::from_zabbix("???"), EventStatus::Occurred);
    }
}
