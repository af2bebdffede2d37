//! Lenient decoding of agent answers.
//!
//! Answers are JSON embedded in free text. Strict decoding is tried first;
//! when it fails or yields no usable fields, field-level patterns extract
//! what they can.

use crate::error::AgentError;
use itops_core::model::Occurrence;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A causal edge proposed by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CausalEdge {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub source_id: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub target_id: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

impl CausalEdge {
    fn has_endpoints(&self) -> bool {
        self.source_id != 0 && self.target_id != 0
    }
}

#[derive(Debug, Deserialize)]
struct CausalPayload {
    #[serde(default)]
    fault_causal: Option<CausalEdge>,
}

#[derive(Debug, Deserialize)]
struct SummaryPayload {
    #[serde(default)]
    occurrence: Occurrence,
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => parse_u64(&s).unwrap_or(0),
        _ => 0,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_f64(&s).unwrap_or(0.0),
        _ => 0.0,
    })
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn parse_u64(s: &str) -> Option<u64> {
    unquote(s).parse().ok()
}

fn parse_f64(s: &str) -> Option<f64> {
    unquote(s).parse().ok()
}

/// Undo JSON string escaping, falling back to the common escapes.
fn decode_json_string(encoded: &str) -> String {
    if encoded.is_empty() {
        return String::new();
    }
    serde_json::from_str::<String>(&format!("\"{encoded}\"")).unwrap_or_else(|_| {
        encoded
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\r", "\r")
            .replace("\\\\", "\\")
    })
}

/// Compiled extraction patterns
#[derive(Debug, Clone)]
pub struct LenientParser {
    fault_causal: Regex,
    source_id: Regex,
    target_id: Regex,
    confidence: Regex,
    reason: Regex,
    name: Regex,
    description: Regex,
    impact: Regex,
}

impl LenientParser {
    pub fn new() -> Result<Self, regex::Error> {
        let string_field = |field: &str| Regex::new(&format!(r#"(?i)"{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#));
        Ok(Self {
            fault_causal: Regex::new(r#"(?i)"fault_causal"\s*:\s*\{([^}]+)\}"#)?,
            source_id: Regex::new(r#"(?i)"source_id"\s*:\s*"?([^",}\]]+)"?"#)?,
            target_id: Regex::new(r#"(?i)"target_id"\s*:\s*"?([^",}\]]+)"?"#)?,
            confidence: Regex::new(
                r#"(?i)"confidence"\s*:\s*"?([0-9]+\.?[0-9]*(?:[eE][+-]?[0-9]+)?)"?"#,
            )?,
            reason: string_field("reason")?,
            name: string_field("name")?,
            description: string_field("description")?,
            impact: string_field("impact")?,
        })
    }

    fn capture<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
        pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn capture_string(pattern: &Regex, text: &str) -> String {
        Self::capture(pattern, text)
            .map(|s| decode_json_string(s).trim().to_string())
            .unwrap_or_default()
    }

    /// Extract the `fault_causal` edge from an answer.
    pub fn parse_causal(&self, text: &str) -> Result<CausalEdge, AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyAnswer);
        }
        let json_error = match serde_json::from_str::<CausalPayload>(text) {
            Ok(CausalPayload {
                fault_causal: Some(edge),
            }) if edge.has_endpoints() => return Ok(edge),
            Ok(_) => "source_id or target_id missing".to_string(),
            Err(e) => e.to_string(),
        };

        let body = Self::capture(&self.fault_causal, text).ok_or_else(|| {
            AgentError::Unparseable(format!("{json_error}; no fault_causal object found"))
        })?;
        let edge = CausalEdge {
            source_id: Self::capture(&self.source_id, body)
                .and_then(parse_u64)
                .unwrap_or(0),
            target_id: Self::capture(&self.target_id, body)
                .and_then(parse_u64)
                .unwrap_or(0),
            confidence: Self::capture(&self.confidence, body)
                .and_then(parse_f64)
                .unwrap_or(0.0),
            reason: Self::capture_string(&self.reason, body),
        };
        if edge.has_endpoints() {
            Ok(edge)
        } else {
            Err(AgentError::Unparseable(format!(
                "{json_error}; fault_causal has no valid source_id/target_id"
            )))
        }
    }

    /// Extract the `occurrence` summary from an answer.
    pub fn parse_occurrence(&self, text: &str) -> Result<Occurrence, AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyAnswer);
        }
        let json_error = match serde_json::from_str::<SummaryPayload>(text) {
            Ok(payload) if !is_blank(&payload.occurrence) => return Ok(payload.occurrence),
            Ok(_) => "occurrence is empty".to_string(),
            Err(e) => e.to_string(),
        };

        let occurrence = Occurrence {
            name: Self::capture_string(&self.name, text),
            description: Self::capture_string(&self.description, text),
            impact: Self::capture_string(&self.impact, text),
        };
        if is_blank(&occurrence) {
            Err(AgentError::Unparseable(format!(
                "{json_error}; no name, description or impact found"
            )))
        } else {
            Ok(occurrence)
        }
    }
}

fn is_blank(occurrence: &Occurrence) -> bool {
    occurrence.name.is_empty() && occurrence.description.is_empty() && occurrence.impact.is_empty()
}
