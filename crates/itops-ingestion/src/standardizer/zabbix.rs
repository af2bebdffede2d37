use super::Standardizer;
use crate::object_cache::ObjectLookup;
use async_trait::async_trait;
use chrono::Utc;
use itops_core::idgen::IdGenerator;
use itops_core::model::{EventStatus, RawEvent, Severity};
use itops_core::timex::parse_local_datetime;
use itops_core::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Source type of Zabbix webhook payloads
pub const ZABBIX_WEBHOOK_SOURCE: &str = "zabbix_webhook";

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Zabbix webhook body; every field arrives as text
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ZabbixWebhook {
    #[serde(default, deserialize_with = "text")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "text")]
    pub description: String,
    #[serde(default, deserialize_with = "text")]
    pub event_id: String,
    #[serde(default, deserialize_with = "text")]
    pub recovery_id: String,
    #[serde(default, deserialize_with = "text")]
    pub event_name: String,
    #[serde(default, deserialize_with = "text")]
    pub occur_time: String,
    #[serde(default, deserialize_with = "text")]
    pub recovery_time: String,
    #[serde(default, deserialize_with = "text")]
    pub event_severity: String,
    #[serde(default, deserialize_with = "text")]
    pub event_status: String,
    #[serde(default, deserialize_with = "text")]
    pub entity_object_name: String,
    #[serde(default, deserialize_with = "text")]
    pub ip: String,
    #[serde(default, deserialize_with = "text")]
    pub item_key: String,
    #[serde(default, deserialize_with = "text")]
    pub item_name: String,
    #[serde(default, deserialize_with = "text")]
    pub item_value: String,
}

/// Numeric id from text, zero when absent or malformed
fn numeric_id(s: &str) -> u64 {
    s.trim().parse().unwrap_or(0)
}

/// Maps Zabbix webhook payloads onto raw events.
///
/// Entity class, id and name come from the object-class cache by the
/// payload's `entity_object_name`; an unresolvable name rejects the payload.
#[derive(Debug)]
pub struct ZabbixWebhookStandardizer {
    ids: Arc<dyn IdGenerator>,
    objects: Arc<dyn ObjectLookup>,
}

impl ZabbixWebhookStandardizer {
    pub fn new(ids: Arc<dyn IdGenerator>, objects: Arc<dyn ObjectLookup>) -> Self {
        Self { ids, objects }
    }

    fn parse_time(webhook: &ZabbixWebhook, field: &str, value: &str) -> Option<chrono::DateTime<Utc>> {
        if value.is_empty() {
            return None;
        }
        let parsed = parse_local_datetime(value);
        if parsed.is_none() {
            warn!(event_id = %webhook.event_id, field, value, "Unparseable Zabbix time");
        }
        parsed
    }
}

#[async_trait]
impl Standardizer for ZabbixWebhookStandardizer {
    fn source(&self) -> &str {
        ZABBIX_WEBHOOK_SOURCE
    }

    async fn standardize(&self, payload: &[u8]) -> Result<RawEvent> {
        let webhook: ZabbixWebhook = serde_json::from_slice(payload)
            .map_err(|e| Error::validation(format!("invalid Zabbix webhook payload: {e}")))?;

        let occur_time = Self::parse_time(&webhook, "occur_time", &webhook.occur_time);
        let recovery_time = Self::parse_time(&webhook, "recovery_time", &webhook.recovery_time);
        let object = self.objects.lookup(&webhook.entity_object_name)?;

        Ok(RawEvent {
            event_id: self.ids.next_id(),
            recovery_id: numeric_id(&webhook.recovery_id),
            event_provider_id: numeric_id(&webhook.event_id),
            event_timestamp: Utc::now(),
            event_title: webhook.event_name,
            event_content: webhook.description,
            event_occur_time: occur_time,
            event_recovery_time: recovery_time,
            event_type: webhook.item_key,
            event_status: EventStatus::from_zabbix(&webhook.event_status),
            event_level: Severity::from_zabbix(&webhook.event_severity),
            event_source: ZABBIX_WEBHOOK_SOURCE.to_string(),
            entity_object_name: object.name,
            entity_object_class: object.object_type_id,
            entity_object_id: object.object_id,
            entity_object_ip: webhook.ip,
            entity_object_port: String::new(),
            entity_object_mac: String::new(),
            raw_event_msg: String::from_utf8_lossy(payload).into_owned(),
            problem_id: 0,
            fault_id: 0,
        })
    }
}
