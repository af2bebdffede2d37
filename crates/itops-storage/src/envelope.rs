//! System envelope carried by every persisted document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{StoreError, StoreResult};

/// Serialize `entity` and add the envelope fields.
pub fn wrap<T: Serialize>(
    entity: &T,
    index_base: &str,
    id: &str,
    now: DateTime<Utc>,
) -> StoreResult<Value> {
    let mut doc = serde_json::to_value(entity)?;
    let Value::Object(fields) = &mut doc else {
        return Err(StoreError::Serialization(format!(
            "{index_base} document {id} is not an object"
        )));
    };
    let stamp = Value::String(now.to_rfc3339());
    fields.insert("@timestamp".to_string(), stamp.clone());
    fields.insert("__write_time".to_string(), stamp);
    fields.insert("__data_type".to_string(), Value::String(index_base.to_string()));
    fields.insert("__index_base".to_string(), Value::String(index_base.to_string()));
    fields.insert("__id".to_string(), Value::String(id.to_string()));
    fields.insert("category".to_string(), Value::String("log".to_string()));
    fields.insert("type".to_string(), Value::String(index_base.to_string()));
    Ok(doc)
}

/// Build a partial-update body from field pairs and bump `__write_time`.
pub fn partial<I, K>(fields: I, now: DateTime<Utc>) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let mut map: Map<String, Value> = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
    map.insert("__write_time".to_string(), Value::String(now.to_rfc3339()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_adds_envelope() {
        let doc = wrap(&json!({"fault_id": 7}), "itops_fault_point_object", "7", Utc::now()).unwrap();
        assert_eq!(doc["fault_id"], 7);
        assert_eq!(doc["__id"], "7");
        assert_eq!(doc["category"], "log");
        assert_eq!(doc["type"], "itops_fault_point_object");
        assert!(doc.get("@timestamp").is_some());
    }

    #[test]
    fn test_wrap_rejects_scalars() {
        assert!(wrap(&7u64, "x", "1", Utc::now()).is_err());
    }

    #[test]
    fn test_partial_stamps_write_time() {
        let body = partial([("problem_id", json!(5))], Utc::now());
        assert_eq!(body["problem_id"], 5);
        assert!(body.get("__write_time").is_some());
    }
}
