use super::types::CausalRelationClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object class of reified causal nodes.
pub const CAUSAL_CLASS: &str = "FaultCausal";

/// Reified inference that one fault point caused another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCausalObject {
    pub causal_id: String,
    pub causal_source_fault_id: u64,
    pub causal_target_fault_id: u64,
    /// Agent confidence in `[0, 1]`
    pub causal_confidence: f64,
    #[serde(default)]
    pub causal_reason: String,
    pub s_create_time: DateTime<Utc>,
    pub s_update_time: DateTime<Utc>,
}

impl FaultCausalObject {
    /// Unordered pair key; identical for `A→B` and `B→A`.
    pub fn pair_key(&self) -> (u64, u64) {
        pair_key(self.causal_source_fault_id, self.causal_target_fault_id)
    }
}

/// Order a fault id pair so both directions share one key.
pub fn pair_key(a: u64, b: u64) -> (u64, u64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One of the two edges attached to a causal object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCausalRelation {
    pub relation_id: String,
    pub relation_class: CausalRelationClass,
    pub relation_create_time: DateTime<Utc>,
    pub relation_update_time: DateTime<Utc>,
    pub source_object_id: String,
    pub source_object_class: String,
    pub target_object_id: String,
    pub target_object_class: String,
}

/// A causal edge recalled from history, used to bias new inferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRelation {
    pub causal_id: String,
    pub cause_object_id: String,
    pub effect_object_id: String,
    pub confidence: f64,
    pub occurrence_count: u32,
    pub last_occurrence: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}
