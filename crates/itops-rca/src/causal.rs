//! Pairwise causal reasoning over a problem's fault points.
//!
//! Pairs are pre-filtered by topology, ranked by a priority score and sent to
//! the reasoning agent with bounded concurrency. Answers are validated and
//! their confidence adjusted for timing and causal history.

use crate::recall::RecallContext;
use chrono::{DateTime, Duration, Utc};
use itops_core::model::{FaultCausalObject, FaultPointObject, FaultStatus};
use itops_platform::agent::{AgentApi, CausalEdge};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Floor for validated and adjusted confidence
pub const MIN_CONFIDENCE: f64 = 0.1;

/// Ceiling for adjusted confidence
pub const MAX_CONFIDENCE: f64 = 0.9;

/// Agent input budget in estimated tokens
pub const MAX_INPUT_TOKENS: usize = 28_000;

/// Bytes per estimated token
pub const BYTES_PER_TOKEN: usize = 4;

/// Persisted causal objects updated within this window count as history
pub fn history_window() -> Duration {
    Duration::hours(12)
}

const HISTORY_STEP: f64 = 0.05;
const HISTORY_CAP: f64 = 0.2;
const REVERSE_PENALTY: f64 = 0.1;

/// Rough token count of a JSON value
pub fn estimate_tokens(value: &Value) -> usize {
    serde_json::to_string(value)
        .map(|s| s.len() / BYTES_PER_TOKEN)
        .unwrap_or(usize::MAX)
}

/// Fault point as presented to the agent
pub fn fault_point_payload(fp: &FaultPointObject) -> Value {
    let mut payload = json!({
        "fault_id": fp.fault_id,
        "fault_name": fp.fault_name,
        "fault_mode": fp.fault_mode,
        "fault_level": fp.fault_level,
        "fault_status": fp.fault_status,
        "fault_occur_time": fp.fault_occur_time.to_rfc3339(),
        "entity_object_id": fp.entity_object_id,
    });
    if let Some(map) = payload.as_object_mut() {
        if let Some(recovered) = fp.fault_recovery_time {
            map.insert("fault_recovery_time".into(), json!(recovered.to_rfc3339()));
        }
        if fp.fault_duration_time > 0 {
            map.insert("fault_duration_time".into(), json!(fp.fault_duration_time));
        }
    }
    payload
}

/// One validated causal answer
#[derive(Debug, Clone, PartialEq)]
pub struct CausalCandidate {
    pub cause_fault_id: u64,
    pub effect_fault_id: u64,
    pub cause_occur_time: DateTime<Utc>,
    /// Agent confidence after validation; this is what gets persisted
    pub confidence: f64,
    /// Confidence adjusted for timing and history; used for ranking
    pub weight: f64,
    pub reason: String,
}

/// Ranking score for a fault point pair; higher is analyzed first
pub fn pair_priority(a: &FaultPointObject, b: &FaultPointObject) -> f64 {
    let level = a.fault_level.min(b.fault_level).as_u8() as f64;
    let mut score = (6.0 - level) * 3.0;

    let gap = (a.fault_occur_time - b.fault_occur_time).abs();
    score += if gap <= Duration::minutes(5) {
        10.0
    } else if gap <= Duration::minutes(30) {
        7.0
    } else if gap <= Duration::hours(1) {
        4.0
    } else if gap <= Duration::hours(6) {
        2.0
    } else {
        0.5
    };

    for fp in [a, b] {
        if fp.fault_status == FaultStatus::Occurred {
            score += 3.0;
        }
        score += fp.fault_duration_time.max(0) as f64 / 3600.0 * 0.3;
    }
    score
}

/// Unordered index pairs whose entities share topology, best first
pub fn candidate_pairs(fault_points: &[FaultPointObject], recall: &RecallContext) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..fault_points.len() {
        for j in (i + 1)..fault_points.len() {
            let (a, b) = (&fault_points[i], &fault_points[j]);
            if recall.shares_topology(&a.entity_object_id, &b.entity_object_id) {
                pairs.push((i, j, pair_priority(a, b)));
            }
        }
    }
    pairs.sort_by(|x, y| y.2.total_cmp(&x.2).then_with(|| (x.0, x.1).cmp(&(y.0, y.1))));
    pairs.into_iter().map(|(i, j, _)| (i, j)).collect()
}

/// Agent input for one pair. The topology is dropped when it would push the
/// input over [`MAX_INPUT_TOKENS`].
pub fn causal_query(a: &FaultPointObject, b: &FaultPointObject, recall: &RecallContext) -> Map<String, Value> {
    let mut query = Map::new();
    query.insert("faultPointA".into(), fault_point_payload(a));
    query.insert("faultPointB".into(), fault_point_payload(b));

    let mut full = query.clone();
    let topology = recall.topology_between(&a.entity_object_id, &b.entity_object_id);
    full.insert(
        "topologyRelation".into(),
        json!({
            "entity_a_id": a.entity_object_id,
            "entity_b_id": b.entity_object_id,
            "topology_subgraph": topology,
        }),
    );
    if estimate_tokens(&Value::Object(full.clone())) > MAX_INPUT_TOKENS {
        debug!(a = a.fault_id, b = b.fault_id, "Causal input over budget, dropping topology");
        return query;
    }
    full
}

/// Check an agent answer against the pair it was asked about. Returns
/// `(cause, effect, confidence)`.
pub fn validate_edge(edge: &CausalEdge, a: u64, b: u64) -> Option<(u64, u64, f64)> {
    if edge.source_id == 0 || edge.target_id == 0 || edge.source_id == edge.target_id {
        return None;
    }
    let asked = (edge.source_id == a && edge.target_id == b) || (edge.source_id == b && edge.target_id == a);
    if !asked || !edge.confidence.is_finite() {
        return None;
    }
    let confidence = edge.confidence.clamp(0.0, 1.0);
    if confidence < MIN_CONFIDENCE {
        return None;
    }
    Some((edge.source_id, edge.target_id, confidence))
}

/// Adjust a confidence for the cause/effect time gap and for persisted
/// causal history between the two fault points.
pub fn adjust_confidence(
    confidence: f64,
    cause: &FaultPointObject,
    effect: &FaultPointObject,
    history: &[FaultCausalObject],
) -> f64 {
    let gap = (effect.fault_occur_time - cause.fault_occur_time).abs();
    let timing = if gap <= Duration::minutes(1) {
        0.1
    } else if gap <= Duration::minutes(5) {
        0.2
    } else if gap <= Duration::hours(1) {
        0.0
    } else {
        -0.1
    };

    let same = history
        .iter()
        .filter(|h| h.causal_source_fault_id == cause.fault_id && h.causal_target_fault_id == effect.fault_id)
        .count();
    let reverse = history
        .iter()
        .any(|h| h.causal_source_fault_id == effect.fault_id && h.causal_target_fault_id == cause.fault_id);
    let mut historical = (same as f64 * HISTORY_STEP).min(HISTORY_CAP);
    if reverse {
        historical -= REVERSE_PENALTY;
    }

    (confidence + timing + historical).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Runs the pairwise agent calls for one problem
#[derive(Debug, Clone)]
pub struct CausalReasoner {
    agent: Arc<dyn AgentApi>,
    max_concurrent: usize,
}

impl CausalReasoner {
    pub fn new(agent: Arc<dyn AgentApi>, max_concurrent: usize) -> Self {
        Self {
            agent,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Ask the agent about every topologically related pair. Failed or
    /// invalid answers only drop their pair.
    #[instrument(skip_all, fields(service = "rca", fault_points = fault_points.len()))]
    pub async fn infer(&self, fault_points: &[FaultPointObject], recall: &RecallContext) -> Vec<CausalCandidate> {
        let pairs = candidate_pairs(fault_points, recall);
        if pairs.is_empty() {
            debug!("No topologically related fault point pairs");
            return Vec::new();
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut calls = JoinSet::new();
        for (i, j) in pairs.iter().copied() {
            let query = causal_query(&fault_points[i], &fault_points[j], recall);
            let agent = self.agent.clone();
            let permits = permits.clone();
            calls.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match agent.causal(&query).await {
                    Ok(edge) => Some((i, j, edge)),
                    Err(e) => {
                        warn!(error = %e, outcome = e.outcome(), "Causal agent call failed, skipping pair");
                        None
                    }
                }
            });
        }

        let mut candidates = Vec::new();
        while let Some(joined) = calls.join_next().await {
            let Ok(Some((i, j, edge))) = joined else {
                continue;
            };
            let (a, b) = (&fault_points[i], &fault_points[j]);
            let Some((cause_id, _, confidence)) = validate_edge(&edge, a.fault_id, b.fault_id) else {
                debug!(a = a.fault_id, b = b.fault_id, ?edge, "Discarding invalid causal answer");
                continue;
            };
            let (cause, effect) = if cause_id == a.fault_id { (a, b) } else { (b, a) };
            candidates.push(CausalCandidate {
                cause_fault_id: cause.fault_id,
                effect_fault_id: effect.fault_id,
                cause_occur_time: cause.fault_occur_time,
                confidence,
                weight: adjust_confidence(confidence, cause, effect, &recall.history),
                reason: edge.reason,
            });
        }
        candidates.sort_by_key(|c| (c.cause_fault_id, c.effect_fault_id));

        info!(pairs = pairs.len(), accepted = candidates.len(), "Causal reasoning finished");
        candidates
    }
}
