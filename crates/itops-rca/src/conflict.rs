//! Causal conflict resolution and persistence.
//!
//! At most one causal object exists per unordered fault point pair. Batch
//! candidates compete with each other and with the persisted object for the
//! same pair; the winner is inserted, refreshed or flipped in place.

use crate::causal::{adjust_confidence, CausalCandidate, MIN_CONFIDENCE};
use chrono::{DateTime, Utc};
use itops_core::idgen::IdGenerator;
use itops_core::model::{
    pair_key, CausalRelationClass, FaultCausalObject, FaultCausalRelation, FaultPointObject, CAUSAL_CLASS,
    FAULT_POINT_CLASS,
};
use itops_core::Result;
use itops_storage::Repositories;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What persistence has to do for a resolved pair
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeAction {
    /// No persisted object yet
    Insert,
    /// Persisted object in the same direction; refresh confidence and reason
    Refresh(FaultCausalObject),
    /// Persisted object in the opposite direction lost; flip it in place
    Overturn(FaultCausalObject),
    /// Persisted object wins or was not challenged
    Keep(FaultCausalObject),
}

/// Winning direction for one unordered pair
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub cause_fault_id: u64,
    pub effect_fault_id: u64,
    pub confidence: f64,
    pub reason: String,
    pub action: EdgeAction,
}

#[derive(Debug, Clone)]
struct Contender {
    cause: u64,
    cause_occur_time: Option<DateTime<Utc>>,
    confidence: f64,
    weight: f64,
}

impl Contender {
    fn from_candidate(c: &CausalCandidate) -> Self {
        Self {
            cause: c.cause_fault_id,
            cause_occur_time: Some(c.cause_occur_time),
            confidence: c.confidence,
            weight: c.weight,
        }
    }

    /// Persisted objects carry no history bonus; only the time gap adjusts them.
    fn from_persisted(o: &FaultCausalObject, fault_points: &HashMap<u64, &FaultPointObject>) -> Self {
        let cause = fault_points.get(&o.causal_source_fault_id);
        let effect = fault_points.get(&o.causal_target_fault_id);
        let weight = match (cause, effect) {
            (Some(cause), Some(effect)) => adjust_confidence(o.causal_confidence, cause, effect, &[]),
            _ => o.causal_confidence.max(MIN_CONFIDENCE),
        };
        Self {
            cause: o.causal_source_fault_id,
            cause_occur_time: cause.map(|fp| fp.fault_occur_time),
            confidence: o.causal_confidence,
            weight,
        }
    }

    /// `Greater` when `self` should win
    fn compare(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| self.confidence.total_cmp(&other.confidence))
            .then_with(|| match (self.cause_occur_time, other.cause_occur_time) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| other.cause.cmp(&self.cause))
    }
}

/// Pick one direction per pair.
///
/// Batch candidates are ranked by adjusted weight, then raw confidence, then
/// the earlier cause occurrence. The best one then faces the persisted object
/// for the pair, if any. Persisted objects with no challenger are kept.
pub fn resolve_conflicts(
    candidates: &[CausalCandidate],
    persisted: &[FaultCausalObject],
    fault_points: &[FaultPointObject],
) -> Vec<ResolvedEdge> {
    let by_id: HashMap<u64, &FaultPointObject> = fault_points.iter().map(|fp| (fp.fault_id, fp)).collect();

    let mut best: BTreeMap<(u64, u64), &CausalCandidate> = BTreeMap::new();
    for candidate in candidates {
        let key = pair_key(candidate.cause_fault_id, candidate.effect_fault_id);
        match best.get(&key) {
            Some(current)
                if Contender::from_candidate(current).compare(&Contender::from_candidate(candidate))
                    != Ordering::Less => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut existing: BTreeMap<(u64, u64), &FaultCausalObject> = BTreeMap::new();
    for object in persisted {
        existing.entry(object.pair_key()).or_insert(object);
    }

    let mut resolved = Vec::new();
    for (key, candidate) in &best {
        let Some(object) = existing.remove(key) else {
            resolved.push(ResolvedEdge {
                cause_fault_id: candidate.cause_fault_id,
                effect_fault_id: candidate.effect_fault_id,
                confidence: candidate.confidence,
                reason: candidate.reason.clone(),
                action: EdgeAction::Insert,
            });
            continue;
        };

        let same_direction = object.causal_source_fault_id == candidate.cause_fault_id;
        let action = if same_direction {
            EdgeAction::Refresh(object.clone())
        } else if Contender::from_candidate(candidate).compare(&Contender::from_persisted(object, &by_id))
            == Ordering::Greater
        {
            EdgeAction::Overturn(object.clone())
        } else {
            debug!(
                causal_id = %object.causal_id,
                "Persisted causal direction wins over reversed candidate"
            );
            resolved.push(kept(object));
            continue;
        };
        resolved.push(ResolvedEdge {
            cause_fault_id: candidate.cause_fault_id,
            effect_fault_id: candidate.effect_fault_id,
            confidence: candidate.confidence,
            reason: candidate.reason.clone(),
            action,
        });
    }
    resolved.extend(existing.into_values().map(kept));
    resolved
}

fn kept(object: &FaultCausalObject) -> ResolvedEdge {
    ResolvedEdge {
        cause_fault_id: object.causal_source_fault_id,
        effect_fault_id: object.causal_target_fault_id,
        confidence: object.causal_confidence,
        reason: object.causal_reason.clone(),
        action: EdgeAction::Keep(object.clone()),
    }
}

/// Writes resolved edges as causal objects plus their two relations
#[derive(Debug, Clone)]
pub struct CausalLedger {
    repos: Repositories,
    ids: Arc<dyn IdGenerator>,
}

impl CausalLedger {
    pub fn new(repos: Repositories, ids: Arc<dyn IdGenerator>) -> Self {
        Self { repos, ids }
    }

    /// Persist every non-kept edge. Failures are logged per edge and do not
    /// abort the run.
    #[instrument(skip_all, fields(service = "rca", edges = edges.len()))]
    pub async fn persist(&self, edges: &[ResolvedEdge]) -> usize {
        let now = Utc::now();
        let mut written = 0;
        for edge in edges {
            let result = match &edge.action {
                EdgeAction::Keep(_) => continue,
                EdgeAction::Insert => self.insert(edge, now).await,
                EdgeAction::Refresh(existing) => self.refresh(edge, existing, now).await,
                EdgeAction::Overturn(existing) => self.overturn(edge, existing, now).await,
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => warn!(
                    cause = edge.cause_fault_id,
                    effect = edge.effect_fault_id,
                    error = %e,
                    "Failed to persist causal edge"
                ),
            }
        }
        if written > 0 {
            info!(written, "Causal edges persisted");
        }
        written
    }

    async fn insert(&self, edge: &ResolvedEdge, now: DateTime<Utc>) -> Result<()> {
        let causal = FaultCausalObject {
            causal_id: self.ids.next_causal_id(),
            causal_source_fault_id: edge.cause_fault_id,
            causal_target_fault_id: edge.effect_fault_id,
            causal_confidence: edge.confidence,
            causal_reason: edge.reason.clone(),
            s_create_time: now,
            s_update_time: now,
        };
        self.repos.fault_causals.upsert(&causal).await?;
        let (cause, effect) = relations(&causal, self.ids.next_relation_id(), self.ids.next_relation_id(), now, now);
        self.repos.fault_causal_relations.upsert(&cause).await?;
        self.repos.fault_causal_relations.upsert(&effect).await?;
        debug!(causal_id = %causal.causal_id, "Causal edge inserted");
        Ok(())
    }

    async fn refresh(&self, edge: &ResolvedEdge, existing: &FaultCausalObject, now: DateTime<Utc>) -> Result<()> {
        if existing.causal_confidence == edge.confidence && existing.causal_reason == edge.reason {
            return Ok(());
        }
        let mut causal = existing.clone();
        causal.causal_confidence = edge.confidence;
        causal.causal_reason = edge.reason.clone();
        causal.s_update_time = now;
        self.repos.fault_causals.update(&causal).await?;
        debug!(causal_id = %causal.causal_id, "Causal edge refreshed");
        Ok(())
    }

    /// Flip a persisted object to the winning direction, keeping its id and
    /// rewriting both relations.
    async fn overturn(&self, edge: &ResolvedEdge, existing: &FaultCausalObject, now: DateTime<Utc>) -> Result<()> {
        let mut causal = existing.clone();
        causal.causal_source_fault_id = edge.cause_fault_id;
        causal.causal_target_fault_id = edge.effect_fault_id;
        causal.causal_confidence = edge.confidence;
        causal.causal_reason = edge.reason.clone();
        causal.s_update_time = now;
        self.repos.fault_causals.update(&causal).await?;

        let old_cause = self
            .repos
            .fault_causal_relations
            .query_by_entity_pair(&existing.causal_source_fault_id.to_string(), &existing.causal_id)
            .await?;
        let old_effect = self
            .repos
            .fault_causal_relations
            .query_by_entity_pair(&existing.causal_id, &existing.causal_target_fault_id.to_string())
            .await?;
        let (cause_id, cause_created) = match old_cause.first() {
            Some(r) => (r.relation_id.clone(), r.relation_create_time),
            None => (self.ids.next_relation_id(), now),
        };
        let (effect_id, effect_created) = match old_effect.first() {
            Some(r) => (r.relation_id.clone(), r.relation_create_time),
            None => (self.ids.next_relation_id(), now),
        };

        let (mut cause, mut effect) = relations(&causal, cause_id, effect_id, now, now);
        cause.relation_create_time = cause_created;
        effect.relation_create_time = effect_created;
        self.repos.fault_causal_relations.upsert(&cause).await?;
        self.repos.fault_causal_relations.upsert(&effect).await?;
        info!(
            causal_id = %causal.causal_id,
            cause = causal.causal_source_fault_id,
            effect = causal.causal_target_fault_id,
            "Causal direction overturned"
        );
        Ok(())
    }
}

/// `cause --has_cause--> causal` and `causal --has_effect--> effect`
fn relations(
    causal: &FaultCausalObject,
    cause_relation_id: String,
    effect_relation_id: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
) -> (FaultCausalRelation, FaultCausalRelation) {
    let cause = FaultCausalRelation {
        relation_id: cause_relation_id,
        relation_class: CausalRelationClass::HasCause,
        relation_create_time: created,
        relation_update_time: updated,
        source_object_id: causal.causal_source_fault_id.to_string(),
        source_object_class: FAULT_POINT_CLASS.to_string(),
        target_object_id: causal.causal_id.clone(),
        target_object_class: CAUSAL_CLASS.to_string(),
    };
    let effect = FaultCausalRelation {
        relation_id: effect_relation_id,
        relation_class: CausalRelationClass::HasEffect,
        relation_create_time: created,
        relation_update_time: updated,
        source_object_id: causal.causal_id.clone(),
        source_object_class: CAUSAL_CLASS.to_string(),
        target_object_id: causal.causal_target_fault_id.to_string(),
        target_object_class: FAULT_POINT_CLASS.to_string(),
    };
    (cause, effect)
}
