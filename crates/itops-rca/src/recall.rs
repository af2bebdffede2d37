//! Graph recall: topology fragments around a problem's entities.

use itops_core::model::{is_allowed_class, FaultCausalObject, FaultPointObject, Problem, Topology};
use itops_platform::graph::{Direction, GraphQuery, SubgraphRequest};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Everything recalled for one analysis run
#[derive(Debug, Clone, Default)]
pub struct RecallContext {
    /// Topology fragment per entity id
    pub topologies: HashMap<String, Topology>,
    /// Persisted causal objects among the problem's fault points
    pub history: Vec<FaultCausalObject>,
}

impl RecallContext {
    /// True when the two entities are topologically related: the same
    /// entity, joined by an edge or both present in one fragment, or owning
    /// fragments that overlap.
    pub fn shares_topology(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        if self
            .topologies
            .values()
            .any(|t| t.connects(a, b) || (t.contains_node(a) && t.contains_node(b)))
        {
            return true;
        }
        match (self.topologies.get(a), self.topologies.get(b)) {
            (Some(ta), Some(tb)) => overlaps(ta, tb),
            _ => false,
        }
    }

    /// Union of the fragments recalled for `a` and `b`
    pub fn topology_between(&self, a: &str, b: &str) -> Topology {
        let mut merged = Topology::default();
        for entity in [a, b] {
            if let Some(fragment) = self.topologies.get(entity) {
                merged.merge(fragment);
            }
        }
        merged
    }

    /// Union of every recalled fragment
    pub fn merged_topology(&self) -> Topology {
        let mut keys: Vec<&String> = self.topologies.keys().collect();
        keys.sort();
        let mut merged = Topology::default();
        for key in keys {
            merged.merge(&self.topologies[key]);
        }
        merged
    }
}

fn overlaps(a: &Topology, b: &Topology) -> bool {
    let nodes_a: HashSet<&str> = a.nodes.iter().map(|n| n.s_id.as_str()).collect();
    let nodes_b: HashSet<&str> = b.nodes.iter().map(|n| n.s_id.as_str()).collect();
    if !nodes_a.is_disjoint(&nodes_b) {
        return true;
    }
    a.edges.iter().any(|e| {
        nodes_b.contains(e.source_object_id.as_str()) || nodes_b.contains(e.target_object_id.as_str())
    }) || b.edges.iter().any(|e| {
        nodes_a.contains(e.source_object_id.as_str()) || nodes_a.contains(e.target_object_id.as_str())
    })
}

/// Recalls one-hop topology for the entities of a problem
#[derive(Debug, Clone)]
pub struct GraphRecall {
    graph: Arc<dyn GraphQuery>,
}

impl GraphRecall {
    pub fn new(graph: Arc<dyn GraphQuery>) -> Self {
        Self { graph }
    }

    /// Fetch a forward subgraph per object class and file the resulting
    /// fragment under every affected entity it contains. Graph failures
    /// leave the affected entities without a fragment.
    #[instrument(skip_all, fields(service = "rca", problem_id = problem.problem_id))]
    pub async fn recall(
        &self,
        problem: &Problem,
        fault_points: &[FaultPointObject],
    ) -> HashMap<String, Topology> {
        let scope: HashSet<String> = problem.affected_entity_ids.iter().cloned().collect();
        let mut by_class: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for fp in fault_points {
            if fp.entity_object_id.is_empty() || fp.entity_object_class.is_empty() {
                continue;
            }
            let ids = by_class.entry(fp.entity_object_class.as_str()).or_default();
            if !ids.contains(&fp.entity_object_id) {
                ids.push(fp.entity_object_id.clone());
            }
        }

        let mut topologies: HashMap<String, Topology> = HashMap::new();
        for (class, ids) in by_class {
            let Some(fragment) = self.recall_class(class, &ids, &scope).await else {
                continue;
            };
            if fragment.nodes.is_empty() {
                continue;
            }
            for entity in &problem.affected_entity_ids {
                if !fragment.contains_node(entity) {
                    continue;
                }
                topologies
                    .entry(entity.clone())
                    .and_modify(|existing| existing.merge(&fragment))
                    .or_insert_with(|| fragment.clone());
            }
        }
        debug!(entities = topologies.len(), "Topology recalled");
        topologies
    }

    async fn recall_class(
        &self,
        class: &str,
        ids: &[String],
        scope: &HashSet<String>,
    ) -> Option<Topology> {
        let request = SubgraphRequest::new(class, ids, Direction::Forward);
        let response = match self.graph.subgraph(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(class, error = %e, "Subgraph recall failed");
                return None;
            }
        };
        if !response.objects.is_empty() {
            return Some(response.to_topology(scope));
        }

        // No subgraph: fall back to bare object info.
        match self.graph.object_info(class, ids).await {
            Ok(nodes) => Some(Topology {
                nodes: nodes
                    .into_iter()
                    .filter(|n| scope.contains(&n.s_id) && is_allowed_class(&n.object_class))
                    .collect(),
                edges: Vec::new(),
            }),
            Err(e) => {
                warn!(class, error = %e, "Object info recall failed");
                None
            }
        }
    }
}
