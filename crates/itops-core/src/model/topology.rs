use super::fault::FaultPointObject;
use super::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Object classes that may appear in an RCA network.
pub const ALLOWED_OBJECT_CLASSES: &[&str] = &[
    "service",
    "host",
    "pod",
    "middleware",
    "database",
    "physical_machine",
    "network_device",
];

pub fn is_allowed_class(class: &str) -> bool {
    ALLOWED_OBJECT_CLASSES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(class))
}

/// Knowledge-graph entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub s_id: String,
    #[serde(default)]
    pub s_create_time: String,
    #[serde(default)]
    pub s_update_time: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_address: Vec<String>,
    #[serde(default)]
    pub object_class: String,
    #[serde(default)]
    pub object_impact_level: Severity,
}

/// Knowledge-graph edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub relation_id: String,
    pub relation_class: String,
    pub source_object_id: String,
    pub target_object_id: String,
}

impl Relation {
    /// Edge id synthesized from its class and endpoints.
    pub fn synthesize(class: &str, source: &str, target: &str) -> Self {
        Self {
            relation_id: format!("{class}_{source}_{target}"),
            relation_class: class.to_string(),
            source_object_id: source.to_string(),
            target_object_id: target.to_string(),
        }
    }

    pub fn touches(&self, s_id: &str) -> bool {
        self.source_object_id == s_id || self.target_object_id == s_id
    }
}

/// A recalled topology fragment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Relation>,
}

impl Topology {
    /// Merge another fragment, deduplicating nodes by `s_id` and edges by id.
    pub fn merge(&mut self, other: &Topology) {
        let mut node_ids: HashSet<String> = self.nodes.iter().map(|n| n.s_id.clone()).collect();
        for node in &other.nodes {
            if node_ids.insert(node.s_id.clone()) {
                self.nodes.push(node.clone());
            }
        }
        let mut edge_ids: HashSet<String> =
            self.edges.iter().map(|e| e.relation_id.clone()).collect();
        for edge in &other.edges {
            if edge_ids.insert(edge.relation_id.clone()) {
                self.edges.push(edge.clone());
            }
        }
    }

    pub fn contains_node(&self, s_id: &str) -> bool {
        self.nodes.iter().any(|n| n.s_id == s_id)
    }

    /// True when an edge joins `a` and `b` in either direction.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        self.edges.iter().any(|e| {
            (e.source_object_id == a && e.target_object_id == b)
                || (e.source_object_id == b && e.target_object_id == a)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Network node enriched with fault memberships.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaNode {
    #[serde(flatten)]
    pub node: Node,
    #[serde(default)]
    pub relation_event_ids: Vec<String>,
    #[serde(default)]
    pub relation_fault_point_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaNetwork {
    pub nodes: Vec<RcaNode>,
    pub edges: Vec<Relation>,
}

/// Human-facing summary of a problem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaContext {
    pub occurrence: Occurrence,
    /// Fault points ordered by occur time
    pub backtrace: Vec<FaultPointObject>,
    pub network: RcaNetwork,
}

/// Document stored in `Problem.rca_results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaResults {
    pub adp_kn_id: String,
    pub rca_id: String,
    pub rca_context: RcaContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node {
            s_id: id.to_string(),
            object_class: "host".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_deduplicates() {
        let mut a = Topology {
            nodes: vec![node("a"), node("b")],
            edges: vec![Relation::synthesize("depends_on", "a", "b")],
        };
        let b = Topology {
            nodes: vec![node("b"), node("c")],
            edges: vec![
                Relation::synthesize("depends_on", "a", "b"),
                Relation::synthesize("depends_on", "b", "c"),
            ],
        };
        a.merge(&b);
        assert_eq!(a.nodes.len(), 3);
        assert_eq!(a.edges.len(), 2);
        assert!(a.connects("c", "b"));
        assert!(!a.connects("a", "c"));
    }

    #[test]
    fn test_allowed_class() {
        assert!(is_allowed_class("host"));
        assert!(is_allowed_class("Pod"));
        assert!(!is_allowed_class("fault_point_object"));
    }

    #[test]
    fn test_rca_node_flattens() {
        let n = RcaNode {
            node: node("x"),
            relation_event_ids: vec!["1".into()],
            relation_fault_point_ids: vec![7],
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["s_id"], "x");
        assert_eq!(v["relation_fault_point_ids"][0], 7);
    }
}
