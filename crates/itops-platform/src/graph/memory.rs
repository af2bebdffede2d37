use super::{
    Direction, GraphQuery, ObjectPage, ObjectType, PathRelation, RelationPath, SubgraphObject,
    SubgraphRequest, SubgraphResponse, UniqueIdentities,
};
use crate::error::GraphError;
use async_trait::async_trait;
use itops_core::model::Node;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
struct GraphData {
    nodes: BTreeMap<String, Node>,
    edges: Vec<(String, String, String)>,
}

/// Knowledge graph held in memory.
///
/// Answers the same queries as [`super::GraphClient`]; used when no platform
/// is configured and by tests.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    data: RwLock<GraphData>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object
    pub fn with_node(self, s_id: &str, class: &str, name: &str) -> Self {
        self.add_node(s_id, class, name);
        self
    }

    /// Add a directed relation `source --class--> target`
    pub fn with_edge(self, class: &str, source: &str, target: &str) -> Self {
        self.add_edge(class, source, target);
        self
    }

    pub fn add_node(&self, s_id: &str, class: &str, name: &str) {
        self.data.write().nodes.insert(
            s_id.to_string(),
            Node {
                s_id: s_id.to_string(),
                name: name.to_string(),
                object_class: class.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn add_edge(&self, class: &str, source: &str, target: &str) {
        self.data
            .write()
            .edges
            .push((class.to_string(), source.to_string(), target.to_string()));
    }

    fn handle(node: &Node) -> String {
        format!("{}-{}", node.object_class, node.s_id)
    }

    fn object(node: &Node) -> SubgraphObject {
        let mut properties = Map::new();
        properties.insert("s_id".to_string(), json!(node.s_id));
        properties.insert("name".to_string(), json!(node.name));
        properties.insert("ip_address".to_string(), json!(node.ip_address));
        SubgraphObject {
            id: Self::handle(node),
            unique_identities: UniqueIdentities {
                s_id: node.s_id.clone(),
            },
            object_type_id: node.object_class.clone(),
            object_type_name: node.object_class.clone(),
            display: node.name.clone(),
            properties,
        }
    }
}

#[async_trait]
impl GraphQuery for InMemoryGraph {
    async fn subgraph(&self, request: &SubgraphRequest) -> Result<SubgraphResponse, GraphError> {
        let data = self.data.read();
        let mut frontier: HashSet<String> = request
            .condition
            .values()
            .filter(|id| {
                data.nodes.get(*id).map_or(false, |n| {
                    n.object_class
                        .eq_ignore_ascii_case(&request.source_object_type_id)
                })
            })
            .map(str::to_string)
            .collect();
        let mut visited = frontier.clone();
        let mut paths = Vec::new();
        let mut seen_edges = HashSet::new();

        for _ in 0..request.path_length.max(1) {
            let mut next = HashSet::new();
            for (index, (class, source, target)) in data.edges.iter().enumerate() {
                let forward = frontier.contains(source);
                let backward = frontier.contains(target);
                let reached = match request.direction {
                    Direction::Forward if forward => target,
                    Direction::Backward if backward => source,
                    Direction::Bidirectional if forward => target,
                    Direction::Bidirectional if backward => source,
                    _ => continue,
                };
                let (Some(src), Some(tgt)) = (data.nodes.get(source), data.nodes.get(target))
                else {
                    continue;
                };
                if seen_edges.insert(index) {
                    paths.push(RelationPath {
                        relations: vec![PathRelation {
                            relation_type_id: class.clone(),
                            relation_type_name: class.clone(),
                            source_object_id: Self::handle(src),
                            target_object_id: Self::handle(tgt),
                        }],
                        length: 1,
                    });
                }
                if visited.insert(reached.clone()) {
                    next.insert(reached.clone());
                }
            }
            frontier = next;
        }

        let objects = visited
            .iter()
            .filter_map(|id| data.nodes.get(id))
            .map(|node| (Self::handle(node), Self::object(node)))
            .collect();
        Ok(SubgraphResponse {
            objects,
            relation_paths: paths,
            search_after: Vec::new(),
        })
    }

    async fn object_info(&self, class: &str, ids: &[String]) -> Result<Vec<Node>, GraphError> {
        let data = self.data.read();
        Ok(ids
            .iter()
            .filter_map(|id| data.nodes.get(id))
            .filter(|n| n.object_class.eq_ignore_ascii_case(class))
            .cloned()
            .collect())
    }

    async fn object_types(&self) -> Result<Vec<ObjectType>, GraphError> {
        let data = self.data.read();
        let classes: std::collections::BTreeSet<&str> =
            data.nodes.values().map(|n| n.object_class.as_str()).collect();
        Ok(classes
            .into_iter()
            .map(|class| ObjectType {
                id: class.to_string(),
                name: class.to_string(),
                tags: Vec::new(),
            })
            .collect())
    }

    async fn object_page(
        &self,
        object_type_id: &str,
        _limit: usize,
        search_after: Vec<Value>,
    ) -> Result<ObjectPage, GraphError> {
        if !search_after.is_empty() {
            return Ok(ObjectPage::default());
        }
        let data = self.data.read();
        let datas = data
            .nodes
            .values()
            .filter(|n| n.object_class == object_type_id)
            .map(|n| Self::object(n).properties)
            .collect();
        Ok(ObjectPage {
            datas,
            search_after: Vec::new(),
        })
    }
}
