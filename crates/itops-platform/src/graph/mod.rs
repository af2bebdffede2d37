//! Knowledge-graph query client.
//!
//! Subgraph and object-info queries used by spatial correlation and RCA
//! recall, plus the object-type listing behind the object-class cache.

mod memory;
mod spatial;

pub use memory::InMemoryGraph;
pub use spatial::SpatialChecker;

use crate::error::GraphError;
use crate::http::PlatformHttp;
use async_trait::async_trait;
use itops_core::model::{is_allowed_class, Node, Relation, Topology};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use tracing::{debug, instrument};

/// Maximum objects returned by one subgraph query
pub const QUERY_LIMIT: usize = 10_000;

/// Properties requested by object-info queries
pub const OBJECT_INFO_PROPERTIES: &[&str] =
    &["s_id", "name", "ip_address", "s_create_time", "s_update_time"];

/// Traversal direction of a subgraph query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Bidirectional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCondition {
    pub field: String,
    pub operation: String,
    pub value: String,
}

/// `OR` over `s_id == value` conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operation: String,
    pub sub_conditions: Vec<SubCondition>,
}

impl Condition {
    /// Match any of `ids` on the `s_id` field. Empty ids are skipped.
    pub fn any_sid<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            operation: "or".to_string(),
            sub_conditions: ids
                .into_iter()
                .filter(|id| !id.as_ref().is_empty())
                .map(|id| SubCondition {
                    field: "s_id".to_string(),
                    operation: "==".to_string(),
                    value: id.as_ref().to_string(),
                })
                .collect(),
        }
    }

    /// Condition values
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.sub_conditions.iter().map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphRequest {
    pub source_object_type_id: String,
    pub condition: Condition,
    pub direction: Direction,
    pub path_length: u32,
    pub need_total: bool,
    pub limit: usize,
}

impl SubgraphRequest {
    pub fn new(class: &str, ids: &[String], direction: Direction) -> Self {
        Self {
            source_object_type_id: class.to_string(),
            condition: Condition::any_sid(ids),
            direction,
            path_length: 1,
            need_total: false,
            limit: QUERY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniqueIdentities {
    #[serde(default)]
    pub s_id: String,
}

/// One object in a subgraph response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub unique_identities: UniqueIdentities,
    #[serde(default)]
    pub object_type_id: String,
    #[serde(default)]
    pub object_type_name: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl SubgraphObject {
    /// Entity id, from the unique identities or the properties
    pub fn s_id(&self) -> Option<&str> {
        if !self.unique_identities.s_id.is_empty() {
            return Some(&self.unique_identities.s_id);
        }
        self.properties
            .get("s_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Convert to a topology node
    pub fn to_node(&self) -> Option<Node> {
        let s_id = self.s_id()?;
        let mut node = node_from_properties(&self.properties, s_id);
        node.object_class = self.object_type_id.clone();
        if node.name.is_empty() {
            node.name = self.display.clone();
        }
        Some(node)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRelation {
    #[serde(default)]
    pub relation_type_id: String,
    #[serde(default)]
    pub relation_type_name: String,
    pub source_object_id: String,
    pub target_object_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationPath {
    #[serde(default)]
    pub relations: Vec<PathRelation>,
    #[serde(default)]
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphResponse {
    /// Objects keyed by handle
    #[serde(default)]
    pub objects: HashMap<String, SubgraphObject>,
    #[serde(default)]
    pub relation_paths: Vec<RelationPath>,
    #[serde(default)]
    pub search_after: Vec<Value>,
}

impl SubgraphResponse {
    /// Every entity id in the response
    pub fn entity_ids(&self) -> HashSet<String> {
        self.objects
            .values()
            .filter_map(SubgraphObject::s_id)
            .map(str::to_string)
            .collect()
    }

    /// Build a topology restricted to `scope`: nodes must be in scope and of
    /// an allow-listed class, edges must have both endpoints in scope.
    pub fn to_topology(&self, scope: &HashSet<String>) -> Topology {
        let mut topology = Topology::default();
        let mut seen = HashSet::new();
        for object in self.objects.values() {
            let Some(node) = object.to_node() else {
                continue;
            };
            if scope.contains(&node.s_id)
                && is_allowed_class(&node.object_class)
                && seen.insert(node.s_id.clone())
            {
                topology.nodes.push(node);
            }
        }

        let handle_to_sid = |handle: &str| -> Option<String> {
            self.objects
                .get(handle)
                .and_then(SubgraphObject::s_id)
                .map(str::to_string)
        };
        let mut edge_ids = HashSet::new();
        for relation in self.relation_paths.iter().flat_map(|p| &p.relations) {
            let (Some(source), Some(target)) = (
                handle_to_sid(&relation.source_object_id),
                handle_to_sid(&relation.target_object_id),
            ) else {
                continue;
            };
            if !scope.contains(&source) || !scope.contains(&target) {
                continue;
            }
            let edge = Relation::synthesize(&relation.relation_type_id, &source, &target);
            if edge_ids.insert(edge.relation_id.clone()) {
                topology.edges.push(edge);
            }
        }
        topology
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfoRequest {
    pub condition: Condition,
    pub need_total: bool,
    pub limit: usize,
    pub properties: Vec<String>,
}

/// Object type of the knowledge network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ObjectTypeList {
    #[serde(default)]
    entries: Vec<ObjectType>,
}

/// One page of object instances
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPage {
    #[serde(default)]
    pub datas: Vec<Map<String, Value>>,
    #[serde(default)]
    pub search_after: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct ObjectPageRequest {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    need_total: bool,
    limit: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search_after: Vec<Value>,
}

/// Build a node from raw object properties.
pub fn node_from_properties(properties: &Map<String, Value>, s_id: &str) -> Node {
    let text = |key: &str| -> String {
        match properties.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };
    let ip_address = match properties.get("ip_address") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };
    Node {
        s_id: s_id.to_string(),
        s_create_time: text("s_create_time"),
        s_update_time: text("s_update_time"),
        name: text("name"),
        ip_address,
        object_class: String::new(),
        object_impact_level: Default::default(),
    }
}

/// Knowledge-graph capability used by correlation, RCA and the object cache
#[async_trait]
pub trait GraphQuery: Send + Sync + Debug {
    /// Subgraph rooted at the condition's objects
    async fn subgraph(&self, request: &SubgraphRequest) -> Result<SubgraphResponse, GraphError>;

    /// Bare nodes for `ids` of object type `class`
    async fn object_info(&self, class: &str, ids: &[String]) -> Result<Vec<Node>, GraphError>;

    /// Object types of the knowledge network
    async fn object_types(&self) -> Result<Vec<ObjectType>, GraphError>;

    /// One page of instances of an object type
    async fn object_page(
        &self,
        object_type_id: &str,
        limit: usize,
        search_after: Vec<Value>,
    ) -> Result<ObjectPage, GraphError>;

    /// Every instance of an object type, following `search_after`.
    async fn all_objects(
        &self,
        object_type_id: &str,
        page_size: usize,
    ) -> Result<Vec<Map<String, Value>>, GraphError> {
        let mut all = Vec::new();
        let mut cursor = Vec::new();
        loop {
            let page = self.object_page(object_type_id, page_size, cursor).await?;
            let done = page.datas.is_empty() || page.search_after.is_empty();
            all.extend(page.datas);
            if done {
                return Ok(all);
            }
            cursor = page.search_after;
        }
    }
}

/// HTTP client for the ontology query and manager APIs
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: PlatformHttp,
}

impl GraphClient {
    pub fn new(http: PlatformHttp) -> Self {
        Self { http }
    }

    fn knowledge_id(&self) -> Result<String, GraphError> {
        let kn = self.http.credentials().knowledge_id();
        if kn.is_empty() {
            Err(GraphError::NotConfigured(
                "knowledge network id is empty".to_string(),
            ))
        } else {
            Ok(kn)
        }
    }
}

#[async_trait]
impl GraphQuery for GraphClient {
    #[instrument(skip(self, request), fields(service = "graph", class = %request.source_object_type_id))]
    async fn subgraph(&self, request: &SubgraphRequest) -> Result<SubgraphResponse, GraphError> {
        if request.source_object_type_id.is_empty() {
            return Err(GraphError::InvalidRequest(
                "source object type is empty".to_string(),
            ));
        }
        if request.condition.sub_conditions.is_empty() {
            return Ok(SubgraphResponse::default());
        }
        let path = format!(
            "/api/ontology-query/v1/knowledge-networks/{}/subgraph",
            self.knowledge_id()?
        );
        let response: SubgraphResponse = self.http.query(&path, request).await?;
        debug!(
            objects = response.objects.len(),
            paths = response.relation_paths.len(),
            "Subgraph query returned"
        );
        Ok(response)
    }

    #[instrument(skip(self, ids), fields(service = "graph", count = ids.len()))]
    async fn object_info(&self, class: &str, ids: &[String]) -> Result<Vec<Node>, GraphError> {
        let condition = Condition::any_sid(ids);
        if condition.sub_conditions.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!(
            "/api/ontology-query/v1/knowledge-networks/{}/object-types/{}",
            self.knowledge_id()?,
            class
        );
        let request = ObjectInfoRequest {
            condition,
            need_total: false,
            limit: QUERY_LIMIT,
            properties: OBJECT_INFO_PROPERTIES.iter().map(|p| p.to_string()).collect(),
        };
        let page: ObjectPage = self.http.query(&path, &request).await?;
        Ok(page
            .datas
            .iter()
            .filter_map(|props| {
                let s_id = props.get("s_id").and_then(Value::as_str)?;
                let mut node = node_from_properties(props, s_id);
                node.object_class = class.to_string();
                Some(node)
            })
            .collect())
    }

    #[instrument(skip(self), fields(service = "graph"))]
    async fn object_types(&self) -> Result<Vec<ObjectType>, GraphError> {
        let path = format!(
            "/api/ontology-manager/v1/knowledge-networks/{}/object-types",
            self.knowledge_id()?
        );
        let list: ObjectTypeList = self.http.get(&path).await?;
        Ok(list.entries)
    }

    #[instrument(skip(self, search_after), fields(service = "graph"))]
    async fn object_page(
        &self,
        object_type_id: &str,
        limit: usize,
        search_after: Vec<Value>,
    ) -> Result<ObjectPage, GraphError> {
        let path = format!(
            "/api/ontology-query/v1/knowledge-networks/{}/object-types/{}",
            self.knowledge_id()?,
            object_type_id
        );
        let request = ObjectPageRequest {
            need_total: search_after.is_empty(),
            limit,
            search_after,
        };
        Ok(self.http.query(&path, &request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StaticCredentials;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn serve(app: Router, kn: &str) -> GraphClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        let http = PlatformHttp::new(
            &format!("http://{addr}"),
            Duration::from_secs(5),
            false,
            Arc::new(StaticCredentials::new("Bearer t", kn)),
        )
        .unwrap();
        GraphClient::new(http)
    }

    fn sample_response() -> Value {
        json!({
            "objects": {
                "host-srv-A": {
                    "id": "host-srv-A",
                    "unique_identities": {"s_id": "srv-A"},
                    "object_type_id": "host",
                    "properties": {"name": "host-A", "ip_address": ["10.0.0.1"]}
                },
                "host-srv-B": {
                    "id": "host-srv-B",
                    "unique_identities": {"s_id": "srv-B"},
                    "object_type_id": "host",
                    "properties": {"name": "host-B"}
                },
                "switch-1": {
                    "id": "switch-1",
                    "unique_identities": {"s_id": "sw-1"},
                    "object_type_id": "switch",
                    "properties": {}
                }
            },
            "relation_paths": [
                {"relations": [{"relation_type_id": "depends_on", "source_object_id": "host-srv-A", "target_object_id": "host-srv-B"}], "length": 1},
                {"relations": [{"relation_type_id": "uplink", "source_object_id": "host-srv-B", "target_object_id": "switch-1"}], "length": 1}
            ]
        })
    }

    #[test]
    fn test_topology_scoped_to_entities() {
        let response: SubgraphResponse = serde_json::from_value(sample_response()).unwrap();
        assert_eq!(response.entity_ids().len(), 3);

        let scope: HashSet<String> = ["srv-A", "srv-B", "sw-1"].iter().map(|s| s.to_string()).collect();
        let topology = response.to_topology(&scope);
        // switch is not an allow-listed class
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.edges.len(), 2);
        assert!(topology.edges.iter().any(|e| e.relation_id == "depends_on_srv-A_srv-B"));

        let narrow: HashSet<String> = ["srv-A"].iter().map(|s| s.to_string()).collect();
        let topology = response.to_topology(&narrow);
        assert_eq!(topology.nodes.len(), 1);
        assert!(topology.edges.is_empty());
        assert_eq!(topology.nodes[0].ip_address, vec!["10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn test_subgraph_sends_override_header() {
        let app = Router::new().route(
            "/api/ontology-query/v1/knowledge-networks/:kn/subgraph",
            post(
                |Path(kn): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(kn, "kn1");
                    assert_eq!(headers["x-http-method-override"], "GET");
                    assert_eq!(headers["authorization"], "Bearer t");
                    assert_eq!(body["direction"], "bidirectional");
                    assert_eq!(body["condition"]["operation"], "or");
                    assert_eq!(body["limit"], 10000);
                    Json(sample_response())
                },
            ),
        );
        let client = serve(app, "kn1").await;
        let request =
            SubgraphRequest::new("host", &["srv-A".to_string()], Direction::Bidirectional);
        let response = client.subgraph(&request).await.unwrap();
        assert!(response.entity_ids().contains("srv-B"));
    }

    #[tokio::test]
    async fn test_missing_knowledge_id() {
        let client = serve(Router::new(), "").await;
        let request = SubgraphRequest::new("host", &["a".to_string()], Direction::Forward);
        let err = client.subgraph(&request).await.unwrap_err();
        assert!(matches!(err, GraphError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_object_pages_follow_cursor() {
        let app = Router::new()
            .route(
                "/api/ontology-manager/v1/knowledge-networks/:kn/object-types",
                get(|| async { Json(json!({"entries": [{"id": "host", "name": "主机"}]})) }),
            )
            .route(
                "/api/ontology-query/v1/knowledge-networks/:kn/object-types/:ot",
                post(|Json(body): Json<Value>| async move {
                    if body.get("properties").is_some() {
                        assert_eq!(body["condition"]["sub_conditions"][0]["value"], "srv-A");
                        Json(json!({"datas": [{"s_id": "srv-A", "name": "host-A"}]}))
                    } else if body.get("search_after").is_none() {
                        assert_eq!(body["need_total"], true);
                        Json(json!({"datas": [{"s_id": "srv-A", "name": "host-A"}], "search_after": [1]}))
                    } else {
                        Json(json!({"datas": [], "search_after": []}))
                    }
                }),
            );
        let client = serve(app, "kn1").await;
        let types = client.object_types().await.unwrap();
        assert_eq!(types[0].id, "host");

        let objects = client.all_objects("host", 1000).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["name"], "host-A");

        let nodes = client.object_info("host", &["srv-A".to_string()]).await.unwrap();
        assert_eq!(nodes[0].s_id, "srv-A");
        assert_eq!(nodes[0].object_class, "host");
    }

    #[tokio::test]
    async fn test_auth_failure_maps() {
        let app = Router::new().route(
            "/api/ontology-query/v1/knowledge-networks/:kn/subgraph",
            post(|| async { (StatusCode::FORBIDDEN, "denied") }),
        );
        let client = serve(app, "kn1").await;
        let request = SubgraphRequest::new("host", &["a".to_string()], Direction::Forward);
        let err = client.subgraph(&request).await.unwrap_err();
        assert!(matches!(err, GraphError::Authentication(_)));
    }
}
