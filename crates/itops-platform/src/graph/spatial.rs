use super::{Direction, GraphQuery, SubgraphRequest};
use crate::error::GraphError;
use itops_core::model::{FaultPointObject, Problem};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Topological correlation of a fault point against open problems.
///
/// A problem is correlated when one of its affected entities lies within one
/// hop, in either direction, of the fault point's entity.
#[derive(Debug, Clone)]
pub struct SpatialChecker {
    graph: Arc<dyn GraphQuery>,
}

impl SpatialChecker {
    pub fn new(graph: Arc<dyn GraphQuery>) -> Self {
        Self { graph }
    }

    /// Entity ids within one hop of the fault point's entity, root included.
    pub async fn neighborhood(&self, fp: &FaultPointObject) -> Result<HashSet<String>, GraphError> {
        if fp.entity_object_id.is_empty() {
            return Err(GraphError::InvalidRequest(format!(
                "fault point {} has no entity object id",
                fp.fault_id
            )));
        }
        let request = SubgraphRequest::new(
            &fp.entity_object_class,
            std::slice::from_ref(&fp.entity_object_id),
            Direction::Bidirectional,
        );
        let response = self.graph.subgraph(&request).await?;
        let mut ids = response.entity_ids();
        ids.insert(fp.entity_object_id.clone());
        debug!(fault_id = fp.fault_id, neighbors = ids.len(), "Spatial neighborhood resolved");
        Ok(ids)
    }

    /// Keep the problems spatially correlated with `fp`, preserving order.
    pub async fn filter_correlated(
        &self,
        fp: &FaultPointObject,
        problems: Vec<Problem>,
    ) -> Result<Vec<Problem>, GraphError> {
        if problems.is_empty() {
            return Ok(problems);
        }
        let neighborhood = self.neighborhood(fp).await?;
        let total = problems.len();
        let correlated: Vec<Problem> = problems
            .into_iter()
            .filter(|p| p.affected_entity_ids.iter().any(|e| neighborhood.contains(e)))
            .collect();
        info!(
            fault_id = fp.fault_id,
            candidates = total,
            correlated = correlated.len(),
            "Spatial correlation evaluated"
        );
        Ok(correlated)
    }
}
