//! Object-class cache.
//!
//! Maps an entity object name to the object type and instance id known to
//! the knowledge network. The whole map is rebuilt on every refresh and
//! swapped in as a new snapshot, so lookups never wait on a refresh.

use itops_core::config::ObjectCacheConfig;
use itops_core::{Error, Result};
use itops_platform::graph::GraphQuery;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Object type and instance resolved for an entity name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityObjectInfo {
    pub object_type_id: String,
    pub object_id: String,
    pub name: String,
}

/// Resolution of entity names
pub trait ObjectLookup: Send + Sync + Debug {
    fn lookup(&self, name: &str) -> Result<EntityObjectInfo>;
}

/// Snapshot-swapping cache fed from the knowledge graph
#[derive(Debug)]
pub struct ObjectClassCache {
    graph: Arc<dyn GraphQuery>,
    config: ObjectCacheConfig,
    snapshot: RwLock<Arc<HashMap<String, EntityObjectInfo>>>,
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// `k8s_cluster:<c>,namespace:<ns>,name:<name>`, missing parts left empty
pub fn composite_key(properties: &Map<String, Value>) -> String {
    format!(
        "k8s_cluster:{},namespace:{},name:{}",
        as_text(properties.get("k8s_cluster")),
        as_text(properties.get("namespace")),
        as_text(properties.get("name"))
    )
}

impl ObjectClassCache {
    pub fn new(graph: Arc<dyn GraphQuery>, config: ObjectCacheConfig) -> Self {
        Self {
            graph,
            config,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the snapshot from every object type.
    ///
    /// Failing to list object types is an error; failing one type only
    /// warns and keeps that type's previous entries. Returns the key count.
    #[instrument(skip(self), fields(service = "object_cache"))]
    pub async fn warmup(&self) -> Result<usize> {
        let object_types = self.graph.object_types().await?;
        info!(count = object_types.len(), "Fetched object types");

        let previous = Arc::clone(&self.snapshot.read());
        let mut next = HashMap::new();
        let mut failed = HashSet::new();

        for object_type in &object_types {
            match self
                .graph
                .all_objects(&object_type.id, self.config.page_size)
                .await
            {
                Ok(objects) => {
                    debug!(object_type = %object_type.id, objects = objects.len(), "Object type loaded");
                    Self::index(&mut next, &object_type.id, &objects);
                }
                Err(e) => {
                    warn!(object_type = %object_type.id, error = %e, "Object type warmup failed");
                    failed.insert(object_type.id.as_str());
                }
            }
        }

        if !failed.is_empty() {
            for (key, info) in previous.iter() {
                if failed.contains(info.object_type_id.as_str()) {
                    next.entry(key.clone()).or_insert_with(|| info.clone());
                }
            }
            warn!(
                object_types = object_types.len(),
                failed = failed.len(),
                "Object cache warmup finished with failures"
            );
        }

        let size = next.len();
        *self.snapshot.write() = Arc::new(next);
        Ok(size)
    }

    fn index(
        into: &mut HashMap<String, EntityObjectInfo>,
        object_type_id: &str,
        objects: &[Map<String, Value>],
    ) {
        for properties in objects {
            let object_id = as_text(properties.get("s_id"));
            if object_id.is_empty() {
                continue;
            }
            let info = EntityObjectInfo {
                object_type_id: object_type_id.to_string(),
                object_id,
                name: as_text(properties.get("name")),
            };
            if !info.name.is_empty() {
                into.insert(info.name.clone(), info.clone());
            }
            into.insert(composite_key(properties), info);
        }
    }

    /// Warm up, then refresh every interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.warmup_logged().await;
        self.refresh_until(cancel).await
    }

    /// Warm up, logging instead of failing. Returns the key count.
    pub async fn warmup_logged(&self) -> usize {
        match self.warmup().await {
            Ok(size) => {
                info!(entries = size, "Object cache warmed up");
                size
            }
            Err(e) => {
                warn!(error = %e, "Object cache warmup failed, retrying on next refresh");
                0
            }
        }
    }

    /// Refresh every interval until cancelled, without an initial warmup.
    pub async fn refresh_until(&self, cancel: CancellationToken) -> Result<()> {
        let period = if self.config.refresh_interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            self.config.refresh_interval
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!(interval = ?period, "Object cache refresher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Object cache refresher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.warmup().await {
                        Ok(size) => debug!(entries = size, "Object cache refreshed"),
                        Err(e) => warn!(error = %e, "Object cache refresh failed"),
                    }
                }
            }
        }
    }
}

impl ObjectLookup for ObjectClassCache {
    fn lookup(&self, name: &str) -> Result<EntityObjectInfo> {
        if name.is_empty() {
            return Err(Error::validation("entity object name is empty"));
        }
        self.snapshot
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no object found for entity name {name}")))
    }
}

/// Fixed name table, for wiring without a knowledge graph and for tests
#[derive(Debug, Default)]
pub struct StaticObjects {
    entries: HashMap<String, EntityObjectInfo>,
}

impl StaticObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, object_type_id: &str, object_id: &str) -> Self {
        self.entries.insert(
            name.to_string(),
            EntityObjectInfo {
                object_type_id: object_type_id.to_string(),
                object_id: object_id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }
}

impl ObjectLookup for StaticObjects {
    fn lookup(&self, name: &str) -> Result<EntityObjectInfo> {
        if name.is_empty() {
            return Err(Error::validation("entity object name is empty"));
        }
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no object found for entity name {name}")))
    }
}
