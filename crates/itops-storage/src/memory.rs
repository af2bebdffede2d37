//! In-process document store.

use crate::query::{Filter, SearchRequest};
use crate::{BulkOutcome, DocumentStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

/// Document store backed by a concurrent map of indices.
///
/// Partial updates deep-merge objects and replace everything else, matching
/// the `doc` semantics of the HTTP backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    indices: DashMap<String, HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in an index
    pub fn len(&self, index: &str) -> usize {
        self.indices.get(index).map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }
}

fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                let nested = value.is_object() && dst.get(&key).map_or(false, Value::is_object);
                if nested {
                    if let Some(existing) = dst.get_mut(&key) {
                        merge(existing, value);
                    }
                } else {
                    dst.insert(key, value);
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .indices
            .get(index)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn mget(&self, index: &str, ids: &[String]) -> StoreResult<Vec<Value>> {
        let Some(docs) = self.indices.get(index) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> StoreResult<Vec<Value>> {
        let mut hits: Vec<Value> = match self.indices.get(index) {
            Some(docs) => docs
                .values()
                .filter(|doc| request.matches(doc))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        request.finish(&mut hits);
        Ok(hits)
    }

    async fn index(&self, index: &str, id: &str, document: Value) -> StoreResult<()> {
        self.indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn update(&self, index: &str, id: &str, partial: Value) -> StoreResult<()> {
        let not_found = || StoreError::NotFound {
            index: index.to_string(),
            id: id.to_string(),
        };
        let mut docs = self.indices.get_mut(index).ok_or_else(not_found)?;
        let doc = docs.get_mut(id).ok_or_else(not_found)?;
        merge(doc, partial);
        Ok(())
    }

    async fn bulk_update(&self, index: &str, updates: Vec<(String, Value)>) -> StoreResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for (id, partial) in updates {
            match self.update(index, &id, partial).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => outcome.failed.push((id, e.to_string())),
            }
        }
        Ok(outcome)
    }

    async fn count(&self, index: &str, filters: &[Filter]) -> StoreResult<u64> {
        Ok(self
            .indices
            .get(index)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filters.iter().all(|f| f.matches(doc)))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
