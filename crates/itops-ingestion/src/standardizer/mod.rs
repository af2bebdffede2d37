//! Source-specific alert standardizers.
//!
//! The registry maps a source type (trimmed, lowercased) to a factory. The
//! configured `ingest.source.type` picks the standardizer at startup; an
//! unknown type fails construction.

mod zabbix;

pub use zabbix::{ZabbixWebhook, ZabbixWebhookStandardizer, ZABBIX_WEBHOOK_SOURCE};

use crate::object_cache::ObjectLookup;
use async_trait::async_trait;
use itops_core::idgen::IdGenerator;
use itops_core::model::RawEvent;
use itops_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Converts an upstream payload into a [`RawEvent`] with a fresh `event_id`
#[async_trait]
pub trait Standardizer: Send + Sync + fmt::Debug {
    /// Source type served by this standardizer
    fn source(&self) -> &str;

    async fn standardize(&self, payload: &[u8]) -> Result<RawEvent>;
}

/// Collaborators handed to every factory
#[derive(Debug, Clone)]
pub struct StandardizerContext {
    pub ids: Arc<dyn IdGenerator>,
    pub objects: Arc<dyn ObjectLookup>,
}

type Factory = Box<dyn Fn(&StandardizerContext) -> Arc<dyn Standardizer> + Send + Sync>;

/// Source type to standardizer factory
pub struct StandardizerRegistry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for StandardizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardizerRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

impl Default for StandardizerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ZABBIX_WEBHOOK_SOURCE, |ctx| {
            Arc::new(ZabbixWebhookStandardizer::new(
                Arc::clone(&ctx.ids),
                Arc::clone(&ctx.objects),
            ))
        });
        registry
    }
}

fn normalize(source: &str) -> String {
    source.trim().to_lowercase()
}

impl StandardizerRegistry {
    /// Registry with the built-in adapters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing any previous one for the same source
    pub fn register<F>(&mut self, source: &str, factory: F)
    where
        F: Fn(&StandardizerContext) -> Arc<dyn Standardizer> + Send + Sync + 'static,
    {
        self.factories.insert(normalize(source), Box::new(factory));
    }

    /// Registered source types, sorted
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<_> = self.factories.keys().cloned().collect();
        sources.sort();
        sources
    }

    pub fn create(&self, source: &str, ctx: &StandardizerContext) -> Result<Arc<dyn Standardizer>> {
        let factory = self
            .factories
            .get(&normalize(source))
            .ok_or_else(|| Error::config(format!("unsupported source type: {source:?}")))?;
        Ok(factory(ctx))
    }
}
