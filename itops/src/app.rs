//! Application wiring and supervision.

use anyhow::{anyhow, Context, Result};
use itops_api::{ApiServer, ApiState};
use itops_core::config::{Config, ConfigManager, StorageBackend};
use itops_core::idgen::{IdGenerator, SequenceIdGenerator};
use itops_correlation::CorrelationService;
use itops_ingestion::{MessagePublisher, StandardizerRegistry, StreamFactory};
use itops_platform::agent::{AgentApi, AgentClient};
use itops_platform::graph::{GraphClient, GraphQuery};
use itops_platform::http::PlatformHttp;
use itops_rca::RcaEngine;
use itops_storage::memory::MemoryStore;
use itops_storage::opensearch::{OpenSearchStore, OpenSearchStoreConfig};
use itops_storage::repo::IndexNames;
use itops_storage::{DocumentStore, Repositories};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Every long-running component, built but not yet started
#[derive(Debug)]
pub(crate) struct Application {
    config: Arc<ConfigManager>,
    correlation: Arc<CorrelationService>,
    rca: Arc<RcaEngine>,
    api: ApiServer,
    raw_events: Arc<dyn MessagePublisher>,
}

fn repositories(config: &Config) -> Result<Repositories> {
    let names = IndexNames::with_prefix(&config.storage.index_prefix);
    let store: Arc<dyn DocumentStore> = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using the in-memory document store, data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::OpenSearch => {
            let store_config = OpenSearchStoreConfig::from(&config.dep_services.opensearch);
            info!(url = %store_config.url, "Using OpenSearch document store");
            Arc::new(OpenSearchStore::new(store_config).context("Failed to build OpenSearch client")?)
        }
    };
    Ok(Repositories::from_store(store, names))
}

impl Application {
    pub(crate) fn build(config: Arc<ConfigManager>) -> Result<Self> {
        let snapshot = config.snapshot();
        let repos = repositories(&snapshot)?;
        let ids: Arc<dyn IdGenerator> = Arc::new(SequenceIdGenerator::new());

        let http = PlatformHttp::from_config(&snapshot.platform, config.clone())
            .context("Failed to build platform HTTP client")?;
        let graph: Arc<dyn GraphQuery> = Arc::new(GraphClient::new(http.clone()));
        let agent: Arc<dyn AgentApi> = Arc::new(
            AgentClient::new(
                http,
                snapshot.platform.agents.causal_analysis.clone(),
                snapshot.platform.agents.problem_summary.clone(),
                snapshot.rca.agent_call_timeout,
            )
            .context("Failed to build agent client")?,
        );

        let streams = StreamFactory::from_config(&snapshot).context("Failed to build message streams")?;
        let correlation = CorrelationService::build(
            config.clone(),
            repos.clone(),
            ids.clone(),
            graph.clone(),
            &streams,
            &StandardizerRegistry::new(),
        )
        .context("Failed to build correlation service")?;
        let rca = RcaEngine::build(
            config.clone(),
            repos.clone(),
            ids,
            graph,
            agent,
            correlation.problem_handler(),
            &streams,
        )
        .context("Failed to build RCA engine")?;

        let raw_events = streams
            .publisher(&snapshot.kafka.raw_events.topic)
            .context("Failed to build raw events publisher")?;
        let api = ApiServer::new(
            snapshot.api.clone(),
            ApiState::new(repos, correlation.problems(), raw_events.clone()),
        );

        Ok(Self {
            config,
            correlation: Arc::new(correlation),
            rca: Arc::new(rca),
            api,
            raw_events,
        })
    }

    /// Run every component until `cancel` fires or one of them fails, then
    /// close the streams. The first failure is returned.
    pub(crate) async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Self {
            config,
            correlation,
            rca,
            api,
            raw_events,
        } = self;
        info!(address = %api.address(), "Starting components");

        let mut tasks: JoinSet<(&'static str, itops_core::Result<()>)> = JoinSet::new();
        {
            let correlation = Arc::clone(&correlation);
            let cancel = cancel.clone();
            tasks.spawn(async move { ("correlation", correlation.run(cancel).await) });
        }
        {
            let rca = Arc::clone(&rca);
            let cancel = cancel.clone();
            tasks.spawn(async move { ("rca", rca.run(cancel).await) });
        }
        {
            let cancel = cancel.clone();
            tasks.spawn(async move { ("api", api.run(cancel).await) });
        }
        {
            let config = Arc::clone(&config);
            let cancel = cancel.clone();
            tasks.spawn(async move { ("config-watcher", config.watch_files(cancel).await) });
        }
        {
            let config = Arc::clone(&config);
            let cancel = cancel.clone();
            tasks.spawn(async move { ("config-refresher", config.run_remote_refresher(cancel).await) });
        }

        let mut failure: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(task = name, "Task finished"),
                Ok((name, Err(e))) if e.is_cancellation() => info!(task = name, "Task cancelled"),
                Ok((name, Err(e))) => {
                    error!(task = name, error = %e, "Task failed, shutting down");
                    failure.get_or_insert_with(|| anyhow::Error::new(e).context(format!("{name} failed")));
                    cancel.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Task aborted, shutting down");
                    failure.get_or_insert_with(|| anyhow!("task aborted: {e}"));
                    cancel.cancel();
                }
            }
        }

        close_all(&correlation, &rca, &raw_events).await;
        info!("Shutdown complete");
        failure.map_or(Ok(()), Err)
    }

    /// Release streams without running anything
    pub(crate) async fn close(&self) {
        close_all(&self.correlation, &self.rca, &self.raw_events).await;
    }
}

async fn close_all(correlation: &CorrelationService, rca: &RcaEngine, raw_events: &Arc<dyn MessagePublisher>) {
    correlation.close().await;
    rca.close().await;
    if let Err(e) = raw_events.close().await {
        warn!(error = %e, "Failed to close raw events publisher");
    }
}
