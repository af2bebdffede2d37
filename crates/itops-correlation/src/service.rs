use crate::handler::ProblemHandler;
use crate::sweeper::{run_sweeper, Sweeper};
use crate::{FaultPointStage, IngestStage, ProblemStage};
use itops_core::config::ConfigManager;
use itops_core::idgen::IdGenerator;
use itops_core::{Error, Result};
use itops_ingestion::{
    MessageConsumer, MessageHandler, MessagePublisher, ObjectClassCache, StandardizerContext,
    StandardizerRegistry, StreamFactory,
};
use itops_platform::graph::{GraphQuery, SpatialChecker};
use itops_storage::Repositories;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Owns the correlation stages and their long-running loops: the object
/// cache refresher, the raw-events consumer and both expiration sweepers.
#[derive(Debug)]
pub struct CorrelationService {
    config: Arc<ConfigManager>,
    cache: Arc<ObjectClassCache>,
    consumer: Arc<dyn MessageConsumer>,
    publisher: Arc<dyn MessagePublisher>,
    ingest: Arc<IngestStage>,
    fault_points: Arc<FaultPointStage>,
    problems: Arc<ProblemStage>,
}

impl CorrelationService {
    /// Wire the stages. Fails when the configured source type has no
    /// standardizer or a stream cannot be built.
    pub fn build(
        config: Arc<ConfigManager>,
        repos: Repositories,
        ids: Arc<dyn IdGenerator>,
        graph: Arc<dyn GraphQuery>,
        streams: &StreamFactory,
        registry: &StandardizerRegistry,
    ) -> Result<Self> {
        let snapshot = config.snapshot();
        let cache = Arc::new(ObjectClassCache::new(
            Arc::clone(&graph),
            snapshot.object_cache.clone(),
        ));
        let standardizer = registry.create(
            &snapshot.app_config.ingest.source.source_type,
            &StandardizerContext {
                ids: Arc::clone(&ids),
                objects: cache.clone(),
            },
        )?;
        let consumer = streams.consumer(&snapshot.kafka.raw_events)?;
        let publisher = streams.publisher(&snapshot.kafka.problem_events.topic)?;

        let problems = Arc::new(ProblemStage::new(
            repos.clone(),
            Arc::clone(&ids),
            Arc::clone(&config),
            SpatialChecker::new(graph),
            Arc::clone(&publisher),
        ));
        let fault_points = Arc::new(FaultPointStage::new(
            repos.clone(),
            ids,
            Arc::clone(&config),
            problems.clone(),
        ));
        let ingest = Arc::new(IngestStage::new(
            standardizer,
            repos.raw_events.clone(),
            fault_points.clone(),
        ));

        info!(
            source = %snapshot.app_config.ingest.source.source_type,
            raw_events = %snapshot.kafka.raw_events.topic,
            problem_events = %snapshot.kafka.problem_events.topic,
            "Correlation service built"
        );
        Ok(Self {
            config,
            cache,
            consumer,
            publisher,
            ingest,
            fault_points,
            problems,
        })
    }

    /// Problem operations for the RCA engine and the HTTP API
    pub fn problem_handler(&self) -> Arc<dyn ProblemHandler> {
        self.problems.clone()
    }

    pub fn problems(&self) -> Arc<ProblemStage> {
        Arc::clone(&self.problems)
    }

    pub fn ingest(&self) -> Arc<IngestStage> {
        Arc::clone(&self.ingest)
    }

    /// Run every loop until `cancel` fires or one of them fails. The object
    /// cache is warmed up before the first event is consumed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.cache.warmup_logged().await;

        let sweep_interval = self.config.snapshot().correlation.sweep_interval;
        let local = cancel.child_token();
        let mut tasks = JoinSet::new();

        {
            let cache = Arc::clone(&self.cache);
            let cancel = local.clone();
            tasks.spawn(async move { cache.refresh_until(cancel).await });
        }
        {
            let consumer = Arc::clone(&self.consumer);
            let handler: Arc<dyn MessageHandler> = self.ingest.clone();
            let cancel = local.clone();
            tasks.spawn(async move { consumer.consume(cancel, handler).await.map_err(Error::from) });
        }
        for sweeper in [
            self.fault_points.clone() as Arc<dyn Sweeper>,
            self.problems.clone() as Arc<dyn Sweeper>,
        ] {
            tasks.spawn(run_sweeper(sweeper, sweep_interval, local.clone()));
        }
        info!("Correlation service running");

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| Error::fatal(format!("correlation task aborted: {e}")))
                .and_then(|r| r);
            if let Err(e) = result {
                if outcome.is_ok() {
                    error!(error = %e, "Correlation task failed, stopping the others");
                    outcome = Err(e);
                }
                local.cancel();
            }
        }
        info!("Correlation service stopped");
        outcome
    }

    /// Release the raw-events subscription and flush the problem-events
    /// publisher
    pub async fn close(&self) {
        if let Err(e) = self.consumer.close().await {
            warn!(error = %e, "Failed to close raw events consumer");
        }
        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "Failed to close problem events publisher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::RECOVERED_CLOSE_NOTES;
    use crate::testkit::{config_manager, topology, zabbix_payload, Pipeline};
    use chrono::{Local, TimeZone, Utc};
    use itops_core::idgen::SequenceIdGenerator;
    use itops_core::model::{CloseType, FaultStatus, ProblemStatus, Severity};
    use itops_ingestion::stream::MemoryBroker;
    use std::time::Duration;

    fn local(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Local
            .with_ymd_and_hms(2025, 1, 1, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_single_alert_opens_problem() {
        let pipeline = Pipeline::new();
        let event = pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "发生", 100001, 0).as_bytes())
            .await
            .unwrap();

        let stored = pipeline.repos.raw_events.query_by_ids(&[event.event_id]).await.unwrap();
        let stored = &stored[0];
        assert_eq!(stored.event_level, Severity::Critical);
        assert!(stored.fault_id > 0);
        assert!(stored.problem_id > 0);

        let fp = pipeline.fault_point(stored.fault_id).await;
        assert_eq!(fp.fault_status, FaultStatus::Occurred);
        assert_eq!(fp.fault_level, Severity::Critical);
        assert_eq!(fp.relation_event_ids, vec![event.event_id]);
        assert_eq!(fp.problem_id, stored.problem_id);
        assert_eq!(fp.fault_occur_time, local(12, 0));

        let problem = pipeline.problem(stored.problem_id).await;
        assert_eq!(problem.problem_status, ProblemStatus::Open);
        assert_eq!(problem.affected_entity_ids, vec!["srv-A".to_string()]);
        assert_eq!(problem.relation_ids, vec![fp.fault_id]);
    }

    #[tokio::test]
    async fn test_recovery_closes_problem() {
        let pipeline = Pipeline::new();
        let alert = pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "发生", 100001, 0).as_bytes())
            .await
            .unwrap();
        let recovery = pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "恢复", 100002, 100001).as_bytes())
            .await
            .unwrap();

        let stored = pipeline
            .repos
            .raw_events
            .query_by_ids(&[alert.event_id, recovery.event_id])
            .await
            .unwrap();
        assert_eq!(stored[0].fault_id, stored[1].fault_id);
        assert_eq!(stored[1].problem_id, stored[0].problem_id);

        let fp = pipeline.fault_point(stored[0].fault_id).await;
        assert_eq!(fp.fault_status, FaultStatus::Recovered);
        assert_eq!(fp.fault_recovery_time, Some(local(12, 30)));
        assert_eq!(fp.relation_event_ids, vec![alert.event_id, recovery.event_id]);

        let problem = pipeline.problem(fp.problem_id).await;
        assert_eq!(problem.problem_status, ProblemStatus::Closed);
        assert_eq!(problem.problem_close_type, Some(CloseType::System));
        assert_eq!(problem.problem_duration, 1800);
        assert_eq!(problem.problem_close_notes, RECOVERED_CLOSE_NOTES);
        assert!(problem.relation_event_ids.contains(&recovery.event_id));
    }

    #[tokio::test]
    async fn test_problem_stays_open_until_every_fault_point_recovers() {
        let pipeline = Pipeline::new();
        pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "发生", 100001, 0).as_bytes())
            .await
            .unwrap();
        let second = pipeline
            .ingest
            .ingest(zabbix_payload("host-B", "发生", 100003, 0).as_bytes())
            .await
            .unwrap();
        pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "恢复", 100002, 100001).as_bytes())
            .await
            .unwrap();

        let stored = pipeline.repos.raw_events.query_by_ids(&[second.event_id]).await.unwrap();
        let problem = pipeline.problem(stored[0].problem_id).await;
        assert_eq!(problem.problem_status, ProblemStatus::Open);
        assert_eq!(problem.relation_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_neighbouring_alert_joins_problem() {
        let pipeline = Pipeline::new();
        let first = pipeline
            .ingest
            .ingest(zabbix_payload("host-A", "发生", 100001, 0).as_bytes())
            .await
            .unwrap();
        let mut payload: serde_json::Value =
            serde_json::from_str(&zabbix_payload("host-B", "发生", 100005, 0)).unwrap();
        payload["event_severity"] = "Average".into();
        let second = pipeline
            .ingest
            .ingest(payload.to_string().as_bytes())
            .await
            .unwrap();

        let stored = pipeline
            .repos
            .raw_events
            .query_by_ids(&[first.event_id, second.event_id])
            .await
            .unwrap();
        assert_ne!(stored[0].fault_id, stored[1].fault_id);
        assert_eq!(stored[0].problem_id, stored[1].problem_id);

        let problem = pipeline.problem(stored[0].problem_id).await;
        let mut entities = problem.affected_entity_ids.clone();
        entities.sort();
        assert_eq!(entities, vec!["srv-A".to_string(), "srv-B".to_string()]);
        assert_eq!(problem.problem_level, Severity::Critical);
        assert!(pipeline.published.take().iter().all(|(key, _)| *key == problem.problem_id.to_string()));
    }

    #[tokio::test]
    async fn test_service_consumes_raw_events() {
        let broker = MemoryBroker::new();
        let streams = StreamFactory::Memory(broker.clone());
        let config = config_manager(true, 3600, 7200);
        let repos = Repositories::in_memory();
        let service = Arc::new(
            CorrelationService::build(
                config.clone(),
                repos.clone(),
                Arc::new(SequenceIdGenerator::new()),
                Arc::new(topology()),
                &streams,
                &StandardizerRegistry::new(),
            )
            .unwrap(),
        );

        let raw_topic = config.snapshot().kafka.raw_events.topic.clone();
        broker
            .publisher(&raw_topic)
            .publish(b"1", zabbix_payload("host-A", "发生", 100001, 0).as_bytes())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        let mut events = Vec::new();
        for _ in 0..100 {
            events = repos.raw_events.query_by_provider_id(&[100001]).await.unwrap();
            if events.first().map_or(false, |e| e.problem_id > 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(events.len(), 1);
        assert!(events[0].problem_id > 0);
        assert_eq!(events[0].entity_object_id, "srv-A");

        cancel.cancel();
        task.await.unwrap().unwrap();
        service.close().await;
    }

    #[test]
    fn test_unknown_source_type_fails_build() {
        let config = config_manager(true, 3600, 7200);
        let mut snapshot = (*config.snapshot()).clone();
        snapshot.app_config.ingest.source.source_type = "prometheus".into();
        let config = ConfigManager::with_config("/nonexistent/config.yaml".into(), snapshot).unwrap();
        let result = CorrelationService::build(
            config,
            Repositories::in_memory(),
            Arc::new(SequenceIdGenerator::new()),
            Arc::new(topology()),
            &StreamFactory::Memory(MemoryBroker::new()),
            &StandardizerRegistry::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
