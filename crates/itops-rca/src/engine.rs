//! Batched RCA scheduling.
//!
//! Problem events are collected into a set and drained once per batch window,
//! so a burst of updates for one problem yields one analysis. Each drained
//! problem runs as its own task under a global concurrency limit and a task
//! deadline. Re-submitting a problem cancels the run still in flight for it.

use crate::analyzer::{ProblemAnalyzer, RootCauseAnalyzer};
use crate::callback::{CallbackSink, HttpSink, InProcessSink};
use async_trait::async_trait;
use chrono::Utc;
use itops_core::config::{ConfigManager, RcaConfig};
use itops_core::idgen::IdGenerator;
use itops_core::model::ProblemEvent;
use itops_core::{Error, Result};
use itops_correlation::ProblemHandler;
use itops_ingestion::{Message, MessageConsumer, MessageHandler, StreamFactory};
use itops_platform::agent::AgentApi;
use itops_platform::graph::GraphQuery;
use itops_storage::repo::ProblemRepository;
use itops_storage::Repositories;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Problems still pending RCA and younger than this are resumed on startup
pub fn resume_window() -> chrono::Duration {
    chrono::Duration::hours(24)
}

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct RunningTask {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryState {
    collected: HashSet<u64>,
    running: HashMap<u64, RunningTask>,
}

/// Pending problem ids and the tasks analyzing them
#[derive(Debug, Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    generation: AtomicU64,
}

impl TaskRegistry {
    /// Queue a problem for the next batch. Returns false if already queued.
    pub fn collect(&self, problem_id: u64) -> bool {
        self.state.lock().collected.insert(problem_id)
    }

    /// Take every queued problem id, smallest first
    pub fn drain(&self) -> Vec<u64> {
        let mut batch: Vec<u64> = self.state.lock().collected.drain().collect();
        batch.sort_unstable();
        batch
    }

    /// Problems with a task in flight
    pub fn running(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Record a new task for `problem_id`, cancelling the one it replaces.
    fn register(&self, problem_id: u64, cancel: CancellationToken) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .state
            .lock()
            .running
            .insert(problem_id, RunningTask { generation, cancel });
        if let Some(previous) = previous {
            info!(problem_id, "Cancelling superseded RCA task");
            previous.cancel.cancel();
        }
        generation
    }

    /// Drop the entry for `problem_id` if it still belongs to `generation`.
    fn finish(&self, problem_id: u64, generation: u64) -> bool {
        let mut state = self.state.lock();
        match state.running.get(&problem_id) {
            Some(task) if task.generation == generation => {
                state.running.remove(&problem_id);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageHandler for TaskRegistry {
    async fn handle(&self, message: &Message) -> Result<()> {
        let event: ProblemEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                debug!(offset = message.offset, error = %e, "Skipping malformed problem event");
                return Ok(());
            }
        };
        if event.problem_id == 0 {
            return Err(Error::validation("problem event without problem_id"));
        }
        if self.collect(event.problem_id) {
            debug!(problem_id = event.problem_id, "Problem queued for RCA");
        }
        Ok(())
    }
}

/// Consumes problem events and schedules analyses
#[derive(Debug)]
pub struct RcaEngine {
    analyzer: Arc<dyn ProblemAnalyzer>,
    sink: Arc<dyn CallbackSink>,
    consumer: Arc<dyn MessageConsumer>,
    problems: Arc<dyn ProblemRepository>,
    settings: RcaConfig,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
}

impl RcaEngine {
    pub fn new(
        analyzer: Arc<dyn ProblemAnalyzer>,
        sink: Arc<dyn CallbackSink>,
        consumer: Arc<dyn MessageConsumer>,
        problems: Arc<dyn ProblemRepository>,
        settings: RcaConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            analyzer,
            sink,
            consumer,
            problems,
            settings,
            registry: Arc::default(),
            permits,
        }
    }

    /// Wire the analyzer and pick the callback sink: HTTP when
    /// `rca.callback_url` is set, otherwise the in-process problem stage.
    pub fn build(
        config: Arc<ConfigManager>,
        repos: Repositories,
        ids: Arc<dyn IdGenerator>,
        graph: Arc<dyn GraphQuery>,
        agent: Arc<dyn AgentApi>,
        problem_handler: Arc<dyn ProblemHandler>,
        streams: &StreamFactory,
    ) -> Result<Self> {
        let snapshot = config.snapshot();
        let settings = snapshot.rca.clone();
        let sink: Arc<dyn CallbackSink> = if settings.callback_url.trim().is_empty() {
            Arc::new(InProcessSink::new(problem_handler))
        } else {
            Arc::new(HttpSink::new(&settings.callback_url, CALLBACK_TIMEOUT)?)
        };
        let consumer = streams.consumer(&snapshot.kafka.problem_events)?;
        let problems = repos.problems.clone();
        let analyzer = Arc::new(RootCauseAnalyzer::new(repos, ids, Arc::clone(&config), graph, agent));

        info!(
            topic = %snapshot.kafka.problem_events.topic,
            batch_window = ?settings.batch_window,
            max_concurrent = settings.max_concurrent,
            http_callback = !settings.callback_url.is_empty(),
            "RCA engine built"
        );
        Ok(Self::new(analyzer, sink, consumer, problems, settings))
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// Queue problems still waiting for a first analysis
    pub async fn resume_pending(&self) -> usize {
        match self.problems.find_pending_rca(resume_window()).await {
            Ok(pending) => {
                let queued = pending
                    .iter()
                    .filter(|p| self.registry.collect(p.problem_id))
                    .count();
                if queued > 0 {
                    info!(queued, "Resumed problems pending RCA");
                }
                queued
            }
            Err(e) => {
                warn!(error = %e, "Failed to load problems pending RCA");
                0
            }
        }
    }

    /// Spawn one task per problem id onto `tasks`.
    pub fn dispatch(&self, batch: &[u64], tasks: &mut JoinSet<()>, cancel: &CancellationToken) {
        for &problem_id in batch {
            let token = cancel.child_token();
            let generation = self.registry.register(problem_id, token.clone());
            tasks.spawn(run_task(
                TaskContext {
                    analyzer: Arc::clone(&self.analyzer),
                    sink: Arc::clone(&self.sink),
                    registry: Arc::clone(&self.registry),
                    permits: Arc::clone(&self.permits),
                    timeout: self.settings.task_timeout,
                },
                problem_id,
                generation,
                token,
            ));
        }
    }

    /// Consume problem events and run batches until `cancel` fires or the
    /// consumer fails. Running tasks are cancelled on the way out.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.settings.resume_pending {
            self.resume_pending().await;
        }

        let local = cancel.child_token();
        let mut consumer = {
            let consumer = Arc::clone(&self.consumer);
            let handler: Arc<dyn MessageHandler> = self.registry.clone();
            let cancel = local.clone();
            tokio::spawn(async move { consumer.consume(cancel, handler).await })
        };
        let window = self.settings.batch_window;
        let mut ticker = interval_at(tokio::time::Instant::now() + window, window);
        let mut tasks = JoinSet::new();
        info!(batch_window = ?window, "RCA engine running");

        let mut consumer_done = false;
        let mut outcome = Ok(());
        loop {
            tokio::select! {
                _ = local.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = self.registry.drain();
                    if batch.is_empty() {
                        continue;
                    }
                    info!(problems = batch.len(), running = self.registry.running(), "Dispatching RCA batch");
                    self.dispatch(&batch, &mut tasks, &local);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "RCA task panicked");
                        }
                    }
                }
                joined = &mut consumer => {
                    consumer_done = true;
                    outcome = match joined {
                        Ok(result) => result.map_err(Error::from),
                        Err(e) => Err(Error::fatal(format!("problem events consumer aborted: {e}"))),
                    };
                    if let Err(e) = &outcome {
                        error!(error = %e, "Problem events consumer failed");
                    }
                    break;
                }
            }
        }

        local.cancel();
        while tasks.join_next().await.is_some() {}
        if !consumer_done {
            match consumer.await {
                Ok(Err(e)) => warn!(error = %e, "Problem events consumer stopped with error"),
                Err(e) => warn!(error = %e, "Problem events consumer aborted"),
                Ok(Ok(())) => {}
            }
        }
        info!("RCA engine stopped");
        outcome
    }

    pub async fn close(&self) {
        if let Err(e) = self.consumer.close().await {
            warn!(error = %e, "Failed to close problem events consumer");
        }
    }
}

struct TaskContext {
    analyzer: Arc<dyn ProblemAnalyzer>,
    sink: Arc<dyn CallbackSink>,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

#[instrument(skip(ctx, token), fields(service = "rca"))]
async fn run_task(ctx: TaskContext, problem_id: u64, generation: u64, token: CancellationToken) {
    let clock = Instant::now();
    let started = Utc::now();

    let result = tokio::select! {
        _ = token.cancelled() => Err(Error::cancelled(format!("rca task for problem {problem_id}"))),
        result = async {
            let _permit = Arc::clone(&ctx.permits)
                .acquire_owned()
                .await
                .map_err(|_| Error::cancelled("rca permits closed"))?;
            tokio::time::timeout(ctx.timeout, ctx.analyzer.analyze(problem_id, started))
                .await
                .map_err(|_| Error::timeout(format!("rca for problem {problem_id} after {:?}", ctx.timeout)))?
        } => result,
    };

    let outcome = match result {
        _ if token.is_cancelled() => {
            info!("RCA task cancelled, result dropped");
            "cancelled"
        }
        Ok(callback) => {
            if let Err(e) = ctx.sink.deliver(&callback).await {
                warn!(error = %e, "Failed to deliver RCA callback");
            }
            "success"
        }
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "RCA failed");
            let callback = ctx.analyzer.failed_callback(problem_id, started);
            if let Err(e) = ctx.sink.deliver(&callback).await {
                warn!(error = %e, "Failed to deliver failed RCA callback");
            }
            if matches!(e, Error::Timeout(_)) {
                "timeout"
            } else {
                "failed"
            }
        }
    };

    metrics::counter!("itops_rca_tasks_total", "outcome" => outcome).increment(1);
    metrics::histogram!("itops_rca_task_seconds").record(clock.elapsed().as_secs_f64());
    if !ctx.registry.finish(problem_id, generation) {
        debug!(generation, "RCA task superseded before cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::RecordingSink;
    use chrono::DateTime;
    use itops_core::model::{RcaCallback, RcaStatus};
    use itops_ingestion::stream::MemoryBroker;
    use itops_ingestion::MessagePublisher;

    /// Records every analyzed problem and answers after `delay`
    #[derive(Debug, Default)]
    struct CountingAnalyzer {
        calls: Mutex<Vec<u64>>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ProblemAnalyzer for CountingAnalyzer {
        async fn analyze(&self, problem_id: u64, started: DateTime<Utc>) -> Result<RcaCallback> {
            self.calls.lock().push(problem_id);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::not_found(format!("problem {problem_id}")));
            }
            let mut callback = self.failed_callback(problem_id, started);
            callback.rca_status = RcaStatus::Success;
            Ok(callback)
        }

        fn failed_callback(&self, problem_id: u64, started: DateTime<Utc>) -> RcaCallback {
            RcaCallback {
                problem_id,
                root_cause_object_id: String::new(),
                root_cause_fault_id: 0,
                rca_results: String::new(),
                rca_start_time: started,
                rca_end_time: Utc::now(),
                rca_status: RcaStatus::Failed,
                in_progress: false,
                problem_name: String::new(),
                problem_description: String::new(),
            }
        }
    }

    fn settings(window_ms: u64) -> RcaConfig {
        RcaConfig {
            batch_window: Duration::from_millis(window_ms),
            resume_pending: false,
            ..Default::default()
        }
    }

    fn engine(analyzer: Arc<CountingAnalyzer>, sink: Arc<RecordingSink>, broker: &MemoryBroker, settings: RcaConfig) -> RcaEngine {
        RcaEngine::new(
            analyzer,
            sink,
            Arc::new(broker.consumer("problem_events", "rca")),
            Repositories::in_memory().problems,
            settings,
        )
    }

    fn message(payload: &[u8]) -> Message {
        Message {
            topic: "problem_events".into(),
            key: Vec::new(),
            payload: payload.to_vec(),
            partition: 0,
            offset: 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_registry_dedups_and_validates() {
        let registry = TaskRegistry::default();
        let payloads: [&[u8]; 4] = [br#"{"problem_id":7}"#, br#"{"problem_id":7}"#, br#"{"problem_id":3}"#, b"not json"];
        for payload in payloads {
            registry.handle(&message(payload)).await.unwrap();
        }
        assert!(registry.handle(&message(br#"{"problem_id":0}"#)).await.is_err());
        assert_eq!(registry.drain(), vec![3, 7]);
        assert!(registry.drain().is_empty());
    }

    #[tokio::test]
    async fn test_burst_yields_one_analysis_per_problem() {
        let broker = MemoryBroker::new();
        let analyzer = Arc::new(CountingAnalyzer::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(engine(analyzer.clone(), sink.clone(), &broker, settings(300)));

        let publisher = broker.publisher("problem_events");
        for id in [11u64, 11, 11, 12] {
            let body = serde_json::to_vec(&ProblemEvent { problem_id: id }).unwrap();
            publisher.publish(id.to_string().as_bytes(), &body).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            async move { engine.run(cancel).await }
        });

        for _ in 0..100 {
            if sink.delivered().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Let one more window pass with nothing queued.
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        engine.close().await;

        let mut calls = analyzer.calls.lock().clone();
        calls.sort_unstable();
        assert_eq!(calls, vec![11, 12]);
        assert_eq!(sink.delivered().len(), 2);
        assert!(sink.delivered().iter().all(|cb| cb.rca_status == RcaStatus::Success));
    }

    #[tokio::test]
    async fn test_resubmission_cancels_running_task() {
        let broker = MemoryBroker::new();
        let analyzer = Arc::new(CountingAnalyzer {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(analyzer.clone(), sink.clone(), &broker, settings(1000));

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        engine.dispatch(&[5], &mut tasks, &cancel);
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.dispatch(&[5], &mut tasks, &cancel);
        while tasks.join_next().await.is_some() {}

        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(engine.registry().running(), 0);
    }

    #[tokio::test]
    async fn test_failure_and_timeout_send_failed_callback() {
        let broker = MemoryBroker::new();
        let failing = Arc::new(CountingAnalyzer {
            fail: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let engine_a = engine(failing, sink.clone(), &broker, settings(1000));

        let slow = Arc::new(CountingAnalyzer {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let mut short = settings(1000);
        short.task_timeout = Duration::from_millis(50);
        let engine_b = engine(slow, sink.clone(), &broker, short);

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        engine_a.dispatch(&[1], &mut tasks, &cancel);
        engine_b.dispatch(&[2], &mut tasks, &cancel);
        while tasks.join_next().await.is_some() {}

        let mut delivered = sink.delivered();
        delivered.sort_by_key(|cb| cb.problem_id);
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|cb| cb.rca_status == RcaStatus::Failed && !cb.in_progress));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_without_callback() {
        let broker = MemoryBroker::new();
        let analyzer = Arc::new(CountingAnalyzer {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(analyzer, sink.clone(), &broker, settings(1000));

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        engine.dispatch(&[9], &mut tasks, &cancel);
        cancel.cancel();
        while tasks.join_next().await.is_some() {}
        assert!(sink.delivered().is_empty());
        assert_eq!(engine.registry().running(), 0);
    }

    #[tokio::test]
    async fn test_resume_queues_pending_problems() {
        use crate::testkit::{fault_point, problem_over};

        let repos = Repositories::in_memory();
        let mut fresh = problem_over(21, &[fault_point(1, "srv-A", 0)]);
        fresh.problem_create_timestamp = Utc::now();
        let mut stale = problem_over(22, &[fault_point(2, "srv-B", 0)]);
        stale.problem_create_timestamp = Utc::now() - chrono::Duration::hours(30);
        let mut analyzed = problem_over(23, &[fault_point(3, "srv-C", 0)]);
        analyzed.problem_create_timestamp = Utc::now();
        analyzed.rca_status = Some(RcaStatus::Success);
        for p in [&fresh, &stale, &analyzed] {
            repos.problems.upsert(p).await.unwrap();
        }

        let broker = MemoryBroker::new();
        let engine = RcaEngine::new(
            Arc::new(CountingAnalyzer::default()),
            Arc::new(RecordingSink::default()),
            Arc::new(broker.consumer("problem_events", "rca")),
            repos.problems.clone(),
            settings(1000),
        );
        assert_eq!(engine.resume_pending().await, 1);
        assert_eq!(engine.registry().drain(), vec![21]);
    }
}
