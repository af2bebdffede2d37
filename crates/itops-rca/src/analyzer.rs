//! One root cause analysis run for one problem.

use crate::causal::{history_window, CausalReasoner};
use crate::conflict::{resolve_conflicts, CausalLedger};
use crate::context::{backtrace, impacted_network, Summarizer, UNKNOWN_IMPACT, UNKNOWN_PROBLEM_NAME};
use crate::recall::{GraphRecall, RecallContext};
use crate::root_cause::elect_root_cause;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itops_core::config::ConfigManager;
use itops_core::idgen::IdGenerator;
use itops_core::model::{RcaCallback, RcaContext, RcaResults, RcaStatus};
use itops_core::{Error, Result};
use itops_platform::agent::AgentApi;
use itops_platform::graph::GraphQuery;
use itops_storage::Repositories;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Produces RCA callbacks; the engine schedules runs through this seam
#[async_trait]
pub trait ProblemAnalyzer: Send + Sync + Debug {
    /// Analyze one problem and build its success callback
    async fn analyze(&self, problem_id: u64, started: DateTime<Utc>) -> Result<RcaCallback>;

    /// Callback reporting a failed run
    fn failed_callback(&self, problem_id: u64, started: DateTime<Utc>) -> RcaCallback;
}

/// Recall, causal reasoning, conflict resolution, root election and context
#[derive(Debug, Clone)]
pub struct RootCauseAnalyzer {
    repos: Repositories,
    ids: Arc<dyn IdGenerator>,
    config: Arc<ConfigManager>,
    recall: GraphRecall,
    reasoner: CausalReasoner,
    ledger: CausalLedger,
    summarizer: Summarizer,
}

impl RootCauseAnalyzer {
    pub fn new(
        repos: Repositories,
        ids: Arc<dyn IdGenerator>,
        config: Arc<ConfigManager>,
        graph: Arc<dyn GraphQuery>,
        agent: Arc<dyn AgentApi>,
    ) -> Self {
        let max_concurrent = config.snapshot().rca.max_concurrent_analysis;
        Self {
            ledger: CausalLedger::new(repos.clone(), ids.clone()),
            reasoner: CausalReasoner::new(agent.clone(), max_concurrent),
            summarizer: Summarizer::new(agent),
            recall: GraphRecall::new(graph),
            repos,
            ids,
            config,
        }
    }

    fn results_json(&self, rca_context: RcaContext) -> Result<String> {
        let results = RcaResults {
            adp_kn_id: self.config.app_config().knowledge_network.knowledge_id,
            rca_id: self.ids.next_rca_id(),
            rca_context,
        };
        Ok(serde_json::to_string(&results)?)
    }
}

#[async_trait]
impl ProblemAnalyzer for RootCauseAnalyzer {
    #[instrument(skip(self), fields(service = "rca"))]
    async fn analyze(&self, problem_id: u64, started: DateTime<Utc>) -> Result<RcaCallback> {
        let problem = self
            .repos
            .problems
            .query_by_ids(&[problem_id])
            .await?
            .pop()
            .ok_or_else(|| Error::not_found(format!("problem {problem_id}")))?;
        if problem.relation_ids.is_empty() {
            return Err(Error::invariant(format!("problem {problem_id} has no fault points")));
        }
        let fault_points = self.repos.fault_points.query_by_ids(&problem.relation_ids).await?;
        if fault_points.is_empty() {
            return Err(Error::invariant(format!("fault points of problem {problem_id} not found")));
        }

        let persisted = match self.repos.fault_causals.find_among_fault_points(&problem.relation_ids).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "Failed to load causal history");
                Vec::new()
            }
        };
        let since = Utc::now() - history_window();
        let recall = RecallContext {
            topologies: self.recall.recall(&problem, &fault_points).await,
            history: persisted.iter().filter(|c| c.s_update_time >= since).cloned().collect(),
        };

        let candidates = self.reasoner.infer(&fault_points, &recall).await;
        let edges = resolve_conflicts(&candidates, &persisted, &fault_points);
        self.ledger.persist(&edges).await;

        let root = elect_root_cause(&fault_points, &edges)
            .ok_or_else(|| Error::invariant(format!("no root cause for problem {problem_id}")))?;
        let occurrence = self.summarizer.occurrence(&problem, &fault_points).await;
        let rca_context = RcaContext {
            occurrence: occurrence.clone(),
            backtrace: backtrace(&fault_points),
            network: impacted_network(&problem, &fault_points, &recall),
        };

        info!(
            root_cause_fault_id = root.fault_id,
            root_cause_object_id = %root.entity_object_id,
            edges = edges.len(),
            "Root cause elected"
        );
        Ok(RcaCallback {
            problem_id,
            root_cause_object_id: root.entity_object_id.clone(),
            root_cause_fault_id: root.fault_id,
            rca_results: self.results_json(rca_context)?,
            rca_start_time: started,
            rca_end_time: Utc::now(),
            rca_status: RcaStatus::Success,
            in_progress: false,
            problem_name: occurrence.name,
            problem_description: occurrence.description,
        })
    }

    fn failed_callback(&self, problem_id: u64, started: DateTime<Utc>) -> RcaCallback {
        let rca_results = self.results_json(RcaContext::default()).unwrap_or_else(|e| {
            warn!(problem_id, error = %e, "Failed to encode empty RCA results");
            String::new()
        });
        RcaCallback {
            problem_id,
            root_cause_object_id: String::new(),
            root_cause_fault_id: 0,
            rca_results,
            rca_start_time: started,
            rca_end_time: Utc::now(),
            rca_status: RcaStatus::Failed,
            in_progress: false,
            problem_name: UNKNOWN_PROBLEM_NAME.to_string(),
            problem_description: UNKNOWN_IMPACT.to_string(),
        }
    }
}
