//! Reasoning agent client.
//!
//! Two calls share one chat-completion endpoint: pairwise causal reasoning
//! and problem summary generation. Each call is bounded by the agent call
//! timeout, which surfaces as [`AgentError::Timeout`].

mod parse;

pub use parse::{CausalEdge, LenientParser};

use crate::error::AgentError;
use crate::http::PlatformHttp;
use async_trait::async_trait;
use itops_core::config::AgentConfig;
use itops_core::model::Occurrence;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Query text for causal reasoning
pub const CAUSAL_QUERY: &str = "请输出分析结果";

/// Query text for summary generation
pub const SUMMARY_QUERY: &str = "请输出结果";

/// Default bound on one agent call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Serialize)]
struct AgentRequest<'a> {
    agent_key: &'a str,
    custom_querys: &'a Map<String, Value>,
    query: &'a str,
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    message: AgentMessage,
}

#[derive(Debug, Default, Deserialize)]
struct AgentMessage {
    #[serde(default)]
    content: AgentContent,
}

#[derive(Debug, Default, Deserialize)]
struct AgentContent {
    #[serde(default)]
    final_answer: FinalAnswer,
}

#[derive(Debug, Default, Deserialize)]
struct FinalAnswer {
    #[serde(default)]
    answer: Answer,
}

#[derive(Debug, Default, Deserialize)]
struct Answer {
    #[serde(default)]
    text: String,
}

/// Reasoning agent capability
#[async_trait]
pub trait AgentApi: Send + Sync + Debug {
    /// Ask whether one fault point caused the other
    async fn causal(&self, custom_querys: &Map<String, Value>) -> Result<CausalEdge, AgentError>;

    /// Summarize a problem
    async fn summary(&self, custom_querys: &Map<String, Value>) -> Result<Occurrence, AgentError>;
}

/// HTTP agent client
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: PlatformHttp,
    causal: AgentConfig,
    summary: AgentConfig,
    call_timeout: Duration,
    parser: LenientParser,
}

impl AgentClient {
    pub fn new(
        http: PlatformHttp,
        causal: AgentConfig,
        summary: AgentConfig,
        call_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let parser =
            LenientParser::new().map_err(|e| AgentError::InternalError(e.to_string()))?;
        Ok(Self {
            http,
            causal,
            summary,
            call_timeout,
            parser,
        })
    }

    /// Post one chat completion and return the answer text.
    async fn complete(
        &self,
        agent: &AgentConfig,
        name: &'static str,
        query: &str,
        custom_querys: &Map<String, Value>,
    ) -> Result<String, AgentError> {
        if !agent.enabled {
            return Err(AgentError::NotConfigured(format!("{name} agent disabled")));
        }
        if agent.app_id.is_empty() || agent.agent_key.is_empty() {
            return Err(AgentError::NotConfigured(format!(
                "{name} agent app_id or agent_key is empty"
            )));
        }

        let path = format!("/api/agent-app/v1/app/{}/api/chat/completion", agent.app_id);
        let request = AgentRequest {
            agent_key: &agent.agent_key,
            custom_querys,
            query,
            stream: false,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.call_timeout,
            self.http.post::<_, AgentResponse>(&path, &request),
        )
        .await;
        let outcome = match result {
            Err(_) => Err(AgentError::Timeout),
            Ok(Err(failure)) => Err(AgentError::from(failure)),
            Ok(Ok(response)) => {
                let text = response.message.content.final_answer.answer.text;
                if text.trim().is_empty() {
                    Err(AgentError::EmptyAnswer)
                } else {
                    Ok(text)
                }
            }
        };
        debug!(
            agent = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Agent call finished"
        );
        outcome
    }

    fn record(name: &'static str, outcome: &'static str) {
        metrics::counter!("itops_agent_calls_total", "agent" => name, "outcome" => outcome)
            .increment(1);
    }
}

#[async_trait]
impl AgentApi for AgentClient {
    #[instrument(skip(self, custom_querys), fields(service = "agent", agent = "causal"))]
    async fn causal(&self, custom_querys: &Map<String, Value>) -> Result<CausalEdge, AgentError> {
        let result = match self
            .complete(&self.causal, "causal", CAUSAL_QUERY, custom_querys)
            .await
        {
            Ok(text) => self.parser.parse_causal(&text),
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => Self::record("causal", "success"),
            Err(e) => {
                warn!(error = %e, "Causal agent call failed");
                Self::record("causal", e.outcome());
            }
        }
        result
    }

    #[instrument(skip(self, custom_querys), fields(service = "agent", agent = "summary"))]
    async fn summary(&self, custom_querys: &Map<String, Value>) -> Result<Occurrence, AgentError> {
        let result = match self
            .complete(&self.summary, "summary", SUMMARY_QUERY, custom_querys)
            .await
        {
            Ok(text) => self.parser.parse_occurrence(&text),
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => Self::record("summary", "success"),
            Err(e) => {
                warn!(error = %e, "Summary agent call failed");
                Self::record("summary", e.outcome());
            }
        }
        result
    }
}
