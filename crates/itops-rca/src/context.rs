//! RCA context: occurrence summary, backtrace and impacted network.

use crate::causal::{estimate_tokens, MAX_INPUT_TOKENS};
use crate::recall::RecallContext;
use chrono::Local;
use itops_core::model::{
    is_allowed_class, push_unique, FaultPointObject, FaultStatus, Occurrence, Problem, RcaNetwork, RcaNode,
    Severity,
};
use itops_core::timex::DATETIME_LAYOUT;
use itops_platform::agent::AgentApi;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name used when nothing better is known
pub const UNKNOWN_PROBLEM_NAME: &str = "未知问题";

/// Impact used when nothing better is known
pub const UNKNOWN_IMPACT: &str = "暂未识别明确业务影响，需进一步观测或补充信息";

const NO_FAULT_POINTS_DESCRIPTION: &str = "当前上下文中未识别出明确的故障点或异常模式";

/// Most fault points handed to the summary agent
pub const MAX_SUMMARY_FAULT_POINTS: usize = 60;

/// Fault points in the minimal summary input
pub const MIN_SUMMARY_FAULT_POINTS: usize = 10;

/// Occurrence derived locally from the fault points
pub fn default_occurrence(problem_name: &str, fault_points: &[FaultPointObject]) -> Occurrence {
    let Some(earliest) = fault_points.iter().map(|fp| fp.fault_occur_time).min() else {
        return Occurrence {
            name: UNKNOWN_PROBLEM_NAME.to_string(),
            description: NO_FAULT_POINTS_DESCRIPTION.to_string(),
            impact: UNKNOWN_IMPACT.to_string(),
        };
    };
    let entities: HashSet<&str> = fault_points.iter().map(|fp| fp.entity_object_id.as_str()).collect();
    let name = if problem_name.trim().is_empty() {
        UNKNOWN_PROBLEM_NAME.to_string()
    } else {
        problem_name.to_string()
    };
    Occurrence {
        name,
        description: format!(
            "当前问题关联到 {} 个故障点，最早发生于 {}",
            fault_points.len(),
            earliest.with_timezone(&Local).format(DATETIME_LAYOUT)
        ),
        impact: format!("影响 {} 个实体对象", entities.len()),
    }
}

fn summary_entry(fp: &FaultPointObject) -> Value {
    let mut entry = json!({
        "fault_id": fp.fault_id,
        "fault_name": fp.fault_name,
        "fault_level": fp.fault_level,
        "fault_status": fp.fault_status,
        "fault_occur_time": fp.fault_occur_time.to_rfc3339(),
        "entity_object_id": fp.entity_object_id,
    });
    if let (Some(map), Some(recovered)) = (entry.as_object_mut(), fp.fault_recovery_time) {
        map.insert("fault_recovery_time".into(), json!(recovered.to_rfc3339()));
    }
    entry
}

/// Summary agent input: the most relevant fault points that fit the budget.
///
/// Fault points are ordered by severity, active before terminal, then by
/// occurrence, longest duration and id.
pub fn summary_query(fault_points: &[FaultPointObject]) -> Map<String, Value> {
    let mut ordered: Vec<&FaultPointObject> = fault_points.iter().collect();
    ordered.sort_by_key(|fp| {
        (
            fp.fault_level,
            fp.fault_status != FaultStatus::Occurred,
            fp.fault_occur_time,
            std::cmp::Reverse(fp.fault_duration_time),
            fp.fault_id,
        )
    });

    let mut packed: Vec<Value> = Vec::new();
    let mut tokens = 0;
    for fp in ordered.iter().take(MAX_SUMMARY_FAULT_POINTS) {
        let entry = summary_entry(fp);
        let cost = estimate_tokens(&entry);
        if tokens + cost > MAX_INPUT_TOKENS {
            break;
        }
        tokens += cost;
        packed.push(entry);
    }
    if packed.is_empty() && !ordered.is_empty() {
        debug!("Summary input over budget, using minimal payload");
        packed = ordered
            .iter()
            .take(MIN_SUMMARY_FAULT_POINTS)
            .map(|fp| {
                json!({
                    "fault_id": fp.fault_id,
                    "fault_name": fp.fault_name,
                    "fault_level": fp.fault_level,
                })
            })
            .collect();
    }

    let mut query = Map::new();
    query.insert("problem_info".into(), Value::Array(packed));
    query
}

/// Fault points ordered by occurrence then id
pub fn backtrace(fault_points: &[FaultPointObject]) -> Vec<FaultPointObject> {
    let mut ordered = fault_points.to_vec();
    ordered.sort_by_key(|fp| (fp.fault_occur_time, fp.fault_id));
    ordered
}

/// The problem's entities as recalled from the graph, annotated with the
/// fault points and events they carry.
pub fn impacted_network(problem: &Problem, fault_points: &[FaultPointObject], recall: &RecallContext) -> RcaNetwork {
    let scope: HashSet<&str> = problem.affected_entity_ids.iter().map(String::as_str).collect();
    let topology = recall.merged_topology();

    let mut nodes = Vec::new();
    let mut kept: HashSet<String> = HashSet::new();
    for node in topology.nodes {
        if !scope.contains(node.s_id.as_str()) || !is_allowed_class(&node.object_class) {
            continue;
        }
        if !kept.insert(node.s_id.clone()) {
            continue;
        }
        let mut rca_node = RcaNode {
            node,
            relation_event_ids: Vec::new(),
            relation_fault_point_ids: Vec::new(),
        };
        let mut level: Option<Severity> = None;
        for fp in fault_points.iter().filter(|fp| fp.entity_object_id == rca_node.node.s_id) {
            push_unique(&mut rca_node.relation_fault_point_ids, fp.fault_id);
            for event_id in &fp.relation_event_ids {
                push_unique(&mut rca_node.relation_event_ids, event_id.to_string());
            }
            if fp.is_active() {
                level = Some(level.map_or(fp.fault_level, |l| l.min(fp.fault_level)));
            }
        }
        rca_node.node.object_impact_level = level.unwrap_or_default();
        nodes.push(rca_node);
    }

    let mut seen = HashSet::new();
    let edges = topology
        .edges
        .into_iter()
        .filter(|e| kept.contains(&e.source_object_id) && kept.contains(&e.target_object_id))
        .filter(|e| seen.insert((e.source_object_id.clone(), e.target_object_id.clone(), e.relation_class.clone())))
        .collect();

    RcaNetwork { nodes, edges }
}

/// Asks the summary agent for the occurrence, falling back to
/// [`default_occurrence`]
#[derive(Debug, Clone)]
pub struct Summarizer {
    agent: Arc<dyn AgentApi>,
}

impl Summarizer {
    pub fn new(agent: Arc<dyn AgentApi>) -> Self {
        Self { agent }
    }

    pub async fn occurrence(&self, problem: &Problem, fault_points: &[FaultPointObject]) -> Occurrence {
        if fault_points.is_empty() {
            return default_occurrence(&problem.problem_name, fault_points);
        }
        match self.agent.summary(&summary_query(fault_points)).await {
            Ok(o) if !(o.name.trim().is_empty() && o.description.trim().is_empty() && o.impact.trim().is_empty()) => o,
            Ok(_) => {
                debug!(problem_id = problem.problem_id, "Summary agent answered nothing, using default");
                default_occurrence(&problem.problem_name, fault_points)
            }
            Err(e) => {
                warn!(problem_id = problem.problem_id, error = %e, "Summary agent failed, using default");
                default_occurrence(&problem.problem_name, fault_points)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::GraphRecall;
    use crate::testkit::{fault_point, problem_over, topology, ScriptedAgent};

    #[test]
    fn test_default_occurrence() {
        let fps = vec![fault_point(1, "srv-A", 0), fault_point(2, "srv-A", 3), fault_point(3, "srv-B", 5)];
        let occurrence = default_occurrence("CPU告警", &fps);
        assert_eq!(occurrence.name, "CPU告警");
        assert!(occurrence.description.starts_with("当前问题关联到 3 个故障点，最早发生于 "));
        assert_eq!(occurrence.impact, "影响 2 个实体对象");

        let empty = default_occurrence("", &[]);
        assert_eq!(empty.name, UNKNOWN_PROBLEM_NAME);
        assert_eq!(empty.impact, UNKNOWN_IMPACT);
    }

    #[test]
    fn test_summary_query_orders_by_severity_and_status() {
        let mut recovered = fault_point(1, "srv-A", 0);
        recovered.fault_status = FaultStatus::Recovered;
        let active = fault_point(2, "srv-B", 5);
        let mut critical = fault_point(3, "srv-C", 9);
        critical.fault_level = Severity::Critical;

        let query = summary_query(&[recovered, active, critical]);
        let ids: Vec<u64> = query["problem_info"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["fault_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_summary_query_caps_fault_points() {
        let fps: Vec<_> = (1..=80).map(|id| fault_point(id, "srv-A", id as i64)).collect();
        let query = summary_query(&fps);
        assert_eq!(query["problem_info"].as_array().unwrap().len(), MAX_SUMMARY_FAULT_POINTS);
    }

    #[test]
    fn test_summary_query_falls_back_to_minimal_entries() {
        let oversized = "x".repeat(MAX_INPUT_TOKENS * 5);
        let fps: Vec<_> = (1..=15)
            .map(|id| {
                let mut fp = fault_point(id, "srv-A", id as i64);
                fp.fault_name = oversized.clone();
                fp
            })
            .collect();

        let query = summary_query(&fps);
        let entries = query["problem_info"].as_array().unwrap();
        assert_eq!(entries.len(), MIN_SUMMARY_FAULT_POINTS);
        for entry in entries {
            let mut keys: Vec<&str> = entry.as_object().unwrap().keys().map(String::as_str).collect();
            keys.sort_unstable();
            assert_eq!(keys, vec!["fault_id", "fault_level", "fault_name"]);
        }
        assert_eq!(entries[0]["fault_id"], 1);
    }

    #[tokio::test]
    async fn test_network_annotates_nodes() {
        let mut recovered = fault_point(3, "srv-B", 4);
        recovered.fault_status = FaultStatus::Recovered;
        recovered.fault_level = Severity::Critical;
        let fps = vec![fault_point(1, "srv-A", 0), fault_point(2, "srv-A", 2), recovered];
        let problem = problem_over(10, &fps);
        let recall = RecallContext {
            topologies: GraphRecall::new(Arc::new(topology())).recall(&problem, &fps).await,
            history: Vec::new(),
        };

        let network = impacted_network(&problem, &fps, &recall);
        assert_eq!(network.nodes.len(), 2);
        assert_eq!(network.edges.len(), 1);
        let a = network.nodes.iter().find(|n| n.node.s_id == "srv-A").unwrap();
        assert_eq!(a.relation_fault_point_ids, vec![1, 2]);
        assert_eq!(a.relation_event_ids, vec!["100".to_string(), "200".to_string()]);
        assert_eq!(a.node.object_impact_level, Severity::Major);
        // Only terminal faults: default level
        let b = network.nodes.iter().find(|n| n.node.s_id == "srv-B").unwrap();
        assert_eq!(b.node.object_impact_level, Severity::Normal);
    }

    #[tokio::test]
    async fn test_summarizer_falls_back_on_agent_failure() {
        let fps = vec![fault_point(1, "srv-A", 0)];
        let problem = problem_over(10, &fps);
        let failing = Summarizer::new(Arc::new(ScriptedAgent::default()));
        assert_eq!(failing.occurrence(&problem, &fps).await.name, problem.problem_name);

        let answer = Occurrence {
            name: "数据库连接耗尽".into(),
            description: "srv-A 连接池耗尽".into(),
            impact: "订单服务不可用".into(),
        };
        let agent = ScriptedAgent::default().with_summary(answer.clone());
        assert_eq!(Summarizer::new(Arc::new(agent)).occurrence(&problem, &fps).await, answer);
    }
}
