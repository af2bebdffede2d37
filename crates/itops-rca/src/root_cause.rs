//! Root cause election over the resolved causal graph.

use crate::conflict::ResolvedEdge;
use itops_core::model::FaultPointObject;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Elect the root cause among `fault_points`.
///
/// Roots are fault points that cause something and are caused by nothing.
/// Among several roots, or among all fault points when the graph has no
/// root, the earliest occurrence wins, then the most severe level, then the
/// longest duration, then the smallest id.
pub fn elect_root_cause<'a>(
    fault_points: &'a [FaultPointObject],
    edges: &[ResolvedEdge],
) -> Option<&'a FaultPointObject> {
    let members: HashSet<u64> = fault_points.iter().map(|fp| fp.fault_id).collect();
    let mut in_degree: HashMap<u64, usize> = HashMap::new();
    let mut out_degree: HashMap<u64, usize> = HashMap::new();
    for edge in edges {
        if edge.cause_fault_id == edge.effect_fault_id
            || !members.contains(&edge.cause_fault_id)
            || !members.contains(&edge.effect_fault_id)
        {
            continue;
        }
        *out_degree.entry(edge.cause_fault_id).or_default() += 1;
        *in_degree.entry(edge.effect_fault_id).or_default() += 1;
    }

    let roots: Vec<&FaultPointObject> = fault_points
        .iter()
        .filter(|fp| !in_degree.contains_key(&fp.fault_id) && out_degree.contains_key(&fp.fault_id))
        .collect();
    let pool: Vec<&FaultPointObject> = if roots.is_empty() {
        fault_points.iter().collect()
    } else {
        roots
    };

    pool.into_iter().min_by_key(|fp| {
        (
            fp.fault_occur_time,
            fp.fault_level,
            Reverse(fp.fault_duration_time),
            fp.fault_id,
        )
    })
}
