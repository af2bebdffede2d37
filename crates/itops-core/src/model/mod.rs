//! Pipeline data model.
//!
//! Parents hold child-id sets (problem → fault points → events); children
//! carry denormalized parent ids that are flushed back with bulk updates.

mod causal;
mod event;
mod fault;
mod problem;
mod topology;
mod types;

pub use causal::{pair_key, CausalRelation, FaultCausalObject, FaultCausalRelation, CAUSAL_CLASS};
pub use event::{ProblemEvent, RawEvent};
pub use fault::{FaultPointObject, FaultPointRelation, FAULT_POINT_CLASS};
pub use problem::{Problem, RcaCallback, MERGED_NOTES_PREFIX};
pub use topology::{
    is_allowed_class, Node, Occurrence, RcaContext, RcaNetwork, RcaNode, RcaResults, Relation,
    Topology, ALLOWED_OBJECT_CLASSES,
};
pub use types::{
    CausalRelationClass, CloseType, EventStatus, FaultStatus, ProblemStatus, RcaStatus, Severity,
};

/// Append `value` unless already present, keeping insertion order.
pub fn push_unique<T: PartialEq>(items: &mut Vec<T>, value: T) {
    if !items.contains(&value) {
        items.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    fn event(id: u64, level: Severity, occur: DateTime<Utc>) -> RawEvent {
        RawEvent {
            event_id: id,
            recovery_id: 0,
            event_provider_id: 100_000 + id,
            event_timestamp: occur,
            event_title: "CPU告警".into(),
            event_content: "cpu high".into(),
            event_occur_time: Some(occur),
            event_recovery_time: None,
            event_type: "system.cpu.util".into(),
            event_status: EventStatus::Occurred,
            event_level: level,
            event_source: "zabbix_webhook".into(),
            entity_object_name: "host-A".into(),
            entity_object_class: "host".into(),
            entity_object_id: "srv-A".into(),
            entity_object_ip: String::new(),
            entity_object_port: String::new(),
            entity_object_mac: String::new(),
            raw_event_msg: String::new(),
            problem_id: 0,
            fault_id: 0,
        }
    }

    #[test]
    fn test_fault_point_convergence() {
        let mut fp = FaultPointObject::open(1, &event(10, Severity::Warning, at(12, 0)), at(12, 0));
        assert_eq!(fp.fault_status, FaultStatus::Occurred);
        assert_eq!(fp.fault_duration_time, 0);

        fp.absorb_alert(&event(11, Severity::Critical, at(12, 10)), at(12, 10));
        fp.absorb_alert(&event(11, Severity::Critical, at(12, 10)), at(12, 10));
        assert_eq!(fp.relation_event_ids, vec![10, 11]);
        assert_eq!(fp.fault_level, Severity::Critical);
        assert_eq!(fp.fault_duration_time, 600);

        // an older event never moves latest time backwards
        fp.absorb_alert(&event(12, Severity::Normal, at(12, 5)), at(12, 11));
        assert_eq!(fp.fault_latest_time, at(12, 10));
        assert_eq!(fp.fault_level, Severity::Critical);
    }

    #[test]
    fn test_fault_point_recovery() {
        let mut fp = FaultPointObject::open(1, &event(10, Severity::Major, at(12, 0)), at(12, 0));
        let mut recovery = event(20, Severity::Normal, at(12, 30));
        recovery.event_status = EventStatus::Recovered;
        recovery.event_recovery_time = Some(at(12, 30));
        fp.absorb_recovery(&recovery, at(12, 31));
        assert_eq!(fp.fault_status, FaultStatus::Recovered);
        assert_eq!(fp.fault_recovery_time, Some(at(12, 30)));
        assert_eq!(fp.fault_duration_time, 1800);
        assert_eq!(fp.fault_level, Severity::Major);
    }

    #[test]
    fn test_problem_absorbs_problem_and_fault_point() {
        let fp_a = FaultPointObject::open(1, &event(10, Severity::Major, at(12, 0)), at(12, 0));
        let mut fp_b = FaultPointObject::open(2, &event(11, Severity::Critical, at(11, 0)), at(11, 0));
        fp_b.entity_object_id = "srv-B".into();

        let mut main = Problem::open(100, &fp_a, at(12, 0));
        let other = Problem::open(200, &fp_b, at(11, 0));
        main.absorb_problem(&other);
        main.absorb_fault_point(&fp_a);
        main.refresh_duration();

        assert_eq!(main.relation_ids, vec![1, 2]);
        assert_eq!(main.relation_event_ids, vec![10, 11]);
        assert_eq!(main.affected_entity_ids, vec!["srv-A".to_string(), "srv-B".to_string()]);
        assert_eq!(main.problem_occur_time, at(11, 0));
        assert_eq!(main.problem_level, Severity::Critical);
        assert_eq!(main.problem_duration, 3600);
    }

    #[test]
    fn test_problem_wire_names() {
        let fp = FaultPointObject::open(1, &event(10, Severity::Major, at(12, 0)), at(12, 0));
        let problem = Problem::open(100, &fp, at(12, 0));
        let v = serde_json::to_value(&problem).unwrap();
        assert_eq!(v["relation_fp_ids"][0], 1);
        assert_eq!(v["problem_status"], "0");
        assert_eq!(v["rca_status"], 1);
        assert!(v.get("problem_close_type").is_none());
        let back: Problem = serde_json::from_value(v).unwrap();
        assert_eq!(back, problem);
    }
}
