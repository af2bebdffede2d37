//! Process-monotonic 64-bit id generator.
//!
//! Layout: `(unix_seconds - EPOCH_OFFSET_SECS) << 6 | seq` where `seq` counts
//! 0..63 within one second.

use chrono::Utc;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::Duration;

/// 2025-01-01T00:00:00Z
pub const EPOCH_OFFSET_SECS: i64 = 1_735_689_600;

const SEQ_BITS: u32 = 6;
const SEQ_MAX: u64 = (1 << SEQ_BITS) - 1;

/// Source of unique document ids
pub trait IdGenerator: Send + Sync + Debug {
    fn next_id(&self) -> u64;

    /// Id of a causal object
    fn next_causal_id(&self) -> String {
        format!("causal_{}", self.next_id())
    }

    /// Id of a causal relation edge
    fn next_relation_id(&self) -> String {
        format!("relation_{}", self.next_id())
    }

    /// Id of one RCA run
    fn next_rca_id(&self) -> String {
        format!("rca_{}", self.next_id())
    }
}

#[derive(Debug, Default)]
struct SeqState {
    last_secs: i64,
    seq: u64,
}

/// Second-resolution generator with a 6-bit sequence.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    state: Mutex<SeqState>,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_secs() -> i64 {
        (Utc::now().timestamp() - EPOCH_OFFSET_SECS).max(0)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = Self::now_secs().max(state.last_secs);

        if now == state.last_secs {
            if state.seq >= SEQ_MAX {
                // sequence exhausted for this second
                while now <= state.last_secs {
                    std::thread::sleep(Duration::from_millis(1));
                    now = Self::now_secs();
                }
                state.seq = 0;
            } else {
                state.seq += 1;
            }
        } else {
            state.seq = 0;
        }
        state.last_secs = now;

        ((now as u64) << SEQ_BITS) | state.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let gen = SequenceIdGenerator::new();
        let mut last = 0;
        for _ in 0..200 {
            let id = gen.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_concurrent_uniqueness() {
        let gen = Arc::new(SequenceIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..50).map(|_| gen.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_prefixed_ids() {
        let gen = SequenceIdGenerator::new();
        assert!(gen.next_causal_id().starts_with("causal_"));
        assert!(gen.next_relation_id().starts_with("relation_"));
        assert!(gen.next_rca_id().starts_with("rca_"));
    }
}
