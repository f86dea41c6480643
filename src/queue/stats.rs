//! Queue counters

use serde::Serialize;

/// Snapshot of an execution queue's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: usize,
    /// Dependencies inferred from buffer hazards
    pub hazard_edges: u64,
    /// Dependencies from `depends_on` and in-order submission
    pub explicit_edges: u64,
}

impl QueueStats {
    /// Tasks that reached a final state
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_stats_empty() {
        let stats = QueueStats::default();
        assert!(stats.is_idle());
        assert_eq!(stats.finished(), 0);
    }

    #[test]
    fn test_queue_stats_with_tasks() {
        let stats = QueueStats {
            submitted: 10,
            completed: 6,
            failed: 1,
            in_flight: 3,
            hazard_edges: 4,
            explicit_edges: 2,
        };
        assert!(!stats.is_idle());
        assert_eq!(stats.finished(), 7);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hazard_edges"], 4);
    }
}
