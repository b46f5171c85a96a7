//! Index statistics
//!
//! Each figure is read independently and best-effort: a concurrent trim may
//! move "oldest" between two snapshots, and a failing read reports 0.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageResult;
use crate::storage::IndexStore;

/// Point-in-time statistics about the index
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Lowest change number present (0 when empty)
    pub oldest_change_number: u64,
    /// Highest change number present (0 when empty)
    pub newest_change_number: u64,
    /// Number of records
    pub record_count: u64,
    /// Last change number handed out, persisted or not
    pub last_generated_change_number: u64,
    pub taken_at: DateTime<Utc>,
}

impl IndexStats {
    /// Collect statistics without touching the trim engine
    pub fn collect(store: &IndexStore, last_generated: u64) -> Self {
        Self {
            oldest_change_number: best_effort("oldest", store.read_first().map(|r| {
                r.map(|r| r.change_number).unwrap_or(0)
            })),
            newest_change_number: best_effort("newest", store.read_last().map(|r| {
                r.map(|r| r.change_number).unwrap_or(0)
            })),
            record_count: best_effort("count", store.count()),
            last_generated_change_number: last_generated,
            taken_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

fn best_effort(what: &'static str, value: StorageResult<u64>) -> u64 {
    value.unwrap_or_else(|e| {
        tracing::warn!(stat = what, error = %e, "stats read failed; reporting 0");
        0
    })
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "first-changenumber={} last-changenumber={} count={}",
            self.oldest_change_number, self.newest_change_number, self.record_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{ChangeRecord, ChangeToken, PartitionId, ReplicaId};
    use std::sync::Arc;

    #[test]
    fn test_collect_stats() {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        let empty = IndexStats::collect(&store, 0);
        assert!(empty.is_empty());
        assert_eq!(empty.oldest_change_number, 0);

        for cn in [4, 5, 9] {
            store
                .append(&ChangeRecord::new(
                    cn,
                    PartitionId::new("o=a"),
                    ChangeToken::new(cn, ReplicaId(1), 0),
                    "",
                ))
                .unwrap();
        }

        let stats = IndexStats::collect(&store, 10);
        assert_eq!(stats.oldest_change_number, 4);
        assert_eq!(stats.newest_change_number, 9);
        assert_eq!(stats.record_count, 3);
        assert_eq!(stats.last_generated_change_number, 10);
        assert_eq!(stats.to_string(), "first-changenumber=4 last-changenumber=9 count=3");
    }

    #[test]
    fn test_failed_reads_report_zero() {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        store.close().unwrap();

        let stats = IndexStats::collect(&store, 7);
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.newest_change_number, 0);
        assert_eq!(stats.last_generated_change_number, 7);
    }

    #[test]
    fn test_serializes_camel_case() {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        let value = serde_json::to_value(IndexStats::collect(&store, 0)).unwrap();
        assert_eq!(value["recordCount"], 0);
        assert!(value.get("takenAt").is_some());
    }
}
