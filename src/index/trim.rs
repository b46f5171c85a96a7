//! Trim engine
//!
//! Deletes index records whose underlying update is gone (or meaningless)
//! upstream. A scan always starts at the oldest record and walks forward,
//! stopping at the first record that must be kept: every later record is
//! newer, so none of them can be safe to drop while that one is not.
//!
//! Each scan opens at most `max_cursor_lifetimes` delete cursors and visits
//! at most `max_records_per_cursor` records per cursor, so a large backlog is
//! worked off over several scans without holding one cursor for long.
//!
//! # Deletion rules (first match wins)
//!
//! 1. `TargetedClear` - the record belongs to the partition being purged
//! 2. `OrphanedPartition` - the partition left the topology
//! 3. `PurgedUpstream` - the token is older than the partition's low-water
//!    mark for the same replica
//! 4. `UndecodableProgress` - the stored progress cookie cannot be parsed
//! 5. `NotCovering` - the cookie has no vector for the partition, or it knows
//!    the record's replica but does not cover the low-water mark

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::StorageResult;
use crate::storage::{DeleteCursor, IndexStore};
use crate::topology::PartitionLookup;
use crate::types::{ChangeRecord, PartitionId, ProgressCookie, ProgressVector};

use super::lifecycle::ShutdownSignal;

/// Why a record was trimmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimReason {
    TargetedClear,
    OrphanedPartition,
    PurgedUpstream,
    UndecodableProgress,
    NotCovering,
}

impl std::fmt::Display for TrimReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrimReason::TargetedClear => write!(f, "targeted_clear"),
            TrimReason::OrphanedPartition => write!(f, "orphaned_partition"),
            TrimReason::PurgedUpstream => write!(f, "purged_upstream"),
            TrimReason::UndecodableProgress => write!(f, "undecodable_progress"),
            TrimReason::NotCovering => write!(f, "not_covering"),
        }
    }
}

/// Outcome of evaluating one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimDecision {
    Keep,
    Delete(TrimReason),
}

/// How a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Retention age is zero
    Disabled,
    /// Nothing to scan
    Empty,
    /// Every record was deleted
    Exhausted,
    /// Shutdown was requested mid-scan
    Interrupted,
    /// Stopped at the first record that must be kept
    Retained(u64),
    /// Cursor budget used up; the next scan continues from the oldest record
    BudgetSpent,
}

/// Result of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub deleted: usize,
}

impl ScanReport {
    fn new(outcome: ScanOutcome, deleted: usize) -> Self {
        Self { outcome, deleted }
    }
}

/// Apply the deletion rules to `record`.
///
/// `low_water_mark` is the partition's oldest guaranteed progress, or `None`
/// when the partition has no live domain.
pub fn decide(
    record: &ChangeRecord,
    target: Option<&PartitionId>,
    low_water_mark: Option<&ProgressVector>,
) -> TrimDecision {
    if target.is_some_and(|t| t == &record.partition_id) {
        return TrimDecision::Delete(TrimReason::TargetedClear);
    }

    let Some(low_water_mark) = low_water_mark else {
        return TrimDecision::Delete(TrimReason::OrphanedPartition);
    };

    let token = &record.change_token;
    if low_water_mark
        .get(token.replica_id)
        .is_some_and(|oldest| token.is_older_than(oldest))
    {
        return TrimDecision::Delete(TrimReason::PurgedUpstream);
    }

    // Unreadable metadata cannot be validated; drop rather than keep forever.
    let cookie = match ProgressCookie::parse(&record.progress_snapshot) {
        Ok(cookie) => cookie,
        Err(_) => return TrimDecision::Delete(TrimReason::UndecodableProgress),
    };

    match cookie.get(&record.partition_id) {
        None => TrimDecision::Delete(TrimReason::NotCovering),
        Some(recorded)
            if recorded.get(token.replica_id).is_some()
                && !recorded.covers(low_water_mark) =>
        {
            TrimDecision::Delete(TrimReason::NotCovering)
        }
        Some(_) => TrimDecision::Keep,
    }
}

/// Runs trim scans against an index store.
///
/// Only one delete-cursor scan runs at a time; `scan_lock` is shared with
/// partition clears.
pub struct TrimEngine {
    store: IndexStore,
    topology: Arc<dyn PartitionLookup>,
    signal: ShutdownSignal,
    retention_ms: AtomicU64,
    oldest_retained: AtomicU64,
    scan_lock: Mutex<()>,
    max_cursor_lifetimes: usize,
    max_records_per_cursor: usize,
}

impl TrimEngine {
    pub fn new(store: IndexStore, topology: Arc<dyn PartitionLookup>, config: &IndexConfig) -> Self {
        Self {
            store,
            topology,
            signal: ShutdownSignal::new(),
            retention_ms: AtomicU64::new(duration_millis(config.retention_age)),
            oldest_retained: AtomicU64::new(0),
            scan_lock: Mutex::new(()),
            max_cursor_lifetimes: config.max_cursor_lifetimes.max(1),
            max_records_per_cursor: config.max_records_per_cursor.max(1),
        }
    }

    /// Signal observed between records; set when a scan fails
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn retention_age(&self) -> Duration {
        Duration::from_millis(self.retention_ms.load(Ordering::SeqCst))
    }

    /// Takes effect on the next scan
    pub fn set_retention_age(&self, age: Duration) {
        self.retention_ms.store(duration_millis(age), Ordering::SeqCst);
    }

    /// Change number of the oldest record the last scan kept (0 if none yet)
    pub fn oldest_retained(&self) -> u64 {
        self.oldest_retained.load(Ordering::SeqCst)
    }

    /// Run `f` while no other scan or clear is active
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.scan_lock.lock();
        f()
    }

    /// Evaluate `record` against the live topology
    pub fn evaluate(&self, record: &ChangeRecord, target: Option<&PartitionId>) -> TrimDecision {
        if target.is_some_and(|t| t == &record.partition_id) {
            return TrimDecision::Delete(TrimReason::TargetedClear);
        }
        let mark = self
            .topology
            .domain(&record.partition_id)
            .map(|domain| domain.oldest_guaranteed_progress());
        decide(record, target, mark.as_ref())
    }

    /// One periodic scan. A no-op while the retention age is zero.
    pub fn trim(&self) -> StorageResult<ScanReport> {
        self.exclusive(|| self.trim_locked())
    }

    /// `trim()` for a caller already inside `exclusive`
    pub(crate) fn trim_locked(&self) -> StorageResult<ScanReport> {
        if self.retention_ms.load(Ordering::SeqCst) == 0 {
            return Ok(ScanReport::new(ScanOutcome::Disabled, 0));
        }
        self.scan(None)
    }

    /// A scan that additionally drops every record of `target` it meets.
    /// Runs regardless of the retention age.
    pub fn trim_partition(&self, target: &PartitionId) -> StorageResult<ScanReport> {
        self.exclusive(|| self.trim_partition_locked(target))
    }

    /// `trim_partition()` for a caller already inside `exclusive`
    pub(crate) fn trim_partition_locked(&self, target: &PartitionId) -> StorageResult<ScanReport> {
        self.scan(Some(target))
    }

    /// On a storage error the cursor is aborted and the signal is set:
    /// the index can no longer be trusted.
    fn scan(&self, target: Option<&PartitionId>) -> StorageResult<ScanReport> {
        let result = self.scan_inner(target);
        if let Err(e) = &result {
            tracing::error!(error = %e, "trim scan failed; stopping trimmer");
            self.signal.shutdown();
        }
        result
    }

    fn scan_inner(&self, target: Option<&PartitionId>) -> StorageResult<ScanReport> {
        if self.store.read_last()?.is_none() {
            return Ok(ScanReport::new(ScanOutcome::Empty, 0));
        }

        let mut deleted = 0;
        for _ in 0..self.max_cursor_lifetimes {
            if self.signal.is_shutdown() {
                return Ok(ScanReport::new(ScanOutcome::Interrupted, deleted));
            }

            let mut cursor = self.store.open_delete_cursor();
            match self.walk(&mut cursor, target) {
                Ok(outcome) => {
                    deleted += cursor.close()?;
                    if let Some(outcome) = outcome {
                        if deleted > 0 {
                            tracing::debug!(deleted, ?outcome, "trim scan finished");
                        }
                        return Ok(ScanReport::new(outcome, deleted));
                    }
                }
                Err(e) => {
                    cursor.abort();
                    return Err(e);
                }
            }
        }

        tracing::debug!(deleted, "trim scan spent its cursor budget");
        Ok(ScanReport::new(ScanOutcome::BudgetSpent, deleted))
    }

    /// Walk one cursor lifetime. `None` means the record budget ran out
    /// and the scan should continue with a fresh cursor.
    fn walk(
        &self,
        cursor: &mut DeleteCursor,
        target: Option<&PartitionId>,
    ) -> StorageResult<Option<ScanOutcome>> {
        for _ in 0..self.max_records_per_cursor {
            if self.signal.is_shutdown() {
                return Ok(Some(ScanOutcome::Interrupted));
            }
            if !cursor.advance()? {
                return Ok(Some(ScanOutcome::Exhausted));
            }
            let Some(record) = cursor.current() else {
                return Ok(Some(ScanOutcome::Exhausted));
            };

            match self.evaluate(record, target) {
                TrimDecision::Delete(reason) => {
                    tracing::debug!(
                        change_number = record.change_number,
                        partition = %record.partition_id,
                        token = %record.change_token,
                        %reason,
                        "trimming record"
                    );
                    cursor.delete_current();
                }
                TrimDecision::Keep => {
                    let change_number = record.change_number;
                    self.oldest_retained.store(change_number, Ordering::SeqCst);
                    return Ok(Some(ScanOutcome::Retained(change_number)));
                }
            }
        }
        Ok(None)
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
