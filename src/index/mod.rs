//! Change-number index
//!
//! `ChangeNumberIndex` ties the pieces together:
//! - `ChangeNumberAllocator`: issues change numbers
//! - `ChangeCursor`: forward reads from any change number
//! - `TrimEngine`: deletes obsolete records
//! - `TrimRunner`: runs the trim engine on its own thread
//! - `IndexStats`: monitoring snapshot
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌─────────┐    ┌─────────────┐    ┌──────────────────┐
//! │ Writer  │───►│ allocator   │───►│ IndexStore       │
//! │         │    │ .next()     │    │ .append (fsync)  │
//! └─────────┘    └─────────────┘    └──────────────────┘
//!
//! Trim Path (dedicated thread, every trim interval):
//! ┌────────────┐    ┌──────────────────┐    ┌─────────────────────┐
//! │ TrimRunner │───►│ TrimEngine.trim  │───►│ delete cursor       │
//! │ loop       │    │ rules per record │    │ from oldest record  │
//! └────────────┘    └──────────────────┘    └─────────────────────┘
//! ```

mod allocator;
mod cursor;
mod lifecycle;
mod stats;
mod trim;

pub use allocator::ChangeNumberAllocator;
pub use cursor::ChangeCursor;
pub use lifecycle::{LifecycleState, ShutdownSignal, TrimExit, TrimRunner, TRIMMER_THREAD_NAME};
pub use stats::IndexStats;
pub use trim::{decide, ScanOutcome, ScanReport, TrimDecision, TrimEngine, TrimReason};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult, StorageError};
use crate::storage::{FileStore, IndexStore, MemoryStore, OrderedStore};
use crate::topology::{FatalErrorHandler, NoopFatalHandler, PartitionLookup};
use crate::types::{ChangeRecord, ChangeToken, PartitionId};

/// Durable, strictly ordered index from change number to replicated update
pub struct ChangeNumberIndex {
    config: IndexConfig,
    store: IndexStore,
    allocator: ChangeNumberAllocator,
    trim: Arc<TrimEngine>,
    runner: TrimRunner,
    fatal: Arc<dyn FatalErrorHandler>,
    /// Serializes allocation + append so visibility follows change-number order
    append_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl ChangeNumberIndex {
    /// Open an index over `engine`, recovering the allocator from its
    /// newest record. The trimmer is not started.
    pub fn open(
        engine: Arc<dyn OrderedStore>,
        topology: Arc<dyn PartitionLookup>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let store = IndexStore::new(engine);
        let allocator = ChangeNumberAllocator::recover(&store)?;
        let trim = Arc::new(TrimEngine::new(store.clone(), topology, &config));
        let runner = TrimRunner::new(Arc::clone(&trim));

        tracing::info!(
            last_generated = allocator.last_generated(),
            retention_ms = config.retention_age.as_millis() as u64,
            "change-number index opened"
        );

        Ok(Self {
            config,
            store,
            allocator,
            trim,
            runner,
            fatal: Arc::new(NoopFatalHandler),
            append_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Open a durable index in `config.data_dir`
    pub fn open_file(config: IndexConfig, topology: Arc<dyn PartitionLookup>) -> IndexResult<Self> {
        let engine = Arc::new(FileStore::open(&config)?);
        Self::open(engine, topology, config)
    }

    /// Open a non-durable index
    pub fn in_memory(config: IndexConfig, topology: Arc<dyn PartitionLookup>) -> IndexResult<Self> {
        Self::open(Arc::new(MemoryStore::new()), topology, config)
    }

    /// Install the handler told about fatal trim failures
    pub fn with_fatal_handler(mut self, handler: Arc<dyn FatalErrorHandler>) -> Self {
        self.fatal = handler;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Start the background trimmer
    pub fn start_trimming(&self) -> IndexResult<()> {
        self.ensure_running()?;
        self.runner
            .start(self.config.trim_interval, Arc::clone(&self.fatal))
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.runner.state()
    }

    /// Fails once shutdown was requested or a scan failed
    fn ensure_running(&self) -> IndexResult<()> {
        if self.shutdown.load(Ordering::SeqCst) || self.trim.signal().is_shutdown() {
            Err(IndexError::ShutdownInProgress)
        } else {
            Ok(())
        }
    }

    /// Append a record for one replicated update, returning its change number.
    ///
    /// A failed append still consumes the allocated number.
    pub fn add_record(
        &self,
        partition_id: PartitionId,
        change_token: ChangeToken,
        progress_snapshot: impl Into<String>,
    ) -> IndexResult<u64> {
        let progress_snapshot = progress_snapshot.into();

        let _guard = self.append_lock.lock();
        self.ensure_running()?;
        let change_number = self.allocator.next();
        let record = ChangeRecord::new(change_number, partition_id, change_token, progress_snapshot);
        self.store.append(&record)?;

        tracing::debug!(
            change_number,
            partition = %record.partition_id,
            token = %record.change_token,
            "added record"
        );
        Ok(change_number)
    }

    pub fn get_oldest_record(&self) -> IndexResult<Option<ChangeRecord>> {
        Ok(self.store.read_first()?)
    }

    pub fn get_newest_record(&self) -> IndexResult<Option<ChangeRecord>> {
        Ok(self.store.read_last()?)
    }

    /// Cursor over records with change number `>= start`. A start past the
    /// newest record yields nothing until such a record is appended.
    pub fn open_cursor_from(&self, start: u64) -> IndexResult<ChangeCursor> {
        Ok(ChangeCursor::new(self.store.open_read_cursor(start)))
    }

    /// Remove every record, or only those of `partition`. Blocks until the
    /// records are gone; waits for an in-flight trim scan first.
    pub fn clear(&self, partition: Option<&PartitionId>) -> IndexResult<usize> {
        let removed = self.trim.exclusive(|| {
            self.ensure_running()?;
            Ok::<_, IndexError>(self.store.clear(partition)?)
        })?;
        tracing::info!(
            removed,
            partition = partition.map(|p| p.as_str()).unwrap_or("*"),
            "cleared records"
        );
        Ok(removed)
    }

    /// Run one trim scan now on the calling thread
    pub fn trim_now(&self) -> IndexResult<ScanReport> {
        let scanned = self.trim.exclusive(|| {
            self.ensure_running()?;
            Ok::<_, IndexError>(self.trim.trim_locked())
        })?;
        scanned.map_err(|e| self.scan_failed(e))
    }

    /// Run one trim scan that also drops every record of `partition`
    /// met before the first kept record
    pub fn purge_partition(&self, partition: &PartitionId) -> IndexResult<ScanReport> {
        let scanned = self.trim.exclusive(|| {
            self.ensure_running()?;
            Ok::<_, IndexError>(self.trim.trim_partition_locked(partition))
        })?;
        scanned.map_err(|e| self.scan_failed(e))
    }

    /// A failed scan is fatal: the index stops accepting mutations and the
    /// handler is told. Runs outside the scan section so the handler may
    /// call `shutdown()`.
    fn scan_failed(&self, error: StorageError) -> IndexError {
        self.shutdown.store(true, Ordering::SeqCst);
        let error = IndexError::TrimFailed(error);
        self.fatal.escalate(&error);
        error
    }

    /// Takes effect on the next scan; zero disables trimming
    pub fn set_retention_age(&self, age: Duration) {
        self.trim.set_retention_age(age);
        self.runner.wake();
    }

    pub fn retention_age(&self) -> Duration {
        self.trim.retention_age()
    }

    pub fn wake_trimmer(&self) {
        self.runner.wake();
    }

    /// Oldest change number the last scan decided to keep (0 before any)
    pub fn oldest_retained(&self) -> u64 {
        self.trim.oldest_retained()
    }

    pub fn last_generated_change_number(&self) -> u64 {
        self.allocator.last_generated()
    }

    pub fn count(&self) -> IndexResult<u64> {
        Ok(self.store.count()?)
    }

    pub fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.store.read_last()?.is_none())
    }

    /// Never blocks on the trim engine
    pub fn snapshot_stats(&self) -> IndexStats {
        IndexStats::collect(&self.store, self.allocator.last_generated())
    }

    /// Stop the trimmer and wait until nothing mutates the store any more:
    /// in-flight appends, clears and scans (background or caller-driven)
    /// have all finished when this returns. Idempotent.
    ///
    /// Afterwards writes, clears and trims fail with `ShutdownInProgress`;
    /// reads keep working until `close()`.
    pub fn shutdown(&self) -> Option<TrimExit> {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("change-number index shutting down");
        }
        self.trim.signal().shutdown();
        drop(self.append_lock.lock());
        // A running scan sees the signal at its next record.
        self.trim.exclusive(|| ());
        self.runner.stop()
    }

    /// Shut down and release the store
    pub fn close(&self) -> IndexResult<()> {
        self.shutdown();
        self.store.close()?;
        Ok(())
    }
}

impl std::fmt::Display for ChangeNumberIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.snapshot_stats();
        write!(
            f,
            "ChangeNumberIndex: {} {}",
            stats.oldest_change_number, stats.newest_change_number
        )
    }
}

impl Drop for ChangeNumberIndex {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::StaticTopology;
    use crate::types::ReplicaId;

    fn index() -> ChangeNumberIndex {
        ChangeNumberIndex::in_memory(IndexConfig::default(), Arc::new(StaticTopology::new())).unwrap()
    }

    fn tok(ts: u64) -> ChangeToken {
        ChangeToken::new(ts, ReplicaId(1), 0)
    }

    #[test]
    fn test_add_and_read_back() {
        let index = index();
        let p1 = PartitionId::new("o=p1");

        assert_eq!(index.add_record(p1.clone(), tok(1), "snap1").unwrap(), 1);
        assert_eq!(index.add_record(p1.clone(), tok(2), "snap2").unwrap(), 2);

        let oldest = index.get_oldest_record().unwrap().unwrap();
        let newest = index.get_newest_record().unwrap().unwrap();
        assert_eq!(oldest.change_number, 1);
        assert_eq!(oldest.progress_snapshot, "snap1");
        assert_eq!(newest.change_number, 2);
        assert_eq!(index.to_string(), "ChangeNumberIndex: 1 2");
    }

    #[test]
    fn test_shutdown_rejects_writes_but_allows_reads() {
        let index = index();
        index.add_record(PartitionId::new("o=a"), tok(1), "").unwrap();
        assert_eq!(index.shutdown(), None);
        assert_eq!(index.shutdown(), None);

        assert!(matches!(
            index.add_record(PartitionId::new("o=a"), tok(2), ""),
            Err(IndexError::ShutdownInProgress)
        ));
        assert!(matches!(index.clear(None), Err(IndexError::ShutdownInProgress)));
        assert!(matches!(index.start_trimming(), Err(IndexError::ShutdownInProgress)));

        let all: Vec<_> = index.open_cursor_from(0).unwrap().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(index.snapshot_stats().record_count, 1);
    }

    #[test]
    fn test_failed_append_leaves_gap() {
        let engine = Arc::new(MemoryStore::new());
        let index = ChangeNumberIndex::open(
            engine.clone(),
            Arc::new(StaticTopology::new()),
            IndexConfig::default(),
        )
        .unwrap();
        index.add_record(PartitionId::new("o=a"), tok(1), "").unwrap();

        engine.close().unwrap();
        assert!(index.add_record(PartitionId::new("o=a"), tok(2), "").is_err());
        assert_eq!(index.last_generated_change_number(), 2);
    }

    #[test]
    fn test_close_releases_store() {
        let index = index();
        index.close().unwrap();
        assert!(index.get_oldest_record().is_err());
        assert_eq!(index.lifecycle_state(), LifecycleState::Stopped);
    }
}
