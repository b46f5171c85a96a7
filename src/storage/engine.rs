//! Ordered key-value engine interface and the in-memory engine

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::types::ChangeRecord;

/// Durable ordered store of index records keyed by change number.
///
/// Implementations serialize conflicting access internally; callers share
/// one engine behind an `Arc`.
pub trait OrderedStore: Send + Sync {
    /// Store a new record. Fails with `DuplicateKey` if the key exists.
    fn put(&self, record: &ChangeRecord) -> StorageResult<()>;

    /// Lowest-keyed record
    fn first(&self) -> StorageResult<Option<ChangeRecord>>;

    /// Highest-keyed record
    fn last(&self) -> StorageResult<Option<ChangeRecord>>;

    /// First record whose key is `>= from`
    fn seek(&self, from: u64) -> StorageResult<Option<ChangeRecord>>;

    /// Remove the given keys as one batch, returning how many existed
    fn remove(&self, keys: &[u64]) -> StorageResult<usize>;

    /// Exact number of records
    fn len(&self) -> StorageResult<u64>;

    /// Remove every record
    fn truncate(&self) -> StorageResult<()>;

    /// Release resources; every later call fails with `StorageError::Closed`
    fn close(&self) -> StorageResult<()>;
}

/// Record map shared by the shipped engines
#[derive(Debug, Default)]
pub(crate) struct RecordMap {
    records: BTreeMap<u64, ChangeRecord>,
    closed: bool,
}

impl RecordMap {
    pub(crate) fn from_records(records: BTreeMap<u64, ChangeRecord>) -> Self {
        Self {
            records,
            closed: false,
        }
    }

    pub(crate) fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_vacant(&self, key: u64) -> StorageResult<()> {
        if self.records.contains_key(&key) {
            Err(StorageError::DuplicateKey(key))
        } else {
            Ok(())
        }
    }

    pub(crate) fn insert(&mut self, record: ChangeRecord) {
        self.records.insert(record.change_number, record);
    }

    pub(crate) fn first(&self) -> Option<ChangeRecord> {
        self.records.values().next().cloned()
    }

    pub(crate) fn last(&self) -> Option<ChangeRecord> {
        self.records.values().next_back().cloned()
    }

    pub(crate) fn seek(&self, from: u64) -> Option<ChangeRecord> {
        self.records.range(from..).next().map(|(_, r)| r.clone())
    }

    pub(crate) fn contains(&self, key: u64) -> bool {
        self.records.contains_key(&key)
    }

    pub(crate) fn remove(&mut self, keys: &[u64]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.records.remove(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.values()
    }

    pub(crate) fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.records.clear();
    }
}

/// Non-durable engine backed by a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<RecordMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderedStore for MemoryStore {
    fn put(&self, record: &ChangeRecord) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        inner.check_vacant(record.change_number)?;
        inner.insert(record.clone());
        Ok(())
    }

    fn first(&self) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.first())
    }

    fn last(&self) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.last())
    }

    fn seek(&self, from: u64) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.seek(from))
    }

    fn remove(&self, keys: &[u64]) -> StorageResult<usize> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        Ok(inner.remove(keys))
    }

    fn len(&self) -> StorageResult<u64> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.len())
    }

    fn truncate(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        inner.clear();
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.write().close();
        Ok(())
    }
}
