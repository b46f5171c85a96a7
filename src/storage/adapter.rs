//! Index store adapter
//!
//! Thin owner of the ordered engine. Exposes the record-level operations the
//! index needs plus two cursor kinds:
//!
//! - `ReadCursor`: forward-only, read-only
//! - `DeleteCursor`: forward-only, buffers deletions and commits them on
//!   `close()`; `abort()` (or dropping it) discards them
//!
//! Both cursors are key-position iterators: every `advance()` seeks the first
//! record whose key is past the last one visited. A cursor therefore never
//! yields a record twice or goes backwards, and a record removed ahead of a
//! read cursor is skipped rather than returned.

use std::sync::Arc;

use crate::error::StorageResult;
use crate::types::{ChangeRecord, PartitionId};

use super::engine::OrderedStore;

/// Records visited per delete cursor when clearing a partition
pub const CLEAR_BATCH: usize = 50;

/// Shared handle over an ordered engine
#[derive(Clone)]
pub struct IndexStore {
    engine: Arc<dyn OrderedStore>,
}

impl IndexStore {
    pub fn new(engine: Arc<dyn OrderedStore>) -> Self {
        Self { engine }
    }

    /// Write a new immutable record keyed by its change number
    pub fn append(&self, record: &ChangeRecord) -> StorageResult<()> {
        self.engine.put(record)
    }

    pub fn read_first(&self) -> StorageResult<Option<ChangeRecord>> {
        self.engine.first()
    }

    pub fn read_last(&self) -> StorageResult<Option<ChangeRecord>> {
        self.engine.last()
    }

    /// Exact record count (both shipped engines keep an in-memory map)
    pub fn count(&self) -> StorageResult<u64> {
        self.engine.len()
    }

    /// Cursor positioned before the first record with key `>= start`
    pub fn open_read_cursor(&self, start: u64) -> ReadCursor {
        ReadCursor {
            engine: Arc::clone(&self.engine),
            next_key: Some(start),
            current: None,
        }
    }

    /// Delete-capable cursor positioned before the first record
    pub fn open_delete_cursor(&self) -> DeleteCursor {
        DeleteCursor {
            engine: Arc::clone(&self.engine),
            next_key: Some(0),
            current: None,
            pending: Vec::new(),
            finished: false,
        }
    }

    /// Delete all records, or only those of `partition`.
    ///
    /// Returns the number of records removed.
    pub fn clear(&self, partition: Option<&PartitionId>) -> StorageResult<usize> {
        let Some(partition) = partition else {
            let count = self.engine.len()?;
            self.engine.truncate()?;
            return Ok(count as usize);
        };

        let mut removed = 0;
        let mut resume_from = Some(0);
        while let Some(start) = resume_from {
            let mut cursor = self.open_delete_cursor();
            cursor.next_key = Some(start);

            match clear_batch(&mut cursor, partition) {
                Ok(true) => resume_from = cursor.next_key,
                Ok(false) => resume_from = None,
                Err(e) => {
                    cursor.abort();
                    return Err(e);
                }
            }
            removed += cursor.close()?;
        }
        Ok(removed)
    }

    /// Close the underlying engine
    pub fn close(&self) -> StorageResult<()> {
        self.engine.close()
    }
}

/// Visit up to `CLEAR_BATCH` records, marking those of `partition`.
/// Returns true if records may remain past the batch.
fn clear_batch(cursor: &mut DeleteCursor, partition: &PartitionId) -> StorageResult<bool> {
    for _ in 0..CLEAR_BATCH {
        if !cursor.advance()? {
            return Ok(false);
        }
        if cursor
            .current()
            .is_some_and(|r| &r.partition_id == partition)
        {
            cursor.delete_current();
        }
    }
    Ok(true)
}

/// Forward-only read cursor
pub struct ReadCursor {
    engine: Arc<dyn OrderedStore>,
    next_key: Option<u64>,
    current: Option<ChangeRecord>,
}

impl ReadCursor {
    /// Move to the next record. Returns false once exhausted.
    pub fn advance(&mut self) -> StorageResult<bool> {
        self.current = match self.next_key {
            Some(key) => self.engine.seek(key)?,
            None => None,
        };
        if let Some(record) = &self.current {
            self.next_key = record.change_number.checked_add(1);
        }
        Ok(self.current.is_some())
    }

    pub fn current(&self) -> Option<&ChangeRecord> {
        self.current.as_ref()
    }

    /// Hand out the current record, leaving the cursor without one
    pub fn take_current(&mut self) -> Option<ChangeRecord> {
        self.current.take()
    }
}

/// Forward-only cursor that can delete the records it visits
pub struct DeleteCursor {
    engine: Arc<dyn OrderedStore>,
    next_key: Option<u64>,
    current: Option<ChangeRecord>,
    pending: Vec<u64>,
    finished: bool,
}

impl DeleteCursor {
    /// Move to the next record. Returns false once exhausted.
    pub fn advance(&mut self) -> StorageResult<bool> {
        self.current = match self.next_key {
            Some(key) => self.engine.seek(key)?,
            None => None,
        };
        match &self.current {
            Some(record) => {
                self.next_key = record.change_number.checked_add(1);
                Ok(true)
            }
            None => {
                self.next_key = None;
                Ok(false)
            }
        }
    }

    pub fn current(&self) -> Option<&ChangeRecord> {
        self.current.as_ref()
    }

    /// Mark the current record for deletion. Returns false if there is none.
    pub fn delete_current(&mut self) -> bool {
        match self.current.take() {
            Some(record) => {
                self.pending.push(record.change_number);
                true
            }
            None => false,
        }
    }

    /// Deletions buffered so far
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Commit buffered deletions and release the cursor.
    /// Returns how many records were removed.
    pub fn close(mut self) -> StorageResult<usize> {
        self.finished = true;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(0);
        }
        self.engine.remove(&pending)
    }

    /// Release the cursor without committing anything
    pub fn abort(mut self) {
        self.finished = true;
        let dropped = std::mem::take(&mut self.pending);
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "delete cursor aborted");
        }
    }
}

impl Drop for DeleteCursor {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            tracing::warn!(
                dropped = self.pending.len(),
                "delete cursor dropped without close; deletions discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{ChangeToken, ReplicaId};

    fn store_with(records: &[(u64, &str)]) -> IndexStore {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        for (cn, partition) in records {
            store
                .append(&ChangeRecord::new(
                    *cn,
                    PartitionId::new(*partition),
                    ChangeToken::new(*cn, ReplicaId(1), 0),
                    "",
                ))
                .unwrap();
        }
        store
    }

    fn keys(store: &IndexStore) -> Vec<u64> {
        let mut cursor = store.open_read_cursor(0);
        let mut out = Vec::new();
        while cursor.advance().unwrap() {
            out.push(cursor.current().unwrap().change_number);
        }
        out
    }

    #[test]
    fn test_read_cursor_starts_at_or_after_key() {
        let store = store_with(&[(2, "a"), (4, "a"), (6, "a")]);

        let mut cursor = store.open_read_cursor(3);
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.current().unwrap().change_number, 4);

        let mut beyond = store.open_read_cursor(100);
        assert!(!beyond.advance().unwrap());
        assert!(beyond.current().is_none());
    }

    #[test]
    fn test_read_cursor_skips_records_deleted_ahead() {
        let store = store_with(&[(1, "a"), (2, "a"), (3, "a")]);
        let mut cursor = store.open_read_cursor(0);
        assert!(cursor.advance().unwrap());

        store.engine.remove(&[2]).unwrap();

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.current().unwrap().change_number, 3);
    }

    #[test]
    fn test_delete_cursor_commits_on_close() {
        let store = store_with(&[(1, "a"), (2, "a"), (3, "a")]);
        let mut cursor = store.open_delete_cursor();
        assert!(cursor.advance().unwrap());
        assert!(cursor.delete_current());
        assert!(!cursor.delete_current());
        assert!(cursor.advance().unwrap());
        assert!(cursor.delete_current());

        // Not visible until committed
        assert_eq!(keys(&store), vec![1, 2, 3]);
        assert_eq!(cursor.close().unwrap(), 2);
        assert_eq!(keys(&store), vec![3]);
    }

    #[test]
    fn test_delete_cursor_abort_and_drop_discard() {
        let store = store_with(&[(1, "a"), (2, "a")]);

        let mut cursor = store.open_delete_cursor();
        cursor.advance().unwrap();
        cursor.delete_current();
        cursor.abort();

        let mut dropped = store.open_delete_cursor();
        dropped.advance().unwrap();
        dropped.delete_current();
        drop(dropped);

        assert_eq!(keys(&store), vec![1, 2]);
    }

    #[test]
    fn test_clear_partition_keeps_others_in_order() {
        let records: Vec<(u64, &str)> = (1..=120)
            .map(|cn| (cn, if cn % 3 == 0 { "x" } else { "y" }))
            .collect();
        let store = store_with(&records);

        assert_eq!(store.clear(Some(&PartitionId::new("x"))).unwrap(), 40);

        let remaining = keys(&store);
        assert_eq!(remaining.len(), 80);
        assert!(remaining.windows(2).all(|w| w[0] < w[1]));
        assert!(remaining.iter().all(|cn| cn % 3 != 0));
    }

    #[test]
    fn test_clear_all() {
        let store = store_with(&[(1, "a"), (2, "b")]);
        assert_eq!(store.clear(None).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.read_first().unwrap().is_none());
    }
}
