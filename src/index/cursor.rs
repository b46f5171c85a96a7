//! Reader cursor over the index
//!
//! A `ChangeCursor` lazily yields records in change-number order starting at
//! the requested number. It cannot be rewound; open a new one to restart.
//!
//! Consistency: each step reads the first record past the previous one at
//! the time of the call. Records trimmed behind the cursor do not affect it.
//! A record trimmed before the cursor reaches it is skipped. A record the
//! cursor already yielded stays valid in the caller's hands even if it is
//! trimmed afterwards.

use crate::error::StorageResult;
use crate::storage::ReadCursor;
use crate::types::ChangeRecord;

/// Forward-only iterator of index records
pub struct ChangeCursor {
    inner: ReadCursor,
    done: bool,
}

impl ChangeCursor {
    pub(crate) fn new(inner: ReadCursor) -> Self {
        Self { inner, done: false }
    }

    /// Next record, `Ok(None)` once exhausted
    pub fn next_record(&mut self) -> StorageResult<Option<ChangeRecord>> {
        if self.done {
            return Ok(None);
        }
        match self.inner.advance() {
            Ok(true) => Ok(self.inner.take_current()),
            Ok(false) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }
}

impl Iterator for ChangeCursor {
    type Item = StorageResult<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl std::iter::FusedIterator for ChangeCursor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IndexStore, MemoryStore, OrderedStore};
    use crate::types::{ChangeToken, PartitionId, ReplicaId};
    use std::sync::Arc;

    fn record(cn: u64) -> ChangeRecord {
        ChangeRecord::new(cn, PartitionId::new("o=a"), ChangeToken::new(cn, ReplicaId(1), 0), "")
    }

    #[test]
    fn test_cursor_yields_in_order_then_stops() {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        for cn in [5, 6, 9] {
            store.append(&record(cn)).unwrap();
        }

        let cursor = ChangeCursor::new(store.open_read_cursor(6));
        let numbers: Vec<u64> = cursor.map(|r| r.unwrap().change_number).collect();
        assert_eq!(numbers, vec![6, 9]);
    }

    #[test]
    fn test_exhausted_cursor_stays_exhausted() {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        let mut cursor = ChangeCursor::new(store.open_read_cursor(0));
        assert!(cursor.next().is_none());

        store.append(&record(1)).unwrap();
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_cursor_surfaces_storage_error_once() {
        let engine = Arc::new(MemoryStore::new());
        let store = IndexStore::new(engine.clone());
        store.append(&record(1)).unwrap();

        let mut cursor = ChangeCursor::new(store.open_read_cursor(0));
        assert_eq!(cursor.next().unwrap().unwrap().change_number, 1);

        engine.close().unwrap();
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
