//! Change-number allocation

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StorageResult;
use crate::storage::IndexStore;

/// Issues strictly increasing change numbers.
///
/// Numbers are granted before the record is durable. A failed append leaves
/// a gap; numbers are never reused or reordered.
#[derive(Debug)]
pub struct ChangeNumberAllocator {
    last_generated: AtomicU64,
}

impl ChangeNumberAllocator {
    /// Start after `last_generated`
    pub fn new(last_generated: u64) -> Self {
        Self {
            last_generated: AtomicU64::new(last_generated),
        }
    }

    /// Seed from the newest persisted record (0 when the store is empty)
    pub fn recover(store: &IndexStore) -> StorageResult<Self> {
        let newest = store.read_last()?.map(|r| r.change_number).unwrap_or(0);
        Ok(Self::new(newest))
    }

    pub fn next(&self) -> u64 {
        self.last_generated.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_generated(&self) -> u64 {
        self.last_generated.load(Ordering::SeqCst)
    }
}
