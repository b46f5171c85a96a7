//! Replication topology collaborators
//!
//! The index does not own partition state. It asks a `PartitionLookup` for
//! the live domain of a partition, and each `PartitionDomain` reports the
//! oldest progress its own change log still guarantees (the low-water mark).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::IndexError;
use crate::types::{ChangeToken, PartitionId, ProgressVector};

/// A live replication domain for one partition
pub trait PartitionDomain: Send + Sync {
    /// Oldest progress still retained by this partition's change log
    fn oldest_guaranteed_progress(&self) -> ProgressVector;
}

/// Resolves partitions to their live domains
pub trait PartitionLookup: Send + Sync {
    /// `None` when the partition was removed from the topology
    fn domain(&self, partition: &PartitionId) -> Option<Arc<dyn PartitionDomain>>;
}

/// Receives fatal trim failures so the owning server can shut down
pub trait FatalErrorHandler: Send + Sync {
    fn escalate(&self, error: &IndexError);
}

impl<F> FatalErrorHandler for F
where
    F: Fn(&IndexError) + Send + Sync,
{
    fn escalate(&self, error: &IndexError) {
        self(error)
    }
}

/// Handler that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFatalHandler;

impl FatalErrorHandler for NoopFatalHandler {
    fn escalate(&self, error: &IndexError) {
        tracing::error!(error = %error, "fatal index failure (no escalation handler installed)");
    }
}

/// Domain whose low-water mark is set explicitly
#[derive(Debug, Default)]
pub struct StaticDomain {
    low_water_mark: RwLock<ProgressVector>,
}

impl StaticDomain {
    pub fn new(low_water_mark: ProgressVector) -> Self {
        Self {
            low_water_mark: RwLock::new(low_water_mark),
        }
    }

    pub fn set_low_water_mark(&self, mark: ProgressVector) {
        *self.low_water_mark.write() = mark;
    }

    /// Advance the mark for one replica
    pub fn advance(&self, token: ChangeToken) {
        self.low_water_mark.write().update(token);
    }
}

impl PartitionDomain for StaticDomain {
    fn oldest_guaranteed_progress(&self) -> ProgressVector {
        self.low_water_mark.read().clone()
    }
}

/// Thread-safe in-memory topology
#[derive(Default)]
pub struct StaticTopology {
    domains: RwLock<HashMap<PartitionId, Arc<StaticDomain>>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a partition with an empty low-water mark
    pub fn insert(&self, partition: PartitionId) -> Arc<StaticDomain> {
        self.insert_with(partition, ProgressVector::new())
    }

    pub fn insert_with(&self, partition: PartitionId, mark: ProgressVector) -> Arc<StaticDomain> {
        let domain = Arc::new(StaticDomain::new(mark));
        self.domains.write().insert(partition, Arc::clone(&domain));
        domain
    }

    /// Remove a partition from the topology
    pub fn remove(&self, partition: &PartitionId) -> bool {
        self.domains.write().remove(partition).is_some()
    }

    pub fn set_low_water_mark(&self, partition: &PartitionId, mark: ProgressVector) -> bool {
        match self.domains.read().get(partition) {
            Some(domain) => {
                domain.set_low_water_mark(mark);
                true
            }
            None => false,
        }
    }
}

impl PartitionLookup for StaticTopology {
    fn domain(&self, partition: &PartitionId) -> Option<Arc<dyn PartitionDomain>> {
        self.domains
            .read()
            .get(partition)
            .map(|d| Arc::clone(d) as Arc<dyn PartitionDomain>)
    }
}
