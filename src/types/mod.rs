//! Data types for the change-number index
//!
//! This module contains the record stored by the index and the replication
//! identifiers it refers to.

mod progress;
mod record;
mod token;

pub use progress::{ProgressCookie, ProgressVector};
pub use record::ChangeRecord;
pub use token::{ChangeToken, PartitionId, ReplicaId, TOKEN_HEX_LEN};
