//! Change-Number Index
//!
//! A durable, strictly ordered mapping from a server-wide change number to
//! the replicated update it stands for, as kept by a replicated directory
//! server's changelog.
//!
//! # Features
//!
//! - **Ordered**: change numbers are strictly increasing and never reused
//! - **Durable**: the file engine fsyncs every append before it is visible
//! - **Cursors**: forward reads from any change number, safe under trimming
//! - **Trimming**: a background thread drops records whose updates were
//!   purged upstream or whose partition left the topology
//! - **Synchronous shutdown**: `shutdown()` returns only after the trimmer
//!   has stopped touching the store
//!
//! # Modules
//!
//! - `types`: Change tokens, progress vectors/cookies, index records
//! - `storage`: Ordered engines and the store adapter with its cursors
//! - `index`: Allocator, cursor, trim engine, lifecycle and stats
//! - `topology`: Partition collaborators and fatal-error escalation
//! - `config`: Index configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cn_index::{ChangeNumberIndex, ChangeToken, IndexConfig, PartitionId, ReplicaId, StaticTopology};
//!
//! fn main() -> Result<(), cn_index::IndexError> {
//!     let topology = Arc::new(StaticTopology::new());
//!     let partition = PartitionId::new("dc=example,dc=com");
//!     topology.insert(partition.clone());
//!
//!     let index = ChangeNumberIndex::open_file(IndexConfig::from_env(), topology)?;
//!     index.start_trimming()?;
//!
//!     let token = ChangeToken::now(ReplicaId(1), 0);
//!     let cn = index.add_record(partition, token, "")?;
//!     for record in index.open_cursor_from(cn)? {
//!         println!("{}", record?);
//!     }
//!
//!     index.close()
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod storage;
pub mod topology;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::IndexConfig;
pub use error::{DecodeError, IndexError, IndexResult, StorageError, StorageResult};
pub use index::{
    ChangeCursor, ChangeNumberIndex, IndexStats, LifecycleState, ScanOutcome, ScanReport,
    TrimDecision, TrimExit, TrimReason,
};
pub use storage::{FileStore, IndexStore, MemoryStore, OrderedStore};
pub use topology::{
    FatalErrorHandler, NoopFatalHandler, PartitionDomain, PartitionLookup, StaticDomain,
    StaticTopology,
};
pub use types::{ChangeRecord, ChangeToken, PartitionId, ProgressCookie, ProgressVector, ReplicaId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
