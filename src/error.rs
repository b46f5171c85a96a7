//! Error types for the change-number index
//!
//! - `StorageError`: raised by the ordered store (I/O, corruption, misuse)
//! - `DecodeError`: malformed change tokens or progress cookies
//! - `IndexError`: what the public index facade returns

use thiserror::Error;

/// Result type for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by the underlying ordered store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Index log corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },

    #[error("Change number {0} already present")]
    DuplicateKey(u64),

    #[error("Store is closed")]
    Closed,
}

/// Errors raised while parsing tokens or progress cookies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid change token: {0:?}")]
    InvalidToken(String),

    #[error("Malformed progress cookie: {0}")]
    MalformedCookie(String),
}

/// Errors returned by the change-number index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The index is shutting down; callers should not retry.
    #[error("Index shutdown in progress")]
    ShutdownInProgress,

    /// A trim scan failed and stopped the trimmer.
    #[error("Trim failed: {0}")]
    TrimFailed(#[source] StorageError),

    #[error("Failed to spawn trimmer thread: {0}")]
    Spawn(std::io::Error),
}

impl IndexError {
    /// True when the error comes from the store itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, IndexError::Storage(_))
    }
}
