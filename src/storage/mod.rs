//! Storage layer for the change-number index
//!
//! - `OrderedStore`: the ordered key-value engine interface
//! - `MemoryStore` / `FileStore`: the shipped engines
//! - `IndexStore`: adapter exposing append, point reads and cursors
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐
//! │ IndexStore   │───►│ OrderedStore │───►│ MemoryStore | FileStore   │
//! │ + cursors    │    │ (trait)      │    │ BTreeMap (+ jsonl + fsync)│
//! └──────────────┘    └──────────────┘    └───────────────────────────┘
//! ```

mod adapter;
mod engine;
mod file;

pub use adapter::{DeleteCursor, IndexStore, ReadCursor, CLEAR_BATCH};
pub use engine::{MemoryStore, OrderedStore};
pub use file::FileStore;
