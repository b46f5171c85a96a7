//! Utility functions and helpers
//!
//! This module contains file helpers shared by the storage engines.

pub mod atomic;

pub use atomic::{atomic_write_with, cleanup_temp_file};
