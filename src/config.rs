//! Index configuration
//!
//! Values come from code (`IndexConfig::new` plus `with_*` setters) or from
//! the environment via `IndexConfig::from_env`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the data directory
pub const ENV_DATA_DIR: &str = "CN_INDEX_DATA_DIR";
/// Environment variable holding the retention age in milliseconds
pub const ENV_RETENTION_MS: &str = "CN_INDEX_RETENTION_MS";
/// Environment variable holding the idle time between trim scans in milliseconds
pub const ENV_TRIM_INTERVAL_MS: &str = "CN_INDEX_TRIM_INTERVAL_MS";

/// Name of the index log inside the data directory
pub const INDEX_LOG_FILE: &str = "changenumber.jsonl";

/// Configuration for the change-number index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Path to the data directory
    pub data_dir: PathBuf,
    /// Retention age; zero disables trimming
    pub retention_age: Duration,
    /// Idle time between two trim scans
    pub trim_interval: Duration,
    /// Delete cursors opened per trim scan
    pub max_cursor_lifetimes: usize,
    /// Records visited per delete cursor
    pub max_records_per_cursor: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            retention_age: Duration::from_secs(3 * 24 * 60 * 60),
            trim_interval: Duration::from_secs(1),
            max_cursor_lifetimes: 100,
            max_records_per_cursor: 50,
        }
    }
}

impl IndexConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Build a config from `CN_INDEX_*` environment variables.
    ///
    /// A relative data directory is resolved against the current directory.
    /// Unparsable numbers are ignored and the default is kept.
    pub fn from_env() -> Self {
        let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut config = Self::new(current_dir.join("data"));

        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            let path = PathBuf::from(&dir);
            config.data_dir = if path.is_absolute() {
                path
            } else {
                current_dir.join(path)
            };
        }

        if let Some(ms) = read_millis(ENV_RETENTION_MS) {
            config.retention_age = ms;
        }
        if let Some(ms) = read_millis(ENV_TRIM_INTERVAL_MS) {
            config.trim_interval = ms;
        }

        config
    }

    pub fn with_retention_age(mut self, age: Duration) -> Self {
        self.retention_age = age;
        self
    }

    pub fn with_trim_interval(mut self, interval: Duration) -> Self {
        self.trim_interval = interval;
        self
    }

    /// Override the per-scan bounds (cursor lifetimes, records per cursor).
    /// Zero values are clamped to one.
    pub fn with_scan_bounds(mut self, cursor_lifetimes: usize, records_per_cursor: usize) -> Self {
        self.max_cursor_lifetimes = cursor_lifetimes.max(1);
        self.max_records_per_cursor = records_per_cursor.max(1);
        self
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to changenumber.jsonl
    pub fn index_log_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_LOG_FILE)
    }
}

fn read_millis(var: &str) -> Option<Duration> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            tracing::warn!(variable = var, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.trim_interval, Duration::from_secs(1));
        assert_eq!(config.max_cursor_lifetimes, 100);
        assert_eq!(config.max_records_per_cursor, 50);
        assert!(!config.retention_age.is_zero());
    }

    #[test]
    fn test_paths_and_builders() {
        let config = IndexConfig::new("/tmp/cn")
            .with_retention_age(Duration::ZERO)
            .with_scan_bounds(0, 5);

        assert_eq!(config.index_log_path(), PathBuf::from("/tmp/cn/changenumber.jsonl"));
        assert!(config.retention_age.is_zero());
        assert_eq!(config.max_cursor_lifetimes, 1);
        assert_eq!(config.max_records_per_cursor, 5);
    }

    // All env assertions live in one test; the process environment is shared.
    #[test]
    fn test_from_env() {
        env::set_var(ENV_DATA_DIR, "relative/cn");
        env::set_var(ENV_RETENTION_MS, "0");
        env::set_var(ENV_TRIM_INTERVAL_MS, "not-a-number");

        let config = IndexConfig::from_env();
        assert!(config.data_dir.is_absolute());
        assert!(config.data_dir.ends_with("relative/cn"));
        assert!(config.retention_age.is_zero());
        assert_eq!(config.trim_interval, Duration::from_secs(1));

        env::remove_var(ENV_DATA_DIR);
        env::remove_var(ENV_RETENTION_MS);
        env::remove_var(ENV_TRIM_INTERVAL_MS);
    }
}
