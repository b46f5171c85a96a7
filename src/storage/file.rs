//! File-backed engine
//!
//! Records live in an append-only `changenumber.jsonl` log, one JSON object
//! per line. Appends are fsynced before they become visible. Deletions
//! rewrite the log atomically (temp file + rename). All records are cached
//! in memory, so reads never touch the disk.
//!
//! Cost: every `remove` batch rewrites and fsyncs the whole log under the
//! write lock, so it is O(records) and blocks readers and writers meanwhile.
//! A trim scan issues one batch per cursor lifetime (at most
//! `max_cursor_lifetimes` per scan); on large logs lower that bound or raise
//! `max_records_per_cursor` to trade fewer rewrites for longer pauses.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::config::IndexConfig;
use crate::error::{StorageError, StorageResult};
use crate::types::ChangeRecord;
use crate::utils::{atomic_write_with, cleanup_temp_file};

use super::engine::{OrderedStore, RecordMap};

/// Durable engine over a JSON-lines log
pub struct FileStore {
    path: PathBuf,
    inner: RwLock<RecordMap>,
}

impl FileStore {
    /// Open (or create) the index log of `config`
    pub fn open(config: &IndexConfig) -> StorageResult<Self> {
        Self::open_path(config.index_log_path())
    }

    /// Open (or create) an index log at an explicit path
    pub fn open_path<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if cleanup_temp_file(&path)? {
            tracing::info!(path = %path.display(), "removed leftover temp file from interrupted rewrite");
        }

        let records = Self::load(&path)?;
        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "opened change-number index log"
        );

        Ok(Self {
            path,
            inner: RwLock::new(RecordMap::from_records(records)),
        })
    }

    /// Path of the index log
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> StorageResult<BTreeMap<u64, ChangeRecord>> {
        let mut records = BTreeMap::new();

        if !path.exists() {
            return Ok(records);
        }

        let reader = BufReader::new(File::open(path)?);
        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            let record = ChangeRecord::from_json_line(&line).map_err(|e| {
                StorageError::Corrupted {
                    line: line_num + 1,
                    reason: e.to_string(),
                }
            })?;
            if records.insert(record.change_number, record).is_some() {
                return Err(StorageError::Corrupted {
                    line: line_num + 1,
                    reason: "duplicate change number".to_string(),
                });
            }
        }

        Ok(records)
    }

    fn append_line(&self, line: &str) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    fn rewrite<'a, I>(&self, records: I) -> StorageResult<()>
    where
        I: Iterator<Item = &'a ChangeRecord>,
    {
        atomic_write_with(&self.path, |file| {
            let mut writer = BufWriter::new(file);
            for record in records {
                writeln!(writer, "{}", record.to_json_line()?)?;
            }
            writer.flush()
        })?;
        Ok(())
    }
}

impl OrderedStore for FileStore {
    fn put(&self, record: &ChangeRecord) -> StorageResult<()> {
        let line = record.to_json_line()?;
        let mut inner = self.inner.write();
        inner.check_open()?;
        inner.check_vacant(record.change_number)?;
        self.append_line(&line)?;
        inner.insert(record.clone());
        Ok(())
    }

    fn first(&self) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.first())
    }

    fn last(&self) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.last())
    }

    fn seek(&self, from: u64) -> StorageResult<Option<ChangeRecord>> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.seek(from))
    }

    fn remove(&self, keys: &[u64]) -> StorageResult<usize> {
        let mut inner = self.inner.write();
        inner.check_open()?;

        let doomed: HashSet<u64> = keys.iter().copied().filter(|k| inner.contains(*k)).collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        // Disk first: a failed rewrite leaves both the log and the cache intact.
        self.rewrite(
            inner
                .records()
                .filter(|r| !doomed.contains(&r.change_number)),
        )?;
        Ok(inner.remove(keys))
    }

    fn len(&self) -> StorageResult<u64> {
        let inner = self.inner.read();
        inner.check_open()?;
        Ok(inner.len())
    }

    fn truncate(&self) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        self.rewrite(std::iter::empty())?;
        inner.clear();
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.write().close();
        tracing::debug!(path = %self.path.display(), "closed change-number index log");
        Ok(())
    }
}
