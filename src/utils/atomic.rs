//! Atomic file operations
//!
//! Rewrites of the index log go through a temporary file so the log on disk
//! is always either the old version or the new one.
//!
//! # Pattern
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)

use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Atomically write content using a writer function
///
/// # Arguments
///
/// * `path` - The final destination path
/// * `write_fn` - A function that writes content to the file
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    write_fn(&mut file)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Remove the temp file a rewrite of `path` leaves behind if interrupted.
/// Other `.tmp` files next to it are not touched.
///
/// Called when a store is opened. Returns true if a file was removed.
pub fn cleanup_temp_file<P: AsRef<Path>>(path: P) -> io::Result<bool> {
    let temp_path = path.as_ref().with_extension("tmp");
    match fs::remove_file(&temp_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_with() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("changenumber.jsonl");

        atomic_write_with(&path, |file| {
            writeln!(file, "Line 1")?;
            writeln!(file, "Line 2")?;
            Ok(())
        })
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Line 1\nLine 2\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("subdir").join("nested").join("log.jsonl");

        atomic_write_with(&path, |_| Ok(())).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_failed_write_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log.jsonl");
        fs::write(&path, "original\n").unwrap();

        let result = atomic_write_with(&path, |file| {
            writeln!(file, "partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "boom"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original\n");
    }

    #[test]
    fn test_cleanup_temp_file_only_touches_own_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("changenumber.jsonl");

        fs::write(temp_dir.path().join("changenumber.tmp"), "half written").unwrap();
        fs::write(temp_dir.path().join("other.tmp"), "not ours").unwrap();
        fs::write(&path, "keep").unwrap();

        assert!(cleanup_temp_file(&path).unwrap());
        assert!(!cleanup_temp_file(&path).unwrap());

        assert!(!temp_dir.path().join("changenumber.tmp").exists());
        assert!(temp_dir.path().join("other.tmp").exists());
        assert!(path.exists());
    }
}
