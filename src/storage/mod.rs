//! Relational store: `SQLite` schema plus an advisory lock on the database
//! file. The lock serializes writers across processes; SQLite's own locking
//! still protects individual statements underneath it.

pub mod schema;
pub mod sqlite;

pub use sqlite::{
    CONFIG_ALLOWED_PREFIXES, CONFIG_ISSUE_PREFIX, IssueFilter, IssueUpdate, MutationContext,
    SqliteStore,
};

use crate::error::{BeadsError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock on the store file. Exclusive for writers, shared for
/// readers. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire an exclusive (writer) lock, failing fast if another process
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if the lock is held elsewhere.
    pub fn exclusive(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        FileExt::try_lock_exclusive(&file)
            .map_err(|_| BeadsError::DatabaseLocked { path: path.clone() })?;
        Ok(Self { file, path })
    }

    /// Acquire a shared (reader) lock, blocking until available.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened.
    pub fn shared(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        FileExt::lock_shared(&file)?;
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut path = db_path.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exclusive_lock_excludes_second_writer() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("beads.db");
        let first = StoreLock::exclusive(&db).unwrap();
        let second = StoreLock::exclusive(&db);
        assert!(matches!(second, Err(BeadsError::DatabaseLocked { .. })));
        drop(first);
        assert!(StoreLock::exclusive(&db).is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("beads.db");
        let _a = StoreLock::shared(&db).unwrap();
        let _b = StoreLock::shared(&db).unwrap();
    }
}
