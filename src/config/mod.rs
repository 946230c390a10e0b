//! Workspace discovery and configuration.
//!
//! A beads workspace is a `.beads/` directory holding the SQLite store, the
//! JSONL archive, the merge base snapshot, and the daemon socket. Discovery
//! walks up from the working directory; `BEADS_DIR` and `BEADS_JSONL`
//! override the locations, and `BEADS_ACTOR`/`BD_ACTOR` supply the default
//! actor for audit trails.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStore;

pub const ENV_BEADS_DIR: &str = "BEADS_DIR";
pub const ENV_BEADS_JSONL: &str = "BEADS_JSONL";
pub const ENV_ACTOR: &str = "BEADS_ACTOR";
pub const ENV_ACTOR_ALT: &str = "BD_ACTOR";

/// Directory name of the workspace.
pub const BEADS_DIR_NAME: &str = ".beads";
/// Store file name inside the workspace.
pub const DB_FILE: &str = "beads.db";
/// Archive file name inside the workspace.
pub const JSONL_FILE: &str = "issues.jsonl";

/// Config keys for sync-time and create-time validation levels.
pub const CONFIG_VALIDATION_ON_CREATE: &str = "validation.on-create";
pub const CONFIG_VALIDATION_ON_SYNC: &str = "validation.on-sync";

/// Names of the doctor-style checks that gate sync preflight. Treated as
/// data: editing this list does not touch engine code.
pub const CRITICAL_PREFLIGHT_CHECKS: &[&str] = &[
    "empty_db_guard",
    "stale_db_guard",
    "conflict_markers",
    "prefix_safety",
    "repo_fingerprint",
];

/// Resolved workspace paths for one invocation.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub beads_dir: PathBuf,
    pub db_path: PathBuf,
    pub jsonl_path: PathBuf,
    /// Repository root (the parent of `.beads/`).
    pub repo_root: PathBuf,
}

impl WorkspacePaths {
    /// Resolve paths from a discovered beads directory.
    #[must_use]
    pub fn resolve(beads_dir: PathBuf) -> Self {
        let jsonl_path = std::env::var_os(ENV_BEADS_JSONL).map_or_else(
            || beads_dir.join(JSONL_FILE),
            |raw| {
                let path = PathBuf::from(raw);
                path.canonicalize().unwrap_or(path)
            },
        );
        let repo_root = beads_dir
            .parent()
            .map_or_else(|| beads_dir.clone(), Path::to_path_buf);
        Self {
            db_path: beads_dir.join(DB_FILE),
            jsonl_path,
            repo_root,
            beads_dir,
        }
    }
}

/// Discover the `.beads` directory: `BEADS_DIR` first, then walk up from
/// `start` (or the current directory).
///
/// # Errors
///
/// Returns `NotInitialized` when no workspace is found.
pub fn discover_beads_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(ENV_BEADS_DIR) {
        let path = PathBuf::from(dir);
        if path.is_dir() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
        return Err(BeadsError::Config(format!(
            "{ENV_BEADS_DIR} points at a missing directory: {}",
            path.display()
        )));
    }

    let origin = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let mut current = origin.as_path();
    loop {
        let candidate = current.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(BeadsError::NotInitialized),
        }
    }
}

/// Resolve the acting user for audit trails:
/// CLI override, `BEADS_ACTOR`, `BD_ACTOR`, `USER`, then "unknown".
#[must_use]
pub fn resolve_actor(cli_override: Option<&str>) -> String {
    if let Some(actor) = cli_override {
        return actor.to_string();
    }
    for key in [ENV_ACTOR, ENV_ACTOR_ALT, "USER"] {
        if let Ok(value) = std::env::var(key) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    "unknown".to_string()
}

/// Initialize a workspace at `root/.beads`.
///
/// Sets the issue prefix, records the repository fingerprint, and drops a
/// `.gitignore` keeping the store and socket out of version control (the
/// JSONL is the tracked artifact).
///
/// # Errors
///
/// Returns `AlreadyInitialized` unless `force` is set.
pub fn init_workspace(root: &Path, prefix: &str, force: bool) -> Result<WorkspacePaths> {
    let beads_dir = root.join(BEADS_DIR_NAME);
    if beads_dir.exists() && !force {
        return Err(BeadsError::AlreadyInitialized { path: beads_dir });
    }
    std::fs::create_dir_all(&beads_dir)?;

    let paths = WorkspacePaths::resolve(beads_dir);
    let mut store = SqliteStore::open(&paths.db_path)?;
    store.set_config(crate::storage::CONFIG_ISSUE_PREFIX, prefix)?;
    crate::daemon::verify_repo_fingerprint(&mut store, &paths.repo_root)?;

    std::fs::write(
        paths.beads_dir.join(".gitignore"),
        "beads.db\nbeads.db-wal\nbeads.db-shm\nbeads.db.lock\nbd.sock\n*.tmp\n",
    )?;

    tracing::info!(prefix, dir = %paths.beads_dir.display(), "initialized workspace");
    Ok(paths)
}

/// Severity applied to validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// Findings are ignored.
    None,
    /// Findings go to stderr as warnings.
    #[default]
    Warn,
    /// Findings refuse the operation.
    Error,
}

impl ValidationLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for ValidationLevel {
    type Err = BeadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(BeadsError::InvalidInput(format!(
                "invalid validation level '{other}' (use none, warn, error)"
            ))),
        }
    }
}

/// Read a validation level from config, defaulting to `Warn`.
///
/// # Errors
///
/// Returns an error if the config read fails or the value is malformed.
pub fn validation_level(store: &SqliteStore, key: &str) -> Result<ValidationLevel> {
    store
        .get_config(key)?
        .as_deref()
        .map_or(Ok(ValidationLevel::default()), str::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discover_walks_up() {
        let dir = TempDir::new().unwrap();
        let beads = dir.path().join(BEADS_DIR_NAME);
        std::fs::create_dir_all(&beads).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = discover_beads_dir(Some(&nested)).unwrap();
        assert_eq!(found.file_name().unwrap(), BEADS_DIR_NAME);
    }

    #[test]
    fn discover_fails_without_workspace() {
        let dir = TempDir::new().unwrap();
        let result = discover_beads_dir(Some(dir.path()));
        assert!(matches!(result, Err(BeadsError::NotInitialized)));
    }

    #[test]
    fn init_creates_store_with_prefix() {
        let dir = TempDir::new().unwrap();
        let paths = init_workspace(dir.path(), "bd", false).unwrap();
        assert!(paths.db_path.exists());

        let store = SqliteStore::open(&paths.db_path).unwrap();
        assert_eq!(store.issue_prefix().unwrap().unwrap(), "bd");
        assert!(
            store
                .get_metadata(crate::sync::METADATA_REPO_ID)
                .unwrap()
                .is_some()
        );
        assert!(paths.beads_dir.join(".gitignore").exists());
    }

    #[test]
    fn init_twice_requires_force() {
        let dir = TempDir::new().unwrap();
        init_workspace(dir.path(), "bd", false).unwrap();
        assert!(matches!(
            init_workspace(dir.path(), "bd", false),
            Err(BeadsError::AlreadyInitialized { .. })
        ));
        init_workspace(dir.path(), "bd", true).unwrap();
    }

    #[test]
    fn actor_resolution_prefers_override() {
        assert_eq!(resolve_actor(Some("alice")), "alice");
        assert!(!resolve_actor(None).is_empty());
    }

    #[test]
    fn validation_level_parses() {
        assert_eq!("warn".parse::<ValidationLevel>().unwrap(), ValidationLevel::Warn);
        assert_eq!("ERROR".parse::<ValidationLevel>().unwrap(), ValidationLevel::Error);
        assert!("loud".parse::<ValidationLevel>().is_err());
    }

    #[test]
    fn workspace_paths_shape() {
        let dir = TempDir::new().unwrap();
        let beads = dir.path().join(BEADS_DIR_NAME);
        std::fs::create_dir_all(&beads).unwrap();
        let paths = WorkspacePaths::resolve(beads.clone());
        assert_eq!(paths.db_path, beads.join(DB_FILE));
        assert_eq!(paths.repo_root, dir.path());
    }
}
