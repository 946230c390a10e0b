//! Daemon coordination: socket resolution, repository fingerprinting, and
//! the daemon/direct mode selector.
//!
//! A CLI invocation prefers the daemon when its socket answers a health
//! check; otherwise it opens the store directly. The selection happens once
//! per command, and a mid-command RPC failure downgrades the whole command
//! to direct mode through `CommandContext::fallback_to_direct_mode`.

pub mod client;
pub mod proto;
pub mod server;

pub use client::DaemonClient;
pub use server::DaemonServer;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStore;
use crate::sync::METADATA_REPO_ID;

/// Environment variable overriding the daemon socket path.
pub const ENV_SOCKET: &str = "BD_SOCKET";
/// Environment variable disabling daemon mode entirely.
pub const ENV_NO_DAEMON: &str = "BEADS_NO_DAEMON";
/// Environment variable enabling daemon auto-start.
pub const ENV_AUTO_START: &str = "BEADS_AUTO_START_DAEMON";

/// Resolve the daemon socket path: `BD_SOCKET` or `<beads_dir>/bd.sock`.
#[must_use]
pub fn socket_path(beads_dir: &Path) -> PathBuf {
    std::env::var_os(ENV_SOCKET)
        .map_or_else(|| beads_dir.join("bd.sock"), PathBuf::from)
}

/// Which access path a command uses for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Daemon,
    Direct,
}

/// Pick the access mode for this invocation.
///
/// Daemon mode requires the socket to answer a health check; `no_daemon`
/// (flag or `BEADS_NO_DAEMON`) forces direct mode. With
/// `BEADS_AUTO_START_DAEMON` set, an unreachable daemon is started in the
/// background and this invocation proceeds directly; the next one connects.
#[must_use]
pub fn select_mode(socket: &Path, no_daemon: bool) -> AccessMode {
    if no_daemon || std::env::var_os(ENV_NO_DAEMON).is_some() {
        return AccessMode::Direct;
    }

    let client = DaemonClient::new(socket.to_path_buf());
    if client.is_healthy() {
        return AccessMode::Daemon;
    }

    if std::env::var_os(ENV_AUTO_START).is_some() {
        spawn_daemon_process();
    }
    AccessMode::Direct
}

/// Best-effort detached `bd daemon run`.
fn spawn_daemon_process() {
    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    match std::process::Command::new(exe)
        .args(["daemon", "run"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => tracing::debug!(pid = child.id(), "auto-started daemon"),
        Err(err) => tracing::debug!(error = %err, "daemon auto-start failed"),
    }
}

/// Compute the repository fingerprint: SHA-256 over the canonical repo path
/// and the origin remote url (when a git checkout is present), truncated to
/// 16 hex characters.
#[must_use]
pub fn compute_repo_id(repo_root: &Path) -> String {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update(b"\x00");
    if let Some(url) = git_origin_url(&canonical) {
        hasher.update(url.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Read the origin remote url from `.git/config` without invoking git.
fn git_origin_url(repo_root: &Path) -> Option<String> {
    let config = std::fs::read_to_string(repo_root.join(".git").join("config")).ok()?;
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line.replace(' ', "") == "[remote\"origin\"]";
            continue;
        }
        if in_origin {
            if let Some(url) = line.strip_prefix("url") {
                return Some(url.trim_start_matches(['=', ' ', '\t']).trim().to_string());
            }
        }
    }
    None
}

/// Check the store's recorded fingerprint against the computed one, and
/// record it on first open.
///
/// # Errors
///
/// Returns `RepoFingerprint` when the store belongs to another repository.
pub fn verify_repo_fingerprint(store: &mut SqliteStore, repo_root: &Path) -> Result<()> {
    let computed = compute_repo_id(repo_root);
    match store.get_metadata(METADATA_REPO_ID)? {
        None => {
            store.set_metadata(METADATA_REPO_ID, &computed)?;
            Ok(())
        }
        Some(stored) if stored == computed => Ok(()),
        Some(stored) => Err(BeadsError::RepoFingerprint { stored, computed }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn socket_path_defaults_under_beads_dir() {
        let dir = TempDir::new().unwrap();
        // Only assert the default shape; the env override is process-global.
        if std::env::var_os(ENV_SOCKET).is_none() {
            assert_eq!(socket_path(dir.path()), dir.path().join("bd.sock"));
        }
    }

    #[test]
    fn repo_id_is_stable_and_path_sensitive() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        assert_eq!(compute_repo_id(a.path()), compute_repo_id(a.path()));
        assert_ne!(compute_repo_id(a.path()), compute_repo_id(b.path()));
    }

    #[test]
    fn repo_id_includes_origin_url() {
        let dir = TempDir::new().unwrap();
        let without = compute_repo_id(dir.path());

        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(
            git_dir.join("config"),
            "[remote \"origin\"]\n\turl = git@example.com:acme/widgets.git\n",
        )
        .unwrap();
        let with = compute_repo_id(dir.path());
        assert_ne!(without, with);
    }

    #[test]
    fn fingerprint_recorded_then_enforced() {
        let dir = TempDir::new().unwrap();
        let mut store = SqliteStore::open_memory().unwrap();

        verify_repo_fingerprint(&mut store, dir.path()).unwrap();
        // Second check against the same root passes.
        verify_repo_fingerprint(&mut store, dir.path()).unwrap();

        let other = TempDir::new().unwrap();
        let err = verify_repo_fingerprint(&mut store, other.path()).unwrap_err();
        assert!(matches!(err, BeadsError::RepoFingerprint { .. }));
    }

    #[test]
    fn no_daemon_forces_direct() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("bd.sock");
        assert_eq!(select_mode(&socket, true), AccessMode::Direct);
    }
}
