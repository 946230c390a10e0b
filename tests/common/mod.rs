//! Shared helpers for end-to-end CLI tests.

use assert_cmd::Command;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct BdWorkspace {
    _temp_dir: TempDir,
    pub root: PathBuf,
}

impl BdWorkspace {
    /// A fresh directory with no workspace yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    /// A fresh directory with `bd init` already run.
    pub fn initialized() -> Self {
        let workspace = Self::new();
        workspace.bd(["init"]).assert().success();
        workspace
    }

    /// Build a `bd` invocation rooted in this workspace. Daemon mode is off
    /// so tests exercise the direct path deterministically.
    pub fn bd<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::cargo_bin("bd").expect("bd binary");
        cmd.current_dir(&self.root)
            .env("BEADS_NO_DAEMON", "1")
            .env_remove("BEADS_DIR")
            .env_remove("BEADS_JSONL")
            .env("BEADS_ACTOR", "e2e");
        cmd.args(args);
        cmd
    }

    pub fn jsonl_path(&self) -> PathBuf {
        self.root.join(".beads").join("issues.jsonl")
    }

    /// Run `bd create` and return the new issue id.
    pub fn create_issue(&self, title: &str) -> String {
        let output = self.bd(["create", title]).output().expect("run bd create");
        assert!(
            output.status.success(),
            "create failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        parse_created_id(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn parse_created_id(stdout: &str) -> String {
    stdout
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("Created "))
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Read a workspace's JSONL as parsed JSON values, one per line.
pub fn read_jsonl_values(path: &Path) -> Vec<serde_json::Value> {
    let text = std::fs::read_to_string(path).expect("read jsonl");
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("parse jsonl line"))
        .collect()
}
