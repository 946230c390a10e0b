//! JSONL codec: one issue per line, UTF-8, LF-terminated, sorted by id.
//!
//! Reads tolerate blank lines and report (not fail on) single malformed
//! lines. Writes are atomic: temp file in the same directory, fsync, rename
//! over the target, owner-only permissions.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::util::content_hash;

/// Result of a tolerant JSONL read.
#[derive(Debug, Default)]
pub struct ReadReport {
    pub issues: Vec<Issue>,
    /// One entry per malformed line, with its line number.
    pub warnings: Vec<String>,
}

/// Read issues from a JSONL file, tolerating blank and malformed lines.
///
/// Content hashes are recomputed on load so the in-memory records are
/// immediately comparable.
///
/// # Errors
///
/// Returns `Encoding` for invalid UTF-8 and `Io` for filesystem failures.
/// Malformed individual lines become warnings, not errors.
pub fn read_jsonl(path: &Path) -> Result<ReadReport> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|err| {
        BeadsError::Encoding(format!("{}: {err}", path.display()))
    })?;

    let mut report = ReadReport::default();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(line) {
            Ok(mut issue) => {
                issue.content_hash = Some(content_hash(&issue));
                report.issues.push(issue);
            }
            Err(err) => {
                report
                    .warnings
                    .push(format!("line {}: {err}", index + 1));
            }
        }
    }
    Ok(report)
}

/// Count issue lines in a JSONL file (0 if the file does not exist).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn count_issues(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    Ok(text.lines().filter(|line| !line.trim().is_empty()).count())
}

/// Collect the ids present in a JSONL file, tolerating malformed lines.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_issue_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let report = read_jsonl(path)?;
    Ok(report.issues.into_iter().map(|i| i.id).collect())
}

/// Serialize issues to JSONL bytes: ephemerals skipped, sorted by id, one
/// LF-terminated object per line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(issues: &[Issue]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&Issue> = issues.iter().filter(|i| !i.ephemeral).collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = Vec::new();
    for issue in sorted {
        serde_json::to_writer(&mut out, issue)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Write issues atomically to `path`. Returns the SHA-256 of the written
/// bytes, which becomes the `jsonl_content_hash` staleness oracle.
///
/// The rename is the linearization point; on any earlier failure the target
/// file is untouched and the temp file is unlinked.
///
/// # Errors
///
/// Returns an error on serialization or filesystem failure.
pub fn write_jsonl_atomic(path: &Path, issues: &[Issue]) -> Result<String> {
    let parent = path.parent().ok_or_else(|| {
        BeadsError::Config(format!("invalid JSONL path: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let bytes = encode(issues)?;
    let hash = hash_bytes(&bytes);

    let temp_path = temp_sibling(path);
    let write_result = (|| -> Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| BeadsError::Io(e.into_error()))?
            .sync_all()?;
        Ok(())
    })();
    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    Ok(hash)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// SHA-256 of a byte slice, lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file's raw bytes. Returns `None` if the file is missing.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn hash_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(hash_bytes(&bytes)))
}

/// Scan for git conflict markers. Imports refuse files containing them.
///
/// # Errors
///
/// Returns `InvalidInput` naming the first offending line.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let text = fs::read_to_string(path)?;
    for (index, line) in text.lines().enumerate() {
        if line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
        {
            return Err(BeadsError::InvalidInput(format!(
                "{} contains a git conflict marker at line {}; resolve with 'bd merge' first",
                path.display(),
                index + 1
            )));
        }
    }
    Ok(())
}
