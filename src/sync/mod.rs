//! Sync bridge: orchestrates Store <-> JSONL export and import.
//!
//! Export walks a fixed contract: snapshot read, safety guards, bulk
//! relation population, atomic write, dirty-set clearing, metadata update,
//! and an mtime bump on the store file so staleness checks do not falsely
//! flag. Import parses tolerantly and delegates to the import engine.
//!
//! Staleness is decided by `jsonl_content_hash` metadata against the current
//! file hash. Mtime is not authoritative: version control does not preserve
//! it. A fresh clone with no metadata is stale, which triggers the initial
//! import.

pub mod codec;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{BeadsError, Result};
use crate::import::{ImportOptions, ImportResult, ResurrectSeed, import_batch};
use crate::model::Issue;
use crate::storage::SqliteStore;
use crate::util::now_rfc3339_nanos;

/// Metadata key for the hash of the last exported/imported JSONL bytes.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Metadata key for the last import/export wall-clock time (RFC3339 nanos).
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";
/// Metadata key for the repository fingerprint.
pub const METADATA_REPO_ID: &str = "repo_id";

/// File name of the remembered merge base snapshot, next to the JSONL.
pub const BASE_SNAPSHOT_FILE: &str = "base.jsonl";

/// Options for one export.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Bypass the empty-DB and stale-DB guards.
    pub force: bool,
}

/// Result of one export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub exported_count: usize,
    pub exported_ids: Vec<String>,
    /// SHA-256 over the written file bytes.
    pub content_hash: String,
}

/// Export all non-ephemeral issues (tombstones included) to `jsonl_path`.
///
/// `db_path`, when given, has its mtime bumped to at least the JSONL's after
/// a successful write.
///
/// # Errors
///
/// - `UnsafeExport` when the store is empty but the JSONL on disk is not, or
///   when the export would drop ids present in the JSONL (stale store), and
///   `force` is unset
/// - database and filesystem errors
pub fn export_to_jsonl(
    store: &mut SqliteStore,
    jsonl_path: &Path,
    db_path: Option<&Path>,
    options: &ExportOptions,
) -> Result<ExportOutcome> {
    let mut issues = store.get_all_issues_for_export()?;

    // Empty-DB guard: never overwrite a populated archive with nothing.
    if issues.is_empty() && !options.force {
        let existing = codec::count_issues(jsonl_path)?;
        if existing > 0 {
            return Err(BeadsError::UnsafeExport(format!(
                "refusing to export empty database over non-empty JSONL file \
                 ({existing} issues at {})",
                jsonl_path.display()
            )));
        }
    }

    // Stale-DB guard: an export must not silently drop archived issues.
    if !options.force && jsonl_path.exists() {
        let jsonl_ids = codec::read_issue_ids(jsonl_path)?;
        if !jsonl_ids.is_empty() {
            let db_ids: std::collections::HashSet<&String> =
                issues.iter().map(|i| &i.id).collect();
            let mut missing: Vec<&String> = jsonl_ids
                .iter()
                .filter(|id| !db_ids.contains(id))
                .collect();
            if !missing.is_empty() {
                missing.sort();
                let preview: Vec<&str> = missing.iter().take(10).map(|s| s.as_str()).collect();
                return Err(BeadsError::UnsafeExport(format!(
                    "refusing to export stale database: {} issue(s) in the JSONL are \
                     missing from the store ({}{})",
                    missing.len(),
                    preview.join(", "),
                    if missing.len() > 10 { ", ..." } else { "" }
                )));
            }
        }
    }

    // Populate relations in bulk to avoid N+1 traversal.
    let mut all_deps = store.get_all_dependency_records()?;
    let mut all_labels = store.get_all_labels()?;
    let mut all_comments = store.get_all_comments()?;
    let mut all_commits = store.get_all_commits()?;
    for issue in &mut issues {
        issue.dependencies = all_deps.remove(&issue.id).unwrap_or_default();
        issue.labels = all_labels.remove(&issue.id).unwrap_or_default();
        issue.comments = all_comments.remove(&issue.id).unwrap_or_default();
        issue.commits = all_commits.remove(&issue.id).unwrap_or_default();
    }

    let content_hash = codec::write_jsonl_atomic(jsonl_path, &issues)?;

    let exported_ids: Vec<String> = issues.iter().map(|i| i.id.clone()).collect();
    store.clear_dirty_issues_by_id(&exported_ids)?;
    store.set_metadata(METADATA_JSONL_CONTENT_HASH, &content_hash)?;
    store.set_metadata(METADATA_LAST_IMPORT_TIME, &now_rfc3339_nanos())?;

    // Keep the store file at least as new as the JSONL so mtime-based
    // heuristics elsewhere never flag a just-exported store as stale.
    if let Some(db_path) = db_path {
        bump_mtime(db_path);
    }

    tracing::info!(
        exported = exported_ids.len(),
        path = %jsonl_path.display(),
        "export complete"
    );

    Ok(ExportOutcome {
        exported_count: exported_ids.len(),
        exported_ids,
        content_hash,
    })
}

fn bump_mtime(path: &Path) {
    if let Ok(file) = fs::File::options().append(true).open(path) {
        let now = std::time::SystemTime::now();
        let _ = file.set_times(fs::FileTimes::new().set_accessed(now).set_modified(now));
    }
}

/// Import issues from a JSONL file through the import engine.
///
/// Resurrection seeds for orphan handling come from the remembered base
/// snapshot next to the JSONL, when one exists. Parse warnings for malformed
/// lines are returned alongside the result.
///
/// # Errors
///
/// Returns an error if the file contains conflict markers, cannot be read,
/// or the import engine refuses the batch.
pub fn import_from_jsonl(
    store: &mut SqliteStore,
    jsonl_path: &Path,
    options: &ImportOptions,
    actor: &str,
) -> Result<(ImportResult, Vec<String>)> {
    codec::ensure_no_conflict_markers(jsonl_path)?;

    let report = codec::read_jsonl(jsonl_path)?;
    for warning in &report.warnings {
        tracing::warn!(%warning, "skipping malformed JSONL line");
    }

    // Sync-time validation: warn or refuse per `validation.on-sync`.
    let level = crate::config::validation_level(store, crate::config::CONFIG_VALIDATION_ON_SYNC)?;
    crate::validation::validate_batch(level, &report.issues)?;

    let mut options = options.clone();
    if options.resurrect_seeds.is_empty() {
        options.resurrect_seeds = load_resurrect_seeds(jsonl_path)?;
    }

    let result = import_batch(store, report.issues, &options, actor)?;

    let file_hash = codec::hash_file(jsonl_path)?.unwrap_or_default();
    store.set_metadata(METADATA_JSONL_CONTENT_HASH, &file_hash)?;
    store.set_metadata(METADATA_LAST_IMPORT_TIME, &now_rfc3339_nanos())?;

    Ok((result, report.warnings))
}

fn load_resurrect_seeds(jsonl_path: &Path) -> Result<HashMap<String, ResurrectSeed>> {
    let Some(dir) = jsonl_path.parent() else {
        return Ok(HashMap::new());
    };
    let snapshot = dir.join(BASE_SNAPSHOT_FILE);
    if !snapshot.exists() {
        return Ok(HashMap::new());
    }
    let report = codec::read_jsonl(&snapshot)?;
    Ok(report
        .issues
        .into_iter()
        .map(|issue| {
            (
                issue.id.clone(),
                ResurrectSeed {
                    title: issue.title,
                    created_at: issue.created_at,
                },
            )
        })
        .collect())
}

/// Staleness oracle: does the JSONL on disk differ from the last
/// imported/exported state?
///
/// # Errors
///
/// Returns an error if the file or metadata cannot be read.
pub fn needs_auto_import(store: &SqliteStore, jsonl_path: &Path) -> Result<bool> {
    let Some(file_hash) = codec::hash_file(jsonl_path)? else {
        return Ok(false);
    };
    match store.get_metadata(METADATA_JSONL_CONTENT_HASH)? {
        // Fresh clone: no metadata yet, so the archive is authoritative.
        None => Ok(true),
        Some(recorded) => Ok(recorded != file_hash),
    }
}

/// Save the merge base snapshot next to the JSONL.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn save_base_snapshot(jsonl_path: &Path, issues: &[Issue]) -> Result<()> {
    let dir = jsonl_path.parent().ok_or_else(|| {
        BeadsError::Config(format!("invalid JSONL path: {}", jsonl_path.display()))
    })?;
    codec::write_jsonl_atomic(&dir.join(BASE_SNAPSHOT_FILE), issues)?;
    Ok(())
}

/// Load the merge base snapshot, keyed by id. Missing snapshot is `None`
/// (first merge on this clone).
///
/// # Errors
///
/// Returns an error if the snapshot exists but cannot be read.
pub fn load_base_snapshot(jsonl_path: &Path) -> Result<Option<HashMap<String, Issue>>> {
    let Some(dir) = jsonl_path.parent() else {
        return Ok(None);
    };
    let snapshot = dir.join(BASE_SNAPSHOT_FILE);
    if !snapshot.exists() {
        return Ok(None);
    }
    let report = codec::read_jsonl(&snapshot)?;
    Ok(Some(
        report
            .issues
            .into_iter()
            .map(|issue| (issue.id.clone(), issue))
            .collect(),
    ))
}

/// The store's current export population keyed by id, with relations.
///
/// # Errors
///
/// Returns an error if queries fail.
pub fn store_snapshot(store: &SqliteStore) -> Result<HashMap<String, Issue>> {
    let mut issues = store.get_all_issues_for_export()?;
    let mut all_deps = store.get_all_dependency_records()?;
    let mut all_labels = store.get_all_labels()?;
    let mut all_comments = store.get_all_comments()?;
    let mut all_commits = store.get_all_commits()?;
    let mut map = HashMap::new();
    for issue in &mut issues {
        issue.dependencies = all_deps.remove(&issue.id).unwrap_or_default();
        issue.labels = all_labels.remove(&issue.id).unwrap_or_default();
        issue.comments = all_comments.remove(&issue.id).unwrap_or_default();
        issue.commits = all_commits.remove(&issue.id).unwrap_or_default();
        issue.content_hash = Some(crate::util::content_hash(issue));
        map.insert(issue.id.clone(), issue.clone());
    }
    Ok(map)
}
