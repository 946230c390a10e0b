//! Error types for beads.
//!
//! Structured variants cover the recoverable cases the sync and import
//! engines need to distinguish; `Other` wraps foreign errors. Policy
//! refusals (empty-DB guard, prefix mismatch, orphan abort, repo
//! fingerprint) carry a dedicated exit code so agents can branch on them.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for policy refusals (safety guards, prefix mismatch, gates).
pub const EXIT_POLICY_VIOLATION: i32 = 3;

/// Primary error type for beads operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Storage ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// Database is locked by another process.
    #[error("Database is locked: {path}")]
    DatabaseLocked { path: PathBuf },

    /// `SQLite` error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend cannot provide a transaction; callers fall back to
    /// sequential application. Never surfaced to users.
    #[error("Transactions unsupported by backend")]
    TransactionUnsupported,

    // === Issues ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Attempted to create an issue with an ID that already exists.
    #[error("Issue ID collision: {id}")]
    IdCollision { id: String },

    /// Partial ID matches multiple issues.
    #[error("Ambiguous ID '{partial}': matches {matches:?}")]
    AmbiguousId {
        partial: String,
        matches: Vec<String>,
    },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    // === Validation ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    /// Malformed or contradictory input (timestamps, flags, ids in batches).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Import / prefix policy ===
    /// A single issue id failed prefix validation on update.
    #[error("Prefix validation failed for '{id}': expected prefix '{expected}'")]
    PrefixValidation { id: String, expected: String },

    /// An import batch contains ids outside the allowed prefix set.
    /// `counts` maps each foreign prefix to the number of offending ids.
    #[error("Prefix mismatch: expected '{expected}', found {counts:?}")]
    PrefixMismatch {
        expected: String,
        counts: BTreeMap<String, usize>,
    },

    /// Hierarchical child without a parent, under strict orphan handling.
    #[error("Orphaned issue '{child}': parent '{parent}' does not exist")]
    Orphan { child: String, parent: String },

    /// Two non-tombstone issues in a batch share an external_ref.
    #[error("Duplicate external_ref '{external_ref}' in import batch")]
    DuplicateExternalRef { external_ref: String },

    /// Content hash computation or comparison failed.
    #[error("Content hash error: {0}")]
    ContentHash(String),

    /// Malformed UTF-8 or other encoding failure.
    #[error("Encoding error: {0}")]
    Encoding(String),

    // === Dependencies ===
    /// Adding the dependency would create a cycle.
    #[error("Cycle detected in dependencies: {path}")]
    DependencyCycle { path: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    // === Sync / export ===
    /// Refusal of the empty-DB (or stale-DB) export guard.
    #[error("Unsafe export refused: {0}")]
    UnsafeExport(String),

    /// The store file belongs to a different repository.
    #[error("Repository fingerprint mismatch: store has '{stored}', computed '{computed}'")]
    RepoFingerprint { stored: String, computed: String },

    /// Failed to parse a line in a JSONL file.
    #[error("JSONL parse error at line {line}: {reason}")]
    JsonlParse { line: usize, reason: String },

    /// Nothing to do; treated as success by auto-commit paths.
    #[error("Nothing to commit")]
    NothingToCommit,

    // === Daemon ===
    /// Daemon RPC failure. `no_backend` marks the class of errors (socket
    /// gone, connection refused, EOF) that triggers direct-mode fallback.
    #[error("RPC error: {message}")]
    Rpc { message: String, no_backend: bool },

    // === Configuration ===
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Beads workspace not initialized.
    #[error("Beads not initialized: run 'bd init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Wrapped ===
    /// Wrapped foreign error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    /// True for refusals that guard against data loss or policy breaks.
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::UnsafeExport(_)
                | Self::PrefixMismatch { .. }
                | Self::Orphan { .. }
                | Self::RepoFingerprint { .. }
        )
    }

    /// True for RPC failures that should trigger direct-mode fallback.
    #[must_use]
    pub const fn is_no_backend(&self) -> bool {
        matches!(self, Self::Rpc { no_backend: true, .. })
    }

    /// Stable machine-readable result tag for the error envelope.
    #[must_use]
    pub const fn result_tag(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound { .. } => "database_not_found",
            Self::DatabaseLocked { .. } => "database_locked",
            Self::Database(_) => "database_error",
            Self::TransactionUnsupported => "transaction_unsupported",
            Self::IssueNotFound { .. } => "issue_not_found",
            Self::IdCollision { .. } => "id_collision",
            Self::AmbiguousId { .. } => "ambiguous_id",
            Self::InvalidId { .. } => "invalid_id",
            Self::Validation { .. } => "validation_failed",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::InvalidPriority { .. } => "invalid_priority",
            Self::InvalidInput(_) => "invalid_input",
            Self::PrefixValidation { .. } => "prefix_validation",
            Self::PrefixMismatch { .. } => "prefix_mismatch",
            Self::Orphan { .. } => "orphan",
            Self::DuplicateExternalRef { .. } => "duplicate_external_ref",
            Self::ContentHash(_) => "content_hash_error",
            Self::Encoding(_) => "encoding_error",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::SelfDependency { .. } => "self_dependency",
            Self::UnsafeExport(_) => "unsafe_export",
            Self::RepoFingerprint { .. } => "repo_fingerprint",
            Self::JsonlParse { .. } => "jsonl_parse_error",
            Self::NothingToCommit => "nothing_to_commit",
            Self::Rpc { .. } => "rpc_error",
            Self::Config(_) => "config_error",
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized { .. } => "already_initialized",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// Recovery suggestion for user-facing errors.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: bd init"),
            Self::DatabaseNotFound { .. } => Some("Check the path or run: bd init"),
            Self::AmbiguousId { .. } => Some("Provide more characters of the ID"),
            Self::PrefixMismatch { .. } => {
                Some("Use --rename-on-import to rewrite ids, or --skip-prefix-validation")
            }
            Self::Orphan { .. } => {
                Some("Re-run with --orphans resurrect|skip|allow to handle missing parents")
            }
            Self::UnsafeExport(_) => {
                Some("Import the JSONL first, or pass --force after inspecting the store")
            }
            Self::RepoFingerprint { .. } => {
                Some("The store belongs to a different repository; check BEADS_DIR")
            }
            Self::DependencyCycle { .. } => Some("Remove one dependency to break the cycle"),
            Self::SelfDependency { .. } => Some("An issue cannot depend on itself"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (highest) and 4 (lowest)")
            }
            Self::InvalidStatus { .. } => Some(
                "Valid statuses: open, in_progress, blocked, closed, deferred, hooked, tombstone",
            ),
            Self::DuplicateExternalRef { .. } => {
                Some("Pass --clear-duplicate-external-refs to keep only the first")
            }
            _ => None,
        }
    }

    /// Exit code for this error: 3 for policy refusals, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_policy_violation() {
            EXIT_POLICY_VIOLATION
        } else {
            1
        }
    }

    /// Structured error envelope for `--json` consumers.
    #[must_use]
    pub fn envelope(&self) -> Value {
        let mut obj = json!({
            "ok": false,
            "result": self.result_tag(),
            "error": self.to_string(),
        });
        if let Some(suggestion) = self.suggestion() {
            obj["suggestion"] = json!(suggestion);
        }
        if let Self::PrefixMismatch { expected, counts } = self {
            obj["expected_prefix"] = json!(expected);
            obj["mismatch_prefixes"] = json!(counts);
        }
        obj
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// RPC failure in the no-backend class (socket missing, refused, EOF).
    #[must_use]
    pub fn rpc_no_backend(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            no_backend: true,
        }
    }

    /// Generic RPC failure.
    #[must_use]
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            no_backend: false,
        }
    }
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_tag() {
        let err = BeadsError::IssueNotFound {
            id: "bd-abc12".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: bd-abc12");
        assert_eq!(err.result_tag(), "issue_not_found");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn policy_violations_use_distinct_exit_code() {
        let err = BeadsError::UnsafeExport("empty db".to_string());
        assert!(err.is_policy_violation());
        assert_eq!(err.exit_code(), EXIT_POLICY_VIOLATION);

        let mut counts = BTreeMap::new();
        counts.insert("foo".to_string(), 1);
        let err = BeadsError::PrefixMismatch {
            expected: "bd".to_string(),
            counts,
        };
        assert_eq!(err.exit_code(), EXIT_POLICY_VIOLATION);
    }

    #[test]
    fn no_backend_classification() {
        assert!(BeadsError::rpc_no_backend("connection refused").is_no_backend());
        assert!(!BeadsError::rpc("bad response").is_no_backend());
    }

    #[test]
    fn envelope_carries_prefix_details() {
        let mut counts = BTreeMap::new();
        counts.insert("foo".to_string(), 2);
        let err = BeadsError::PrefixMismatch {
            expected: "bd".to_string(),
            counts,
        };
        let envelope = err.envelope();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["result"], "prefix_mismatch");
        assert_eq!(envelope["expected_prefix"], "bd");
        assert_eq!(envelope["mismatch_prefixes"]["foo"], 2);
    }

    #[test]
    fn suggestion_present_for_recoverable() {
        assert!(BeadsError::NotInitialized.suggestion().is_some());
        let err = BeadsError::UnsafeExport("x".to_string());
        assert!(err.envelope()["suggestion"].is_string());
    }
}
