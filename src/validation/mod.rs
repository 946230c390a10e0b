//! Issue validation, applied at create time and at sync time.
//!
//! Severity comes from `validation.on-create` / `validation.on-sync`
//! config: findings are dropped, warned to stderr, or promoted to a
//! refusal.

use crate::config::ValidationLevel;
use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::util::parse_id;

/// Maximum accepted title length.
pub const MAX_TITLE_LEN: usize = 500;

/// Validate one issue. Returns every finding, not just the first.
#[must_use]
pub fn validate_issue(issue: &Issue) -> Vec<String> {
    let mut findings = Vec::new();

    if parse_id(&issue.id).is_err() {
        findings.push(format!("{}: malformed id", issue.id));
    }
    if issue.title.trim().is_empty() {
        findings.push(format!("{}: title is empty", issue.id));
    }
    if issue.title.len() > MAX_TITLE_LEN {
        findings.push(format!(
            "{}: title exceeds {MAX_TITLE_LEN} characters",
            issue.id
        ));
    }
    if !(0..=4).contains(&issue.priority.0) {
        findings.push(format!("{}: priority out of range", issue.id));
    }
    if issue.status.is_terminal() && issue.closed_at.is_none() {
        findings.push(format!("{}: terminal status without closed_at", issue.id));
    }
    if issue.is_tombstone() && issue.deleted_at.is_none() {
        findings.push(format!("{}: tombstone without deleted_at", issue.id));
    }
    for sha in &issue.commits {
        if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            findings.push(format!("{}: commit '{sha}' is not a 40-hex SHA", issue.id));
        }
    }
    for dep in &issue.dependencies {
        if dep.issue_id == dep.depends_on_id {
            findings.push(format!("{}: self-referential dependency", issue.id));
        }
    }

    findings
}

/// Apply a validation level to a batch of findings.
///
/// # Errors
///
/// Returns `Validation` when the level is `Error` and findings exist.
pub fn enforce(level: ValidationLevel, findings: &[String]) -> Result<()> {
    if findings.is_empty() {
        return Ok(());
    }
    match level {
        ValidationLevel::None => Ok(()),
        ValidationLevel::Warn => {
            for finding in findings {
                eprintln!("Warning: {finding}");
            }
            Ok(())
        }
        ValidationLevel::Error => Err(BeadsError::validation("issues", findings.join("; "))),
    }
}

/// Validate a batch under the given level.
///
/// # Errors
///
/// See [`enforce`].
pub fn validate_batch(level: ValidationLevel, issues: &[Issue]) -> Result<()> {
    let findings: Vec<String> = issues.iter().flat_map(|i| validate_issue(i)).collect();
    enforce(level, &findings)
}
