//! Content hashing over the canonical form of an issue.
//!
//! The hash is the merge oracle: equal hash means the two records are
//! semantically identical on every canonical field. SHA-256 over the
//! normalized fields in a fixed order with NUL separators.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::model::Issue;

/// Trait for types that can produce a deterministic content hash.
pub trait ContentHashable {
    fn content_hash(&self) -> String;
}

impl ContentHashable for Issue {
    fn content_hash(&self) -> String {
        content_hash(self)
    }
}

/// Normalize a text field for hashing:
/// - Unicode NFC
/// - trailing whitespace stripped from every line
/// - interior NULs replaced with spaces (NUL is the field separator)
#[must_use]
pub fn normalize_text(value: &str) -> String {
    let nfc: String = value.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut first = true;
    for line in nfc.split('\n') {
        if !first {
            out.push('\n');
        }
        out.push_str(line.trim_end());
        first = false;
    }
    // A trailing blank line is the same as none.
    while out.ends_with('\n') {
        out.pop();
    }
    if out.contains('\0') {
        out = out.replace('\0', " ");
    }
    out
}

/// Format a timestamp truncated to whole seconds.
fn normalize_time(value: DateTime<Utc>) -> String {
    value.timestamp().to_string()
}

/// Compute the SHA-256 content hash for an issue.
///
/// Canonical fields, in order: title, description, design,
/// `acceptance_criteria`, notes, status, priority, `issue_type`, assignee,
/// `external_ref`, `source_system`, labels (sorted, deduped), dependencies
/// (sorted by `(depends_on_id, type)`), comments (in created order),
/// `closed_at`, and the tombstone fields when present.
///
/// Excluded: the id (so identical content under two ids is detectable as a
/// rename), `content_hash` itself, `created_at`/`updated_at`, `spec_id`,
/// `pinned`, `ephemeral`, commits, and the local event log.
///
/// Normalization makes the hash stable across clones: optional fields hash
/// the same whether absent or empty, text is NFC with trailing whitespace
/// stripped, and timestamps are truncated to whole seconds.
#[must_use]
pub fn content_hash(issue: &Issue) -> String {
    fn field(hasher: &mut Sha256, value: &str) {
        hasher.update(value.as_bytes());
        hasher.update(b"\x00");
    }

    let mut hasher = Sha256::new();

    field(&mut hasher, &normalize_text(&issue.title));
    field(
        &mut hasher,
        &normalize_text(issue.description.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.design.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.acceptance_criteria.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.notes.as_deref().unwrap_or("")),
    );
    field(&mut hasher, issue.status.as_str());
    field(&mut hasher, &issue.priority.0.to_string());
    field(&mut hasher, issue.issue_type.as_str());
    field(
        &mut hasher,
        &normalize_text(issue.assignee.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.external_ref.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.source_system.as_deref().unwrap_or("")),
    );

    // Labels: sorted, deduped.
    let mut labels: Vec<String> = issue.labels.iter().map(|l| normalize_text(l)).collect();
    labels.sort();
    labels.dedup();
    for label in &labels {
        field(&mut hasher, label);
    }
    hasher.update(b"\x01");

    // Dependencies: sorted lexicographically by (depends_on_id, type).
    let mut deps: Vec<(String, String)> = issue
        .dependencies
        .iter()
        .map(crate::model::Dependency::identity)
        .collect();
    deps.sort();
    deps.dedup();
    for (target, dep_type) in &deps {
        field(&mut hasher, target);
        field(&mut hasher, dep_type);
    }
    hasher.update(b"\x01");

    // Comments: in created order.
    for comment in &issue.comments {
        field(&mut hasher, &normalize_text(&comment.author));
        field(&mut hasher, &normalize_text(&comment.body));
        field(&mut hasher, &normalize_time(comment.created_at));
    }
    hasher.update(b"\x01");

    field(
        &mut hasher,
        &issue.closed_at.map(normalize_time).unwrap_or_default(),
    );
    field(
        &mut hasher,
        &issue.deleted_at.map(normalize_time).unwrap_or_default(),
    );
    field(
        &mut hasher,
        &normalize_text(issue.deleted_by.as_deref().unwrap_or("")),
    );
    field(
        &mut hasher,
        &normalize_text(issue.delete_reason.as_deref().unwrap_or("")),
    );

    format!("{:x}", hasher.finalize())
}

/// Compute and attach the content hash in place.
pub fn rehash(issue: &mut Issue) {
    issue.content_hash = Some(content_hash(issue));
}
