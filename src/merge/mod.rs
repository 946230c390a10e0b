//! 3-way merge over issue sets.
//!
//! Given `(base, local, remote)` maps keyed by issue id, produce a
//! deterministic merged set with conflict accounting. "Changed" means a
//! different content hash from the base, or presence where the base was
//! absent, or absence where the base was present.
//!
//! Resolution for true conflicts is field-level:
//! - scalars: last-writer-wins by `updated_at`; a tombstone loses to a
//!   non-tombstone modification only when the modification is newer
//! - sets (labels, commits): union
//! - ordered collections (comments, dependencies): union by stable identity,
//!   re-ordered by `created_at`
//!
//! Ties on `updated_at` resolve by lexicographic comparison of the two
//! sides' content hashes, then to remote; this keeps the merge symmetric up
//! to the Local/Remote strategy tags. The same rule covers reopen-vs-close
//! disagreements on `closed_at`.
//!
//! The engine never fails: every ambiguity reduces deterministically.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::Issue;
use crate::util::content_hash;

/// How a merged id was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Both sides agree.
    Same,
    /// The local side was taken unilaterally (or a local deletion stood).
    Local,
    /// The remote side was taken unilaterally (or a remote deletion stood).
    Remote,
    /// Both sides changed; field-level resolution was applied.
    Merged,
}

/// Result of a 3-way merge.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Merged issues, keyed (and therefore ordered) by id.
    pub merged: BTreeMap<String, Issue>,
    /// Number of true conflicts resolved field-level.
    pub conflicts: usize,
    /// Per-id resolution strategy. Ids deleted by the merge appear here with
    /// the side whose deletion stood, but not in `merged`.
    pub strategy: BTreeMap<String, MergeStrategy>,
}

fn hash_of(issue: &Issue) -> String {
    issue
        .content_hash
        .clone()
        .unwrap_or_else(|| content_hash(issue))
}

/// Merge `(base, local, remote)` issue sets.
///
/// A missing base (fresh clone, no remembered snapshot) treats ids present
/// on both sides as both-changed and ids present on one side as unilateral.
#[must_use]
pub fn merge(
    base: Option<&HashMap<String, Issue>>,
    local: &HashMap<String, Issue>,
    remote: &HashMap<String, Issue>,
) -> MergeOutcome {
    let mut ids: BTreeSet<&String> = BTreeSet::new();
    if let Some(base) = base {
        ids.extend(base.keys());
    }
    ids.extend(local.keys());
    ids.extend(remote.keys());

    let mut outcome = MergeOutcome::default();

    for id in ids {
        let b = base.and_then(|m| m.get(id));
        let l = local.get(id);
        let r = remote.get(id);

        match (b, l, r) {
            (_, None, None) => {
                // Deleted on both sides (or never present): nothing to emit.
            }

            // Present on one side only, no base: unilateral addition.
            (None, Some(l), None) => {
                outcome.strategy.insert(id.clone(), MergeStrategy::Local);
                outcome.merged.insert(id.clone(), l.clone());
            }
            (None, None, Some(r)) => {
                outcome.strategy.insert(id.clone(), MergeStrategy::Remote);
                outcome.merged.insert(id.clone(), r.clone());
            }

            // Present on both sides.
            (b, Some(l), Some(r)) => {
                let l_hash = hash_of(l);
                let r_hash = hash_of(r);
                if l_hash == r_hash {
                    outcome.strategy.insert(id.clone(), MergeStrategy::Same);
                    outcome.merged.insert(id.clone(), l.clone());
                    continue;
                }
                match b.map(hash_of) {
                    Some(b_hash) if l_hash == b_hash => {
                        outcome.strategy.insert(id.clone(), MergeStrategy::Remote);
                        outcome.merged.insert(id.clone(), r.clone());
                    }
                    Some(b_hash) if r_hash == b_hash => {
                        outcome.strategy.insert(id.clone(), MergeStrategy::Local);
                        outcome.merged.insert(id.clone(), l.clone());
                    }
                    _ => {
                        // Both changed (or convergent creation with no base).
                        outcome.conflicts += 1;
                        outcome.strategy.insert(id.clone(), MergeStrategy::Merged);
                        outcome
                            .merged
                            .insert(id.clone(), merge_conflicting(l, r, &l_hash, &r_hash));
                    }
                }
            }

            // Deleted locally.
            (Some(b), None, Some(r)) => {
                if hash_of(r) == hash_of(b) {
                    // Remote unchanged: the local hard-delete stands.
                    outcome.strategy.insert(id.clone(), MergeStrategy::Local);
                } else {
                    // Modification beats absence.
                    outcome.conflicts += 1;
                    outcome.strategy.insert(id.clone(), MergeStrategy::Merged);
                    outcome.merged.insert(id.clone(), r.clone());
                }
            }

            // Deleted remotely.
            (Some(b), Some(l), None) => {
                if hash_of(l) == hash_of(b) {
                    outcome.strategy.insert(id.clone(), MergeStrategy::Remote);
                } else {
                    outcome.conflicts += 1;
                    outcome.strategy.insert(id.clone(), MergeStrategy::Merged);
                    outcome.merged.insert(id.clone(), l.clone());
                }
            }
        }
    }

    outcome
}

/// Pick the scalar-field winner between two conflicting versions.
///
/// Ordering: tombstone-vs-modification special case first, then `updated_at`
/// LWW, then lexicographic content hash, then remote.
fn scalar_winner<'a>(
    local: &'a Issue,
    remote: &'a Issue,
    l_hash: &str,
    r_hash: &str,
) -> &'a Issue {
    // Resurrect dominates deletion iff the modification is newer.
    match (local.is_tombstone(), remote.is_tombstone()) {
        (true, false) => {
            return if remote.updated_at > local.updated_at {
                remote
            } else {
                local
            };
        }
        (false, true) => {
            return if local.updated_at > remote.updated_at {
                local
            } else {
                remote
            };
        }
        _ => {}
    }

    match local.updated_at.cmp(&remote.updated_at) {
        Ordering::Greater => local,
        Ordering::Less => remote,
        Ordering::Equal => {
            if l_hash > r_hash {
                local
            } else {
                remote
            }
        }
    }
}

/// Field-level resolution for a true conflict.
fn merge_conflicting(local: &Issue, remote: &Issue, l_hash: &str, r_hash: &str) -> Issue {
    let winner = scalar_winner(local, remote, l_hash, r_hash);

    let mut merged = winner.clone();
    merged.created_at = local.created_at.min(remote.created_at);
    merged.updated_at = local.updated_at.max(remote.updated_at);

    // Sets: union.
    let mut labels: BTreeSet<String> = local.labels.iter().cloned().collect();
    labels.extend(remote.labels.iter().cloned());
    merged.labels = labels.into_iter().collect();

    let mut commits: BTreeSet<String> = local.commits.iter().cloned().collect();
    commits.extend(remote.commits.iter().cloned());
    merged.commits = commits.into_iter().collect();

    // Comments: union by (author, trimmed text, created_at seconds).
    let mut comments = local.comments.clone();
    for comment in &remote.comments {
        let key = (
            comment.author.clone(),
            comment.body.trim().to_string(),
            comment.created_at.timestamp(),
        );
        let present = comments.iter().any(|c| {
            (
                c.author.clone(),
                c.body.trim().to_string(),
                c.created_at.timestamp(),
            ) == key
        });
        if !present {
            comments.push(comment.clone());
        }
    }
    comments.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.author.cmp(&b.author))
            .then_with(|| a.body.cmp(&b.body))
    });
    merged.comments = comments;

    // Dependencies: union by (depends_on_id, type).
    let mut dependencies = local.dependencies.clone();
    for dep in &remote.dependencies {
        if !dependencies.iter().any(|d| d.identity() == dep.identity()) {
            dependencies.push(dep.clone());
        }
    }
    dependencies.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.identity().cmp(&b.identity()))
    });
    for dep in &mut dependencies {
        dep.issue_id.clone_from(&merged.id);
    }
    merged.dependencies = dependencies;

    merged.content_hash = Some(content_hash(&merged));
    merged
}
