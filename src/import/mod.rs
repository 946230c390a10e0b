//! Import engine: admits a batch of incoming issues into the store.
//!
//! The batch passes through fixed phases:
//! 1. identity normalization (external_ref canonicalization, rehash, wisp flag)
//! 2. prefix policy (validate, rename, or skip)
//! 3. duplicate external_ref detection
//! 4. explicit deletions
//! 5. collision detection and upsert planning
//! 6. orphan handling for hierarchical creates
//! 7. atomic apply (single transaction, with sequential fallback when the
//!    backend reports `TransactionUnsupported`)
//!
//! Tombstoned store rows are never resurrected by an import. Dependencies
//! whose endpoints cannot be resolved are skipped and reported, fatal only
//! under strict orphan handling.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use crate::error::{BeadsError, Result};
use crate::model::{Comment, Dependency, Issue, Priority, Status};
use crate::storage::{MutationContext, SqliteStore};
use crate::util::{content_hash, hierarchy_depth, parent_of, prefix_of};

/// Config key selecting the orphan policy.
pub const CONFIG_ORPHAN_HANDLING: &str = "import.orphan_handling";
/// Config key listing town routes (`prefix=path` pairs, comma-separated);
/// their prefixes extend the allowed set.
pub const CONFIG_TOWN_ROUTES: &str = "town_routes";

/// How to treat hierarchical children whose parents are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanHandling {
    /// Abort the batch.
    #[default]
    Strict,
    /// Synthesize closed placeholder parents.
    Resurrect,
    /// Drop the child.
    Skip,
    /// Create without parent enforcement.
    Allow,
}

impl OrphanHandling {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Resurrect => "resurrect",
            Self::Skip => "skip",
            Self::Allow => "allow",
        }
    }
}

impl FromStr for OrphanHandling {
    type Err = BeadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "resurrect" => Ok(Self::Resurrect),
            "skip" => Ok(Self::Skip),
            "allow" => Ok(Self::Allow),
            other => Err(BeadsError::InvalidInput(format!(
                "invalid orphan handling '{other}' (use strict, resurrect, skip, allow)"
            ))),
        }
    }
}

/// Whether imported label sets union into or replace the stored sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelMergePolicy {
    #[default]
    Union,
    Replace,
}

/// Options controlling one import batch.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ImportOptions {
    /// Orphan policy; `None` resolves from `import.orphan_handling` config.
    pub orphan_handling: Option<OrphanHandling>,
    /// Rewrite foreign-prefix ids (and textual references) to the primary prefix.
    pub rename_on_import: bool,
    /// Skip prefix validation entirely.
    pub skip_prefix_validation: bool,
    /// Clear all but the first of duplicated external_refs instead of erroring.
    pub clear_duplicate_external_refs: bool,
    /// Label set semantics.
    pub label_merge: LabelMergePolicy,
    /// Ids to delete before applying upserts (absent ids are not an error).
    pub deletion_ids: Vec<String>,
    /// Local-export protection: incoming updates for these ids are skipped
    /// unless strictly newer than the recorded timestamp.
    pub protect_local_export_ids: HashMap<String, DateTime<Utc>>,
    /// Seed titles/creation times for orphan resurrection, typically read
    /// from the local JSONL history.
    pub resurrect_seeds: HashMap<String, ResurrectSeed>,
}

/// Remembered state for a parent to resurrect.
#[derive(Debug, Clone)]
pub struct ResurrectSeed {
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// A dependency that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SkippedDependency {
    pub issue_id: String,
    pub depends_on_id: String,
    pub dep_type: String,
    pub reason: String,
}

/// Outcome of one import batch.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Rows matched with a differing content hash.
    pub collisions: usize,
    pub skipped_dependencies: Vec<SkippedDependency>,
    pub prefix_mismatch: bool,
    pub mismatch_prefixes: BTreeMap<String, usize>,
    pub expected_prefix: Option<String>,
    /// Incoming id -> stored id, for every issue that landed under a
    /// different id than it arrived with.
    pub id_mapping: BTreeMap<String, String>,
}

static LINEAR_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://linear\.app/[^/]+/issue/([A-Za-z]+-\d+)(?:/.*)?$")
        .expect("static regex")
});

/// Canonicalize known external_ref forms so aliases reduce to one key.
///
/// Linear URLs and `linear:` slugs reduce to `linear:<team>-<number>` in
/// lowercase; everything else is trimmed and passed through.
#[must_use]
pub fn canonicalize_external_ref(external_ref: &str) -> String {
    let trimmed = external_ref.trim();
    if let Some(captures) = LINEAR_URL.captures(trimmed) {
        return format!("linear:{}", captures[1].to_lowercase());
    }
    if let Some(rest) = trimmed.strip_prefix("linear:") {
        return format!("linear:{}", rest.trim().to_lowercase());
    }
    trimmed.to_string()
}

const fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.'
}

/// Replace whole-token occurrences of `old` with `new`.
///
/// A match counts only when not flanked by `[A-Za-z0-9.]`, so `bd-1` never
/// rewrites inside `bd-10` or `bd-1.2`.
#[must_use]
pub fn replace_id_token(text: &str, old: &str, new: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut changed = false;

    while let Some(pos) = rest.find(old) {
        let before_ok = out
            .chars()
            .chain(rest[..pos].chars())
            .next_back()
            .is_none_or(|c| !is_id_char(c));
        let after = rest[pos + old.len()..].chars().next();
        let after_ok = after.is_none_or(|c| !is_id_char(c));

        out.push_str(&rest[..pos]);
        if before_ok && after_ok {
            out.push_str(new);
            changed = true;
        } else {
            out.push_str(old);
        }
        rest = &rest[pos + old.len()..];
    }
    out.push_str(rest);

    changed.then_some(out)
}

/// Rewrite every textual reference in `issue` per the rename map. Returns
/// whether anything changed.
fn rewrite_text_references(issue: &mut Issue, renames: &BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (old, new) in renames {
        for field in [
            Some(&mut issue.title),
            issue.description.as_mut(),
            issue.design.as_mut(),
            issue.acceptance_criteria.as_mut(),
            issue.notes.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(rewritten) = replace_id_token(field, old, new) {
                *field = rewritten;
                changed = true;
            }
        }
    }
    changed
}

/// Normalize one incoming issue: canonical external_ref, wisp flag,
/// closed_at repair, fresh content hash.
fn normalize_incoming(issue: &mut Issue) {
    if let Some(ref external_ref) = issue.external_ref {
        let canonical = canonicalize_external_ref(external_ref);
        if canonical.is_empty() {
            issue.external_ref = None;
        } else {
            issue.external_ref = Some(canonical);
        }
    }
    if crate::model::is_ephemeral_id(&issue.id) {
        issue.ephemeral = true;
    }
    if issue.status.is_terminal() && issue.closed_at.is_none() {
        issue.closed_at = Some(issue.updated_at);
    }
    if !issue.status.is_terminal() {
        issue.closed_at = None;
    }
    issue.content_hash = Some(content_hash(issue));
}

#[derive(Debug)]
enum PlannedOp {
    Create(Issue),
    Update { target_id: String, issue: Issue },
    /// Content-hash match under a different id: drop the old row, create the
    /// incoming id, and rewrite textual references store-wide.
    Rename { old_id: String, issue: Issue },
    /// Same as `Rename` with the target row already present and equivalent:
    /// only the old row is dropped.
    DropOld { old_id: String },
}

/// Import a batch of issues into the store.
///
/// # Errors
///
/// - `PrefixMismatch` when ids fall outside the allowed prefix set and no
///   rename/skip option was given
/// - `DuplicateExternalRef` for in-batch duplicates without the clear option
/// - `Orphan` under strict orphan handling
/// - database errors from the apply phase
#[allow(clippy::too_many_lines)]
pub fn import_batch(
    store: &mut SqliteStore,
    mut batch: Vec<Issue>,
    options: &ImportOptions,
    actor: &str,
) -> Result<ImportResult> {
    let mut result = ImportResult::default();

    // Phase 1: normalize identities; wisps never enter the store from a batch.
    batch.retain_mut(|issue| {
        normalize_incoming(issue);
        if issue.ephemeral {
            result.skipped += 1;
            false
        } else {
            true
        }
    });

    // Phase 2: prefix policy.
    let expected_prefix = store.issue_prefix()?;
    result.expected_prefix.clone_from(&expected_prefix);
    if !options.skip_prefix_validation {
        if let Some(ref expected) = expected_prefix {
            apply_prefix_policy(store, &mut batch, expected, options, &mut result)?;
        }
    }

    // Phase 3: duplicate external_ref detection (non-tombstones only).
    let mut seen_refs: HashMap<String, usize> = HashMap::new();
    for index in 0..batch.len() {
        if batch[index].is_tombstone() {
            continue;
        }
        let Some(external_ref) = batch[index].external_ref.clone() else {
            continue;
        };
        if seen_refs.contains_key(&external_ref) {
            if options.clear_duplicate_external_refs {
                batch[index].external_ref = None;
                batch[index].content_hash = Some(content_hash(&batch[index]));
            } else {
                return Err(BeadsError::DuplicateExternalRef { external_ref });
            }
        } else {
            seen_refs.insert(external_ref, index);
        }
    }

    // Phase 4/5: plan deletions and upserts against the current store state.
    let mut ops: Vec<PlannedOp> = Vec::new();

    for id in &options.deletion_ids {
        if store.id_exists(id)? {
            ops.push(PlannedOp::DropOld { old_id: id.clone() });
            result.deleted += 1;
        }
    }
    let deletions: HashSet<&String> = options.deletion_ids.iter().collect();

    let mut planned_ids: HashSet<String> = HashSet::new();
    for issue in batch {
        if deletions.contains(&issue.id) {
            continue;
        }
        plan_upsert(store, issue, options, &mut result, &mut ops, &mut planned_ids)?;
    }

    // Phase 6: orphan handling for hierarchical creates.
    let orphan_handling = match options.orphan_handling {
        Some(mode) => mode,
        None => store
            .get_config(CONFIG_ORPHAN_HANDLING)?
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default(),
    };
    apply_orphan_policy(store, orphan_handling, options, &mut ops, &mut result)?;

    // Creates are applied parents-first: by hierarchical depth, then id.
    ops.sort_by_key(|op| match op {
        PlannedOp::DropOld { .. } => (0, 0, String::new()),
        PlannedOp::Rename { issue, .. } => (1, 0, issue.id.clone()),
        PlannedOp::Update { target_id, .. } => (2, 0, target_id.clone()),
        PlannedOp::Create(issue) => (3, hierarchy_depth(&issue.id), issue.id.clone()),
    });

    // Phase 7: apply, preferring one transaction.
    let strict_deps = orphan_handling == OrphanHandling::Strict;
    match store.run_in_transaction(actor, |tx, ctx| {
        let mut renames = BTreeMap::new();
        for op in &ops {
            apply_row_op(tx, ctx, op, &mut renames)?;
        }
        for op in &ops {
            apply_relation_op(
                tx,
                ctx,
                op,
                options,
                strict_deps,
                &renames,
                &mut result.skipped_dependencies,
            )?;
        }
        if !renames.is_empty() {
            rewrite_store_references(tx, ctx, &renames)?;
        }
        Ok(())
    }) {
        Ok(()) => {}
        Err(BeadsError::TransactionUnsupported) => {
            // Sequential fallback: rows first so endpoints resolve, then
            // relations. A crash mid-way leaves a partial state; accepted.
            tracing::warn!("backend lacks transactions; applying import sequentially");
            result.skipped_dependencies.clear();
            let mut renames = BTreeMap::new();
            for op in &ops {
                store.mutate(actor, |tx, ctx| apply_row_op(tx, ctx, op, &mut renames))?;
            }
            for op in &ops {
                store.mutate(actor, |tx, ctx| {
                    apply_relation_op(
                        tx,
                        ctx,
                        op,
                        options,
                        strict_deps,
                        &renames,
                        &mut result.skipped_dependencies,
                    )
                })?;
            }
            if !renames.is_empty() {
                store.mutate(actor, |tx, ctx| rewrite_store_references(tx, ctx, &renames))?;
            }
        }
        Err(err) => return Err(err),
    }

    tracing::info!(
        created = result.created,
        updated = result.updated,
        unchanged = result.unchanged,
        skipped = result.skipped,
        deleted = result.deleted,
        collisions = result.collisions,
        "import batch applied"
    );

    Ok(result)
}

/// Validate prefixes, and either fail, rename, or silently drop foreign
/// tombstones.
fn apply_prefix_policy(
    store: &SqliteStore,
    batch: &mut Vec<Issue>,
    expected: &str,
    options: &ImportOptions,
    result: &mut ImportResult,
) -> Result<()> {
    let mut allowed: Vec<String> = store.allowed_prefixes()?;
    // Town routes contribute their prefixes to the allowed set.
    if let Some(routes) = store.get_config(CONFIG_TOWN_ROUTES)? {
        for entry in routes.split(',') {
            if let Some((prefix, _path)) = entry.trim().split_once('=') {
                allowed.push(prefix.trim().to_string());
            }
        }
    }

    let is_allowed = |id: &str| {
        prefix_of(id).is_some_and(|p| p == expected || allowed.iter().any(|a| a == p))
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for issue in batch.iter() {
        if issue.is_tombstone() || is_allowed(&issue.id) {
            continue;
        }
        let prefix = prefix_of(&issue.id).unwrap_or("<none>").to_string();
        *counts.entry(prefix).or_insert(0) += 1;
    }

    if counts.is_empty() {
        // Foreign-prefix tombstones are silently ignored either way.
        batch.retain(|issue| !issue.is_tombstone() || is_allowed(&issue.id));
        return Ok(());
    }

    result.prefix_mismatch = true;
    result.mismatch_prefixes.clone_from(&counts);

    if !options.rename_on_import {
        return Err(BeadsError::PrefixMismatch {
            expected: expected.to_string(),
            counts,
        });
    }

    // Rename: swap each foreign prefix for the primary one, keeping the
    // suffix, then rewrite textual and dependency references batch-wide.
    let mut renames: BTreeMap<String, String> = BTreeMap::new();
    for issue in batch.iter() {
        if issue.is_tombstone() || is_allowed(&issue.id) {
            continue;
        }
        if let Some(prefix) = prefix_of(&issue.id) {
            let new_id = format!("{expected}-{}", &issue.id[prefix.len() + 1..]);
            renames.insert(issue.id.clone(), new_id);
        }
    }

    for issue in batch.iter_mut() {
        if let Some(new_id) = renames.get(&issue.id) {
            result
                .id_mapping
                .insert(issue.id.clone(), new_id.clone());
            issue.id.clone_from(new_id);
        }
        rewrite_text_references(issue, &renames);
        for dep in &mut issue.dependencies {
            if let Some(new_id) = renames.get(&dep.issue_id) {
                dep.issue_id.clone_from(new_id);
            }
            if let Some(new_id) = renames.get(&dep.depends_on_id) {
                dep.depends_on_id.clone_from(new_id);
            }
        }
        issue.content_hash = Some(content_hash(issue));
    }

    // Drop foreign tombstones that were not renamed.
    batch.retain(|issue| !issue.is_tombstone() || is_allowed(&issue.id));

    Ok(())
}

/// Classify one incoming issue against the store and plan the action.
#[allow(clippy::too_many_lines)]
fn plan_upsert(
    store: &SqliteStore,
    mut incoming: Issue,
    options: &ImportOptions,
    result: &mut ImportResult,
    ops: &mut Vec<PlannedOp>,
    planned_ids: &mut HashSet<String>,
) -> Result<()> {
    let incoming_hash = incoming
        .content_hash
        .clone()
        .unwrap_or_else(|| content_hash(&incoming));

    // Tombstone protection: a tombstoned store row is never touched.
    if store.is_tombstone(&incoming.id)? {
        result.skipped += 1;
        return Ok(());
    }

    let protected = |id: &str, incoming_at: DateTime<Utc>| {
        options
            .protect_local_export_ids
            .get(id)
            .is_some_and(|exported_at| incoming_at <= *exported_at)
    };

    // External-ref match takes precedence over id match.
    if let Some(ref external_ref) = incoming.external_ref {
        if let Some(existing) = store.find_by_external_ref(external_ref)? {
            let existing_full = store
                .get_issue_with_relations(&existing.id)?
                .unwrap_or(existing);
            let existing_hash = content_hash(&existing_full);
            if existing_hash != incoming_hash {
                result.collisions += 1;
            }
            if incoming.updated_at <= existing_full.updated_at
                || protected(&existing_full.id, incoming.updated_at)
            {
                if existing_hash == incoming_hash {
                    result.unchanged += 1;
                } else {
                    result.skipped += 1;
                }
                return Ok(());
            }
            if existing_hash == incoming_hash {
                result.unchanged += 1;
                return Ok(());
            }
            if incoming.id != existing_full.id {
                result
                    .id_mapping
                    .insert(incoming.id.clone(), existing_full.id.clone());
            }
            let target_id = existing_full.id.clone();
            incoming.created_at = incoming.created_at.min(existing_full.created_at);
            result.updated += 1;
            planned_ids.insert(target_id.clone());
            ops.push(PlannedOp::Update {
                target_id,
                issue: incoming,
            });
            return Ok(());
        }
    }

    // Content-hash match under a different id: a rename.
    if let Some(existing) = store.find_by_content_hash(&incoming_hash)? {
        if existing.id != incoming.id && !existing.is_tombstone() {
            if prefix_of(&existing.id) != prefix_of(&incoming.id) {
                result.skipped += 1;
                return Ok(());
            }
            result.id_mapping.insert(existing.id.clone(), incoming.id.clone());
            result.updated += 1;
            if store.id_exists(&incoming.id)? {
                // Target already present and equivalent: just drop the old row.
                ops.push(PlannedOp::DropOld {
                    old_id: existing.id,
                });
            } else {
                planned_ids.insert(incoming.id.clone());
                ops.push(PlannedOp::Rename {
                    old_id: existing.id,
                    issue: incoming,
                });
            }
            return Ok(());
        }
    }

    // Same-id match: updated_at-gated update.
    if let Some(existing) = store.get_issue_with_relations(&incoming.id)? {
        let existing_hash = content_hash(&existing);
        if existing_hash == incoming_hash {
            result.unchanged += 1;
            return Ok(());
        }
        result.collisions += 1;
        if incoming.updated_at <= existing.updated_at
            || protected(&incoming.id, incoming.updated_at)
        {
            result.skipped += 1;
            return Ok(());
        }
        incoming.created_at = incoming.created_at.min(existing.created_at);
        result.updated += 1;
        planned_ids.insert(incoming.id.clone());
        ops.push(PlannedOp::Update {
            target_id: incoming.id.clone(),
            issue: incoming,
        });
        return Ok(());
    }

    // Brand new.
    if planned_ids.insert(incoming.id.clone()) {
        result.created += 1;
        ops.push(PlannedOp::Create(incoming));
    } else {
        result.skipped += 1;
    }
    Ok(())
}

/// Enforce the orphan policy over planned creates; may synthesize parents.
fn apply_orphan_policy(
    store: &SqliteStore,
    mode: OrphanHandling,
    options: &ImportOptions,
    ops: &mut Vec<PlannedOp>,
    result: &mut ImportResult,
) -> Result<()> {
    if mode == OrphanHandling::Allow {
        return Ok(());
    }

    let mut known: HashSet<String> = store.all_ids()?.into_iter().collect();
    for op in ops.iter() {
        match op {
            PlannedOp::Create(issue) | PlannedOp::Rename { issue, .. } => {
                known.insert(issue.id.clone());
            }
            PlannedOp::Update { target_id, .. } => {
                known.insert(target_id.clone());
            }
            PlannedOp::DropOld { .. } => {}
        }
    }

    let mut missing: BTreeMap<String, String> = BTreeMap::new();
    let mut dropped: HashSet<String> = HashSet::new();

    // Deterministic scan: children sorted by id.
    let mut children: Vec<(String, String)> = ops
        .iter()
        .filter_map(|op| match op {
            PlannedOp::Create(issue) => {
                parent_of(&issue.id).map(|parent| (issue.id.clone(), parent))
            }
            _ => None,
        })
        .collect();
    children.sort();

    for (child, parent) in children {
        let mut ancestor = parent.clone();
        loop {
            if !known.contains(&ancestor) && !missing.contains_key(&ancestor) {
                match mode {
                    OrphanHandling::Strict => {
                        return Err(BeadsError::Orphan {
                            child,
                            parent: ancestor,
                        });
                    }
                    OrphanHandling::Skip => {
                        dropped.insert(child.clone());
                        break;
                    }
                    OrphanHandling::Resurrect => {
                        missing.insert(ancestor.clone(), child.clone());
                    }
                    OrphanHandling::Allow => unreachable!("handled above"),
                }
            }
            match parent_of(&ancestor) {
                Some(next) => ancestor = next,
                None => break,
            }
        }
    }

    if !dropped.is_empty() {
        ops.retain(|op| match op {
            PlannedOp::Create(issue) => {
                let drop = dropped.contains(&issue.id)
                    || dropped.iter().any(|d| {
                        issue.id.starts_with(d.as_str())
                            && issue.id[d.len()..].starts_with('.')
                    });
                if drop {
                    result.created -= 1;
                    result.skipped += 1;
                }
                !drop
            }
            _ => true,
        });
    }

    // Synthesize resurrected parents, shallowest first.
    let mut parents: Vec<(String, String)> = missing.into_iter().collect();
    parents.sort_by_key(|(id, _)| (hierarchy_depth(id), id.clone()));
    for (parent_id, child_id) in parents {
        let seed = options.resurrect_seeds.get(&parent_id);
        let now = Utc::now();
        let mut parent = Issue::new(parent_id.clone(), String::new());
        parent.title = seed.map_or_else(
            || {
                let mut title = child_id.clone();
                title.truncate(64);
                title
            },
            |s| s.title.clone(),
        );
        parent.description = Some(
            "[RESURRECTED] Recreated as closed to preserve hierarchical structure.".to_string(),
        );
        parent.status = Status::Closed;
        parent.priority = Priority::BACKLOG;
        parent.created_at = seed.map_or(now, |s| s.created_at);
        parent.updated_at = now;
        parent.closed_at = Some(now);
        parent.content_hash = Some(content_hash(&parent));
        result.created += 1;
        ops.push(PlannedOp::Create(parent));
    }

    Ok(())
}

/// Apply the row portion of one planned operation.
fn apply_row_op(
    tx: &rusqlite::Transaction<'_>,
    ctx: &mut MutationContext,
    op: &PlannedOp,
    renames: &mut BTreeMap<String, String>,
) -> Result<()> {
    match op {
        PlannedOp::DropOld { old_id } => {
            SqliteStore::tx_delete_issue(tx, old_id)?;
            ctx.mark_dirty(old_id);
        }
        PlannedOp::Rename { old_id, issue } => {
            // Remap incoming edges to the new id before the delete sweeps
            // everything referencing the old one.
            tx.execute(
                "UPDATE OR IGNORE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
                rusqlite::params![issue.id, old_id],
            )?;
            SqliteStore::tx_delete_issue(tx, old_id)?;
            SqliteStore::tx_insert_issue(tx, issue)?;
            ctx.mark_dirty(old_id);
            ctx.mark_dirty(&issue.id);
            renames.insert(old_id.clone(), issue.id.clone());
        }
        PlannedOp::Update { target_id, issue } => {
            let mut stored = issue.clone();
            stored.id.clone_from(target_id);
            stored.content_hash = Some(content_hash(&stored));
            SqliteStore::tx_replace_issue(tx, &stored)?;
            ctx.mark_dirty(target_id);
        }
        PlannedOp::Create(issue) => {
            SqliteStore::tx_insert_issue(tx, issue)?;
            ctx.mark_dirty(&issue.id);
        }
    }
    Ok(())
}

/// Apply the relation portion (labels, comments, commits, dependencies) of
/// one planned operation. Rows for the whole batch must already exist.
fn apply_relation_op(
    tx: &rusqlite::Transaction<'_>,
    ctx: &mut MutationContext,
    op: &PlannedOp,
    options: &ImportOptions,
    strict_deps: bool,
    renames: &BTreeMap<String, String>,
    skipped_dependencies: &mut Vec<SkippedDependency>,
) -> Result<()> {
    let (target_id, issue) = match op {
        PlannedOp::Create(issue) | PlannedOp::Rename { issue, .. } => (&issue.id, issue),
        PlannedOp::Update { target_id, issue } => (target_id, issue),
        PlannedOp::DropOld { .. } => return Ok(()),
    };

    match options.label_merge {
        LabelMergePolicy::Union => SqliteStore::tx_union_labels(tx, target_id, &issue.labels)?,
        LabelMergePolicy::Replace => SqliteStore::tx_set_labels(tx, target_id, &issue.labels)?,
    }

    for comment in &issue.comments {
        let comment = Comment {
            issue_id: target_id.clone(),
            ..comment.clone()
        };
        SqliteStore::tx_append_comment_if_missing(tx, target_id, &comment)?;
    }

    SqliteStore::tx_union_commits(tx, target_id, &issue.commits)?;

    for dep in &issue.dependencies {
        let mut dep = dep.clone();
        dep.issue_id.clone_from(target_id);
        if let Some(new_id) = renames.get(&dep.depends_on_id) {
            dep.depends_on_id.clone_from(new_id);
        }
        if !SqliteStore::tx_id_exists(tx, &dep.depends_on_id)? {
            let skipped = SkippedDependency {
                issue_id: dep.issue_id.clone(),
                depends_on_id: dep.depends_on_id.clone(),
                dep_type: dep.dep_type.as_str().to_string(),
                reason: "endpoint not found".to_string(),
            };
            if strict_deps {
                return Err(BeadsError::InvalidInput(format!(
                    "dependency endpoint not found: {} -> {}",
                    skipped.issue_id, skipped.depends_on_id
                )));
            }
            skipped_dependencies.push(skipped);
            continue;
        }
        if dep.dep_type.is_blocking() && tx_would_create_cycle(tx, &dep)? {
            skipped_dependencies.push(SkippedDependency {
                issue_id: dep.issue_id.clone(),
                depends_on_id: dep.depends_on_id.clone(),
                dep_type: dep.dep_type.as_str().to_string(),
                reason: "would create cycle".to_string(),
            });
            continue;
        }
        SqliteStore::tx_add_dependency(tx, &dep)?;
    }

    Ok(())
}

fn tx_would_create_cycle(tx: &rusqlite::Transaction<'_>, dep: &Dependency) -> Result<bool> {
    use rusqlite::OptionalExtension;
    let exists: bool = tx
        .query_row(
            r"
            WITH RECURSIVE transitive(id) AS (
                SELECT depends_on_id FROM dependencies
                WHERE issue_id = ?1 AND type IN ('blocks', 'parent-child')
                UNION
                SELECT d.depends_on_id FROM dependencies d
                JOIN transitive t ON d.issue_id = t.id
                WHERE d.type IN ('blocks', 'parent-child')
            )
            SELECT 1 FROM transitive WHERE id = ?2 LIMIT 1
            ",
            rusqlite::params![dep.depends_on_id, dep.issue_id],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(exists)
}

/// Rewrite textual references to renamed ids across every stored issue, and
/// remap dependency endpoints still pointing at old ids.
fn rewrite_store_references(
    tx: &rusqlite::Transaction<'_>,
    ctx: &mut MutationContext,
    renames: &BTreeMap<String, String>,
) -> Result<()> {
    for (old, new) in renames {
        tx.execute(
            "UPDATE OR IGNORE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
            rusqlite::params![new, old],
        )?;
        tx.execute(
            "DELETE FROM dependencies WHERE depends_on_id = ?",
            rusqlite::params![old],
        )?;
    }

    let mut rows: Vec<(String, String, String, String, String, String)> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, title, description, design, acceptance_criteria, notes FROM issues",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?;
        for row in mapped {
            rows.push(row?);
        }
    }

    for (id, title, description, design, acceptance, notes) in rows {
        let mut fields = [title, description, design, acceptance, notes];
        let mut changed = false;
        for field in &mut fields {
            for (old, new) in renames {
                if let Some(rewritten) = replace_id_token(field, old, new) {
                    *field = rewritten;
                    changed = true;
                }
            }
        }
        if !changed {
            continue;
        }
        let [title, description, design, acceptance, notes] = fields;
        tx.execute(
            "UPDATE issues SET title = ?2, description = ?3, design = ?4,
                 acceptance_criteria = ?5, notes = ?6
             WHERE id = ?1",
            rusqlite::params![id, title, description, design, acceptance, notes],
        )?;
        // The canonical text changed, so the stored hash must follow.
        refresh_row_hash(tx, &id)?;
        ctx.mark_dirty(&id);
    }

    Ok(())
}

/// Recompute and store the content hash of one row from its current state.
fn refresh_row_hash(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<()> {
    use rusqlite::OptionalExtension;

    let row = tx
        .query_row(
            "SELECT title, description, design, acceptance_criteria, notes, status, priority,
                    issue_type, assignee, external_ref, source_system, created_at, updated_at,
                    closed_at, deleted_at, deleted_by, delete_reason
             FROM issues WHERE id = ?",
            [id],
            |row| {
                let parse = |s: Option<String>| {
                    s.and_then(|s| {
                        chrono::DateTime::parse_from_rfc3339(&s)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc))
                    })
                };
                let mut issue = Issue::new(id, row.get::<_, String>(0)?);
                issue.description = row.get::<_, Option<String>>(1)?.filter(|s| !s.is_empty());
                issue.design = row.get::<_, Option<String>>(2)?.filter(|s| !s.is_empty());
                issue.acceptance_criteria =
                    row.get::<_, Option<String>>(3)?.filter(|s| !s.is_empty());
                issue.notes = row.get::<_, Option<String>>(4)?.filter(|s| !s.is_empty());
                issue.status = row.get::<_, String>(5)?.parse().unwrap_or(Status::Open);
                issue.priority = Priority::clamped(row.get(6)?);
                issue.issue_type = row.get::<_, String>(7)?.parse().unwrap_or_default();
                issue.assignee = row.get(8)?;
                issue.external_ref = row.get(9)?;
                issue.source_system = row.get(10)?;
                issue.closed_at = parse(row.get(13)?);
                issue.deleted_at = parse(row.get(14)?);
                issue.deleted_by = row.get(15)?;
                issue.delete_reason = row.get(16)?;
                Ok(issue)
            },
        )
        .optional()?;

    let Some(mut issue) = row else {
        return Ok(());
    };

    // Relations participate in the canonical form.
    {
        let mut stmt = tx.prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        issue.labels = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }
    {
        let mut stmt = tx.prepare(
            "SELECT issue_id, depends_on_id, type, created_at FROM dependencies
             WHERE issue_id = ? ORDER BY depends_on_id, type",
        )?;
        issue.dependencies = stmt
            .query_map([id], |row| {
                let created_at: String = row.get(3)?;
                Ok(Dependency {
                    issue_id: row.get(0)?,
                    depends_on_id: row.get(1)?,
                    dep_type: row
                        .get::<_, String>(2)?
                        .parse()
                        .unwrap_or(crate::model::DependencyType::Blocks),
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }
    {
        let mut stmt = tx.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        issue.comments = stmt
            .query_map([id], |row| {
                let created_at: String = row.get(4)?;
                Ok(Comment {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    author: row.get(2)?,
                    body: row.get(3)?,
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }

    let hash = content_hash(&issue);
    tx.execute(
        "UPDATE issues SET content_hash = ? WHERE id = ?",
        rusqlite::params![hash, id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyType;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn incoming(id: &str, title: &str, updated: i64) -> Issue {
        let mut issue = Issue::new(id, title);
        issue.created_at = at(0);
        issue.updated_at = at(updated);
        issue
    }

    fn store_with_prefix(prefix: &str) -> SqliteStore {
        let mut store = SqliteStore::open_memory().unwrap();
        store
            .set_config(crate::storage::CONFIG_ISSUE_PREFIX, prefix)
            .unwrap();
        store
    }

    #[test]
    fn happy_import_creates_batch() {
        // Scenario: empty store, two fresh issues.
        let mut store = store_with_prefix("bd");
        let batch = vec![incoming("bd-1", "A", 0), incoming("bd-2", "B", 0)];
        let result = import_batch(&mut store, batch, &ImportOptions::default(), "test").unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(result.updated, 0);
        assert_eq!(result.unchanged, 0);
        assert_eq!(store.count_issues().unwrap(), 2);
    }

    #[test]
    fn reimport_is_unchanged() {
        let mut store = store_with_prefix("bd");
        let batch = vec![incoming("bd-1", "A", 0)];
        import_batch(&mut store, batch.clone(), &ImportOptions::default(), "test").unwrap();
        let result = import_batch(&mut store, batch, &ImportOptions::default(), "test").unwrap();
        assert_eq!(result.created, 0);
        assert_eq!(result.unchanged, 1);
    }

    #[test]
    fn newer_incoming_updates_older_row() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "Old title", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();

        let result = import_batch(
            &mut store,
            vec![incoming("bd-1", "New title", 10)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(result.collisions, 1);
        assert_eq!(store.get_issue("bd-1").unwrap().unwrap().title, "New title");
    }

    #[test]
    fn older_incoming_is_skipped() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "Current", 10)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();

        let result = import_batch(
            &mut store,
            vec![incoming("bd-1", "Stale", 1)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(store.get_issue("bd-1").unwrap().unwrap().title, "Current");
    }

    #[test]
    fn tombstones_are_never_resurrected() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "A", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        store.delete_issue("bd-1", "test", true, None).unwrap();

        let result = import_batch(
            &mut store,
            vec![incoming("bd-1", "Back from the dead", 99)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert!(store.is_tombstone("bd-1").unwrap());
    }

    #[test]
    fn prefix_mismatch_fails_without_rename() {
        // Scenario: prefix bd, incoming foo-3.
        let mut store = store_with_prefix("bd");
        let err = import_batch(
            &mut store,
            vec![incoming("foo-3", "X", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap_err();
        match err {
            BeadsError::PrefixMismatch { expected, counts } => {
                assert_eq!(expected, "bd");
                assert_eq!(counts.get("foo"), Some(&1));
            }
            other => panic!("expected PrefixMismatch, got {other:?}"),
        }
    }

    #[test]
    fn rename_on_import_rewrites_ids_and_references() {
        let mut store = store_with_prefix("bd");
        let mut a = incoming("foo-3", "Fix foo-3 widget", 0);
        a.description = Some("See also foo-4 but not foo-34.".to_string());
        let b = incoming("foo-4", "Other", 0);

        let options = ImportOptions {
            rename_on_import: true,
            ..Default::default()
        };
        let result = import_batch(&mut store, vec![a, b], &options, "test").unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(result.id_mapping.get("foo-3"), Some(&"bd-3".to_string()));

        let issue = store.get_issue("bd-3").unwrap().unwrap();
        assert_eq!(issue.title, "Fix bd-3 widget");
        // Boundary-aware: foo-34 untouched.
        assert_eq!(
            issue.description.as_deref(),
            Some("See also bd-4 but not foo-34.")
        );
    }

    #[test]
    fn foreign_tombstones_silently_dropped() {
        let mut store = store_with_prefix("bd");
        let mut dead = incoming("foo-9", "gone", 0);
        dead.status = Status::Tombstone;
        let result = import_batch(
            &mut store,
            vec![dead, incoming("bd-1", "A", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.created, 1);
        assert!(!store.id_exists("foo-9").unwrap());
    }

    #[test]
    fn duplicate_external_refs_rejected_or_cleared() {
        let mut store = store_with_prefix("bd");
        let mut a = incoming("bd-1", "A", 0);
        a.external_ref = Some("gitlab:proj:7".to_string());
        let mut b = incoming("bd-2", "B", 0);
        b.external_ref = Some("gitlab:proj:7".to_string());

        let err = import_batch(
            &mut store,
            vec![a.clone(), b.clone()],
            &ImportOptions::default(),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, BeadsError::DuplicateExternalRef { .. }));

        let options = ImportOptions {
            clear_duplicate_external_refs: true,
            ..Default::default()
        };
        let result = import_batch(&mut store, vec![a, b], &options, "test").unwrap();
        assert_eq!(result.created, 2);
        assert!(
            store
                .get_issue("bd-2")
                .unwrap()
                .unwrap()
                .external_ref
                .is_none()
        );
    }

    #[test]
    fn external_ref_match_updates_existing_id() {
        let mut store = store_with_prefix("bd");
        let mut original = incoming("bd-1", "Tracked", 0);
        original.external_ref = Some("linear:eng-42".to_string());
        import_batch(&mut store, vec![original], &ImportOptions::default(), "test").unwrap();

        // Same tracker issue arrives under a different local id and a Linear URL alias.
        let mut second = incoming("bd-9", "Tracked with details", 10);
        second.external_ref = Some("https://linear.app/acme/issue/ENG-42/slug".to_string());
        let result = import_batch(&mut store, vec![second], &ImportOptions::default(), "test").unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(result.id_mapping.get("bd-9"), Some(&"bd-1".to_string()));
        let issue = store.get_issue("bd-1").unwrap().unwrap();
        assert_eq!(issue.title, "Tracked with details");
        assert!(!store.id_exists("bd-9").unwrap());
    }

    #[test]
    fn content_hash_rename_moves_row_and_rewrites_references() {
        // Scenario: bd-1 exists; identical content arrives as bd-2.
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "Same content", 0), {
                let mut n = incoming("bd-3", "Neighbor", 0);
                n.description = Some("Depends on bd-1 conceptually.".to_string());
                n
            }],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();

        // Identical canonical content under a new id: the hash is id-free,
        // so the store's hash index finds the old row.
        let renamed = incoming("bd-2", "Same content", 0);
        let result = import_batch(&mut store, vec![renamed], &ImportOptions::default(), "test").unwrap();

        assert_eq!(result.updated, 1);
        assert!(!store.id_exists("bd-1").unwrap());
        assert!(store.id_exists("bd-2").unwrap());
        assert_eq!(result.id_mapping.get("bd-1"), Some(&"bd-2".to_string()));

        let neighbor = store.get_issue("bd-3").unwrap().unwrap();
        assert_eq!(
            neighbor.description.as_deref(),
            Some("Depends on bd-2 conceptually.")
        );
    }

    #[test]
    fn deletion_ids_remove_rows() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "A", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();

        let options = ImportOptions {
            deletion_ids: vec!["bd-1".to_string(), "bd-missing".to_string()],
            ..Default::default()
        };
        let result = import_batch(&mut store, vec![], &options, "test").unwrap();
        assert_eq!(result.deleted, 1);
        assert!(!store.id_exists("bd-1").unwrap());
    }

    #[test]
    fn protect_local_export_ids_blocks_stale_inbound() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "Exported", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();

        let mut protect = HashMap::new();
        protect.insert("bd-1".to_string(), at(50));
        let options = ImportOptions {
            protect_local_export_ids: protect,
            ..Default::default()
        };
        // Incoming is newer than the row but not newer than the export stamp.
        let result = import_batch(
            &mut store,
            vec![incoming("bd-1", "Mid-sync overwrite", 20)],
            &options,
            "test",
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(store.get_issue("bd-1").unwrap().unwrap().title, "Exported");
    }

    #[test]
    fn orphan_strict_aborts() {
        let mut store = store_with_prefix("bd");
        let err = import_batch(
            &mut store,
            vec![incoming("bd-1.2", "child", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, BeadsError::Orphan { .. }));
        assert_eq!(store.count_issues().unwrap(), 0);
    }

    #[test]
    fn orphan_skip_drops_child() {
        let mut store = store_with_prefix("bd");
        let options = ImportOptions {
            orphan_handling: Some(OrphanHandling::Skip),
            ..Default::default()
        };
        let result = import_batch(
            &mut store,
            vec![incoming("bd-1.2", "child", 0), incoming("bd-2", "ok", 0)],
            &options,
            "test",
        )
        .unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.skipped, 1);
        assert!(!store.id_exists("bd-1.2").unwrap());
    }

    #[test]
    fn orphan_resurrect_synthesizes_closed_ancestors() {
        let mut store = store_with_prefix("bd");
        let options = ImportOptions {
            orphan_handling: Some(OrphanHandling::Resurrect),
            ..Default::default()
        };
        let result = import_batch(
            &mut store,
            vec![incoming("bd-7.1.2", "deep child", 0)],
            &options,
            "test",
        )
        .unwrap();
        // Child plus two synthesized ancestors.
        assert_eq!(result.created, 3);

        let parent = store.get_issue("bd-7.1").unwrap().unwrap();
        assert_eq!(parent.status, Status::Closed);
        assert_eq!(parent.priority, Priority::BACKLOG);
        assert!(
            parent
                .description
                .as_deref()
                .unwrap()
                .starts_with("[RESURRECTED]")
        );
        assert!(store.id_exists("bd-7").unwrap());
        assert!(store.find_orphaned_children().unwrap().is_empty());
    }

    #[test]
    fn orphan_resurrect_uses_seed_title() {
        let mut store = store_with_prefix("bd");
        let mut seeds = HashMap::new();
        seeds.insert(
            "bd-7".to_string(),
            ResurrectSeed {
                title: "Original epic title".to_string(),
                created_at: at(-500),
            },
        );
        let options = ImportOptions {
            orphan_handling: Some(OrphanHandling::Resurrect),
            resurrect_seeds: seeds,
            ..Default::default()
        };
        import_batch(&mut store, vec![incoming("bd-7.1", "child", 0)], &options, "test").unwrap();
        let parent = store.get_issue("bd-7").unwrap().unwrap();
        assert_eq!(parent.title, "Original epic title");
        assert_eq!(parent.created_at, at(-500));
    }

    #[test]
    fn orphan_allow_creates_without_parent() {
        let mut store = store_with_prefix("bd");
        let options = ImportOptions {
            orphan_handling: Some(OrphanHandling::Allow),
            ..Default::default()
        };
        let result =
            import_batch(&mut store, vec![incoming("bd-1.2", "child", 0)], &options, "test")
                .unwrap();
        assert_eq!(result.created, 1);
        assert!(store.id_exists("bd-1.2").unwrap());
    }

    #[test]
    fn unresolvable_dependencies_skipped_and_reported() {
        let mut store = store_with_prefix("bd");
        let mut issue = incoming("bd-1", "A", 0);
        issue.dependencies = vec![Dependency {
            issue_id: "bd-1".to_string(),
            depends_on_id: "bd-ghost".to_string(),
            dep_type: DependencyType::Blocks,
            created_at: at(0),
        }];
        let options = ImportOptions {
            orphan_handling: Some(OrphanHandling::Allow),
            ..Default::default()
        };
        let result = import_batch(&mut store, vec![issue], &options, "test").unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.skipped_dependencies.len(), 1);
        assert_eq!(result.skipped_dependencies[0].depends_on_id, "bd-ghost");
    }

    #[test]
    fn dependencies_within_batch_resolve() {
        let mut store = store_with_prefix("bd");
        let mut a = incoming("bd-1", "A", 0);
        a.dependencies = vec![Dependency {
            issue_id: "bd-1".to_string(),
            depends_on_id: "bd-2".to_string(),
            dep_type: DependencyType::Blocks,
            created_at: at(0),
        }];
        let b = incoming("bd-2", "B", 0);
        let result =
            import_batch(&mut store, vec![a, b], &ImportOptions::default(), "test").unwrap();
        assert!(result.skipped_dependencies.is_empty());
        assert_eq!(store.get_dependency_records("bd-1").unwrap().len(), 1);
    }

    #[test]
    fn cyclic_blocking_dependency_skipped() {
        let mut store = store_with_prefix("bd");
        import_batch(
            &mut store,
            vec![incoming("bd-1", "A", 0), incoming("bd-2", "B", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        store
            .add_dependency(
                &Dependency {
                    issue_id: "bd-1".to_string(),
                    depends_on_id: "bd-2".to_string(),
                    dep_type: DependencyType::Blocks,
                    created_at: at(0),
                },
                "test",
            )
            .unwrap();

        let mut issue = incoming("bd-2", "B reversed", 10);
        issue.dependencies = vec![Dependency {
            issue_id: "bd-2".to_string(),
            depends_on_id: "bd-1".to_string(),
            dep_type: DependencyType::Blocks,
            created_at: at(1),
        }];
        let result =
            import_batch(&mut store, vec![issue], &ImportOptions::default(), "test").unwrap();
        assert_eq!(result.skipped_dependencies.len(), 1);
        assert_eq!(result.skipped_dependencies[0].reason, "would create cycle");
    }

    #[test]
    fn label_union_vs_replace() {
        let mut store = store_with_prefix("bd");
        let mut a = incoming("bd-1", "A", 0);
        a.labels = vec!["old".to_string()];
        import_batch(&mut store, vec![a], &ImportOptions::default(), "test").unwrap();

        let mut update = incoming("bd-1", "A updated", 10);
        update.labels = vec!["new".to_string()];
        import_batch(
            &mut store,
            vec![update.clone()],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(store.get_labels("bd-1").unwrap(), vec!["new", "old"]);

        let mut replace = update;
        replace.title = "A replaced".to_string();
        replace.updated_at = at(20);
        let options = ImportOptions {
            label_merge: LabelMergePolicy::Replace,
            ..Default::default()
        };
        import_batch(&mut store, vec![replace], &options, "test").unwrap();
        assert_eq!(store.get_labels("bd-1").unwrap(), vec!["new"]);
    }

    #[test]
    fn comments_append_if_missing_with_timestamps() {
        let mut store = store_with_prefix("bd");
        let mut a = incoming("bd-1", "A", 0);
        a.comments = vec![Comment {
            id: 0,
            issue_id: "bd-1".to_string(),
            author: "alice".to_string(),
            body: "first".to_string(),
            created_at: at(-100),
        }];
        import_batch(&mut store, vec![a.clone()], &ImportOptions::default(), "test").unwrap();

        // Re-importing the same comment does not duplicate it.
        a.updated_at = at(5);
        a.title = "A touched".to_string();
        import_batch(&mut store, vec![a], &ImportOptions::default(), "test").unwrap();
        let comments = store.get_comments("bd-1").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].created_at, at(-100));
    }

    #[test]
    fn wisps_never_imported() {
        let mut store = store_with_prefix("bd");
        let result = import_batch(
            &mut store,
            vec![incoming("bd-wisp-a1", "scratch", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(store.count_issues().unwrap(), 0);
    }

    #[test]
    fn sequential_fallback_applies_batch() {
        let mut store = store_with_prefix("bd");
        store.disable_transactions();
        let result = import_batch(
            &mut store,
            vec![incoming("bd-1", "A", 0), incoming("bd-2", "B", 0)],
            &ImportOptions::default(),
            "test",
        )
        .unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(store.count_issues().unwrap(), 2);
    }

    #[test]
    fn canonicalize_linear_forms() {
        assert_eq!(
            canonicalize_external_ref("https://linear.app/acme/issue/ENG-42/fix-the-thing"),
            "linear:eng-42"
        );
        assert_eq!(canonicalize_external_ref("linear:ENG-42"), "linear:eng-42");
        assert_eq!(
            canonicalize_external_ref("gitlab:group/proj:17"),
            "gitlab:group/proj:17"
        );
    }

    #[test]
    fn replace_token_is_boundary_aware() {
        assert_eq!(
            replace_id_token("fix bd-1 now", "bd-1", "bd-2"),
            Some("fix bd-2 now".to_string())
        );
        assert_eq!(replace_id_token("bd-10 stays", "bd-1", "bd-2"), None);
        assert_eq!(replace_id_token("bd-1.2 stays", "bd-1", "bd-2"), None);
        assert_eq!(
            replace_id_token("(bd-1)", "bd-1", "bd-2"),
            Some("(bd-2)".to_string())
        );
        assert_eq!(
            replace_id_token("bd-1 bd-1", "bd-1", "bd-2"),
            Some("bd-2 bd-2".to_string())
        );
    }
}
