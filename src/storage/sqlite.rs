//! `SQLite` store implementation.
//!
//! All write mutations run through [`SqliteStore::mutate`], which wraps the
//! work in an immediate transaction, appends audit events, and records dirty
//! marks in the same commit. Reads are plain prepared statements.

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, DependencyType, Event, EventType, Issue, IssueType, Priority, Status,
};
use crate::storage::schema::apply_schema;
use crate::util::{content_hash, parent_of, prefix_of};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Config key holding the primary issue prefix.
pub const CONFIG_ISSUE_PREFIX: &str = "issue_prefix";
/// Config key holding extra allowed prefixes (comma-separated).
pub const CONFIG_ALLOWED_PREFIXES: &str = "allowed_prefixes";

const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, acceptance_criteria, \
     notes, status, priority, issue_type, assignee, external_ref, source_system, spec_id, \
     pinned, ephemeral, created_at, updated_at, closed_at, deleted_at, deleted_by, delete_reason";

/// SQLite-backed relational store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    transactions_enabled: bool,
}

/// Context for a mutation, tracking side effects that commit with it.
pub struct MutationContext {
    pub actor: String,
    pub events: Vec<Event>,
    pub dirty_ids: HashSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, details: Option<String>) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value: None,
            new_value: None,
            comment: details,
            created_at: Utc::now(),
        });
    }

    pub fn record_field_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment: None,
            created_at: Utc::now(),
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

/// Filter for [`SqliteStore::search_issues`]. Serializable so daemon-mode
/// clients can ship it over RPC unchanged.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,
    /// All of these labels must be present (AND).
    pub labels: Vec<String>,
    /// At least one of these labels must be present (OR).
    pub labels_any: Vec<String>,
    pub priority: Option<Priority>,
    pub priority_min: Option<Priority>,
    pub priority_max: Option<Priority>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub closed_after: Option<DateTime<Utc>>,
    pub closed_before: Option<DateTime<Utc>>,
    pub title_contains: Option<String>,
    pub description_contains: Option<String>,
    pub notes_contains: Option<String>,
    pub empty_description: bool,
    pub no_assignee: bool,
    pub no_labels: bool,
    pub ids: Vec<String>,
    pub include_tombstones: bool,
    pub limit: Option<usize>,
}

impl IssueFilter {
    /// Filter that returns every row including tombstones (export path).
    #[must_use]
    pub fn everything() -> Self {
        Self {
            include_tombstones: true,
            ..Self::default()
        }
    }
}

/// Serde helper for clearable fields: absent leaves the field alone, JSON
/// `null` clears it, a value sets it.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }
}

/// Explicit update record: one optional slot per mutable field.
///
/// Clearable fields use `Option<Option<T>>`: `None` leaves the field alone,
/// `Some(None)` clears it, `Some(Some(v))` sets it. On the wire, absent
/// means untouched and `null` means clear.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub design: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub source_system: Option<Option<String>>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.external_ref.is_none()
            && self.source_system.is_none()
            && self.spec_id.is_none()
            && self.pinned.is_none()
            && self.closed_at.is_none()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(
        |_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map_or_else(|_| Utc::now(), |naive| Utc.from_utc_datetime(&naive))
        },
        |dt| dt.with_timezone(&Utc),
    )
}

fn opt_text(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;
    let closed_at: Option<String> = row.get(18)?;
    let deleted_at: Option<String> = row.get(19)?;

    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        title: row.get(2)?,
        description: opt_text(row.get(3)?),
        design: opt_text(row.get(4)?),
        acceptance_criteria: opt_text(row.get(5)?),
        notes: opt_text(row.get(6)?),
        status: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or(Status::Open),
        priority: Priority::clamped(row.get(8)?),
        issue_type: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or_default(),
        assignee: row.get(10)?,
        external_ref: row.get(11)?,
        source_system: row.get(12)?,
        spec_id: row.get(13)?,
        pinned: row.get::<_, i64>(14)? != 0,
        ephemeral: row.get::<_, i64>(15)? != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        closed_at: closed_at.map(|s| parse_datetime(&s)),
        deleted_at: deleted_at.map(|s| parse_datetime(&s)),
        deleted_by: row.get(20)?,
        delete_reason: row.get(21)?,
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
        commits: Vec::new(),
    })
}

impl SqliteStore {
    /// Open a connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Some(5_000))
    }

    /// Open with an explicit busy timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            transactions_enabled: true,
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            transactions_enabled: true,
        })
    }

    /// Whether the backend offers a transactional batch path.
    #[must_use]
    pub const fn supports_transactions(&self) -> bool {
        self.transactions_enabled
    }

    /// Disable the transactional batch path, forcing callers of
    /// [`Self::run_in_transaction`] onto their sequential fallback.
    pub const fn disable_transactions(&mut self) {
        self.transactions_enabled = false;
    }

    /// Run a closure inside a single transaction.
    ///
    /// Side effects recorded in the [`MutationContext`] (events, dirty marks)
    /// commit atomically with the closure's work.
    ///
    /// # Errors
    ///
    /// Returns `TransactionUnsupported` when the transactional path is
    /// disabled; callers then apply their operations sequentially. Any error
    /// from the closure rolls the transaction back.
    pub fn run_in_transaction<F, R>(&mut self, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>, &mut MutationContext) -> Result<R>,
    {
        if !self.transactions_enabled {
            return Err(BeadsError::TransactionUnsupported);
        }
        self.mutate(actor, f)
    }

    /// Execute a mutation under the store's transaction protocol.
    ///
    /// # Errors
    ///
    /// Returns any error from the closure; the transaction rolls back.
    pub fn mutate<F, R>(&mut self, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    event.created_at.to_rfc3339(),
                ],
            )?;
        }

        for id in &ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ========================================================================
    // Transaction-scoped row helpers (shared with the import engine)
    // ========================================================================

    /// Insert a full issue row inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `IdCollision` if the id already exists.
    pub fn tx_insert_issue(tx: &Transaction<'_>, issue: &Issue) -> Result<()> {
        let params = Self::issue_params(issue);
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();
        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO issues ({ISSUE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            param_refs.as_slice(),
        )?;
        if inserted == 0 {
            return Err(BeadsError::IdCollision {
                id: issue.id.clone(),
            });
        }
        Ok(())
    }

    /// Replace every column of an existing issue row inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if no row matched.
    pub fn tx_replace_issue(tx: &Transaction<'_>, issue: &Issue) -> Result<()> {
        let params = Self::issue_params(issue);
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();
        let updated = tx.execute(
            "UPDATE issues SET content_hash = ?2, title = ?3, description = ?4, design = ?5,
                 acceptance_criteria = ?6, notes = ?7, status = ?8, priority = ?9,
                 issue_type = ?10, assignee = ?11, external_ref = ?12, source_system = ?13,
                 spec_id = ?14, pinned = ?15, ephemeral = ?16, created_at = ?17,
                 updated_at = ?18, closed_at = ?19, deleted_at = ?20, deleted_by = ?21,
                 delete_reason = ?22
             WHERE id = ?1",
            param_refs.as_slice(),
        )?;
        if updated == 0 {
            return Err(BeadsError::IssueNotFound {
                id: issue.id.clone(),
            });
        }
        Ok(())
    }

    /// Delete an issue row (and cascading relations) inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete statements fail.
    pub fn tx_delete_issue(tx: &Transaction<'_>, id: &str) -> Result<bool> {
        // Dependencies have no FK (endpoints may be cross-clone); clean both sides.
        tx.execute(
            "DELETE FROM dependencies WHERE issue_id = ? OR depends_on_id = ?",
            rusqlite::params![id, id],
        )?;
        let deleted = tx.execute("DELETE FROM issues WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Check id existence inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tx_id_exists(tx: &Transaction<'_>, id: &str) -> Result<bool> {
        let exists: bool = tx
            .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// Union the given labels into an issue's label set inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn tx_union_labels(tx: &Transaction<'_>, issue_id: &str, labels: &[String]) -> Result<()> {
        for label in labels {
            tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
        }
        Ok(())
    }

    /// Replace an issue's label set inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn tx_set_labels(tx: &Transaction<'_>, issue_id: &str, labels: &[String]) -> Result<()> {
        tx.execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
        Self::tx_union_labels(tx, issue_id, labels)
    }

    /// Insert a dependency edge if absent. Returns whether a row was added.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn tx_add_dependency(tx: &Transaction<'_>, dep: &Dependency) -> Result<bool> {
        let added = tx.execute(
            "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at)
             VALUES (?, ?, ?, ?)",
            rusqlite::params![
                dep.issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                dep.created_at.to_rfc3339(),
            ],
        )?;
        Ok(added > 0)
    }

    /// Append a comment unless one with the same `(author, trim(text))`
    /// identity already exists. Returns whether a row was added.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn tx_append_comment_if_missing(
        tx: &Transaction<'_>,
        issue_id: &str,
        comment: &Comment,
    ) -> Result<bool> {
        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM comments WHERE issue_id = ? AND author = ? AND TRIM(text) = TRIM(?)",
                rusqlite::params![issue_id, comment.author, comment.body],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![
                issue_id,
                comment.author,
                comment.body,
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(true)
    }

    /// Union commit SHAs into an issue's commit set inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn tx_union_commits(tx: &Transaction<'_>, issue_id: &str, shas: &[String]) -> Result<()> {
        for sha in shas {
            tx.execute(
                "INSERT OR IGNORE INTO issue_commits (issue_id, sha) VALUES (?, ?)",
                rusqlite::params![issue_id, sha],
            )?;
        }
        Ok(())
    }

    fn issue_params(issue: &Issue) -> Vec<Box<dyn rusqlite::ToSql>> {
        vec![
            Box::new(issue.id.clone()),
            Box::new(issue.content_hash.clone()),
            Box::new(issue.title.clone()),
            Box::new(issue.description.clone().unwrap_or_default()),
            Box::new(issue.design.clone().unwrap_or_default()),
            Box::new(issue.acceptance_criteria.clone().unwrap_or_default()),
            Box::new(issue.notes.clone().unwrap_or_default()),
            Box::new(issue.status.as_str()),
            Box::new(issue.priority.0),
            Box::new(issue.issue_type.as_str().to_string()),
            Box::new(issue.assignee.clone()),
            Box::new(issue.external_ref.clone()),
            Box::new(issue.source_system.clone()),
            Box::new(issue.spec_id.clone()),
            Box::new(i32::from(issue.pinned)),
            Box::new(i32::from(issue.ephemeral)),
            Box::new(issue.created_at.to_rfc3339()),
            Box::new(issue.updated_at.to_rfc3339()),
            Box::new(issue.closed_at.map(|dt| dt.to_rfc3339())),
            Box::new(issue.deleted_at.map(|dt| dt.to_rfc3339())),
            Box::new(issue.deleted_by.clone()),
            Box::new(issue.delete_reason.clone()),
        ]
    }

    // ========================================================================
    // Issue lifecycle
    // ========================================================================

    /// Create a single issue.
    ///
    /// # Errors
    ///
    /// Returns `IdCollision` if the id already exists.
    pub fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        self.create_issues(std::slice::from_ref(issue), actor)
    }

    /// Create a batch of issues atomically. Partial application is never
    /// observable: any failure rolls back the whole batch.
    ///
    /// # Errors
    ///
    /// Returns the first insert error.
    pub fn create_issues(&mut self, issues: &[Issue], actor: &str) -> Result<()> {
        self.mutate(actor, |tx, ctx| {
            for issue in issues {
                let mut stored = issue.clone();
                if stored.content_hash.is_none() {
                    stored.content_hash = Some(content_hash(&stored));
                }
                Self::tx_insert_issue(tx, &stored)?;
                Self::tx_set_labels(tx, &stored.id, &stored.labels)?;
                for dep in &stored.dependencies {
                    Self::tx_add_dependency(tx, dep)?;
                }
                Self::tx_union_commits(tx, &stored.id, &stored.commits)?;
                ctx.record_event(
                    EventType::Created,
                    &stored.id,
                    Some(format!("Created issue: {}", stored.title)),
                );
                ctx.mark_dirty(&stored.id);
            }
            Ok(())
        })
    }

    /// Update an issue's fields, recompute its hash, and bump `updated_at`.
    ///
    /// The id is validated against the configured prefix set first.
    ///
    /// # Errors
    ///
    /// Returns `PrefixValidation` for ids outside the allowed set,
    /// `IssueNotFound` if absent, or a database error.
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        if let Some(expected) = self.get_config(CONFIG_ISSUE_PREFIX)? {
            let allowed = self.allowed_prefixes()?;
            crate::util::validate_prefix(id, &expected, &allowed)?;
        }

        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        let old_status = issue.status;

        if let Some(ref title) = updates.title {
            issue.title.clone_from(title);
        }
        if let Some(ref val) = updates.description {
            issue.description.clone_from(val);
        }
        if let Some(ref val) = updates.design {
            issue.design.clone_from(val);
        }
        if let Some(ref val) = updates.acceptance_criteria {
            issue.acceptance_criteria.clone_from(val);
        }
        if let Some(ref val) = updates.notes {
            issue.notes.clone_from(val);
        }
        if let Some(status) = updates.status {
            issue.status = status;
            if status == Status::Closed && issue.closed_at.is_none() {
                issue.closed_at = Some(Utc::now());
            }
            if !status.is_terminal() {
                issue.closed_at = None;
            }
        }
        if let Some(priority) = updates.priority {
            issue.priority = priority;
        }
        if let Some(ref issue_type) = updates.issue_type {
            issue.issue_type.clone_from(issue_type);
        }
        if let Some(ref val) = updates.assignee {
            issue.assignee.clone_from(val);
        }
        if let Some(ref val) = updates.external_ref {
            issue.external_ref.clone_from(val);
        }
        if let Some(ref val) = updates.source_system {
            issue.source_system.clone_from(val);
        }
        if let Some(ref val) = updates.spec_id {
            issue.spec_id.clone_from(val);
        }
        if let Some(pinned) = updates.pinned {
            issue.pinned = pinned;
        }
        if let Some(closed_at) = updates.closed_at {
            issue.closed_at = closed_at;
        }

        // Monotonic updated_at: any mutation advances it.
        let now = Utc::now();
        issue.updated_at = if now > issue.updated_at {
            now
        } else {
            issue.updated_at + chrono::Duration::seconds(1)
        };

        // Collections for hashing come from the store.
        issue.labels = self.get_labels(id)?;
        issue.dependencies = self.get_dependency_records(id)?;
        issue.comments = self.get_comments(id)?;
        issue.content_hash = Some(content_hash(&issue));

        let snapshot = issue.clone();
        self.mutate(actor, |tx, ctx| {
            Self::tx_replace_issue(tx, &snapshot)?;
            if snapshot.status == old_status {
                ctx.record_event(EventType::Updated, &snapshot.id, None);
            } else {
                ctx.record_field_change(
                    EventType::StatusChanged,
                    &snapshot.id,
                    Some(old_status.as_str().to_string()),
                    Some(snapshot.status.as_str().to_string()),
                );
            }
            ctx.mark_dirty(&snapshot.id);
            Ok(())
        })?;

        Ok(issue)
    }

    /// Close an issue: `status = closed`, `closed_at = now`.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if absent.
    pub fn close_issue(&mut self, id: &str, actor: &str) -> Result<Issue> {
        let updates = IssueUpdate {
            status: Some(Status::Closed),
            closed_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        let issue = self.update_issue(id, &updates, actor)?;
        self.mutate(actor, |_tx, ctx| {
            ctx.record_event(EventType::Closed, id, None);
            Ok(())
        })?;
        Ok(issue)
    }

    /// Delete an issue, either as a hard row removal or a tombstone.
    ///
    /// Tombstones keep the row with `status = tombstone` plus deletion
    /// metadata, so the deletion propagates through JSONL.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if absent.
    pub fn delete_issue(
        &mut self,
        id: &str,
        actor: &str,
        tombstone: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if tombstone {
            let now = Utc::now();
            issue.status = Status::Tombstone;
            if issue.closed_at.is_none() {
                issue.closed_at = Some(now);
            }
            issue.deleted_at = Some(now);
            issue.deleted_by = Some(actor.to_string());
            issue.delete_reason = reason.map(ToString::to_string);
            issue.updated_at = now.max(issue.updated_at + chrono::Duration::seconds(1));
            issue.labels = self.get_labels(id)?;
            issue.dependencies = self.get_dependency_records(id)?;
            issue.comments = self.get_comments(id)?;
            issue.content_hash = Some(content_hash(&issue));

            self.mutate(actor, |tx, ctx| {
                Self::tx_replace_issue(tx, &issue)?;
                ctx.record_event(EventType::Deleted, id, issue.delete_reason.clone());
                ctx.mark_dirty(id);
                Ok(())
            })
        } else {
            self.mutate(actor, |tx, ctx| {
                Self::tx_delete_issue(tx, id)?;
                ctx.record_event(EventType::Deleted, id, Some("hard delete".to_string()));
                ctx.mark_dirty(id);
                Ok(())
            })
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get an issue by id, without relations.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let issue = self
            .conn
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"),
                [id],
                issue_from_row,
            )
            .optional()?;
        Ok(issue)
    }

    /// Get an issue with labels, dependencies, comments, and commits.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn get_issue_with_relations(&self, id: &str) -> Result<Option<Issue>> {
        let Some(mut issue) = self.get_issue(id)? else {
            return Ok(None);
        };
        issue.labels = self.get_labels(id)?;
        issue.dependencies = self.get_dependency_records(id)?;
        issue.comments = self.get_comments(id)?;
        issue.commits = self.get_commits(id)?;
        Ok(Some(issue))
    }

    /// Search issues by filter. Tombstones are excluded unless
    /// `include_tombstones` is set. Results are ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[allow(clippy::too_many_lines)]
    pub fn search_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues i WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.include_tombstones {
            sql.push_str(" AND i.status != 'tombstone'");
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND i.status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref issue_type) = filter.issue_type {
            sql.push_str(" AND i.issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(ref assignee) = filter.assignee {
            sql.push_str(" AND i.assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if filter.no_assignee {
            sql.push_str(" AND (i.assignee IS NULL OR i.assignee = '')");
        }
        if let Some(ref parent_id) = filter.parent_id {
            sql.push_str(" AND i.id LIKE ? AND i.id != ?");
            params.push(Box::new(format!("{parent_id}.%")));
            params.push(Box::new(parent_id.clone()));
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND i.priority = ?");
            params.push(Box::new(priority.0));
        }
        if let Some(priority_min) = filter.priority_min {
            sql.push_str(" AND i.priority >= ?");
            params.push(Box::new(priority_min.0));
        }
        if let Some(priority_max) = filter.priority_max {
            sql.push_str(" AND i.priority <= ?");
            params.push(Box::new(priority_max.0));
        }
        for (column, after, before) in [
            ("created_at", filter.created_after, filter.created_before),
            ("updated_at", filter.updated_after, filter.updated_before),
            ("closed_at", filter.closed_after, filter.closed_before),
        ] {
            if let Some(after) = after {
                sql.push_str(&format!(" AND i.{column} >= ?"));
                params.push(Box::new(after.to_rfc3339()));
            }
            if let Some(before) = before {
                sql.push_str(&format!(" AND i.{column} <= ?"));
                params.push(Box::new(before.to_rfc3339()));
            }
        }
        for (column, needle) in [
            ("title", &filter.title_contains),
            ("description", &filter.description_contains),
            ("notes", &filter.notes_contains),
        ] {
            if let Some(needle) = needle {
                sql.push_str(&format!(" AND i.{column} LIKE ? ESCAPE '\\'"));
                let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
                params.push(Box::new(format!("%{escaped}%")));
            }
        }
        if filter.empty_description {
            sql.push_str(" AND i.description = ''");
        }
        for label in &filter.labels {
            sql.push_str(" AND EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = i.id AND l.label = ?)");
            params.push(Box::new(label.clone()));
        }
        if !filter.labels_any.is_empty() {
            let placeholders = vec!["?"; filter.labels_any.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = i.id AND l.label IN ({placeholders}))"
            ));
            for label in &filter.labels_any {
                params.push(Box::new(label.clone()));
            }
        }
        if filter.no_labels {
            sql.push_str(" AND NOT EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = i.id)");
        }
        if !filter.ids.is_empty() {
            let placeholders = vec!["?"; filter.ids.len()].join(", ");
            sql.push_str(&format!(" AND i.id IN ({placeholders})"));
            for id in &filter.ids {
                params.push(Box::new(id.clone()));
            }
        }

        sql.push_str(" ORDER BY i.id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            #[allow(clippy::cast_possible_wrap)]
            params.push(Box::new(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();
        let issues = stmt
            .query_map(param_refs.as_slice(), issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// All non-ephemeral issues (tombstones included), sorted by id, without
    /// relations. The sync bridge populates relations in bulk.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_issues_for_export(&self) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE ephemeral = 0 ORDER BY id ASC"
        ))?;
        let issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// Check whether an id exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = self
            .conn
            .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// All issue ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Count all issues (tombstones included).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as usize)
    }

    /// Count non-ephemeral issues (the export population).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_exportable_issues(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE ephemeral = 0",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as usize)
    }

    /// Find a non-tombstone issue by external_ref.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_external_ref(&self, external_ref: &str) -> Result<Option<Issue>> {
        let issue = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues
                     WHERE external_ref = ? AND status != 'tombstone'
                     ORDER BY id LIMIT 1"
                ),
                [external_ref],
                issue_from_row,
            )
            .optional()?;
        Ok(issue)
    }

    /// Find an issue by content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_content_hash(&self, hash: &str) -> Result<Option<Issue>> {
        let issue = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues WHERE content_hash = ? ORDER BY id LIMIT 1"
                ),
                [hash],
                issue_from_row,
            )
            .optional()?;
        Ok(issue)
    }

    /// Whether the row with this id is a tombstone.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_tombstone(&self, id: &str) -> Result<bool> {
        let status: Option<String> = self
            .conn
            .query_row("SELECT status FROM issues WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(status.as_deref() == Some("tombstone"))
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    /// Add a dependency edge. Blocking edges are refused if they would close
    /// a cycle.
    ///
    /// # Errors
    ///
    /// Returns `SelfDependency`, `DependencyCycle`, or `IssueNotFound`.
    pub fn add_dependency(&mut self, dep: &Dependency, actor: &str) -> Result<bool> {
        if dep.issue_id == dep.depends_on_id {
            return Err(BeadsError::SelfDependency {
                id: dep.issue_id.clone(),
            });
        }
        for id in [&dep.issue_id, &dep.depends_on_id] {
            if !self.id_exists(id)? {
                return Err(BeadsError::IssueNotFound { id: id.clone() });
            }
        }
        if dep.dep_type.is_blocking()
            && self.would_create_cycle(&dep.issue_id, &dep.depends_on_id)?
        {
            return Err(BeadsError::DependencyCycle {
                path: format!("{} -> {}", dep.issue_id, dep.depends_on_id),
            });
        }

        self.mutate(actor, |tx, ctx| {
            let added = Self::tx_add_dependency(tx, dep)?;
            if added {
                ctx.record_event(
                    EventType::DependencyAdded,
                    &dep.issue_id,
                    Some(format!("{} {}", dep.dep_type, dep.depends_on_id)),
                );
                ctx.mark_dirty(&dep.issue_id);
            }
            Ok(added)
        })
    }

    /// Remove a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<bool> {
        self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ? AND type = ?",
                rusqlite::params![issue_id, depends_on_id, dep_type.as_str()],
            )?;
            if removed > 0 {
                ctx.record_event(
                    EventType::DependencyRemoved,
                    issue_id,
                    Some(format!("{dep_type} {depends_on_id}")),
                );
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    /// Dependencies of one issue, ordered by `(depends_on_id, type)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at FROM dependencies
             WHERE issue_id = ? ORDER BY depends_on_id, type",
        )?;
        let deps = stmt
            .query_map([issue_id], dependency_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    /// All dependency records keyed by issue id, avoiding N+1 traversal.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at FROM dependencies
             ORDER BY issue_id, depends_on_id, type",
        )?;
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        let rows = stmt.query_map([], dependency_from_row)?;
        for dep in rows {
            let dep = dep?;
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    /// Whether adding `issue_id -> depends_on_id` would close a blocking
    /// cycle: true when `issue_id` is already reachable from `depends_on_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn would_create_cycle(&self, issue_id: &str, depends_on_id: &str) -> Result<bool> {
        let exists: bool = self
            .conn
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
                rusqlite::params![depends_on_id, issue_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// Detect all blocking-dependency cycles in the store.
    ///
    /// Each cycle is reported once, as the id list in traversal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn detect_cycles(&self) -> Result<Vec<Vec<String>>> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT issue_id, depends_on_id FROM dependencies
                 WHERE type IN ('blocks', 'parent-child') ORDER BY issue_id, depends_on_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (from, to) = row?;
                adjacency.entry(from).or_default().push(to);
            }
        }

        let mut cycles = Vec::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut nodes: Vec<&String> = adjacency.keys().collect();
        nodes.sort();

        for start in nodes {
            if done.contains(start.as_str()) {
                continue;
            }
            let mut stack = vec![(start.clone(), 0usize)];
            let mut path = Vec::new();
            let mut on_path: HashSet<String> = HashSet::new();
            while let Some((node, next_child)) = stack.pop() {
                if next_child == 0 {
                    path.push(node.clone());
                    on_path.insert(node.clone());
                }
                let children = adjacency.get(&node).map_or(&[] as &[String], Vec::as_slice);
                if next_child < children.len() {
                    let child = children[next_child].clone();
                    stack.push((node, next_child + 1));
                    if on_path.contains(&child) {
                        let cycle_start = path.iter().position(|p| *p == child).unwrap_or(0);
                        cycles.push(path[cycle_start..].to_vec());
                    } else if !done.contains(&child) {
                        stack.push((child, 0));
                    }
                } else {
                    on_path.remove(&node);
                    done.insert(node);
                    path.pop();
                }
            }
        }

        Ok(cycles)
    }

    // ========================================================================
    // Ready / blocked queries
    // ========================================================================

    /// Open issues with no unresolved `blocks` dependencies, ordered by
    /// `(priority asc, id asc)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_ready_work(&self, limit: Option<usize>) -> Result<Vec<Issue>> {
        let mut sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i
             WHERE i.status = 'open' AND i.ephemeral = 0
               AND NOT EXISTS (
                 SELECT 1 FROM dependencies d
                 JOIN issues b ON b.id = d.depends_on_id
                 WHERE d.issue_id = i.id AND d.type = 'blocks'
                   AND b.status NOT IN ('closed', 'tombstone'))
             ORDER BY i.priority ASC, i.id ASC"
        );
        if let Some(limit) = limit {
            use std::fmt::Write as _;
            let _ = write!(sql, " LIMIT {limit}");
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// Non-terminal issues with at least one unresolved blocker, each paired
    /// with its sorted blocker ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_blocked_issues(&self) -> Result<Vec<(Issue, Vec<String>)>> {
        let columns = qualified_issue_columns("i");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns}, d.depends_on_id FROM issues i
             JOIN dependencies d ON d.issue_id = i.id AND d.type = 'blocks'
             JOIN issues b ON b.id = d.depends_on_id
             WHERE i.status NOT IN ('closed', 'tombstone')
               AND b.status NOT IN ('closed', 'tombstone')
             ORDER BY i.id, d.depends_on_id"
        ))?;

        let mut result: Vec<(Issue, Vec<String>)> = Vec::new();
        let rows = stmt.query_map([], |row| {
            let issue = issue_from_row(row)?;
            let blocker: String = row.get(22)?;
            Ok((issue, blocker))
        })?;
        for row in rows {
            let (issue, blocker) = row?;
            match result.last_mut() {
                Some((last, blockers)) if last.id == issue.id => blockers.push(blocker),
                _ => result.push((issue, vec![blocker])),
            }
        }
        Ok(result)
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Labels for one issue, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    /// All labels keyed by issue id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (issue_id, label) = row?;
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    /// Replace an issue's label set.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if absent.
    pub fn set_labels(&mut self, issue_id: &str, labels: &[String], actor: &str) -> Result<()> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        self.mutate(actor, |tx, ctx| {
            Self::tx_set_labels(tx, issue_id, labels)?;
            ctx.record_event(EventType::LabelAdded, issue_id, Some(labels.join(", ")));
            ctx.mark_dirty(issue_id);
            Ok(())
        })?;
        self.touch_updated_at(issue_id)
    }

    /// Add one label.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if absent.
    pub fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        let added = self.mutate(actor, |tx, ctx| {
            let added = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
            if added > 0 {
                ctx.record_event(EventType::LabelAdded, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(added > 0)
        })?;
        if added {
            self.touch_updated_at(issue_id)?;
        }
        Ok(added)
    }

    /// Remove one label.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        let removed = self.mutate(actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                rusqlite::params![issue_id, label],
            )?;
            if removed > 0 {
                ctx.record_event(EventType::LabelRemoved, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })?;
        if removed {
            self.touch_updated_at(issue_id)?;
        }
        Ok(removed)
    }

    // ========================================================================
    // Comments
    // ========================================================================

    /// Comments for one issue, in created order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map([issue_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    /// All comments keyed by issue id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             ORDER BY issue_id, created_at, id",
        )?;
        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        let rows = stmt.query_map([], comment_from_row)?;
        for row in rows {
            let comment = row?;
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    /// Add a comment with `created_at = now`.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if absent.
    pub fn add_issue_comment(
        &mut self,
        issue_id: &str,
        author: &str,
        text: &str,
    ) -> Result<Comment> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        let created_at = Utc::now();
        let id = self.mutate(author, |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id, author, text, created_at.to_rfc3339()],
            )?;
            ctx.record_event(EventType::Commented, issue_id, None);
            ctx.mark_dirty(issue_id);
            Ok(tx.last_insert_rowid())
        })?;
        self.touch_updated_at(issue_id)?;
        Ok(Comment {
            id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            body: text.to_string(),
            created_at,
        })
    }

    /// Import a comment, respecting its provided timestamp. Appends only if
    /// no comment with the same `(author, trim(text))` identity exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn import_issue_comment(&mut self, issue_id: &str, comment: &Comment) -> Result<bool> {
        self.mutate(&comment.author.clone(), |tx, ctx| {
            let added = Self::tx_append_comment_if_missing(tx, issue_id, comment)?;
            if added {
                ctx.mark_dirty(issue_id);
            }
            Ok(added)
        })
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Commit SHAs for one issue, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_commits(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT sha FROM issue_commits WHERE issue_id = ? ORDER BY sha")?;
        let shas = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(shas)
    }

    /// All commit SHAs keyed by issue id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_commits(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, sha FROM issue_commits ORDER BY issue_id, sha")?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (issue_id, sha) = row?;
            map.entry(issue_id).or_default().push(sha);
        }
        Ok(map)
    }

    /// Associate commit SHAs with an issue (40-hex enforced).
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed SHAs.
    pub fn add_commits(&mut self, issue_id: &str, shas: &[String], actor: &str) -> Result<()> {
        for sha in shas {
            if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BeadsError::validation("commit", format!("not a 40-hex SHA: {sha}")));
            }
        }
        self.mutate(actor, |tx, ctx| {
            Self::tx_union_commits(tx, issue_id, shas)?;
            ctx.mark_dirty(issue_id);
            Ok(())
        })
    }

    // ========================================================================
    // Config / metadata
    // ========================================================================

    /// Get a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// All config key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let mut map = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// The additional allowed prefixes from config (comma-separated).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn allowed_prefixes(&self) -> Result<Vec<String>> {
        Ok(self
            .get_config(CONFIG_ALLOWED_PREFIXES)?
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Get a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    /// Ids currently marked dirty, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_dirty_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY issue_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Clear dirty marks for exactly the listed ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_dirty_issues_by_id(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let deleted = self.conn.execute(&sql, params.as_slice())?;
        Ok(deleted)
    }

    /// Clear every dirty mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_all_dirty_issues(&mut self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM dirty_issues", [])?)
    }

    /// Mark ids dirty outside a mutation closure (RPC surface).
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn mark_dirty(&mut self, ids: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for id in ids {
            self.conn.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, now],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Events / misc
    // ========================================================================

    /// Audit events for one issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_events(&self, issue_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE issue_id = ? ORDER BY id",
        )?;
        let events = stmt
            .query_map([issue_id], |row| {
                let created_at: String = row.get(7)?;
                let event_type: String = row.get(2)?;
                Ok(Event {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    event_type: serde_json::from_value(serde_json::Value::String(event_type))
                        .unwrap_or(EventType::Custom("unknown".to_string())),
                    actor: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    comment: row.get(6)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Allocate the next child number for a hierarchical id.
    ///
    /// # Errors
    ///
    /// Returns an error if the statements fail.
    pub fn next_child_number(&mut self, parent_id: &str) -> Result<u32> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO child_counters (parent_id, next_child_number) VALUES (?, 1)",
            [parent_id],
        )?;
        let number: u32 = tx.query_row(
            "SELECT next_child_number FROM child_counters WHERE parent_id = ?",
            [parent_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE child_counters SET next_child_number = next_child_number + 1 WHERE parent_id = ?",
            [parent_id],
        )?;
        tx.commit()?;
        Ok(number)
    }

    /// Hierarchy closure check: ids of issues whose hierarchical parent is
    /// missing from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_orphaned_children(&self) -> Result<Vec<String>> {
        let ids = self.all_ids()?;
        let id_set: HashSet<&String> = ids.iter().collect();
        let mut orphans = Vec::new();
        for id in &ids {
            if let Some(parent) = parent_of(id) {
                if !id_set.contains(&parent) {
                    orphans.push(id.clone());
                }
            }
        }
        Ok(orphans)
    }

    /// The primary prefix used by this store, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn issue_prefix(&self) -> Result<Option<String>> {
        self.get_config(CONFIG_ISSUE_PREFIX)
    }

    /// Ids whose prefix falls outside the allowed set (prefix safety check).
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn find_foreign_prefix_ids(&self) -> Result<Vec<String>> {
        let Some(expected) = self.issue_prefix()? else {
            return Ok(Vec::new());
        };
        let allowed = self.allowed_prefixes()?;
        Ok(self
            .all_ids()?
            .into_iter()
            .filter(|id| {
                prefix_of(id)
                    .is_none_or(|p| p != expected && !allowed.iter().any(|a| a == p))
            })
            .collect())
    }

    fn touch_updated_at(&mut self, issue_id: &str) -> Result<()> {
        if let Some(mut issue) = self.get_issue(issue_id)? {
            let now = Utc::now();
            issue.updated_at = if now > issue.updated_at {
                now
            } else {
                issue.updated_at + chrono::Duration::seconds(1)
            };
            issue.labels = self.get_labels(issue_id)?;
            issue.dependencies = self.get_dependency_records(issue_id)?;
            issue.comments = self.get_comments(issue_id)?;
            issue.content_hash = Some(content_hash(&issue));
            self.conn.execute(
                "UPDATE issues SET updated_at = ?, content_hash = ? WHERE id = ?",
                rusqlite::params![issue.updated_at.to_rfc3339(), issue.content_hash, issue_id],
            )?;
        }
        Ok(())
    }
}

fn qualified_issue_columns(alias: &str) -> String {
    ISSUE_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dependency_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let created_at: String = row.get(3)?;
    Ok(Dependency {
        issue_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dep_type: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(DependencyType::Blocks),
        created_at: parse_datetime(&created_at),
    })
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    let created_at: String = row.get(4)?;
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_datetime(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;

    fn store_with_issues(ids: &[&str]) -> SqliteStore {
        let mut store = SqliteStore::open_memory().unwrap();
        let issues: Vec<Issue> = ids
            .iter()
            .map(|id| Issue::new(*id, format!("Issue {id}")))
            .collect();
        store.create_issues(&issues, "test").unwrap();
        store
    }

    fn dep(from: &str, to: &str, dep_type: DependencyType) -> Dependency {
        Dependency {
            issue_id: from.to_string(),
            depends_on_id: to.to_string(),
            dep_type,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = store_with_issues(&["bd-1"]);
        let issue = store.get_issue("bd-1").unwrap().unwrap();
        assert_eq!(issue.title, "Issue bd-1");
        assert!(issue.content_hash.is_some());
    }

    #[test]
    fn create_batch_is_atomic() {
        let mut store = store_with_issues(&["bd-1"]);
        let batch = vec![Issue::new("bd-2", "B"), Issue::new("bd-1", "dup")];
        assert!(store.create_issues(&batch, "test").is_err());
        // First item must have rolled back with the failing one.
        assert!(store.get_issue("bd-2").unwrap().is_none());
    }

    #[test]
    fn create_marks_dirty() {
        let store = store_with_issues(&["bd-1", "bd-2"]);
        let dirty = store.list_dirty_ids().unwrap();
        assert_eq!(dirty, vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn clear_dirty_only_listed_ids() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        store
            .clear_dirty_issues_by_id(&["bd-1".to_string()])
            .unwrap();
        assert_eq!(store.list_dirty_ids().unwrap(), vec!["bd-2"]);
    }

    #[test]
    fn update_bumps_updated_at_and_rehashes() {
        let mut store = store_with_issues(&["bd-1"]);
        let before = store.get_issue("bd-1").unwrap().unwrap();
        let updates = IssueUpdate {
            title: Some("New title".to_string()),
            ..Default::default()
        };
        let after = store.update_issue("bd-1", &updates, "test").unwrap();
        assert_eq!(after.title, "New title");
        assert!(after.updated_at > before.updated_at);
        assert_ne!(after.content_hash, before.content_hash);
    }

    #[test]
    fn update_clears_optional_field() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut issue = Issue::new("bd-1", "A");
        issue.description = Some("text".to_string());
        store.create_issue(&issue, "test").unwrap();

        let updates = IssueUpdate {
            description: Some(None),
            ..Default::default()
        };
        let after = store.update_issue("bd-1", &updates, "test").unwrap();
        assert!(after.description.is_none());
    }

    #[test]
    fn update_validates_prefix() {
        let mut store = store_with_issues(&["bd-1"]);
        store.set_config(CONFIG_ISSUE_PREFIX, "bd").unwrap();
        let updates = IssueUpdate {
            title: Some("x".to_string()),
            ..Default::default()
        };
        let err = store.update_issue("foo-1", &updates, "test").unwrap_err();
        assert!(matches!(err, BeadsError::PrefixValidation { .. }));
    }

    #[test]
    fn close_sets_closed_at() {
        let mut store = store_with_issues(&["bd-1"]);
        let closed = store.close_issue("bd-1", "test").unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!(closed.closed_at.is_some());
    }

    #[test]
    fn tombstone_delete_keeps_row() {
        let mut store = store_with_issues(&["bd-1"]);
        store
            .delete_issue("bd-1", "alice", true, Some("obsolete"))
            .unwrap();
        let issue = store.get_issue("bd-1").unwrap().unwrap();
        assert_eq!(issue.status, Status::Tombstone);
        assert_eq!(issue.deleted_by.as_deref(), Some("alice"));
        assert!(store.is_tombstone("bd-1").unwrap());
    }

    #[test]
    fn hard_delete_removes_row_and_edges() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
            .unwrap();
        store.delete_issue("bd-2", "test", false, None).unwrap();
        assert!(store.get_issue("bd-2").unwrap().is_none());
        assert!(store.get_dependency_records("bd-1").unwrap().is_empty());
    }

    #[test]
    fn search_excludes_tombstones_by_default() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        store.delete_issue("bd-2", "test", true, None).unwrap();

        let visible = store.search_issues(&IssueFilter::default()).unwrap();
        assert_eq!(visible.len(), 1);

        let all = store.search_issues(&IssueFilter::everything()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn search_filters_compose() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut a = Issue::new("bd-1", "Fix parser");
        a.priority = Priority::HIGH;
        a.assignee = Some("alice".to_string());
        let mut b = Issue::new("bd-2", "Write docs");
        b.priority = Priority::BACKLOG;
        store.create_issues(&[a, b], "test").unwrap();
        store.add_label("bd-1", "urgent", "test").unwrap();

        let filter = IssueFilter {
            labels: vec!["urgent".to_string()],
            priority_max: Some(Priority::MEDIUM),
            title_contains: Some("parser".to_string()),
            ..Default::default()
        };
        let found = store.search_issues(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bd-1");

        let filter = IssueFilter {
            no_assignee: true,
            ..Default::default()
        };
        let found = store.search_issues(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bd-2");
    }

    #[test]
    fn search_by_parent_id() {
        let store = store_with_issues(&["bd-1", "bd-1.1", "bd-1.2", "bd-2"]);
        let filter = IssueFilter {
            parent_id: Some("bd-1".to_string()),
            ..Default::default()
        };
        let children = store.search_issues(&filter).unwrap();
        let ids: Vec<&str> = children.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1.1", "bd-1.2"]);
    }

    #[test]
    fn dependency_cycle_refused() {
        let mut store = store_with_issues(&["bd-1", "bd-2", "bd-3"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
            .unwrap();
        store
            .add_dependency(&dep("bd-2", "bd-3", DependencyType::Blocks), "test")
            .unwrap();
        let err = store
            .add_dependency(&dep("bd-3", "bd-1", DependencyType::Blocks), "test")
            .unwrap_err();
        assert!(matches!(err, BeadsError::DependencyCycle { .. }));
    }

    #[test]
    fn related_dependency_never_cycles() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Related), "test")
            .unwrap();
        assert!(
            store
                .add_dependency(&dep("bd-2", "bd-1", DependencyType::Related), "test")
                .unwrap()
        );
    }

    #[test]
    fn self_dependency_refused() {
        let mut store = store_with_issues(&["bd-1"]);
        let err = store
            .add_dependency(&dep("bd-1", "bd-1", DependencyType::Blocks), "test")
            .unwrap_err();
        assert!(matches!(err, BeadsError::SelfDependency { .. }));
    }

    #[test]
    fn dependency_uniqueness_by_type() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        assert!(
            store
                .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
                .unwrap()
        );
        assert!(
            !store
                .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
                .unwrap()
        );
        assert!(
            store
                .add_dependency(&dep("bd-1", "bd-2", DependencyType::Related), "test")
                .unwrap()
        );
        assert_eq!(store.get_dependency_records("bd-1").unwrap().len(), 2);
    }

    #[test]
    fn all_dependency_records_keyed_by_issue() {
        let mut store = store_with_issues(&["bd-1", "bd-2", "bd-3"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
            .unwrap();
        store
            .add_dependency(&dep("bd-1", "bd-3", DependencyType::Related), "test")
            .unwrap();
        let map = store.get_all_dependency_records().unwrap();
        assert_eq!(map.get("bd-1").map(Vec::len), Some(2));
        assert!(!map.contains_key("bd-2"));
    }

    #[test]
    fn ready_work_excludes_blocked() {
        let mut store = store_with_issues(&["bd-1", "bd-2", "bd-3"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
            .unwrap();

        let ready = store.get_ready_work(None).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-2", "bd-3"]);

        // Closing the blocker makes bd-1 ready again.
        store.close_issue("bd-2", "test").unwrap();
        let ready = store.get_ready_work(None).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1", "bd-3"]);
    }

    #[test]
    fn ready_work_ordered_by_priority_then_id() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut a = Issue::new("bd-b", "later");
        a.priority = Priority::MEDIUM;
        let mut b = Issue::new("bd-a", "first");
        b.priority = Priority::MEDIUM;
        let mut c = Issue::new("bd-c", "urgent");
        c.priority = Priority::CRITICAL;
        store.create_issues(&[a, b, c], "test").unwrap();

        let ready = store.get_ready_work(None).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-c", "bd-a", "bd-b"]);
    }

    #[test]
    fn blocked_issues_decorated_with_blockers() {
        let mut store = store_with_issues(&["bd-1", "bd-2", "bd-3"]);
        store
            .add_dependency(&dep("bd-1", "bd-2", DependencyType::Blocks), "test")
            .unwrap();
        store
            .add_dependency(&dep("bd-1", "bd-3", DependencyType::Blocks), "test")
            .unwrap();

        let blocked = store.get_blocked_issues().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0.id, "bd-1");
        assert_eq!(blocked[0].1, vec!["bd-2", "bd-3"]);
    }

    #[test]
    fn comments_preserve_import_timestamps() {
        let mut store = store_with_issues(&["bd-1"]);
        let imported_at = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let comment = Comment {
            id: 0,
            issue_id: "bd-1".to_string(),
            author: "bob".to_string(),
            body: "old comment".to_string(),
            created_at: imported_at,
        };
        assert!(store.import_issue_comment("bd-1", &comment).unwrap());
        // Same identity: not appended twice.
        assert!(!store.import_issue_comment("bd-1", &comment).unwrap());

        let comments = store.get_comments("bd-1").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].created_at, imported_at);
    }

    #[test]
    fn commits_validated_and_unioned() {
        let mut store = store_with_issues(&["bd-1"]);
        let sha = "a".repeat(40);
        store
            .add_commits("bd-1", &[sha.clone(), sha.clone()], "test")
            .unwrap();
        assert_eq!(store.get_commits("bd-1").unwrap(), vec![sha]);

        let err = store
            .add_commits("bd-1", &["nothex".to_string()], "test")
            .unwrap_err();
        assert!(matches!(err, BeadsError::Validation { .. }));
    }

    #[test]
    fn config_and_metadata_roundtrip() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.set_config("issue_prefix", "bd").unwrap();
        assert_eq!(store.get_config("issue_prefix").unwrap().unwrap(), "bd");

        store.set_metadata("jsonl_content_hash", "abc").unwrap();
        assert_eq!(
            store.get_metadata("jsonl_content_hash").unwrap().unwrap(),
            "abc"
        );
        assert!(store.get_metadata("missing").unwrap().is_none());
    }

    #[test]
    fn allowed_prefixes_parsed() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.set_config(CONFIG_ALLOWED_PREFIXES, "foo, bar ,").unwrap();
        assert_eq!(store.allowed_prefixes().unwrap(), vec!["foo", "bar"]);
    }

    #[test]
    fn run_in_transaction_unsupported_path() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.disable_transactions();
        let result = store.run_in_transaction("test", |_tx, _ctx| Ok(()));
        assert!(matches!(result, Err(BeadsError::TransactionUnsupported)));
    }

    #[test]
    fn run_in_transaction_rolls_back_on_error() {
        let mut store = SqliteStore::open_memory().unwrap();
        let issue = Issue::new("bd-1", "A");
        let result: Result<()> = store.run_in_transaction("test", |tx, _ctx| {
            let mut stored = issue.clone();
            stored.content_hash = Some(content_hash(&stored));
            SqliteStore::tx_insert_issue(tx, &stored)?;
            Err(BeadsError::Config("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(store.get_issue("bd-1").unwrap().is_none());
    }

    #[test]
    fn detect_cycles_reports_loop() {
        let mut store = store_with_issues(&["bd-1", "bd-2"]);
        // Bypass add_dependency's cycle refusal to simulate imported state.
        store
            .mutate("test", |tx, _ctx| {
                SqliteStore::tx_add_dependency(tx, &dep("bd-1", "bd-2", DependencyType::Blocks))?;
                SqliteStore::tx_add_dependency(tx, &dep("bd-2", "bd-1", DependencyType::Blocks))?;
                Ok(())
            })
            .unwrap();
        let cycles = store.detect_cycles().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }

    #[test]
    fn export_set_excludes_ephemeral() {
        let mut store = store_with_issues(&["bd-1"]);
        store
            .create_issue(&Issue::new("bd-wisp-x1", "scratch"), "test")
            .unwrap();
        let issues = store.get_all_issues_for_export().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "bd-1");
    }

    #[test]
    fn orphaned_children_detected() {
        let store = store_with_issues(&["bd-1", "bd-1.1", "bd-2.1"]);
        assert_eq!(store.find_orphaned_children().unwrap(), vec!["bd-2.1"]);
    }

    #[test]
    fn child_counters_increment() {
        let mut store = store_with_issues(&["bd-1"]);
        assert_eq!(store.next_child_number("bd-1").unwrap(), 1);
        assert_eq!(store.next_child_number("bd-1").unwrap(), 2);
    }
}
