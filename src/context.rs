//! Command context: the explicit state a CLI invocation carries.
//!
//! Holds the resolved workspace paths, the acting user, and the store
//! access handle. Access is either a daemon RPC client or an in-process
//! store (with advisory lock and flush scheduler); a command never mixes
//! the two. When an RPC fails with a "no-backend" error, the context
//! downgrades itself once via [`CommandContext::fallback_to_direct_mode`]
//! and the operation retries against the direct store, with the next flush
//! forced to a full snapshot to reconcile any in-flight state.

use std::path::Path;

use crate::config::WorkspacePaths;
use crate::daemon::proto::{BlockedEntry, Request, Response};
use crate::daemon::{AccessMode, DaemonClient, select_mode, socket_path, verify_repo_fingerprint};
use crate::error::{BeadsError, Result};
use crate::flush::{FlushConfig, FlushManager, FlushOptions, FlushStats};
use crate::import::ImportOptions;
use crate::model::{Comment, Dependency, DependencyType, Issue};
use crate::storage::{IssueFilter, IssueUpdate, SqliteStore, StoreLock};
use crate::sync::{ExportOptions, export_to_jsonl, import_from_jsonl, needs_auto_import};

/// Direct-mode state: the open store, its advisory lock, and the flush
/// scheduler that debounces exports.
pub struct DirectStore {
    pub store: SqliteStore,
    _lock: StoreLock,
    pub flush: FlushManager,
}

enum Access {
    Daemon(DaemonClient),
    Direct(Box<DirectStore>),
}

/// Per-invocation context, passed by reference to every command.
pub struct CommandContext {
    pub paths: WorkspacePaths,
    pub actor: String,
    pub json: bool,
    access: Access,
}

impl CommandContext {
    /// Open a context, selecting daemon or direct access.
    ///
    /// Direct opens verify the repository fingerprint and run the staleness
    /// oracle: a JSONL differing from the last synced state is imported
    /// before the command proceeds (unless `no_auto_import`).
    ///
    /// # Errors
    ///
    /// Returns `RepoFingerprint` for a store belonging to another
    /// repository, `DatabaseLocked` when another writer holds the store,
    /// or any error from the initial import.
    pub fn open(
        paths: WorkspacePaths,
        actor: String,
        json: bool,
        no_daemon: bool,
        no_auto_import: bool,
    ) -> Result<Self> {
        let socket = socket_path(&paths.beads_dir);
        let access = match select_mode(&socket, no_daemon) {
            AccessMode::Daemon => Access::Daemon(DaemonClient::new(socket)),
            AccessMode::Direct => {
                Access::Direct(Box::new(open_direct(&paths, &actor, no_auto_import)?))
            }
        };
        Ok(Self {
            paths,
            actor,
            json,
            access,
        })
    }

    /// The current access mode.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        match self.access {
            Access::Daemon(_) => AccessMode::Daemon,
            Access::Direct(_) => AccessMode::Direct,
        }
    }

    /// Swap the daemon client for a direct store, mid-command.
    ///
    /// The next flush is forced to a full export so any state the daemon
    /// had in flight is reconciled into the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the direct store cannot be opened.
    pub fn fallback_to_direct_mode(&mut self, reason: &str) -> Result<()> {
        tracing::warn!(reason, "daemon unavailable; falling back to direct mode");
        let direct = open_direct(&self.paths, &self.actor, false)?;
        direct.flush.schedule(FlushOptions {
            force_dirty: true,
            force_full_export: true,
        });
        self.access = Access::Direct(Box::new(direct));
        Ok(())
    }

    /// Access the direct store, downgrading from daemon mode first if
    /// needed. For operations with no RPC surface (sync, merge, daemon
    /// control).
    ///
    /// # Errors
    ///
    /// Returns an error if the direct store cannot be opened.
    pub fn direct(&mut self) -> Result<&mut DirectStore> {
        if matches!(self.access, Access::Daemon(_)) {
            self.fallback_to_direct_mode("command requires direct store access")?;
        }
        match &mut self.access {
            Access::Direct(direct) => Ok(direct),
            Access::Daemon(_) => unreachable!("fallback just ran"),
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        let Access::Daemon(client) = &self.access else {
            return Err(BeadsError::rpc("not in daemon mode"));
        };
        match client.call(request) {
            Ok(response) => Ok(response),
            Err(err) if err.is_no_backend() => {
                self.fallback_to_direct_mode(&err.to_string())?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Store operations, routed by mode
    // ========================================================================

    /// Get an issue with relations.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn get_issue(&mut self, id: &str) -> Result<Option<Issue>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.get_issue_with_relations(id);
        }
        match self.call(&Request::Get { id: id.to_string() }) {
            Ok(Response::Issue { issue }) => Ok(issue),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.get_issue(id),
            Err(err) => Err(err),
        }
    }

    /// Search issues by filter.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn search_issues(&mut self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.search_issues(filter);
        }
        match self.call(&Request::Search {
            filter: filter.clone(),
        }) {
            Ok(Response::Issues { issues }) => Ok(issues),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.search_issues(filter),
            Err(err) => Err(err),
        }
    }

    /// Create issues and arm the flush scheduler.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn create_issues(&mut self, issues: &[Issue]) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            direct.store.create_issues(issues, &self.actor)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(());
        }
        match self.call(&Request::Create {
            issues: issues.to_vec(),
        }) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => self.create_issues(issues),
            Err(err) => Err(err),
        }
    }

    /// Update an issue and arm the flush scheduler.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn update_issue(&mut self, id: &str, update: &IssueUpdate) -> Result<Issue> {
        if let Access::Direct(direct) = &mut self.access {
            let issue = direct.store.update_issue(id, update, &self.actor)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(issue);
        }
        match self.call(&Request::Update {
            id: id.to_string(),
            update: update.clone(),
        }) {
            Ok(Response::Issue { issue: Some(issue) }) => Ok(issue),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.update_issue(id, update),
            Err(err) => Err(err),
        }
    }

    /// Close an issue.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn close_issue(&mut self, id: &str) -> Result<Issue> {
        if let Access::Direct(direct) = &mut self.access {
            let issue = direct.store.close_issue(id, &self.actor)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(issue);
        }
        match self.call(&Request::Close { id: id.to_string() }) {
            Ok(Response::Issue { issue: Some(issue) }) => Ok(issue),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.close_issue(id),
            Err(err) => Err(err),
        }
    }

    /// Delete an issue (tombstone or hard).
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn delete_issue(&mut self, id: &str, tombstone: bool, reason: Option<&str>) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            direct
                .store
                .delete_issue(id, &self.actor, tombstone, reason)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(());
        }
        match self.call(&Request::Delete {
            id: id.to_string(),
            tombstone,
            reason: reason.map(ToString::to_string),
        }) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => self.delete_issue(id, tombstone, reason),
            Err(err) => Err(err),
        }
    }

    /// Add a comment authored by the context actor.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn add_comment(&mut self, id: &str, text: &str) -> Result<Comment> {
        if let Access::Direct(direct) = &mut self.access {
            let comment = direct.store.add_issue_comment(id, &self.actor, text)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(comment);
        }
        match self.call(&Request::AddComment {
            id: id.to_string(),
            author: self.actor.clone(),
            text: text.to_string(),
        }) {
            Ok(Response::Comment { comment }) => Ok(comment),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.add_comment(id, text),
            Err(err) => Err(err),
        }
    }

    /// Add or remove a label.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn set_label(&mut self, id: &str, label: &str, add: bool) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            if add {
                direct.store.add_label(id, label, &self.actor)?;
            } else {
                direct.store.remove_label(id, label, &self.actor)?;
            }
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(());
        }
        let request = if add {
            Request::AddLabel {
                id: id.to_string(),
                label: label.to_string(),
            }
        } else {
            Request::RemoveLabel {
                id: id.to_string(),
                label: label.to_string(),
            }
        };
        match self.call(&request) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => self.set_label(id, label, add),
            Err(err) => Err(err),
        }
    }

    /// Add a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors (including cycle refusal).
    pub fn add_dependency(&mut self, dependency: &Dependency) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            direct.store.add_dependency(dependency, &self.actor)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(());
        }
        match self.call(&Request::AddDependency {
            dependency: dependency.clone(),
        }) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => self.add_dependency(dependency),
            Err(err) => Err(err),
        }
    }

    /// Remove a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
    ) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            direct
                .store
                .remove_dependency(issue_id, depends_on_id, dep_type, &self.actor)?;
            direct.flush.mark_dirty_and_schedule_flush();
            return Ok(());
        }
        match self.call(&Request::RemoveDependency {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            dep_type: dep_type.as_str().to_string(),
        }) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => {
                self.remove_dependency(issue_id, depends_on_id, dep_type)
            }
            Err(err) => Err(err),
        }
    }

    /// Ready work: open issues with no unresolved blockers.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn ready_work(&mut self, limit: Option<usize>) -> Result<Vec<Issue>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.get_ready_work(limit);
        }
        match self.call(&Request::Ready { limit }) {
            Ok(Response::Issues { issues }) => Ok(issues),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.ready_work(limit),
            Err(err) => Err(err),
        }
    }

    /// Blocked issues with their blockers.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn blocked_issues(&mut self) -> Result<Vec<(Issue, Vec<String>)>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.get_blocked_issues();
        }
        match self.call(&Request::Blocked) {
            Ok(Response::Blocked { entries }) => Ok(entries
                .into_iter()
                .map(|BlockedEntry { issue, blockers }| (issue, blockers))
                .collect()),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.blocked_issues(),
            Err(err) => Err(err),
        }
    }

    /// Get a config value.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn get_config(&mut self, key: &str) -> Result<Option<String>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.get_config(key);
        }
        match self.call(&Request::GetConfig {
            key: key.to_string(),
        }) {
            Ok(Response::Value { value }) => Ok(value),
            Ok(other) => Err(unexpected(&other)),
            Err(err) if err.is_no_backend() => self.get_config(key),
            Err(err) => Err(err),
        }
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.set_config(key, value);
        }
        match self.call(&Request::SetConfig {
            key: key.to_string(),
            value: value.to_string(),
        }) {
            Ok(_) => Ok(()),
            Err(err) if err.is_no_backend() => self.set_config(key, value),
            Err(err) => Err(err),
        }
    }

    /// Export the store to the workspace JSONL.
    ///
    /// In daemon mode this asks the daemon to flush; directly it runs the
    /// sync bridge.
    ///
    /// # Errors
    ///
    /// Returns export errors, including safety-guard refusals.
    pub fn export(&mut self, force: bool) -> Result<usize> {
        if let Access::Daemon(client) = &self.access {
            match client.call(&Request::Flush {
                force_full_export: force,
            }) {
                Ok(Response::Flushed { exported }) => return Ok(exported),
                Ok(other) => return Err(unexpected(&other)),
                Err(err) if err.is_no_backend() => {
                    self.fallback_to_direct_mode(&err.to_string())?;
                }
                Err(err) => return Err(err),
            }
        }
        let jsonl = self.paths.jsonl_path.clone();
        let db = self.paths.db_path.clone();
        let direct = self.direct()?;
        let outcome = export_to_jsonl(
            &mut direct.store,
            &jsonl,
            Some(&db),
            &ExportOptions { force },
        )?;
        Ok(outcome.exported_count)
    }

    /// Import the workspace JSONL through the import engine (direct only).
    ///
    /// # Errors
    ///
    /// Returns import errors.
    pub fn import(&mut self, options: &ImportOptions) -> Result<crate::import::ImportResult> {
        let jsonl = self.paths.jsonl_path.clone();
        let actor = self.actor.clone();
        let direct = self.direct()?;
        let (result, warnings) = import_from_jsonl(&mut direct.store, &jsonl, options, &actor)?;
        for warning in warnings {
            eprintln!("Warning: {warning}");
        }
        Ok(result)
    }

    /// Audit events for one issue. The event log is local, so daemon mode
    /// returns none.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn get_events(&mut self, id: &str) -> Result<Vec<crate::model::Event>> {
        match &mut self.access {
            Access::Direct(direct) => direct.store.get_events(id),
            Access::Daemon(_) => Ok(Vec::new()),
        }
    }

    /// All known issue ids (for partial-id resolution).
    ///
    /// # Errors
    ///
    /// Returns store or RPC errors.
    pub fn all_ids(&mut self) -> Result<Vec<String>> {
        if let Access::Direct(direct) = &mut self.access {
            return direct.store.all_ids();
        }
        let issues = self.search_issues(&IssueFilter::everything())?;
        Ok(issues.into_iter().map(|i| i.id).collect())
    }

    /// Flush scheduler stats (direct mode only; empty in daemon mode).
    #[must_use]
    pub fn flush_stats(&self) -> FlushStats {
        match &self.access {
            Access::Direct(direct) => direct.flush.stats(),
            Access::Daemon(_) => FlushStats::default(),
        }
    }

    /// Drain pending flushes before process exit.
    pub fn shutdown(&mut self) {
        if let Access::Direct(direct) = &mut self.access {
            direct.flush.shutdown();
        }
    }
}

fn unexpected(response: &Response) -> BeadsError {
    BeadsError::rpc(format!("unexpected daemon response: {response:?}"))
}

/// Open the store directly: advisory lock, fingerprint check, dirty
/// tracking re-activated via a fresh flush manager, and the staleness
/// oracle consulted for an initial import.
fn open_direct(paths: &WorkspacePaths, actor: &str, no_auto_import: bool) -> Result<DirectStore> {
    let lock = StoreLock::exclusive(&paths.db_path)?;
    let mut store = SqliteStore::open(&paths.db_path)?;
    verify_repo_fingerprint(&mut store, &paths.repo_root)?;

    if !no_auto_import && needs_auto_import(&store, &paths.jsonl_path)? {
        tracing::info!(jsonl = %paths.jsonl_path.display(), "archive changed; auto-importing");
        let (result, _warnings) = import_from_jsonl(
            &mut store,
            &paths.jsonl_path,
            &ImportOptions::default(),
            actor,
        )?;
        tracing::debug!(
            created = result.created,
            updated = result.updated,
            "auto-import complete"
        );
    }

    let flush = FlushManager::start(
        paths.db_path.clone(),
        paths.jsonl_path.clone(),
        FlushConfig::default(),
    );

    Ok(DirectStore {
        store,
        _lock: lock,
        flush,
    })
}

/// Open a direct context rooted at `start`, discovering the workspace.
///
/// # Errors
///
/// Returns `NotInitialized` when no workspace exists.
pub fn open_context(
    start: Option<&Path>,
    actor_override: Option<&str>,
    json: bool,
    no_daemon: bool,
    no_auto_import: bool,
) -> Result<CommandContext> {
    let beads_dir = crate::config::discover_beads_dir(start)?;
    let paths = WorkspacePaths::resolve(beads_dir);
    let actor = crate::config::resolve_actor(actor_override);
    CommandContext::open(paths, actor, json, no_daemon, no_auto_import)
}
