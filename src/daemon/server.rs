//! Daemon process: owns the store and serves RPC over a unix socket.
//!
//! Connections are handled serially; the daemon is the single writer for
//! its store, enforced by the advisory lock. Mutating requests arm the
//! daemon-side auto-flush scheduler.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use crate::daemon::proto::{BlockedEntry, PROTOCOL_VERSION, Request, Response};
use crate::error::{BeadsError, Result};
use crate::flush::{FlushConfig, FlushManager, FlushOptions};
use crate::model::DependencyType;
use crate::storage::{SqliteStore, StoreLock};

/// Daemon server configuration and entry point.
#[derive(Debug)]
pub struct DaemonServer {
    pub socket_path: PathBuf,
    pub db_path: PathBuf,
    pub jsonl_path: PathBuf,
    pub actor: String,
}

impl DaemonServer {
    /// Bind the socket and serve until a `Shutdown` request arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if another daemon is already serving this socket,
    /// the store lock is held, or binding fails.
    pub fn run(self) -> Result<()> {
        // A healthy daemon on the socket wins; a stale socket file is removed.
        if self.socket_path.exists() {
            let probe = crate::daemon::DaemonClient::new(self.socket_path.clone());
            if probe.is_healthy() {
                return Err(BeadsError::Config(format!(
                    "daemon already running on {}",
                    self.socket_path.display()
                )));
            }
            std::fs::remove_file(&self.socket_path)?;
        }

        // The daemon is the exclusive writer for the store.
        let _lock = StoreLock::exclusive(&self.db_path)?;
        let mut store = SqliteStore::open(&self.db_path)?;

        let listener = UnixListener::bind(&self.socket_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.socket_path,
                std::fs::Permissions::from_mode(0o600),
            );
        }

        let flush = FlushManager::start(
            self.db_path.clone(),
            self.jsonl_path.clone(),
            FlushConfig::default(),
        );

        tracing::info!(socket = %self.socket_path.display(), "daemon listening");

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            match handle_connection(stream, &mut store, &flush, &self.actor) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => tracing::warn!(error = %err, "connection error"),
            }
        }

        drop(flush); // drains the pending flush
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Serve one connection. Returns `true` when a shutdown was requested.
fn handle_connection(
    stream: UnixStream,
    store: &mut SqliteStore,
    flush: &FlushManager,
    actor: &str,
) -> Result<bool> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &Response::Error {
                        message: format!("malformed request: {err}"),
                    },
                )?;
                continue;
            }
        };

        let shutdown = matches!(request, Request::Shutdown);
        let mutating = request.is_mutating();
        let response = dispatch(&request, store, flush, actor)
            .unwrap_or_else(|err| Response::Error {
                message: err.to_string(),
            });
        if mutating && !matches!(response, Response::Error { .. }) {
            flush.mark_dirty_and_schedule_flush();
        }
        write_response(&mut writer, &response)?;
        if shutdown {
            return Ok(true);
        }
    }
    Ok(false)
}

fn write_response(writer: &mut impl Write, response: &Response) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn dispatch(
    request: &Request,
    store: &mut SqliteStore,
    flush: &FlushManager,
    actor: &str,
) -> Result<Response> {
    match request {
        Request::Ping => Ok(Response::Pong {
            version: PROTOCOL_VERSION,
            pid: std::process::id(),
        }),
        Request::Get { id } => Ok(Response::Issue {
            issue: store.get_issue_with_relations(id)?,
        }),
        Request::Search { filter } => Ok(Response::Issues {
            issues: store.search_issues(filter)?,
        }),
        Request::Create { issues } => {
            store.create_issues(issues, actor)?;
            Ok(Response::Ok)
        }
        Request::Update { id, update } => {
            let issue = store.update_issue(id, update, actor)?;
            Ok(Response::Issue { issue: Some(issue) })
        }
        Request::Close { id } => {
            let issue = store.close_issue(id, actor)?;
            Ok(Response::Issue { issue: Some(issue) })
        }
        Request::Delete {
            id,
            tombstone,
            reason,
        } => {
            store.delete_issue(id, actor, *tombstone, reason.as_deref())?;
            Ok(Response::Ok)
        }
        Request::AddComment { id, author, text } => {
            let comment = store.add_issue_comment(id, author, text)?;
            Ok(Response::Comment { comment })
        }
        Request::AddLabel { id, label } => {
            store.add_label(id, label, actor)?;
            Ok(Response::Ok)
        }
        Request::RemoveLabel { id, label } => {
            store.remove_label(id, label, actor)?;
            Ok(Response::Ok)
        }
        Request::AddDependency { dependency } => {
            store.add_dependency(dependency, actor)?;
            Ok(Response::Ok)
        }
        Request::RemoveDependency {
            issue_id,
            depends_on_id,
            dep_type,
        } => {
            let dep_type: DependencyType =
                dep_type.parse().unwrap_or(DependencyType::Blocks);
            store.remove_dependency(issue_id, depends_on_id, &dep_type, actor)?;
            Ok(Response::Ok)
        }
        Request::Ready { limit } => Ok(Response::Issues {
            issues: store.get_ready_work(*limit)?,
        }),
        Request::Blocked => {
            let entries = store
                .get_blocked_issues()?
                .into_iter()
                .map(|(issue, blockers)| BlockedEntry { issue, blockers })
                .collect();
            Ok(Response::Blocked { entries })
        }
        Request::ListDirty => Ok(Response::Ids {
            ids: store.list_dirty_ids()?,
        }),
        Request::GetConfig { key } => Ok(Response::Value {
            value: store.get_config(key)?,
        }),
        Request::SetConfig { key, value } => {
            store.set_config(key, value)?;
            Ok(Response::Ok)
        }
        Request::Flush { force_full_export } => {
            let exported = flush.flush_now(FlushOptions {
                force_dirty: false,
                force_full_export: *force_full_export,
            })?;
            Ok(Response::Flushed { exported })
        }
        Request::Shutdown => Ok(Response::Ok),
    }
}
