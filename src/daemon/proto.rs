//! Wire protocol for the daemon: newline-delimited JSON over a unix socket.
//!
//! One request per line, one response per line. The protocol mirrors the
//! store surface a command needs, so a CLI invocation routes every
//! read/write through RPC or none at all.

use serde::{Deserialize, Serialize};

use crate::model::{Comment, Dependency, Issue};
use crate::storage::{IssueFilter, IssueUpdate};

/// Protocol version; bumped on incompatible changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Requests a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Health check.
    Ping,
    Get {
        id: String,
    },
    Search {
        filter: IssueFilter,
    },
    Create {
        issues: Vec<Issue>,
    },
    Update {
        id: String,
        update: IssueUpdate,
    },
    Close {
        id: String,
    },
    Delete {
        id: String,
        tombstone: bool,
        reason: Option<String>,
    },
    AddComment {
        id: String,
        author: String,
        text: String,
    },
    AddLabel {
        id: String,
        label: String,
    },
    RemoveLabel {
        id: String,
        label: String,
    },
    AddDependency {
        dependency: Dependency,
    },
    RemoveDependency {
        issue_id: String,
        depends_on_id: String,
        dep_type: String,
    },
    Ready {
        limit: Option<usize>,
    },
    Blocked,
    ListDirty,
    GetConfig {
        key: String,
    },
    SetConfig {
        key: String,
        value: String,
    },
    /// Flush dirty issues to JSONL now.
    Flush {
        force_full_export: bool,
    },
    /// Stop the daemon after replying.
    Shutdown,
}

impl Request {
    /// Mutating requests mark dirty state and arm the daemon's auto-flush.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Create { .. }
                | Self::Update { .. }
                | Self::Close { .. }
                | Self::Delete { .. }
                | Self::AddComment { .. }
                | Self::AddLabel { .. }
                | Self::RemoveLabel { .. }
                | Self::AddDependency { .. }
                | Self::RemoveDependency { .. }
        )
    }
}

/// A blocked issue with its unresolved blocker ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedEntry {
    pub issue: Issue,
    pub blockers: Vec<String>,
}

/// Responses the daemon sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Pong {
        version: u32,
        pid: u32,
    },
    Issue {
        issue: Option<Issue>,
    },
    Issues {
        issues: Vec<Issue>,
    },
    Blocked {
        entries: Vec<BlockedEntry>,
    },
    Comment {
        comment: Comment,
    },
    Ids {
        ids: Vec<String>,
    },
    Value {
        value: Option<String>,
    },
    Flushed {
        exported: usize,
    },
    Error {
        message: String,
    },
}

impl Response {
    /// Convert an error response into `RpcError`; pass others through.
    ///
    /// # Errors
    ///
    /// Returns `Rpc` when the response is `Error`.
    pub fn into_result(self) -> crate::error::Result<Self> {
        match self {
            Self::Error { message } => Err(crate::error::BeadsError::rpc(message)),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    #[test]
    fn request_roundtrip() {
        let request = Request::Update {
            id: "bd-1".to_string(),
            update: IssueUpdate {
                title: Some("New".to_string()),
                assignee: Some(None),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"op\":\"update\""));
        // Clearable field: explicit null clears, absent leaves alone.
        assert!(json.contains("\"assignee\":null"));
        assert!(!json.contains("notes"));

        let back: Request = serde_json::from_str(&json).unwrap();
        match back {
            Request::Update { update, .. } => {
                assert_eq!(update.title.as_deref(), Some("New"));
                assert_eq!(update.assignee, Some(None));
                assert_eq!(update.notes, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn response_roundtrip() {
        let mut issue = Issue::new("bd-1", "A");
        issue.status = Status::InProgress;
        let response = Response::Issue { issue: Some(issue) };
        let json = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match back {
            Response::Issue { issue: Some(issue) } => {
                assert_eq!(issue.id, "bd-1");
                assert_eq!(issue.status, Status::InProgress);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_response_becomes_rpc_error() {
        let response = Response::Error {
            message: "boom".to_string(),
        };
        let err = response.into_result().unwrap_err();
        assert!(!err.is_no_backend());
    }

    #[test]
    fn mutating_classification() {
        assert!(Request::Close { id: "bd-1".to_string() }.is_mutating());
        assert!(!Request::Ping.is_mutating());
        assert!(!Request::Ready { limit: None }.is_mutating());
    }
}
