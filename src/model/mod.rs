//! Core data types for beads.
//!
//! This module defines the entities shared by the store, the merge engine,
//! and the JSONL archive:
//! - `Issue` - the unit of work
//! - `Status` - lifecycle states, including `tombstone`
//! - `IssueType` - built-in categories plus custom types
//! - `Dependency` - directed edges between issues
//! - `Comment` - ordered issue comments
//! - `Event` - local audit log entries (never exported)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Issue lifecycle status.
///
/// `tombstone` is a deletion marker that propagates through JSONL so other
/// clones do not resurrect the issue. `hooked` marks an issue attached to an
/// agent or persistent context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
    Deferred,
    Hooked,
    Tombstone,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Deferred => "deferred",
            Self::Hooked => "hooked",
            Self::Tombstone => "tombstone",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }

    /// Active statuses participate in ready-work selection.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::InProgress | Self::Hooked)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            "deferred" => Ok(Self::Deferred),
            "hooked" => Ok(Self::Hooked),
            "tombstone" => Ok(Self::Tombstone),
            other => Err(crate::error::BeadsError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// Issue priority (0=highest, 4=lowest).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);

    /// Clamp an arbitrary integer into the valid 0..=4 range.
    #[must_use]
    pub const fn clamped(value: i32) -> Self {
        if value < 0 {
            Self(0)
        } else if value > 4 {
            Self(4)
        } else {
            Self(value)
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let val = s.strip_prefix('P').unwrap_or(&s);

        match val.parse::<i32>() {
            Ok(p) if (0..=4).contains(&p) => Ok(Self(p)),
            _ => Err(crate::error::BeadsError::InvalidPriority {
                priority: val.parse().unwrap_or(-1),
            }),
        }
    }
}

/// Issue type category.
///
/// The built-in set covers the agent workflow vocabulary; any other token
/// parses as `Custom` so repositories can extend the set through config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
    Advice,
    Runbook,
    MergeRequest,
    Gate,
    Molecule,
    #[serde(untagged)]
    Custom(String),
}

impl IssueType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
            Self::Advice => "advice",
            Self::Runbook => "runbook",
            Self::MergeRequest => "merge_request",
            Self::Gate => "gate",
            Self::Molecule => "molecule",
            Self::Custom(value) => value,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "task" => Self::Task,
            "bug" => Self::Bug,
            "feature" => Self::Feature,
            "epic" => Self::Epic,
            "chore" => Self::Chore,
            "advice" => Self::Advice,
            "runbook" => Self::Runbook,
            "merge_request" | "merge-request" => Self::MergeRequest,
            "gate" => Self::Gate,
            "molecule" => Self::Molecule,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Dependency relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    ParentChild,
    Related,
    #[serde(untagged)]
    Custom(String),
}

impl DependencyType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent-child",
            Self::Related => "related",
            Self::Custom(value) => value,
        }
    }

    /// Blocking edges gate ready-work selection and cycle detection.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "blocks" => Self::Blocks,
            "parent-child" | "parent_child" => Self::ParentChild,
            "related" => Self::Related,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Audit event type for the local event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Commented,
    Closed,
    Reopened,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Deleted,
    Restored,
    Custom(String),
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
            Self::Custom(value) => value,
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        let event_type = match value.as_str() {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "status_changed" => Self::StatusChanged,
            "commented" => Self::Commented,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "deleted" => Self::Deleted,
            "restored" => Self::Restored,
            _ => Self::Custom(value),
        };
        Ok(event_type)
    }
}

/// The primary issue entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Issue {
    /// Unique ID, shape `<prefix>-<suffix>` (e.g., "bd-abc12" or "bd-abc12.1.3").
    pub id: String,

    /// Content hash over canonical fields. Recomputed on load; never serialized.
    #[serde(skip)]
    pub content_hash: Option<String>,

    /// Title.
    pub title: String,

    /// Detailed description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Technical design notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,

    /// Acceptance criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,

    /// Additional notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Workflow status.
    #[serde(default)]
    pub status: Status,

    /// Priority (0=highest, 4=lowest).
    #[serde(default)]
    pub priority: Priority,

    /// Issue type.
    #[serde(default)]
    pub issue_type: IssueType,

    /// Assigned user or agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// External reference (URL or tracker key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Source system identifier (e.g., "gitlab:group/proj:42").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,

    /// Linked specification ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,

    /// Pinned to the front of agent context.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    /// Wisp: lives only in the store, never reaches JSONL.
    /// Derived from the id containing "-wisp-".
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp. Monotonic per issue.
    pub updated_at: DateTime<Utc>,

    /// Closure timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    // Tombstone fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_reason: Option<String>,

    // Collections (populated for export/merge; stored relationally)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    /// Associated commit SHAs (40-hex).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<String>,
}

impl Issue {
    /// Create a minimal issue with the given id and title, timestamps set to now.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        let id = id.into();
        let ephemeral = is_ephemeral_id(&id);
        Self {
            id,
            title: title.into(),
            created_at: now,
            updated_at: now,
            ephemeral,
            ..Default::default()
        }
    }

    /// Hierarchical parent id, obtained by stripping the last `.<digits>` segment.
    ///
    /// Returns `None` for root ids.
    #[must_use]
    pub fn parent_id(&self) -> Option<String> {
        crate::util::id::parent_of(&self.id)
    }

    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        matches!(self.status, Status::Tombstone)
    }
}

/// Wisp detection: ids containing "-wisp-" mark ephemeral issues.
#[must_use]
pub fn is_ephemeral_id(id: &str) -> bool {
    id.contains("-wisp-")
}

/// Relationship between two issues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// The issue that has the dependency (source).
    pub issue_id: String,

    /// The issue being depended on (target).
    pub depends_on_id: String,

    /// Type of dependency.
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    /// Identity key used for set union during merge and import:
    /// `(depends_on_id, type)` within one issue's dependency list.
    #[must_use]
    pub fn identity(&self) -> (String, String) {
        (
            self.depends_on_id.clone(),
            self.dep_type.as_str().to_string(),
        )
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    /// Row id; 0 for comments not yet persisted.
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub issue_id: String,
    pub author: String,
    #[serde(rename = "text")]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Identity key for append-if-missing semantics during import.
    #[must_use]
    pub fn identity(&self) -> (String, String) {
        (self.author.clone(), self.body.trim().to_string())
    }
}

/// An entry in the local audit log. Never exported to JSONL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub issue_id: String,
    pub event_type: EventType,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
