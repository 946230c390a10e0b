//! Beads: a distributed issue-tracking substrate.
//!
//! Many clones of a repository share one work graph through a dual store:
//! a transactional SQLite database for queries and mutations, and a
//! version-controlled JSONL archive for exchange. Content hashes are the
//! oracle of truth; a 3-way merge engine reconciles concurrent changes; an
//! import engine admits external batches under strict invariants; and a
//! debounced auto-flush keeps the archive current without blocking
//! commands. A daemon can own the store, with safe mid-command fallback to
//! direct access.

pub mod cli;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod flush;
pub mod import;
pub mod logging;
pub mod merge;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;
pub mod validation;

pub use context::{CommandContext, open_context};
pub use error::{BeadsError, Result};
pub use model::{Comment, Dependency, DependencyType, Issue, IssueType, Priority, Status};
pub use storage::{IssueFilter, IssueUpdate, SqliteStore};
