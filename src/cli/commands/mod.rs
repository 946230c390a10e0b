//! Command implementations.

pub mod config_cmd;
pub mod create;
pub mod daemon_cmd;
pub mod dep;
pub mod info;
pub mod init;
pub mod label;
pub mod list;
pub mod merge_cmd;
pub mod sync_cmd;
pub mod update;

use crate::context::CommandContext;
use crate::error::Result;
use crate::model::Issue;
use crate::util::{find_matching_ids, resolve_id};

/// Print a JSON value on stdout.
pub(crate) fn emit_json(value: &serde_json::Value) {
    println!("{value}");
}

/// Resolve a possibly-partial issue id against the store.
pub(crate) fn resolve_issue_id(ctx: &mut CommandContext, input: &str) -> Result<String> {
    let prefix = ctx
        .get_config(crate::storage::CONFIG_ISSUE_PREFIX)?
        .unwrap_or_else(|| "bd".to_string());
    let ids = ctx.all_ids()?;
    resolve_id(
        input,
        &prefix,
        |candidate| ids.iter().any(|id| id == candidate),
        |pattern| find_matching_ids(&ids, pattern),
    )
}

/// One-line textual rendering of an issue.
pub(crate) fn issue_row(issue: &Issue) -> String {
    let assignee = issue.assignee.as_deref().unwrap_or("-");
    format!(
        "{:<16} {} {:<11} {:<8} {:<10} {}",
        issue.id, issue.priority, issue.status, issue.issue_type, assignee, issue.title
    )
}

/// Render a list of issues as JSON or rows.
pub(crate) fn print_issues(json: bool, issues: &[Issue]) -> Result<()> {
    if json {
        emit_json(&serde_json::to_value(issues)?);
    } else {
        for issue in issues {
            println!("{}", issue_row(issue));
        }
    }
    Ok(())
}
