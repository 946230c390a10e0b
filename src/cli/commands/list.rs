//! `bd list`, `bd show`, `bd ready`, `bd blocked`.

use clap::Args;
use serde_json::json;

use crate::cli::commands::{emit_json, issue_row, print_issues, resolve_issue_id};
use crate::context::CommandContext;
use crate::error::Result;
use crate::model::{IssueType, Priority, Status};
use crate::storage::IssueFilter;

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct ListArgs {
    #[arg(short, long)]
    pub status: Option<String>,

    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    #[arg(short, long)]
    pub assignee: Option<String>,

    /// Require all of these labels (repeatable).
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    /// Require any of these labels (repeatable).
    #[arg(long = "label-any")]
    pub labels_any: Vec<String>,

    #[arg(short, long)]
    pub priority: Option<String>,

    /// Direct children of this issue.
    #[arg(long)]
    pub parent: Option<String>,

    #[arg(long)]
    pub title_contains: Option<String>,

    #[arg(long)]
    pub unassigned: bool,

    #[arg(long)]
    pub no_labels: bool,

    #[arg(long)]
    pub empty_description: bool,

    #[arg(long)]
    pub include_tombstones: bool,

    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn execute(ctx: &mut CommandContext, args: &ListArgs) -> Result<()> {
    let parent_id = args
        .parent
        .as_deref()
        .map(|p| resolve_issue_id(ctx, p))
        .transpose()?;

    let filter = IssueFilter {
        status: args.status.as_deref().map(str::parse::<Status>).transpose()?,
        issue_type: args
            .issue_type
            .as_deref()
            .map(|t| t.parse::<IssueType>().unwrap_or_default()),
        assignee: args.assignee.clone(),
        labels: args.labels.clone(),
        labels_any: args.labels_any.clone(),
        priority: args
            .priority
            .as_deref()
            .map(str::parse::<Priority>)
            .transpose()?,
        parent_id,
        title_contains: args.title_contains.clone(),
        no_assignee: args.unassigned,
        no_labels: args.no_labels,
        empty_description: args.empty_description,
        include_tombstones: args.include_tombstones,
        limit: args.limit,
        ..Default::default()
    };

    let issues = ctx.search_issues(&filter)?;
    print_issues(ctx.json, &issues)
}

pub fn show(ctx: &mut CommandContext, input: &str) -> Result<()> {
    let id = resolve_issue_id(ctx, input)?;
    let Some(issue) = ctx.get_issue(&id)? else {
        return Err(crate::error::BeadsError::IssueNotFound { id });
    };
    let events = ctx.get_events(&id)?;

    if ctx.json {
        emit_json(&json!({ "issue": issue, "events": events }));
        return Ok(());
    }

    println!("{}  {}", issue.id, issue.title);
    println!(
        "  {} | {} | {} | created {} | updated {}",
        issue.status,
        issue.priority,
        issue.issue_type,
        issue.created_at.format("%Y-%m-%d"),
        issue.updated_at.format("%Y-%m-%d %H:%M"),
    );
    if let Some(assignee) = &issue.assignee {
        println!("  assignee: {assignee}");
    }
    if !issue.labels.is_empty() {
        println!("  labels: {}", issue.labels.join(", "));
    }
    if let Some(external_ref) = &issue.external_ref {
        println!("  external: {external_ref}");
    }
    if let Some(description) = &issue.description {
        println!("\n{description}");
    }
    if !issue.dependencies.is_empty() {
        println!("\nDependencies:");
        for dep in &issue.dependencies {
            println!("  {} -> {} ({})", dep.issue_id, dep.depends_on_id, dep.dep_type);
        }
    }
    if !issue.comments.is_empty() {
        println!("\nComments:");
        for comment in &issue.comments {
            println!(
                "  [{}] {}: {}",
                comment.created_at.format("%Y-%m-%d %H:%M"),
                comment.author,
                comment.body
            );
        }
    }
    if !events.is_empty() {
        println!("\nHistory:");
        for event in &events {
            println!(
                "  [{}] {} by {}",
                event.created_at.format("%Y-%m-%d %H:%M"),
                event.event_type.as_str(),
                event.actor
            );
        }
    }
    Ok(())
}

pub fn ready(ctx: &mut CommandContext, limit: Option<usize>) -> Result<()> {
    let issues = ctx.ready_work(limit)?;
    print_issues(ctx.json, &issues)
}

pub fn blocked(ctx: &mut CommandContext) -> Result<()> {
    let entries = ctx.blocked_issues()?;
    if ctx.json {
        let value: Vec<serde_json::Value> = entries
            .iter()
            .map(|(issue, blockers)| json!({ "issue": issue, "blocked_by": blockers }))
            .collect();
        emit_json(&serde_json::Value::Array(value));
    } else {
        for (issue, blockers) in entries {
            println!("{}", issue_row(&issue));
            println!("    blocked by: {}", blockers.join(", "));
        }
    }
    Ok(())
}
