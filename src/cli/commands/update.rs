//! `bd update`, `bd close`, `bd delete`, `bd comment`.

use clap::Args;
use serde_json::json;

use crate::cli::commands::{emit_json, resolve_issue_id};
use crate::context::CommandContext;
use crate::error::Result;
use crate::model::{IssueType, Priority, Status};
use crate::storage::IssueUpdate;

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Issue id (partial ids accepted).
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    /// New description; an empty string clears the field.
    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(long)]
    pub design: Option<String>,

    #[arg(long)]
    pub acceptance_criteria: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    /// New status (open, in_progress, blocked, closed, deferred, hooked).
    #[arg(short, long)]
    pub status: Option<String>,

    #[arg(short, long)]
    pub priority: Option<String>,

    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    /// New assignee; an empty string clears the field.
    #[arg(short, long)]
    pub assignee: Option<String>,

    #[arg(long)]
    pub external_ref: Option<String>,

    #[arg(long)]
    pub spec_id: Option<String>,

    #[arg(long, conflicts_with = "unpin")]
    pub pin: bool,

    #[arg(long)]
    pub unpin: bool,
}

/// Empty string means clear; anything else sets.
fn clearable(value: Option<&String>) -> Option<Option<String>> {
    value.map(|v| if v.is_empty() { None } else { Some(v.clone()) })
}

pub fn execute(ctx: &mut CommandContext, args: &UpdateArgs) -> Result<()> {
    let id = resolve_issue_id(ctx, &args.id)?;

    let update = IssueUpdate {
        title: args.title.clone(),
        description: clearable(args.description.as_ref()),
        design: clearable(args.design.as_ref()),
        acceptance_criteria: clearable(args.acceptance_criteria.as_ref()),
        notes: clearable(args.notes.as_ref()),
        status: args.status.as_deref().map(str::parse::<Status>).transpose()?,
        priority: args
            .priority
            .as_deref()
            .map(str::parse::<Priority>)
            .transpose()?,
        issue_type: args
            .issue_type
            .as_deref()
            .map(|t| t.parse::<IssueType>().unwrap_or_default()),
        assignee: clearable(args.assignee.as_ref()),
        external_ref: clearable(args.external_ref.as_ref()),
        spec_id: clearable(args.spec_id.as_ref()),
        pinned: if args.pin {
            Some(true)
        } else if args.unpin {
            Some(false)
        } else {
            None
        },
        ..Default::default()
    };

    if update.is_empty() {
        return Err(crate::error::BeadsError::InvalidInput(
            "no fields to update".to_string(),
        ));
    }

    let issue = ctx.update_issue(&id, &update)?;
    if ctx.json {
        emit_json(&serde_json::to_value(&issue)?);
    } else {
        println!("Updated {id}");
    }
    Ok(())
}

pub fn close(ctx: &mut CommandContext, ids: &[String]) -> Result<()> {
    let mut closed = Vec::new();
    for input in ids {
        let id = resolve_issue_id(ctx, input)?;
        ctx.close_issue(&id)?;
        closed.push(id);
    }
    if ctx.json {
        emit_json(&json!({ "ok": true, "result": "closed", "ids": closed }));
    } else {
        for id in closed {
            println!("Closed {id}");
        }
    }
    Ok(())
}

pub fn delete(
    ctx: &mut CommandContext,
    input: &str,
    hard: bool,
    reason: Option<&str>,
) -> Result<()> {
    let id = resolve_issue_id(ctx, input)?;
    ctx.delete_issue(&id, !hard, reason)?;
    if ctx.json {
        emit_json(&json!({
            "ok": true,
            "result": if hard { "deleted" } else { "tombstoned" },
            "id": id,
        }));
    } else if hard {
        println!("Deleted {id}");
    } else {
        println!("Tombstoned {id}");
    }
    Ok(())
}

pub fn comment(ctx: &mut CommandContext, input: &str, text: &str) -> Result<()> {
    let id = resolve_issue_id(ctx, input)?;
    let comment = ctx.add_comment(&id, text)?;
    if ctx.json {
        emit_json(&serde_json::to_value(&comment)?);
    } else {
        println!("Commented on {id}");
    }
    Ok(())
}
