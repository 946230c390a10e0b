//! `bd create`: create an issue, optionally as a hierarchical child.

use clap::Args;
use serde_json::json;

use crate::cli::commands::{emit_json, resolve_issue_id};
use crate::config::{CONFIG_VALIDATION_ON_CREATE, ValidationLevel};
use crate::context::CommandContext;
use crate::error::Result;
use crate::model::{Dependency, DependencyType, Issue, IssueType, Priority};
use crate::storage::CONFIG_ISSUE_PREFIX;
use crate::util::IdGenerator;
use crate::validation::{enforce, validate_issue};

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,

    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(long)]
    pub design: Option<String>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Issue type (task, bug, feature, epic, chore, advice, runbook,
    /// merge_request, gate, molecule, or a custom token).
    #[arg(short = 't', long = "type", default_value = "task")]
    pub issue_type: String,

    /// Priority 0-4 (0 highest).
    #[arg(short, long, default_value = "2")]
    pub priority: String,

    #[arg(short, long)]
    pub assignee: Option<String>,

    /// Parent issue: the new id becomes `<parent>.<n>`.
    #[arg(long)]
    pub parent: Option<String>,

    /// Labels (repeatable).
    #[arg(short, long = "label")]
    pub labels: Vec<String>,

    #[arg(long)]
    pub external_ref: Option<String>,

    #[arg(long)]
    pub spec_id: Option<String>,

    /// Pin the issue into agent context.
    #[arg(long)]
    pub pinned: bool,
}

pub fn execute(ctx: &mut CommandContext, args: &CreateArgs) -> Result<()> {
    let prefix = ctx
        .get_config(CONFIG_ISSUE_PREFIX)?
        .unwrap_or_else(|| "bd".to_string());

    let id = match &args.parent {
        Some(parent) => {
            let parent_id = resolve_issue_id(ctx, parent)?;
            next_child_id(ctx, &parent_id)?
        }
        None => {
            let generator = IdGenerator::new(&prefix);
            loop {
                let candidate = generator.candidate(chrono::Utc::now());
                if ctx.get_issue(&candidate)?.is_none() {
                    break candidate;
                }
            }
        }
    };

    let mut issue = Issue::new(id.clone(), args.title.clone());
    issue.description.clone_from(&args.description);
    issue.design.clone_from(&args.design);
    issue.notes.clone_from(&args.notes);
    issue.issue_type = args.issue_type.parse::<IssueType>().unwrap_or_default();
    issue.priority = args.priority.parse::<Priority>()?;
    issue.assignee.clone_from(&args.assignee);
    issue.external_ref.clone_from(&args.external_ref);
    issue.spec_id.clone_from(&args.spec_id);
    issue.pinned = args.pinned;
    issue.labels.clone_from(&args.labels);
    if let Some(parent_id) = issue.parent_id() {
        issue.dependencies.push(Dependency {
            issue_id: issue.id.clone(),
            depends_on_id: parent_id,
            dep_type: DependencyType::ParentChild,
            created_at: issue.created_at,
        });
    }

    let level: ValidationLevel = ctx
        .get_config(CONFIG_VALIDATION_ON_CREATE)?
        .as_deref()
        .map_or(Ok(ValidationLevel::default()), str::parse)?;
    enforce(level, &validate_issue(&issue))?;

    ctx.create_issues(std::slice::from_ref(&issue))?;

    if ctx.json {
        emit_json(&json!({ "ok": true, "result": "created", "id": id }));
    } else {
        println!("Created {id}");
    }
    Ok(())
}

/// Allocate the next free `<parent>.<n>` id by scanning existing children.
fn next_child_id(ctx: &mut CommandContext, parent_id: &str) -> Result<String> {
    let filter = crate::storage::IssueFilter {
        parent_id: Some(parent_id.to_string()),
        include_tombstones: true,
        ..Default::default()
    };
    let children = ctx.search_issues(&filter)?;
    let max_child = children
        .iter()
        .filter_map(|issue| {
            issue.id[parent_id.len()..]
                .strip_prefix('.')
                .and_then(|rest| rest.split('.').next())
                .and_then(|n| n.parse::<u32>().ok())
        })
        .max()
        .unwrap_or(0);
    Ok(format!("{parent_id}.{}", max_child + 1))
}
