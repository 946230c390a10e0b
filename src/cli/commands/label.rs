//! `bd label`: label management.

use clap::Subcommand;
use serde_json::json;

use crate::cli::commands::{emit_json, resolve_issue_id};
use crate::context::CommandContext;
use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum LabelCommand {
    /// Add a label to an issue.
    Add { id: String, label: String },
    /// Remove a label from an issue.
    Remove { id: String, label: String },
}

pub fn execute(ctx: &mut CommandContext, command: &LabelCommand) -> Result<()> {
    let (input, label, add) = match command {
        LabelCommand::Add { id, label } => (id, label, true),
        LabelCommand::Remove { id, label } => (id, label, false),
    };
    let id = resolve_issue_id(ctx, input)?;
    ctx.set_label(&id, label, add)?;
    if ctx.json {
        emit_json(&json!({
            "ok": true,
            "result": if add { "label_added" } else { "label_removed" },
            "id": id,
            "label": label,
        }));
    } else if add {
        println!("Labeled {id} with '{label}'");
    } else {
        println!("Removed '{label}' from {id}");
    }
    Ok(())
}
