//! `bd dep`: dependency management.

use clap::Subcommand;
use serde_json::json;

use crate::cli::commands::{emit_json, resolve_issue_id};
use crate::context::CommandContext;
use crate::error::Result;
use crate::model::{Dependency, DependencyType};

#[derive(Debug, Subcommand)]
pub enum DepCommand {
    /// Add a dependency: FROM depends on TO.
    Add {
        from: String,
        to: String,
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// Remove a dependency.
    Remove {
        from: String,
        to: String,
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// Detect blocking-dependency cycles.
    Cycles,
}

pub fn execute(ctx: &mut CommandContext, command: &DepCommand) -> Result<()> {
    match command {
        DepCommand::Add { from, to, dep_type } => {
            let from = resolve_issue_id(ctx, from)?;
            let to = resolve_issue_id(ctx, to)?;
            let dep_type: DependencyType = dep_type.parse().unwrap_or(DependencyType::Blocks);
            ctx.add_dependency(&Dependency {
                issue_id: from.clone(),
                depends_on_id: to.clone(),
                dep_type: dep_type.clone(),
                created_at: chrono::Utc::now(),
            })?;
            if ctx.json {
                emit_json(&json!({
                    "ok": true, "result": "dependency_added",
                    "from": from, "to": to, "type": dep_type.as_str(),
                }));
            } else {
                println!("{from} now depends on {to} ({dep_type})");
            }
            Ok(())
        }
        DepCommand::Remove { from, to, dep_type } => {
            let from = resolve_issue_id(ctx, from)?;
            let to = resolve_issue_id(ctx, to)?;
            let dep_type: DependencyType = dep_type.parse().unwrap_or(DependencyType::Blocks);
            ctx.remove_dependency(&from, &to, &dep_type)?;
            if ctx.json {
                emit_json(&json!({
                    "ok": true, "result": "dependency_removed",
                    "from": from, "to": to, "type": dep_type.as_str(),
                }));
            } else {
                println!("Removed dependency {from} -> {to}");
            }
            Ok(())
        }
        DepCommand::Cycles => {
            let cycles = ctx.direct()?.store.detect_cycles()?;
            if ctx.json {
                emit_json(&serde_json::to_value(&cycles)?);
            } else if cycles.is_empty() {
                println!("No cycles");
            } else {
                for cycle in cycles {
                    println!("cycle: {}", cycle.join(" -> "));
                }
            }
            Ok(())
        }
    }
}
