//! `bd sync`, `bd export`, `bd import`.

use clap::Args;
use serde_json::json;
use std::path::Path;

use crate::cli::ImportPolicyArgs;
use crate::cli::commands::emit_json;
use crate::context::CommandContext;
use crate::error::Result;
use crate::import::ImportResult;
use crate::sync::{codec, needs_auto_import, save_base_snapshot, store_snapshot};

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Bypass the export safety guards.
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub policy: ImportPolicyArgs,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSONL file to import (default: the workspace archive).
    pub file: Option<std::path::PathBuf>,

    #[command(flatten)]
    pub policy: ImportPolicyArgs,
}

/// Full synchronization: import the archive when stale, export dirty state,
/// and refresh the merge base snapshot.
pub fn sync(ctx: &mut CommandContext, args: &SyncArgs) -> Result<()> {
    let jsonl_path = ctx.paths.jsonl_path.clone();

    let stale = {
        let direct = ctx.direct()?;
        jsonl_path.exists() && needs_auto_import(&direct.store, &jsonl_path)?
    };
    let imported = if stale {
        Some(ctx.import(&args.policy.to_options()?)?)
    } else {
        None
    };

    let exported = ctx.export(args.force)?;

    // The post-sync state becomes the next merge base.
    let snapshot: Vec<_> = store_snapshot(&ctx.direct()?.store)?.into_values().collect();
    save_base_snapshot(&jsonl_path, &snapshot)?;

    if ctx.json {
        emit_json(&json!({
            "ok": true,
            "result": "synced",
            "imported": imported.as_ref().map(import_summary),
            "exported": exported,
        }));
    } else {
        if let Some(result) = &imported {
            print_import_result(result);
        }
        println!("Exported {exported} issue(s)");
    }
    Ok(())
}

pub fn export(ctx: &mut CommandContext, force: bool, output: Option<&Path>) -> Result<()> {
    let exported = match output {
        // Custom target: plain snapshot write, no metadata or dirty-set
        // side effects.
        Some(path) => {
            let issues: Vec<_> = store_snapshot(&ctx.direct()?.store)?.into_values().collect();
            codec::write_jsonl_atomic(path, &issues)?;
            issues.iter().filter(|i| !i.ephemeral).count()
        }
        None => ctx.export(force)?,
    };
    if ctx.json {
        emit_json(&json!({ "ok": true, "result": "exported", "count": exported }));
    } else {
        println!("Exported {exported} issue(s)");
    }
    Ok(())
}

pub fn import(ctx: &mut CommandContext, args: &ImportArgs) -> Result<()> {
    let options = args.policy.to_options()?;
    let result = match &args.file {
        Some(path) => {
            let path = path.clone();
            let actor = ctx.actor.clone();
            let direct = ctx.direct()?;
            let (result, warnings) =
                crate::sync::import_from_jsonl(&mut direct.store, &path, &options, &actor)?;
            for warning in warnings {
                eprintln!("Warning: {warning}");
            }
            result
        }
        None => ctx.import(&options)?,
    };

    if ctx.json {
        emit_json(&import_summary(&result));
    } else {
        print_import_result(&result);
    }
    Ok(())
}

fn import_summary(result: &ImportResult) -> serde_json::Value {
    json!({
        "created": result.created,
        "updated": result.updated,
        "unchanged": result.unchanged,
        "skipped": result.skipped,
        "deleted": result.deleted,
        "collisions": result.collisions,
        "skipped_dependencies": result.skipped_dependencies,
        "prefix_mismatch": result.prefix_mismatch,
        "mismatch_prefixes": result.mismatch_prefixes,
        "expected_prefix": result.expected_prefix,
        "id_mapping": result.id_mapping,
    })
}

fn print_import_result(result: &ImportResult) {
    println!(
        "Imported: {} created, {} updated, {} unchanged, {} skipped, {} deleted",
        result.created, result.updated, result.unchanged, result.skipped, result.deleted
    );
    if !result.skipped_dependencies.is_empty() {
        println!(
            "Skipped {} dependency edge(s) with unresolved endpoints",
            result.skipped_dependencies.len()
        );
    }
    for (old, new) in &result.id_mapping {
        println!("  {old} -> {new}");
    }
}
