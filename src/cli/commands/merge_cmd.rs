//! `bd merge`: 3-way merge of issue sets.
//!
//! Two shapes:
//! - workspace merge (no file arguments): base = remembered snapshot,
//!   local = store, remote = the JSONL archive; the merged set is written
//!   back to the archive, imported, and becomes the new base.
//! - file merge (`--base --local --remote`): pure file-level merge for use
//!   as a git merge driver; writes to `--output` (default: the local file)
//!   and never touches the store.

use clap::Args;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cli::commands::emit_json;
use crate::context::CommandContext;
use crate::error::{BeadsError, Result};
use crate::import::ImportOptions;
use crate::merge::{MergeOutcome, merge};
use crate::model::Issue;
use crate::sync::{codec, load_base_snapshot, save_base_snapshot, store_snapshot};

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Base (common ancestor) JSONL file.
    #[arg(long, requires = "local", requires = "remote")]
    pub base: Option<PathBuf>,

    /// Local JSONL file.
    #[arg(long)]
    pub local: Option<PathBuf>,

    /// Remote JSONL file.
    #[arg(long)]
    pub remote: Option<PathBuf>,

    /// Output path for file merges (default: the local file).
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub fn execute(ctx: &mut CommandContext, args: &MergeArgs) -> Result<()> {
    match (&args.base, &args.local, &args.remote) {
        (base, Some(local), Some(remote)) => {
            let output = args.output.clone().unwrap_or_else(|| local.clone());
            file_merge(ctx, base.as_deref(), local, remote, &output)
        }
        (None, None, None) => workspace_merge(ctx),
        _ => Err(BeadsError::InvalidInput(
            "--local and --remote must be given together".to_string(),
        )),
    }
}

fn read_set(path: &Path) -> Result<HashMap<String, Issue>> {
    let report = codec::read_jsonl(path)?;
    for warning in &report.warnings {
        eprintln!("Warning: {}: {warning}", path.display());
    }
    Ok(report
        .issues
        .into_iter()
        .map(|issue| (issue.id.clone(), issue))
        .collect())
}

fn file_merge(
    ctx: &CommandContext,
    base: Option<&Path>,
    local: &Path,
    remote: &Path,
    output: &Path,
) -> Result<()> {
    let base_set = base.map(read_set).transpose()?;
    let local_set = read_set(local)?;
    let remote_set = read_set(remote)?;

    let outcome = merge(base_set.as_ref(), &local_set, &remote_set);
    let merged: Vec<Issue> = outcome.merged.values().cloned().collect();
    codec::write_jsonl_atomic(output, &merged)?;

    report(ctx, &outcome);
    Ok(())
}

fn workspace_merge(ctx: &mut CommandContext) -> Result<()> {
    let jsonl_path = ctx.paths.jsonl_path.clone();
    let actor = ctx.actor.clone();

    let base_set = load_base_snapshot(&jsonl_path)?;
    let remote_set = if jsonl_path.exists() {
        read_set(&jsonl_path)?
    } else {
        HashMap::new()
    };

    let direct = ctx.direct()?;
    let local_set = store_snapshot(&direct.store)?;

    let outcome = merge(base_set.as_ref(), &local_set, &remote_set);
    let merged: Vec<Issue> = outcome.merged.values().cloned().collect();

    // Archive first (the rename is the linearization point), then bring the
    // store up to the merged state and remember it as the next base.
    codec::write_jsonl_atomic(&jsonl_path, &merged)?;
    let import_options = ImportOptions {
        skip_prefix_validation: true,
        orphan_handling: Some(crate::import::OrphanHandling::Allow),
        ..Default::default()
    };
    let (_result, warnings) =
        crate::sync::import_from_jsonl(&mut direct.store, &jsonl_path, &import_options, &actor)?;
    for warning in warnings {
        eprintln!("Warning: {warning}");
    }
    save_base_snapshot(&jsonl_path, &merged)?;

    report(ctx, &outcome);
    Ok(())
}

fn report(ctx: &CommandContext, outcome: &MergeOutcome) {
    if ctx.json {
        emit_json(&json!({
            "ok": true,
            "result": "merged",
            "issues": outcome.merged.len(),
            "conflicts": outcome.conflicts,
            "strategy": outcome.strategy,
        }));
    } else {
        println!(
            "Merged {} issue(s), {} conflict(s) resolved",
            outcome.merged.len(),
            outcome.conflicts
        );
    }
}
