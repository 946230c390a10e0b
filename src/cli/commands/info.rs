//! `bd info`: workspace status at a glance.

use serde_json::json;

use crate::cli::commands::emit_json;
use crate::context::CommandContext;
use crate::daemon::AccessMode;
use crate::error::Result;
use crate::storage::IssueFilter;
use crate::sync::needs_auto_import;

pub fn execute(ctx: &mut CommandContext) -> Result<()> {
    let mode = match ctx.mode() {
        AccessMode::Daemon => "daemon",
        AccessMode::Direct => "direct",
    };
    let issues = ctx.search_issues(&IssueFilter::everything())?;
    let total = issues.len();
    let tombstones = issues.iter().filter(|i| i.is_tombstone()).count();
    let open = issues
        .iter()
        .filter(|i| i.status == crate::model::Status::Open)
        .count();

    let jsonl_path = ctx.paths.jsonl_path.clone();
    let (dirty, stale, stats) = match ctx.mode() {
        AccessMode::Direct => {
            let stats = ctx.flush_stats();
            let direct = ctx.direct()?;
            let dirty = direct.store.list_dirty_ids()?;
            let stale = needs_auto_import(&direct.store, &jsonl_path)?;
            (dirty, stale, stats)
        }
        AccessMode::Daemon => (Vec::new(), false, ctx.flush_stats()),
    };

    if ctx.json {
        emit_json(&json!({
            "beads_dir": ctx.paths.beads_dir,
            "jsonl": jsonl_path,
            "mode": mode,
            "issues": { "total": total, "open": open, "tombstones": tombstones },
            "dirty": dirty,
            "archive_stale": stale,
            "flush": {
                "count": stats.flush_count,
                "failures": stats.flush_failure_count,
                "last_error": stats.last_flush_error,
            },
        }));
    } else {
        println!("Workspace: {}", ctx.paths.beads_dir.display());
        println!("Archive:   {}", jsonl_path.display());
        println!("Mode:      {mode}");
        println!("Issues:    {total} total, {open} open, {tombstones} tombstones");
        println!("Dirty:     {}", dirty.len());
        println!("Stale:     {}", if stale { "yes (run bd sync)" } else { "no" });
        if stats.flush_failure_count > 0 {
            println!(
                "Flush:     {} failure(s), last: {}",
                stats.flush_failure_count,
                stats.last_flush_error.as_deref().unwrap_or("unknown")
            );
        }
    }
    Ok(())
}
