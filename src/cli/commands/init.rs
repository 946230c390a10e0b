//! `bd init`: provision a workspace.

use crate::cli::commands::emit_json;
use crate::config::init_workspace;
use crate::error::Result;
use serde_json::json;

pub fn execute(prefix: &str, force: bool, json: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let paths = init_workspace(&cwd, prefix, force)?;

    if json {
        emit_json(&json!({
            "ok": true,
            "result": "initialized",
            "beads_dir": paths.beads_dir,
            "prefix": prefix,
        }));
    } else {
        println!("Initialized beads workspace at {}", paths.beads_dir.display());
        println!("Issue prefix: {prefix}");
    }
    Ok(())
}
