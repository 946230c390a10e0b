//! `bd config`: read and write workspace configuration.

use clap::Subcommand;
use serde_json::json;

use crate::cli::commands::emit_json;
use crate::context::CommandContext;
use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print one config value.
    Get { key: String },
    /// Set a config value.
    Set { key: String, value: String },
    /// List all config values.
    List,
}

pub fn execute(ctx: &mut CommandContext, command: &ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { key } => {
            let value = ctx.get_config(key)?;
            if ctx.json {
                emit_json(&json!({ "key": key, "value": value }));
            } else {
                match value {
                    Some(value) => println!("{value}"),
                    None => println!("(unset)"),
                }
            }
            Ok(())
        }
        ConfigCommand::Set { key, value } => {
            ctx.set_config(key, value)?;
            if ctx.json {
                emit_json(&json!({ "ok": true, "result": "config_set", "key": key }));
            } else {
                println!("{key} = {value}");
            }
            Ok(())
        }
        ConfigCommand::List => {
            let all = ctx.direct()?.store.get_all_config()?;
            if ctx.json {
                emit_json(&serde_json::to_value(&all)?);
            } else {
                let mut keys: Vec<&String> = all.keys().collect();
                keys.sort();
                for key in keys {
                    println!("{key} = {}", all[key]);
                }
            }
            Ok(())
        }
    }
}
