//! CLI surface: argument definitions and dispatch.
//!
//! Every command accepts the global `--json` flag and then emits
//! machine-readable output on stdout only. Mutating commands arm the
//! auto-flush scheduler; reads do not.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use crate::error::Result;

/// Distributed issue tracker for agents and humans.
#[derive(Debug, Parser)]
#[command(name = "bd", version, about, max_term_width = 100)]
pub struct Cli {
    /// Emit JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Actor recorded in audit trails (default: BEADS_ACTOR/BD_ACTOR/USER).
    #[arg(long, global = true, env = "BEADS_ACTOR")]
    pub actor: Option<String>,

    /// Never use the daemon, even if one is running.
    #[arg(long, global = true)]
    pub no_daemon: bool,

    /// Skip the automatic staleness import on startup.
    #[arg(long, global = true)]
    pub no_auto_import: bool,

    /// Verbose logging to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a beads workspace in the current directory.
    Init {
        /// Issue id prefix for this repository (e.g., "bd").
        #[arg(long, default_value = "bd")]
        prefix: String,
        /// Reinitialize over an existing workspace.
        #[arg(long)]
        force: bool,
    },
    /// Create an issue.
    Create(commands::create::CreateArgs),
    /// Update fields on an issue.
    Update(commands::update::UpdateArgs),
    /// Close issues.
    Close {
        /// Issue ids (partial ids accepted).
        ids: Vec<String>,
    },
    /// Delete an issue (tombstone by default).
    Delete {
        id: String,
        /// Remove the row entirely instead of tombstoning.
        #[arg(long)]
        hard: bool,
        /// Reason recorded on the tombstone.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show an issue with relations and history.
    Show { id: String },
    /// List issues by filter.
    List(commands::list::ListArgs),
    /// Open issues with no unresolved blockers.
    Ready {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Open issues with unresolved blockers.
    Blocked,
    /// Manage dependencies.
    Dep {
        #[command(subcommand)]
        command: commands::dep::DepCommand,
    },
    /// Manage labels.
    Label {
        #[command(subcommand)]
        command: commands::label::LabelCommand,
    },
    /// Add a comment to an issue.
    Comment { id: String, text: String },
    /// Get or set configuration.
    Config {
        #[command(subcommand)]
        command: commands::config_cmd::ConfigCommand,
    },
    /// Import, export, or fully synchronize the JSONL archive.
    Sync(commands::sync_cmd::SyncArgs),
    /// Export the store to JSONL.
    Export {
        /// Bypass the safety guards.
        #[arg(long)]
        force: bool,
        /// Write to this path instead of the workspace archive.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import a JSONL file into the store.
    Import(commands::sync_cmd::ImportArgs),
    /// 3-way merge of base, local, and remote issue sets.
    Merge(commands::merge_cmd::MergeArgs),
    /// Daemon control.
    Daemon {
        #[command(subcommand)]
        command: commands::daemon_cmd::DaemonCommand,
    },
    /// Workspace status: paths, mode, counts, flush health.
    Info,
}

/// Shared flags for commands that take import policy options.
#[derive(Debug, Clone, Args)]
pub struct ImportPolicyArgs {
    /// Orphan handling: strict, resurrect, skip, or allow.
    #[arg(long, value_name = "MODE")]
    pub orphans: Option<String>,
    /// Rewrite foreign-prefix ids to the workspace prefix.
    #[arg(long)]
    pub rename_on_import: bool,
    /// Skip prefix validation.
    #[arg(long)]
    pub skip_prefix_validation: bool,
    /// Keep only the first of duplicated external refs.
    #[arg(long)]
    pub clear_duplicate_external_refs: bool,
    /// Replace label sets instead of unioning them.
    #[arg(long)]
    pub replace_labels: bool,
}

impl ImportPolicyArgs {
    /// Convert CLI flags into engine options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown orphan mode.
    pub fn to_options(&self) -> Result<crate::import::ImportOptions> {
        Ok(crate::import::ImportOptions {
            orphan_handling: self.orphans.as_deref().map(str::parse).transpose()?,
            rename_on_import: self.rename_on_import,
            skip_prefix_validation: self.skip_prefix_validation,
            clear_duplicate_external_refs: self.clear_duplicate_external_refs,
            label_merge: if self.replace_labels {
                crate::import::LabelMergePolicy::Replace
            } else {
                crate::import::LabelMergePolicy::Union
            },
            ..Default::default()
        })
    }
}

/// Dispatch a parsed invocation.
///
/// # Errors
///
/// Propagates command errors to `main` for envelope rendering.
pub fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    let actor = cli.actor.as_deref();
    let no_daemon = cli.no_daemon;
    let no_auto_import = cli.no_auto_import;

    let open = || crate::open_context(None, actor, json, no_daemon, no_auto_import);

    match cli.command {
        Commands::Init { prefix, force } => commands::init::execute(&prefix, force, json),
        Commands::Create(args) => commands::create::execute(&mut open()?, &args),
        Commands::Update(args) => commands::update::execute(&mut open()?, &args),
        Commands::Close { ids } => commands::update::close(&mut open()?, &ids),
        Commands::Delete { id, hard, reason } => {
            commands::update::delete(&mut open()?, &id, hard, reason.as_deref())
        }
        Commands::Show { id } => commands::list::show(&mut open()?, &id),
        Commands::List(args) => commands::list::execute(&mut open()?, &args),
        Commands::Ready { limit } => commands::list::ready(&mut open()?, limit),
        Commands::Blocked => commands::list::blocked(&mut open()?),
        Commands::Dep { command } => commands::dep::execute(&mut open()?, &command),
        Commands::Label { command } => commands::label::execute(&mut open()?, &command),
        Commands::Comment { id, text } => commands::update::comment(&mut open()?, &id, &text),
        Commands::Config { command } => commands::config_cmd::execute(&mut open()?, &command),
        Commands::Sync(args) => commands::sync_cmd::sync(&mut open()?, &args),
        Commands::Export { force, output } => {
            commands::sync_cmd::export(&mut open()?, force, output.as_deref())
        }
        Commands::Import(args) => commands::sync_cmd::import(&mut open()?, &args),
        Commands::Merge(args) => commands::merge_cmd::execute(&mut open()?, &args),
        Commands::Daemon { command } => {
            commands::daemon_cmd::execute(actor, json, &command)
        }
        Commands::Info => commands::info::execute(&mut open()?),
    }
}
