use beads::cli::{Cli, run};
use beads::logging::init_logging;
use clap::Parser;
use std::io::{IsTerminal, stdout};

fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Failed to initialize logging: {err}");
    }

    let json = cli.json;
    if let Err(err) = run(cli) {
        let exit_code = err.exit_code();
        // Structured envelope for agents; human text otherwise. Either way
        // stderr, so piped stdout stays parseable.
        if json || !stdout().is_terminal() {
            let envelope = err.envelope();
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
            );
        } else {
            eprintln!("Error: {err}");
            if let Some(suggestion) = err.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
        }
        std::process::exit(exit_code);
    }
}
