//! Logging initialization.
//!
//! A stderr `tracing` subscriber driven by `BD_LOG` (env-filter syntax) or
//! the verbosity flags. Logs never touch stdout, which is reserved for
//! command output.

use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Environment variable holding an env-filter directive set.
pub const ENV_LOG: &str = "BD_LOG";

/// Install the global subscriber. `verbose` lowers the default level to
/// debug, `quiet` raises it to error; `BD_LOG` overrides both.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| crate::error::BeadsError::Config(format!("logging init: {err}")))?;

    Ok(())
}
