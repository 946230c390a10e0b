//! `bd daemon`: run, query, and stop the store-owning daemon.

use clap::Subcommand;
use serde_json::json;

use crate::cli::commands::emit_json;
use crate::config::{WorkspacePaths, discover_beads_dir, resolve_actor};
use crate::daemon::proto::{Request, Response};
use crate::daemon::{DaemonClient, DaemonServer, socket_path};
use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (daemonize externally).
    Run,
    /// Report whether a daemon is serving this workspace.
    Status,
    /// Ask the daemon to drain and exit.
    Stop,
}

pub fn execute(actor: Option<&str>, json: bool, command: &DaemonCommand) -> Result<()> {
    let beads_dir = discover_beads_dir(None)?;
    let socket = socket_path(&beads_dir);
    let paths = WorkspacePaths::resolve(beads_dir);

    match command {
        DaemonCommand::Run => {
            let server = DaemonServer {
                socket_path: socket,
                db_path: paths.db_path,
                jsonl_path: paths.jsonl_path,
                actor: resolve_actor(actor),
            };
            server.run()
        }
        DaemonCommand::Status => {
            let client = DaemonClient::new(socket.clone());
            match client.call(&Request::Ping) {
                Ok(Response::Pong { version, pid }) => {
                    if json {
                        emit_json(&json!({
                            "running": true,
                            "pid": pid,
                            "protocol_version": version,
                            "socket": socket,
                        }));
                    } else {
                        println!("Daemon running (pid {pid}) on {}", socket.display());
                    }
                }
                _ => {
                    if json {
                        emit_json(&json!({ "running": false, "socket": socket }));
                    } else {
                        println!("No daemon on {}", socket.display());
                    }
                }
            }
            Ok(())
        }
        DaemonCommand::Stop => {
            let client = DaemonClient::new(socket);
            client.call(&Request::Shutdown)?;
            if json {
                emit_json(&json!({ "ok": true, "result": "daemon_stopped" }));
            } else {
                println!("Daemon stopped");
            }
            Ok(())
        }
    }
}
