//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

/// Per-workspace sidecar daemon.
#[derive(Debug, Parser, Clone)]
#[command(author, version, about = "Vault kernel sidecar daemon", propagate_version = true)]
pub struct Cli {
    /// Absolute or relative path to the workspace directory this kernel serves.
    #[arg(long)]
    pub vault: PathBuf,

    /// Local TCP port the JSON-RPC WebSocket listens on.
    #[arg(long = "ws-port")]
    pub ws_port: u16,
}
