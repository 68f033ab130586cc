//! # CLI Interface
//!
//! Defines the command-line argument structure for `agora-node` using
//! `clap` derive. Supports three subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agora_protocol::config::{
    DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT, DEVNET_ACCOUNT_COUNT, MARKETPLACE_NAME,
};

/// Agora marketplace node.
///
/// Hosts a product registry and its native ledger, persists both to disk,
/// and serves them over REST, JSON-RPC and WebSocket. Prometheus metrics are
/// exposed on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "agora-node",
    about = "Agora marketplace node",
    version,
    propagate_version = true
)]
pub struct AgoraNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Agora node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node and serve the API.
    Run(RunArgs),
    /// Create the data directory and fund a set of devnet accounts.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where products and balances are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "AGORA_DATA_DIR", default_value = ".agora")]
    pub data_dir: PathBuf,

    /// Port for the JSON-RPC, REST and WebSocket API.
    #[arg(long, env = "AGORA_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "AGORA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Display name reported by `name()`.
    #[arg(long, env = "AGORA_NAME", default_value = MARKETPLACE_NAME)]
    pub name: String,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "AGORA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "AGORA_DATA_DIR", default_value = ".agora")]
    pub data_dir: PathBuf,

    /// Number of devnet accounts to generate and fund.
    #[arg(long, default_value_t = DEVNET_ACCOUNT_COUNT)]
    pub accounts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        AgoraNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = AgoraNodeCli::parse_from(["agora-node", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(args.name, MARKETPLACE_NAME);
    }

    #[test]
    fn init_account_count_is_configurable() {
        let cli = AgoraNodeCli::parse_from(["agora-node", "init", "--accounts", "3"]);
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.accounts, 3);
    }
}
