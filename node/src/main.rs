// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Agora Marketplace Node
//!
//! Entry point for the `agora-node` binary. Parses CLI arguments, initializes
//! logging and metrics, restores the marketplace from disk, and serves the
//! HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`: start the node
//! - `init`: create the data directory and fund devnet accounts
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use agora_contracts::Marketplace;
use agora_protocol::config::{format_units, DEVNET_ACCOUNT_BALANCE, MARKETPLACE_NAME};
use agora_protocol::identity::Address;
use agora_protocol::storage::StateDB;

use cli::{AgoraNodeCli, Commands};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AgoraNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens (creating if needed) the database under `data_dir`.
fn open_db(data_dir: &Path) -> Result<StateDB> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = StateDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

/// Starts the node: restores the marketplace, then serves the API and the
/// metrics endpoint until a shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    )
    .context("failed to initialize logging")?;

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        name = %args.name,
        "starting agora-node"
    );

    // --- Persistent storage ---
    let db = open_db(&args.data_dir)?;
    let market = Marketplace::open(db, args.name.clone()).context("failed to restore marketplace")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Application state ---
    let app_state = api::AppState::new(
        market,
        format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            agora_protocol::config::PROTOCOL_VERSION,
        ),
        Arc::clone(&node_metrics),
    );

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("agora-node stopped");
    Ok(())
}

/// Initializes a data directory and funds a fresh set of devnet accounts.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::INIT_FILTER, LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), accounts = args.accounts, "initializing node");

    let db = open_db(data_dir)?;
    let mut market = Marketplace::open(db.clone(), MARKETPLACE_NAME)
        .context("failed to restore marketplace")?;

    let mut accounts = Vec::with_capacity(args.accounts);
    for _ in 0..args.accounts {
        let address = Address::random();
        market
            .fund(address, DEVNET_ACCOUNT_BALANCE)
            .with_context(|| format!("failed to fund {}", address))?;
        accounts.push(address);
    }
    db.flush().context("failed to flush database")?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Accounts       : {}", accounts.len());
    for (i, address) in accounts.iter().enumerate() {
        println!(
            "  ({}) {} ({} coins)",
            i,
            address,
            format_units(DEVNET_ACCOUNT_BALANCE)
        );
    }

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("agora-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", agora_protocol::config::PROTOCOL_VERSION);
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
