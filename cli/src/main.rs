//! bountyindex CLI: run the sync engine and inspect projection state.
//!
//! # Commands
//! ```text
//! bountyindex run    --config bountyindex.yaml [--to-block N]
//! bountyindex status --config bountyindex.yaml [--json]
//! bountyindex reset  --config bountyindex.yaml
//! bountyindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bountyindex_core::checkpoint::CheckpointStore;
use bountyindex_core::indexer::SyncConfig;
use bountyindex_core::projection::ProjectionStore;
use bountyindex_core::sync::{ShutdownHandle, SyncEngine};
use bountyindex_core::types::SourceKind;
use bountyindex_evm::abi::default_signatures;
use bountyindex_storage::SqliteStorage;

mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "bountyindex",
    about = "Keeps a SQLite projection of agent and bounty ledger events in sync with the chain",
    long_about = "
BountyIndex: backfills agent identity, reputation and bounty-board events
from an EVM chain into SQLite, then follows the chain live.

ENVIRONMENT VARIABLES:
  BOUNTYINDEX_RPC_URL     JSON-RPC endpoint (overrides rpc_url)
  BOUNTYINDEX_DATABASE    SQLite file (overrides database)
  RUST_LOG                Log filter (overrides log.level)
",
    version
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, default_value = "bountyindex.yaml")]
    config: PathBuf,

    /// JSON-RPC endpoint
    #[arg(long, global = true, env = "BOUNTYINDEX_RPC_URL")]
    rpc_url: Option<String>,

    /// SQLite database file
    #[arg(long, global = true, env = "BOUNTYINDEX_DATABASE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill, then follow the chain until SIGINT/SIGTERM
    Run {
        /// Stop after this block instead of following the chain
        #[arg(long)]
        to_block: Option<u64>,
    },

    /// Show the checkpoint and projection row counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the checkpoint so the next run replays from start_block
    Reset,

    /// Show defaults and supported sources
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { to_block } => {
            let mut config = load_config(&cli.config, cli.rpc_url, cli.database)?;
            if let Some(block) = to_block {
                config.sync.to_block = Some(block);
            }
            cmd_run(config).await
        }
        Commands::Status { json } => {
            let config = load_config(&cli.config, cli.rpc_url, cli.database)?;
            cmd_status(&config, json).await
        }
        Commands::Reset => {
            let config = load_config(&cli.config, cli.rpc_url, cli.database)?;
            cmd_reset(&config).await
        }
        Commands::Info => cmd_info(),
    }
}

fn load_config(
    path: &std::path::Path,
    rpc_url: Option<String>,
    database: Option<String>,
) -> Result<AppConfig> {
    let mut config = AppConfig::load(path)?;
    config.apply_overrides(rpc_url, database);
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database))?;
    Ok(Arc::new(storage))
}

// ─── run ─────────────────────────────────────────────────────────────────────

async fn cmd_run(config: AppConfig) -> Result<()> {
    logging::init_tracing(&config.log)?;
    config.validate_for_run()?;

    let storage = open_storage(&config).await?;
    let ledger = config
        .ledger_builder()
        .build()
        .context("building EVM ledger client")?;

    let mut engine = SyncEngine::new(
        config.sync.clone(),
        config.event_sources(),
        Arc::new(ledger),
        storage.clone(),
        storage,
    )?;

    tokio::spawn(forward_signals(engine.shutdown_handle()));

    tracing::info!(
        database = %config.database,
        sources = config.sources.len(),
        start_block = config.sync.start_block,
        "Starting bountyindex"
    );

    match engine.run().await {
        Ok(stats) => {
            tracing::info!(
                events = stats.events,
                mutations = stats.mutations,
                duplicates = stats.duplicates,
                anomalies = stats.anomalies,
                checkpoint = ?stats.checkpoint,
                "bountyindex stopped"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Sync engine failed");
            Err(e).context("sync engine failed")
        }
    }
}

/// Request a graceful drain on SIGINT or SIGTERM.
async fn forward_signals(shutdown: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested, draining in-flight work");
    shutdown.shutdown();
}

// ─── status / reset ──────────────────────────────────────────────────────────

async fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    let key = &config.sync.checkpoint_key;
    let checkpoint = storage.get(key).await?;
    let counts = storage.counts().await?;

    if json {
        let out = serde_json::json!({
            "checkpoint_key": key,
            "checkpoint": checkpoint.as_deref().and_then(|v| v.parse::<u64>().ok()),
            "counts": counts,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Database:   {}", config.database);
    match checkpoint {
        Some(block) => println!("Checkpoint: {key} = {block}"),
        None => println!(
            "Checkpoint: {key} not set (next run starts at block {})",
            config.sync.start_block
        ),
    }
    println!("Agents:     {}", counts.agents);
    println!("Bounties:   {}", counts.bounties);
    println!("Reviews:    {}", counts.reviews);
    Ok(())
}

async fn cmd_reset(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let key = &config.sync.checkpoint_key;
    let previous = storage.get(key).await?;
    storage.delete(key).await?;

    match previous {
        Some(block) => println!(
            "Deleted checkpoint {key} (was {block}); next run replays from block {}",
            config.sync.start_block
        ),
        None => println!("Checkpoint {key} was not set"),
    }
    Ok(())
}

// ─── info ────────────────────────────────────────────────────────────────────

fn cmd_info() -> Result<()> {
    let defaults = SyncConfig::default();
    println!("BountyIndex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  Checkpoint key:           {}", defaults.checkpoint_key);
    println!("  Confirmation depth:       {} blocks", defaults.confirmation_depth);
    println!("  Backfill window:          {} blocks", defaults.window_size);
    println!("  Fetch retries:            {} (base backoff {} ms)", defaults.fetch_retries, defaults.retry_backoff_ms);
    println!("  Re-subscribe attempts:    {}", defaults.max_resubscribe_attempts);
    println!("  Live queue capacity:      {}", defaults.live_queue_capacity);
    println!("  Storage:                  SQLite (WAL)");
    println!();
    println!("Sources:");
    for kind in SourceKind::ALL {
        println!("  {kind}");
        for sig in default_signatures(kind) {
            println!("    {sig}");
        }
    }
    Ok(())
}
