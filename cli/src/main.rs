//! warprelay CLI: runs source chain subscribers and inspects checkpoints.
//!
//! # Commands
//! ```text
//! warprelay run    --config <path.json>
//! warprelay status --config <path.json> [--json]
//! warprelay info
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warprelay_core::types::{
    event_topic, WarpLogEvent, MAX_BLOCKS_PER_REQUEST, SEND_WARP_MESSAGE_SIGNATURE,
    WARP_PRECOMPILE_ADDRESS,
};
use warprelay_evm::{SubscriberBuilder, SubscriberHandle};

mod config;
mod logging;
mod store;

use config::RelayerConfig;
use store::Store;

#[derive(Parser)]
#[command(
    name = "warprelay",
    about = "Cross-chain warp message subscriber",
    long_about = "
warprelay watches source chains for SendWarpMessage logs, catches up on
missed blocks from a durable checkpoint and follows new blocks over a
WebSocket subscription, reconnecting on failure.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log levels
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to every configured source chain until Ctrl-C
    Run {
        /// Path to the JSON config file
        #[arg(short, long, default_value = "./warprelay.json")]
        config: PathBuf,
        /// Override the configured log level
        #[arg(long)]
        log_level: Option<String>,
        /// Seconds between status log lines (0 disables them)
        #[arg(long, default_value_t = 60)]
        status_interval: u64,
    },

    /// Print the stored checkpoint of every configured chain
    Status {
        /// Path to the JSON config file
        #[arg(short, long, default_value = "./warprelay.json")]
        config: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version and protocol constants
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_level,
            status_interval,
        } => cmd_run(&config, log_level, status_interval).await,
        Commands::Status { config, json } => cmd_status(&config, json).await,
        Commands::Info => cmd_info(),
    }
}

async fn cmd_run(path: &Path, log_level: Option<String>, status_interval: u64) -> Result<()> {
    let config = RelayerConfig::load(path)?;
    let mut log_config = config.log_config();
    if let Some(level) = log_level {
        log_config.level = level;
    }
    logging::init_tracing(&log_config);

    if let Err(e) = config.chain_ids() {
        warn!(error = %e, "a source chain is misconfigured and will not be watched");
    }

    let store = Store::open(&config.storage_location).await?;
    info!(
        chains = config.source_subnets.len(),
        storage = %store.describe(),
        "starting warprelay"
    );

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let cancel = CancellationToken::new();
    let mut subscribers = JoinSet::new();
    let mut handles: Vec<(String, SubscriberHandle)> = Vec::new();

    for source in config.source_subnets.iter().cloned() {
        let chain = source.chain_id.clone();
        let subscriber = SubscriberBuilder::new(source)
            .config(config.subscriber_config())
            .store(store.checkpoint_store())
            .output(tx.clone())
            .build()
            .with_context(|| format!("cannot build subscriber for chain {chain}"))?;
        handles.push((chain.clone(), subscriber.handle()));

        let token = cancel.clone();
        subscribers.spawn(async move { (chain, subscriber.run(token).await) });
    }
    drop(tx);

    let consumer = tokio::spawn(consume(rx));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    status.tick().await;

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!(error = %e, "cannot listen for Ctrl-C");
                }
                info!("shutdown requested");
                break;
            }
            joined = subscribers.join_next() => match joined {
                Some(res) => report_exit(res),
                None => {
                    warn!("no subscriber left running");
                    break;
                }
            },
            _ = status.tick(), if status_interval > 0 => log_status(&handles),
        }
    }

    cancel.cancel();
    while let Some(res) = subscribers.join_next().await {
        report_exit(res);
    }
    let delivered = consumer.await.context("event consumer panicked")?;
    info!(delivered, "warprelay stopped");
    Ok(())
}

/// Stand-in for the delivery pipeline: logs every warp message.
async fn consume(mut rx: mpsc::Receiver<WarpLogEvent>) -> u64 {
    let mut delivered = 0u64;
    while let Some(event) = rx.recv().await {
        delivered += 1;
        let message_len = event.unsigned_message().map(|m| m.len()).ok();
        info!(
            chain = %event.chain_id,
            height = event.block_height,
            tx = %event.tx_hash,
            log_index = event.log_index,
            sender = %event.source_address,
            message_id = %event.message_id,
            message_len = ?message_len,
            "warp message"
        );
    }
    delivered
}

fn report_exit(res: Result<(String, Result<(), warprelay_core::error::RelayerError>), tokio::task::JoinError>) {
    match res {
        Ok((chain, Ok(()))) => info!(chain = %chain, "subscriber exited"),
        Ok((chain, Err(e))) => error!(chain = %chain, error = %e, "subscriber failed"),
        Err(e) => error!(error = %e, "subscriber task panicked"),
    }
}

fn log_status(handles: &[(String, SubscriberHandle)]) {
    for (chain, handle) in handles {
        let m = handle.metrics();
        info!(
            chain = %chain,
            state = %handle.state(),
            events = m.events_emitted,
            pages = m.pages_scanned,
            retries = m.query_retries,
            reconnections = m.reconnections,
            checkpoint_failures = m.checkpoint_failures,
            decode_errors = m.decode_errors,
            "subscriber status"
        );
    }
}

async fn cmd_status(path: &Path, json: bool) -> Result<()> {
    let config = RelayerConfig::load(path)?;
    let store = Store::open(&config.storage_location).await?;

    let mut rows = Vec::new();
    for source in &config.source_subnets {
        let row = match source.validate() {
            Ok(chain_id) => match store.load(&chain_id).await? {
                Some(cp) => serde_json::json!({
                    "chain-id": source.chain_id,
                    "latest-processed-block": cp.latest_processed_block,
                    "updated-at": chrono::DateTime::from_timestamp(cp.updated_at, 0)
                        .map(|t| t.to_rfc3339()),
                }),
                None => serde_json::json!({ "chain-id": source.chain_id, "latest-processed-block": null }),
            },
            Err(e) => serde_json::json!({ "chain-id": source.chain_id, "error": e.to_string() }),
        };
        rows.push(row);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Storage: {}", store.describe());
    for row in &rows {
        let chain = row["chain-id"].as_str().unwrap_or_default();
        if let Some(err) = row.get("error") {
            println!("  {chain}  invalid: {}", err.as_str().unwrap_or_default());
        } else if let Some(height) = row["latest-processed-block"].as_u64() {
            println!(
                "  {chain}  block {height}  (saved {})",
                row["updated-at"].as_str().unwrap_or("?")
            );
        } else {
            println!("  {chain}  no checkpoint");
        }
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("warprelay v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Event:                  {SEND_WARP_MESSAGE_SIGNATURE}");
    println!("Topic:                  {}", event_topic(SEND_WARP_MESSAGE_SIGNATURE));
    println!("Precompile address:     {WARP_PRECOMPILE_ADDRESS}");
    println!("Max blocks per request: {MAX_BLOCKS_PER_REQUEST} (pages span up to {} blocks)", MAX_BLOCKS_PER_REQUEST + 1);
    println!();
    println!("Supported VMs:          evm");
    println!("Checkpoint stores:      json files (default), sqlite (feature=sqlite)");
    Ok(())
}
