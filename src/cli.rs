//! Command-line interface for the chain head monitor.
//!
//! # Commands
//!
//! - `watch`: Stream reconciled block events until Ctrl-C
//! - `head`: Print the chain id and latest block (one-time)
//!
//! Options not given on the command line come from the environment (see
//! [`crate::config`]).
//!
//! # Example
//!
//! ```bash
//! # Stream events, holding each back 3 blocks behind the head
//! eth-head-monitor watch --trail 3
//!
//! # Machine-readable output with logs attached
//! eth-head-monitor watch --json --with-logs
//!
//! # One-time head check
//! eth-head-monitor head
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::block::{Block, BlockEvent, BlocksExt};
use crate::config::{parse_topics, Config};
use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{Monitor, MonitorOptions};
use crate::rpc::http::check_connection;
use crate::rpc::{create_provider, ChainClient};

/// Reorg-aware Ethereum chain head monitor
#[derive(Parser, Debug)]
#[command(name = "eth-head-monitor")]
#[command(about = "Reorg-aware Ethereum chain head monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream block added/removed events
    Watch(WatchArgs),

    /// Print chain id and latest block (one-time)
    Head,
}

/// Overrides for the environment configuration.
#[derive(clap::Args, Debug, Default)]
struct WatchArgs {
    /// Polling interval in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Starting block number (default: latest)
    #[arg(short, long)]
    start_block: Option<u64>,

    /// Blocks to hold events back behind the head
    #[arg(short, long)]
    trail: Option<usize>,

    /// Blocks kept in the retained window
    #[arg(short, long)]
    retention: Option<usize>,

    /// Attach logs to every added block
    #[arg(long)]
    with_logs: bool,

    /// Comma-separated event signatures to filter logs on
    #[arg(long)]
    topics: Option<String>,

    /// Print one JSON batch per line instead of colored text
    #[arg(long)]
    json: bool,

    /// Per-batch debug logging
    #[arg(long)]
    debug: bool,
}

impl WatchArgs {
    /// Apply the command-line overrides to `options`.
    fn apply(&self, mut options: MonitorOptions) -> MonitorResult<MonitorOptions> {
        if let Some(ms) = self.interval {
            options.polling_interval = Duration::from_millis(ms);
        }
        if self.start_block.is_some() {
            options.start_block = self.start_block;
        }
        if let Some(trail) = self.trail {
            options.trail_num_blocks_behind_head = trail;
        }
        if let Some(retention) = self.retention {
            options.block_retention_limit = retention;
        }
        if let Some(topics) = &self.topics {
            options.log_topics = parse_topics(topics)?;
        }
        options.with_logs |= self.with_logs;
        options.debug_logging |= self.debug;

        options.validate()?;
        Ok(options)
    }
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration loading fails
/// - RPC connection fails
/// - The monitor terminates with a fatal error
pub async fn run() -> MonitorResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => run_watch_command(args).await,
        Commands::Head => run_head_command().await,
    }
}

/// Execute the head command (one-time fetch).
async fn run_head_command() -> MonitorResult<()> {
    let config = Config::from_env()?;
    let provider = create_provider(config.rpc_url()).await?;

    let chain_id = provider
        .chain_id()
        .await
        .map_err(|e| MonitorError::rpc(format!("Failed to fetch chain id: {e}"), Some(Box::new(e))))?;
    let head = provider
        .block_by_number(None)
        .await
        .map_err(|e| MonitorError::rpc(format!("Failed to fetch latest block: {e}"), Some(Box::new(e))))?;

    println!(
        "{} chain {} | block {} | {} | {} txs | {}",
        "⛓".cyan(),
        chain_id.to_string().yellow(),
        head.number.to_string().yellow().bold(),
        head.hash.to_string().dimmed(),
        head.transactions.len(),
        format_timestamp(head.timestamp).dimmed()
    );

    Ok(())
}

/// Execute the watch command (continuous monitoring).
async fn run_watch_command(args: WatchArgs) -> MonitorResult<()> {
    let config = Config::from_env()?;
    let options = args.apply(config.options().clone())?;

    let provider = create_provider(config.rpc_url()).await?;
    check_connection(&provider).await?;

    info!(
        poll_ms = options.polling_interval.as_millis(),
        trail = options.trail_num_blocks_behind_head,
        retention = options.retention_limit(),
        with_logs = options.with_logs,
        "Starting watch mode"
    );
    if !args.json {
        println!("{}", "🔍 Watching chain head...".cyan().bold());
        println!();
    }

    let monitor = Arc::new(Monitor::new(provider, options)?);
    let mut subscription = monitor.subscribe();
    let mut runner = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.run(CancellationToken::new()).await }
    });

    // Setup graceful shutdown handler
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, cleaning up...");
                monitor.stop();
                break;
            }

            finished = &mut runner => {
                return finished.map_err(|e| {
                    MonitorError::from(eyre::eyre!("monitor task failed: {e}"))
                })?;
            }

            batch = subscription.recv() => match batch {
                Some(batch) => print_batch(&batch, args.json),
                None => break,
            },
        }
    }

    subscription.unsubscribe();
    let result = runner
        .await
        .map_err(|e| MonitorError::from(eyre::eyre!("monitor task failed: {e}")))?;

    if !args.json {
        println!("{}", "👋 Shutdown complete".green().bold());
    }
    if let Err(e) = &result {
        error!(error = %e, "Monitor ended with error");
    }
    result
}

/// Print one published batch.
fn print_batch(batch: &[Block], json: bool) {
    if json {
        match serde_json::to_string(batch) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "Failed to serialize batch"),
        }
        return;
    }

    if batch.has_reorg() {
        println!("{}", "⚠️  Reorg".red().bold());
    }
    for block in batch {
        println!("{}", format_block(block));
    }
}

/// One colored line per block event.
fn format_block(block: &Block) -> String {
    let (marker, number) = match block.event {
        BlockEvent::Added => ("+".green().bold(), block.number.to_string().yellow()),
        BlockEvent::Removed => ("-".red().bold(), block.number.to_string().red()),
    };
    let logs = block
        .logs
        .as_ref()
        .map_or_else(|| "-".to_string(), |logs| logs.len().to_string());

    format!(
        "{} {} Block: {} | {} | txs: {} | logs: {}",
        marker,
        format_timestamp(block.timestamp).dimmed(),
        number,
        block.hash.to_string().dimmed(),
        block.transactions.len(),
        logs.blue()
    )
}

/// Render a block timestamp in local time.
fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || secs.to_string(),
            |utc| {
                utc.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        )
}
