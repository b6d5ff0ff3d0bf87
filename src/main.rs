//! CLI entry point for the chain head monitor.
//!
//! # Architecture Flow
//!
//! ```text
//! main.rs (Runtime + tracing initialization)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! 1. Config Layer (src/config.rs)      → Load environment variables
//! 2. RPC Layer (src/rpc/)              → Create Ethereum provider
//! 3. Monitor (src/monitor.rs)          → Poll, reconcile, publish
//! 4. CLI Layer (output)                → Print subscribed batches
//! ```

use eth_head_monitor::{cli, observability};
use tracing::error;

/// Entry point for the chain head monitor.
///
/// Logging is controlled via environment variables:
/// - `RUST_LOG`: filter (e.g., "debug", "eth_head_monitor=debug,warn")
/// - `LOG_JSON`: JSON console output ("true" or "false")
/// - `LOG_FILE`: additional JSON log file with daily rotation
#[tokio::main]
async fn main() -> eyre::Result<()> {
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    // Keep the file writer alive until exit
    let _guard = observability::init_tracing(None, log_file, json_output)
        .map_err(|e| eyre::eyre!("Failed to initialize tracing: {e}"))?;

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        return Err(eyre::eyre!(e));
    }

    Ok(())
}
