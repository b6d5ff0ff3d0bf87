//! Observability and structured logging infrastructure.
//!
//! The monitor logs through `tracing` with structured fields (`block`,
//! `hash`, `attempt`, `subscriber`, ...). This module installs the global
//! subscriber for the binary.
//!
//! # Features
//!
//! - **Structured Logging**: Key-value pairs for machine-parseable logs
//! - **Multiple Formats**: Console (pretty/JSON) and file output
//! - **Environment Filtering**: RUST_LOG variable support
//!
//! # Usage
//!
//! Initialize tracing at application startup and keep the returned guard
//! alive for as long as file logging should be flushed:
//!
//! ```no_run
//! use eth_head_monitor::observability;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Pretty console output, info level
//!     let _guard = observability::init_tracing(None, None, false)?;
//!
//!     // Run application...
//!     Ok(())
//! }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Per-block reconciliation lines
//! RUST_LOG=eth_head_monitor=debug cargo run -- watch
//!
//! # Quieter transport, verbose monitor
//! RUST_LOG=eth_head_monitor=debug,alloy=warn cargo run -- watch
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor an explicit level is given:
/// info for the monitor, warn for dependencies.
pub const DEFAULT_FILTER: &str = "eth_head_monitor=info,warn";

/// Pick the filter directive: `RUST_LOG` wins, then `log_level`, then
/// [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .filter(|f| !f.is_empty())
        .or(log_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Initialize the tracing subscriber with configurable output formats.
///
/// # Arguments
///
/// * `log_level` - Optional filter override (e.g., "debug"). `RUST_LOG`
///   takes precedence.
/// * `log_file` - Optional file path for JSON log output with daily rotation.
/// * `json_output` - JSON console output for log aggregation instead of the
///   pretty human-readable format.
///
/// Returns the file writer guard when file logging is enabled. Dropping it
/// stops the background writer.
///
/// # Errors
///
/// Returns an error if:
/// - The log directory cannot be created
/// - A global subscriber is already installed
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_new(filter_directive(
        std::env::var("RUST_LOG").ok(),
        log_level,
    ))?;

    // Console layer (stdout)
    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    // File layer (optional), always JSON
    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let file_appender = tracing_appender::rolling::daily(
                dir,
                path.file_name()
                    .unwrap_or_else(|| OsStr::new("eth-head-monitor.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized successfully"
    );

    Ok(guard)
}

/// Initialize tracing for tests, writing through the test harness.
///
/// See output with `cargo test -- --nocapture`.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
