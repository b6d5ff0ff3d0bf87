//! Configuration management for the chain head monitor.
//!
//! This module builds a [`Config`] (node URL plus [`MonitorOptions`]) from
//! environment variables, loading a `.env` file with `dotenvy` first. All
//! operations return [`MonitorResult`].
//!
//! ## Environment Variables
//!
//! Required (one of):
//! - `RPC_URL`: HTTP endpoint of the Ethereum node
//! - `ALCHEMY_API_KEY`: used to build an Alchemy mainnet URL when `RPC_URL`
//!   is not set
//!
//! Optional (with defaults):
//! - `POLL_INTERVAL_MS`: base polling interval (default: 1000)
//! - `RPC_TIMEOUT_SECS`: per-call deadline (default: 60)
//! - `START_BLOCK`: first block on a cold start (default: latest)
//! - `TRAIL_BLOCKS`: blocks held back behind the head (default: 0)
//! - `RETENTION_BLOCKS`: retained window size (default: 200)
//! - `WITH_LOGS`: attach logs to blocks (default: false)
//! - `LOG_TOPICS`: comma-separated event signatures to filter on
//! - `DEBUG_LOGGING`: per-batch debug lines (default: false)
//! - `RUST_LOG`: logging filter (default: "eth_head_monitor=info,warn")
//!
//! ## Example
//!
//! ```no_run
//! use eth_head_monitor::config::Config;
//! use eth_head_monitor::error::MonitorResult;
//!
//! # fn main() -> MonitorResult<()> {
//! let config = Config::from_env()?;
//! println!("RPC URL: {}", config.rpc_url());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::B256;

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::MonitorOptions;

/// Runtime configuration for the monitor binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum node HTTP endpoint
    rpc_url: String,

    /// Monitor options
    options: MonitorOptions,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for optional variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Neither `RPC_URL` nor `ALCHEMY_API_KEY` is set
    /// - A value cannot be parsed (e.g., non-numeric for numbers)
    /// - The resulting options are not runnable
    pub fn from_env() -> MonitorResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MonitorResult<Self> {
        let rpc_url = match lookup("RPC_URL").filter(|url| !url.is_empty()) {
            Some(url) => url,
            None => {
                let key = lookup("ALCHEMY_API_KEY").unwrap_or_default();
                if key.is_empty() || key == "your_alchemy_api_key_here" {
                    return Err(MonitorError::config(
                        "RPC_URL or ALCHEMY_API_KEY environment variable is required",
                        None,
                    ));
                }
                format!("https://eth-mainnet.g.alchemy.com/v2/{key}")
            }
        };

        let defaults = MonitorOptions::default();
        let options = MonitorOptions {
            polling_interval: parse(&lookup, "POLL_INTERVAL_MS", "a number of milliseconds")?
                .map_or(defaults.polling_interval, Duration::from_millis),
            timeout: parse(&lookup, "RPC_TIMEOUT_SECS", "a number of seconds")?
                .map_or(defaults.timeout, Duration::from_secs),
            start_block: parse(&lookup, "START_BLOCK", "a valid block number")?,
            trail_num_blocks_behind_head: parse(&lookup, "TRAIL_BLOCKS", "a number of blocks")?
                .unwrap_or(defaults.trail_num_blocks_behind_head),
            block_retention_limit: parse(&lookup, "RETENTION_BLOCKS", "a number of blocks")?
                .unwrap_or(defaults.block_retention_limit),
            with_logs: parse(&lookup, "WITH_LOGS", "'true' or 'false'")?
                .unwrap_or(defaults.with_logs),
            log_topics: lookup("LOG_TOPICS")
                .map(|raw| parse_topics(&raw))
                .transpose()?
                .unwrap_or_default(),
            debug_logging: parse(&lookup, "DEBUG_LOGGING", "'true' or 'false'")?
                .unwrap_or(defaults.debug_logging),
            ..defaults
        };
        options.validate()?;

        Ok(Self { rpc_url, options })
    }

    /// Get the Ethereum RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the monitor options.
    #[must_use]
    pub const fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Consume the configuration, returning the monitor options.
    #[must_use]
    pub fn into_options(self) -> MonitorOptions {
        self.options
    }
}

/// Parse an optional variable, treating an empty value as unset.
fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    expected: &str,
) -> MonitorResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };

    raw.trim().parse::<T>().map(Some).map_err(|e| {
        MonitorError::config(format!("{key} must be {expected}, got: {raw}"), Some(Box::new(e)))
    })
}

/// Parse a comma-separated list of 32-byte hex topics.
///
/// # Errors
///
/// Returns a configuration error naming the first malformed topic.
pub fn parse_topics(raw: &str) -> MonitorResult<Vec<B256>> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<B256>().map_err(|e| {
                MonitorError::config(
                    format!("LOG_TOPICS entry is not a 32-byte hex value: {t}"),
                    Some(Box::new(e)),
                )
            })
        })
        .collect()
}
