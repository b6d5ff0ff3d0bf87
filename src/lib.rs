//! # Ethereum Chain Head Monitor
//!
//! Reorg-aware chain head monitor built on [Alloy](https://github.com/alloy-rs/alloy).
//!
//! The monitor polls a node for new blocks, keeps a bounded window of the
//! canonical chain, detects reorganizations by parent-hash linkage and
//! republishes an ordered stream of "block added" / "block removed" events
//! to any number of independent subscribers.
//!
//! ## Features
//!
//! - **Reorg reconciliation**: walks back through forked ancestry and
//!   replays the new branch, emitting removals then additions
//! - **Bounded retries**: per-call timeouts and linear backoff around every
//!   node call
//! - **Log attachment** with bloom-based settling and backfill
//! - **Trailing publish**: hold events back N blocks behind the head
//! - **Isolated subscribers**: a slow consumer only grows its own backlog
//! - **Production error handling** with unified [`error::MonitorError`]
//!
//! ## Architecture
//!
//! 1. **Block Model** ([`block`]) - Blocks, events and batch lookups
//! 2. **RPC Layer** ([`rpc`]) - Node client abstraction and retry policy
//! 3. **Reorg Layer** ([`reorg`]) - Retained chain and reconciliation
//! 4. **Logs Layer** ([`logs`]) - Log attachment and backfill
//! 5. **Publish Layer** ([`publish`]) - Trailing queue and subscriber fan-out
//! 6. **Monitor** ([`monitor`]) - The poll loop and lifecycle
//!
//! ## Quick Start
//!
//! ### Using the CLI
//!
//! ```bash
//! # Stream block events
//! cargo run --release -- watch
//!
//! # Latest block
//! cargo run --release -- head
//! ```
//!
//! ### Using as a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eth_head_monitor::{config::Config, monitor::Monitor, rpc::create_provider};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let provider = create_provider(config.rpc_url()).await?;
//!
//!     let monitor = Arc::new(Monitor::new(provider, config.into_options())?);
//!     let mut events = monitor.subscribe();
//!     tokio::spawn({
//!         let monitor = Arc::clone(&monitor);
//!         async move { monitor.run(CancellationToken::new()).await }
//!     });
//!
//!     while let Some(batch) = events.recv().await {
//!         for block in batch {
//!             println!("{:?} {} {}", block.event, block.number, block.hash);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::MonitorResult<T>`](error::MonitorResult):
//!
//! ```rust
//! use eth_head_monitor::error::{MonitorError, MonitorResult};
//!
//! fn example() -> MonitorResult<()> {
//!     Err(MonitorError::NotFound)
//! }
//! assert!(example().is_err());
//! ```
//!
//! ## Testing
//!
//! ```bash
//! # All tests
//! cargo test
//!
//! # Tests against a live node
//! RPC_URL=http://localhost:8545 cargo test -- --ignored
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod block;
pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
pub mod monitor;
pub mod observability;
pub mod publish;
pub mod reorg;
pub mod rpc;

pub use block::{Block, BlockEvent, Blocks};
pub use error::{MonitorError, MonitorResult};
pub use monitor::{Monitor, MonitorOptions};
pub use publish::Subscription;
pub use rpc::ChainClient;
