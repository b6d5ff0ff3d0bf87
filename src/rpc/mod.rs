//! RPC access to the Ethereum node.
//!
//! The monitor never talks to the network directly. It depends on the
//! [`ChainClient`] trait, implemented here for Alloy's HTTP provider, and
//! wraps it in a [`RetryingFetcher`] that applies the timeout and retry
//! policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           RetryingFetcher           │
//! │  (timeouts, linear backoff, caps)   │
//! └─────────────────────────────────────┘
//!                   │
//!          ┌────────▼────────┐
//!          │   ChainClient   │
//!          │  (HTTP / mock)  │
//!          └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use eth_head_monitor::rpc::{create_provider, ChainClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/KEY").await?;
//! let head = provider.block_by_number(None).await?;
//! println!("Latest block: {}", head.number);
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod retry;

use std::fmt;
use std::future::Future;

use alloy::primitives::B256;
use alloy::rpc::types::Log;

use crate::block::Block;

// Re-export commonly used types
pub use http::{create_provider, Provider};
pub use retry::RetryingFetcher;

/// Errors reported by a [`ChainClient`].
#[derive(Debug)]
pub enum ClientError {
    /// The node does not know the requested block (yet).
    NotFound,
    /// Any other transport or node failure.
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    /// Wrap an arbitrary error as a transport failure.
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(err.into())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotFound => None,
            Self::Transport(e) => Some(e.as_ref()),
        }
    }
}

/// The node calls the monitor depends on.
///
/// Implementations must be cheap to call concurrently; deadlines and
/// cancellation are applied by the caller around each future.
pub trait ChainClient: Send + Sync + 'static {
    /// Chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;

    /// Block at `number`, or the latest block when `number` is `None`.
    fn block_by_number(
        &self,
        number: Option<u64>,
    ) -> impl Future<Output = Result<Block, ClientError>> + Send;

    /// Block with the given hash.
    fn block_by_hash(&self, hash: B256)
        -> impl Future<Output = Result<Block, ClientError>> + Send;

    /// Logs emitted in the block with `block_hash`, filtered on the first
    /// topic position by `topics` when non-empty.
    fn filter_logs(
        &self,
        block_hash: B256,
        topics: &[B256],
    ) -> impl Future<Output = Result<Vec<Log>, ClientError>> + Send;
}
