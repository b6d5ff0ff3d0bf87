//! HTTP provider for Ethereum connections.
//!
//! This module creates Alloy's HTTP provider and implements [`ChainClient`]
//! for it, converting RPC blocks into monitor [`Block`]s.
//!
//! ## Example
//!
//! ```no_run
//! use eth_head_monitor::rpc::{create_provider, http::check_connection};
//! use eth_head_monitor::error::MonitorResult;
//!
//! # async fn example() -> MonitorResult<()> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/API_KEY").await?;
//! check_connection(&provider).await?;
//! # Ok(())
//! # }
//! ```

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::B256;
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::transports::http::{Client, Http};
use tracing::{debug, info, instrument, warn};

use super::{ChainClient, ClientError};
use crate::block::Block;
use crate::error::{MonitorError, MonitorResult};

/// Type alias for the HTTP provider.
pub type Provider = RootProvider<Http<Client>>;

/// Create a new Ethereum RPC provider connected via HTTP.
///
/// # Errors
///
/// Returns an error if the RPC URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> MonitorResult<Provider> {
    info!("Initializing RPC provider");

    // Extract host for logging (without sensitive API key)
    let host = rpc_url.split("/v2/").next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        MonitorError::config(
            format!(
                "Invalid RPC URL: '{host}'. Expected format: 'https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY'"
            ),
            Some(Box::new(e)),
        )
    })?;

    let provider = ProviderBuilder::new().on_http(url);

    info!("RPC provider initialized successfully");

    Ok(provider)
}

/// Check if the provider connection is healthy by fetching the latest block.
///
/// # Errors
///
/// Returns an error if the RPC connection is not working.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> MonitorResult<()> {
    debug!("Checking provider connection health");

    match provider.block_by_number(None).await {
        Ok(block) => {
            info!(block = block.number, "Connection check successful");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(MonitorError::rpc(
                format!("Provider connection health check failed: {e}"),
                Some(Box::new(e)),
            ))
        }
    }
}

impl ChainClient for Provider {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.get_chain_id().await.map_err(ClientError::transport)
    }

    async fn block_by_number(&self, number: Option<u64>) -> Result<Block, ClientError> {
        let tag = number.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);
        let block = self
            .get_block_by_number(tag, BlockTransactionsKind::Hashes)
            .await
            .map_err(ClientError::transport)?
            .ok_or(ClientError::NotFound)?;

        Ok(Block::from_rpc(&block))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, ClientError> {
        let block = self
            .get_block_by_hash(hash, BlockTransactionsKind::Hashes)
            .await
            .map_err(ClientError::transport)?
            .ok_or(ClientError::NotFound)?;

        Ok(Block::from_rpc(&block))
    }

    async fn filter_logs(&self, block_hash: B256, topics: &[B256]) -> Result<Vec<Log>, ClientError> {
        let mut filter = Filter::new().at_block_hash(block_hash);
        if !topics.is_empty() {
            filter = filter.event_signature(topics.to_vec());
        }

        self.get_logs(&filter).await.map_err(ClientError::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires valid RPC_URL environment variable"]
    async fn test_check_connection_integration() {
        let rpc_url =
            std::env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());

        if let Ok(provider) = create_provider(&rpc_url).await {
            let result = check_connection(&provider).await;
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    #[ignore = "Requires valid RPC_URL environment variable"]
    async fn test_block_linkage_integration() {
        let rpc_url =
            std::env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());
        let provider = create_provider(&rpc_url).await.unwrap();

        let head = provider.block_by_number(None).await.unwrap();
        if head.number > 0 {
            let parent = provider.block_by_hash(head.parent_hash).await.unwrap();
            assert_eq!(parent.number + 1, head.number);
        }
    }

    #[tokio::test]
    async fn test_create_provider_invalid_url() {
        let result = create_provider("not-a-valid-url").await;
        assert!(matches!(result, Err(MonitorError::ConfigError { .. })));
    }
}
