//! Log enrichment for monitored blocks.
//!
//! Each added block gets the logs emitted in it, filtered on the configured
//! topics. A block is *settled* (`ok == true`) when:
//!
//! - the node returned at least one matching log, or
//! - the block bloom is zero, which proves there were no logs to find
//!
//! A non-zero bloom with an empty or failed answer leaves the block unsettled
//! so that [`LogAttacher::backfill`] retries it on a later poll. Removed
//! blocks are settled without a fetch, they are never delivered with logs.
//!
//! ## Example
//!
//! ```rust,ignore
//! use eth_head_monitor::logs::LogAttacher;
//!
//! let attacher = LogAttacher::new(client, timeout, topics, token);
//! attacher.attach(&mut events, &chain).await;
//! attacher.backfill(&chain).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bloom, B256};
use alloy::rpc::types::Log;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::block::{Block, BlockEvent};
use crate::reorg::RetainedChain;
use crate::rpc::{ChainClient, ClientError};

/// Decide whether a log fetch settles a block.
///
/// Returns the logs to attach, or `None` if the block needs backfilling.
#[must_use]
pub fn settle_logs(bloom: &Bloom, fetched: Result<Vec<Log>, ClientError>) -> Option<Vec<Log>> {
    match fetched {
        Ok(logs) if !logs.is_empty() || *bloom == Bloom::ZERO => Some(logs),
        _ => None,
    }
}

/// Attaches logs to blocks through a [`ChainClient`].
#[derive(Debug)]
pub struct LogAttacher<C> {
    client: Arc<C>,
    timeout: Duration,
    topics: Vec<B256>,
    shutdown: CancellationToken,
}

impl<C: ChainClient> LogAttacher<C> {
    /// Create an attacher filtering on `topics` (empty for all logs).
    pub const fn new(
        client: Arc<C>,
        timeout: Duration,
        topics: Vec<B256>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            timeout,
            topics,
            shutdown,
        }
    }

    /// Settle every block in `events` without fetching, for monitors
    /// running with log attachment disabled.
    pub fn stamp(events: &mut [Block], chain: &RetainedChain) {
        for block in events.iter_mut() {
            block.settle(None);
            if block.event == BlockEvent::Added {
                chain.settle(block.hash, None);
            }
        }
    }

    /// Copy settled log attachment from `chain` onto blocks about to be
    /// published.
    ///
    /// Batches held back by the trailing queue were copied before later
    /// backfills ran, so the retained copy may be ahead of them.
    pub fn refresh(batch: &mut [Block], chain: &RetainedChain) {
        for block in batch
            .iter_mut()
            .filter(|b| b.event == BlockEvent::Added && !b.ok)
        {
            if let Some(retained) = chain
                .find_block(block.hash, Some(BlockEvent::Added))
                .filter(|b| b.ok)
            {
                block.settle(retained.logs);
            }
        }
    }

    /// Attach logs to the unsettled blocks of `events`.
    ///
    /// Results are mirrored into `chain` so backfill sees them.
    pub async fn attach(&self, events: &mut [Block], chain: &RetainedChain) {
        for block in events.iter_mut() {
            if self.shutdown.is_cancelled() {
                return;
            }
            if block.ok {
                continue;
            }
            if block.event == BlockEvent::Removed {
                block.settle(None);
                continue;
            }

            if self.fetch_into(block).await {
                chain.settle(block.hash, block.logs.clone());
            }
        }
    }

    /// Retry log attachment for every unsettled block in the window,
    /// newest first.
    pub async fn backfill(&self, chain: &RetainedChain) {
        for mut block in chain.blocks().into_iter().rev() {
            if self.shutdown.is_cancelled() {
                return;
            }
            if block.ok {
                continue;
            }

            if self.fetch_into(&mut block).await && chain.settle(block.hash, block.logs) {
                info!(
                    block = block.number,
                    hash = %block.hash,
                    "Log backfill successful"
                );
            }
        }
    }

    /// Fetch logs for `block`, settling or unsettling it. Returns whether it
    /// ended up settled.
    async fn fetch_into(&self, block: &mut Block) -> bool {
        let fetched = tokio::select! {
            () = self.shutdown.cancelled() => return false,
            res = tokio::time::timeout(
                self.timeout,
                self.client.filter_logs(block.hash, &self.topics),
            ) => res.unwrap_or_else(|elapsed| Err(ClientError::transport(elapsed))),
        };

        let error = fetched.as_ref().err().map(ToString::to_string);
        match settle_logs(&block.logs_bloom, fetched) {
            Some(logs) => {
                debug!(block = block.number, logs = logs.len(), "Attached logs");
                block.settle(Some(logs));
                true
            }
            None => {
                block.unsettle();
                info!(
                    block = block.number,
                    hash = %block.hash,
                    error = error.as_deref().unwrap_or("empty result with non-zero bloom"),
                    "Log fetch failed, marking block for backfill"
                );
                false
            }
        }
    }
}
