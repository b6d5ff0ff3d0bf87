//! Bounded retry around [`ChainClient`] block fetches.
//!
//! Every call gets its own deadline. Transport failures are retried with a
//! linearly increasing backoff of `attempt * poll_interval * 2` until the
//! error cap is hit. "Not found" is handled differently per call:
//!
//! - by number it returns immediately, the block is simply not mined yet
//! - by hash it is retried under its own, smaller cap, since an ancestor
//!   on a fork that is still propagating may show up a moment later
//!
//! All waits observe the root cancellation token.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChainClient, ClientError};
use crate::block::Block;
use crate::error::{MonitorError, MonitorResult};

/// Attempt caps for the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transport failures tolerated per fetch
    pub max_error_attempts: u32,
    /// "Not found" answers tolerated per fetch by hash
    pub max_not_found_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_error_attempts: 10,
            max_not_found_attempts: 4,
        }
    }
}

/// Fetches blocks through a [`ChainClient`] with timeouts and retries.
#[derive(Debug)]
pub struct RetryingFetcher<C> {
    client: Arc<C>,
    poll_interval: Duration,
    timeout: Duration,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl<C: ChainClient> RetryingFetcher<C> {
    /// Create a fetcher over `client`.
    pub const fn new(
        client: Arc<C>,
        poll_interval: Duration,
        timeout: Duration,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            poll_interval,
            timeout,
            policy,
            shutdown,
        }
    }

    /// Delay before the next try after `attempt` failures.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.poll_interval.saturating_mul(attempt.saturating_mul(2))
    }

    /// Fetch the block at `number`, or the latest block for `None`.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::NotFound`] if the node has no such block yet
    /// - [`MonitorError::MaxAttemptsExceeded`] after the error cap
    /// - [`MonitorError::Cancelled`] if shutdown fires while waiting
    pub async fn block_by_number(&self, number: Option<u64>) -> MonitorResult<Block> {
        let mut errors = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            match self.call(self.client.block_by_number(number)).await? {
                Ok(block) => return Ok(block),
                Err(ClientError::NotFound) => return Err(MonitorError::NotFound),
                Err(e) => {
                    errors += 1;
                    if errors >= self.policy.max_error_attempts {
                        warn!(
                            block = ?number,
                            attempts = errors,
                            error = %e,
                            "block_by_number hit max attempts"
                        );
                        return Err(MonitorError::max_attempts(errors, e.to_string()));
                    }
                    debug!(block = ?number, attempt = errors, error = %e, "Retrying block_by_number");
                    self.pause(self.backoff(errors)).await?;
                }
            }
        }
    }

    /// Fetch the block with `hash`.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::NotFound`] once the not-found cap is hit
    /// - [`MonitorError::MaxAttemptsExceeded`] after the error cap
    /// - [`MonitorError::Cancelled`] if shutdown fires while waiting
    pub async fn block_by_hash(&self, hash: B256) -> MonitorResult<Block> {
        let mut errors = 0;
        let mut not_found = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            match self.call(self.client.block_by_hash(hash)).await? {
                Ok(block) => return Ok(block),
                Err(ClientError::NotFound) => {
                    not_found += 1;
                    if not_found >= self.policy.max_not_found_attempts {
                        debug!(%hash, attempts = not_found, "Block by hash still not found");
                        return Err(MonitorError::NotFound);
                    }
                    self.pause(self.backoff(not_found)).await?;
                }
                Err(e) => {
                    errors += 1;
                    if errors >= self.policy.max_error_attempts {
                        warn!(
                            %hash,
                            attempts = errors,
                            error = %e,
                            "block_by_hash hit max attempts"
                        );
                        return Err(MonitorError::max_attempts(errors, e.to_string()));
                    }
                    self.pause(self.backoff(errors)).await?;
                }
            }
        }
    }

    /// Run one client call under the per-call deadline.
    ///
    /// The outer `Err` is cancellation; an elapsed deadline is reported as a
    /// transport failure so it is retried.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ClientError>>,
    ) -> MonitorResult<Result<T, ClientError>> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(MonitorError::Cancelled),
            res = tokio::time::timeout(self.timeout, fut) => {
                Ok(res.unwrap_or_else(|elapsed| Err(ClientError::transport(elapsed))))
            }
        }
    }

    async fn pause(&self, delay: Duration) -> MonitorResult<()> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(MonitorError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
