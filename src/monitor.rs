//! The chain head monitor.
//!
//! [`Monitor`] ties the pieces together. Each poll iteration:
//!
//! 1. waits the adaptive interval (halved after every block found, reset to
//!    the configured interval when the node has nothing new or errors)
//! 2. fetches the block after the current head through [`RetryingFetcher`]
//! 3. reconciles it into the [`RetainedChain`] with [`ChainReconciler`]
//! 4. attaches logs and backfills earlier failures ([`LogAttacher`])
//! 5. enqueues the events into the [`TrailingPublishQueue`] and hands the
//!    released prefix to a relay task that broadcasts it through the
//!    [`SubscriberHub`]
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──run(ctx)──► Running ──stop()──► Stopped
//!   ▲                  │
//!   └─errors / ctx────┘
//! ```
//!
//! `stop()` is terminal: the root cancellation token fires, every wait in
//! the poll loop returns, and all subscriptions close. Cancelling the `ctx`
//! token handed to `run` only ends that run; subscriptions stay open and a
//! later `run` resumes from the retained head.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eth_head_monitor::monitor::{Monitor, MonitorOptions};
//! use eth_head_monitor::rpc::create_provider;
//! use tokio_util::sync::CancellationToken;
//!
//! let provider = create_provider(&rpc_url).await?;
//! let monitor = Arc::new(Monitor::new(provider, MonitorOptions::default())?);
//! let mut sub = monitor.subscribe();
//!
//! tokio::spawn({
//!     let monitor = Arc::clone(&monitor);
//!     async move { monitor.run(CancellationToken::new()).await }
//! });
//!
//! while let Some(batch) = sub.recv().await {
//!     for block in batch {
//!         println!("{:?} #{} {}", block.event, block.number, block.hash);
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy::primitives::B256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockEvent, Blocks, BlocksExt, TxLocation};
use crate::error::{MonitorError, MonitorResult};
use crate::logs::LogAttacher;
use crate::publish::hub::DEFAULT_BUFFER_WARNING;
use crate::publish::{SubscriberHub, Subscription, TrailingPublishQueue};
use crate::reorg::{ChainReconciler, RetainedChain};
use crate::rpc::{ChainClient, RetryingFetcher};

pub use crate::rpc::retry::RetryPolicy;

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Base delay between polls
    pub polling_interval: Duration,
    /// Deadline for each individual node call
    pub timeout: Duration,
    /// First block to fetch on a cold start, `None` for the latest block
    pub start_block: Option<u64>,
    /// Blocks an event is held back behind the head before publishing
    pub trail_num_blocks_behind_head: usize,
    /// Blocks kept in the retained window, on top of the trailing margin
    pub block_retention_limit: usize,
    /// Fetch logs for every added block
    pub with_logs: bool,
    /// Event signatures to filter logs on, empty for all logs
    pub log_topics: Vec<B256>,
    /// Emit a debug line per published batch
    pub debug_logging: bool,
    /// Attempt caps for block fetches
    pub retry: RetryPolicy,
    /// Subscriber backlog length that triggers a slow consumer warning
    pub subscriber_buffer_warning: usize,
    /// Upper bound on the pause between reorg unwind steps
    pub max_unwind_pause: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
            start_block: None,
            trail_num_blocks_behind_head: 0,
            block_retention_limit: 200,
            with_logs: false,
            log_topics: Vec::new(),
            debug_logging: false,
            retry: RetryPolicy::default(),
            subscriber_buffer_warning: DEFAULT_BUFFER_WARNING,
            max_unwind_pause: Duration::from_secs(30),
        }
    }
}

impl MonitorOptions {
    /// Size of the retained window: retention plus the trailing margin.
    #[must_use]
    pub const fn retention_limit(&self) -> usize {
        self.block_retention_limit + self.trail_num_blocks_behind_head
    }

    /// Capacity of the trailing publish queue, in blocks.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.retention_limit() * 2
    }

    /// Check that the options describe a runnable monitor.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigError`] naming the first invalid option.
    pub fn validate(&self) -> MonitorResult<()> {
        let invalid = |message: &str| Err(MonitorError::config(message, None));

        if self.polling_interval.is_zero() {
            return invalid("polling interval must be greater than zero");
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be greater than zero");
        }
        if self.block_retention_limit == 0 {
            return invalid("block retention limit must be at least 1");
        }
        if self.retry.max_error_attempts == 0 || self.retry.max_not_found_attempts == 0 {
            return invalid("retry attempt caps must be at least 1");
        }
        Ok(())
    }
}

/// Lifecycle of a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    /// Constructed, or the last run ended with an error
    Idle = 0,
    /// `run` is in progress
    Running = 1,
    /// `stop` was called; terminal
    Stopped = 2,
}

impl MonitorState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Reorg-aware chain head monitor over a [`ChainClient`].
#[derive(Debug)]
pub struct Monitor<C> {
    client: Arc<C>,
    options: MonitorOptions,
    chain: RetainedChain,
    queue: Mutex<TrailingPublishQueue>,
    hub: Arc<SubscriberHub>,
    state: AtomicU8,
    shutdown: CancellationToken,
    /// Events built by a run that ended before publishing them
    unpublished: Mutex<Blocks>,
}

impl<C: ChainClient> Monitor<C> {
    /// Create a monitor over `client`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigError`] if the options are invalid.
    pub fn new(client: C, options: MonitorOptions) -> MonitorResult<Self> {
        Self::with_shared_client(Arc::new(client), options)
    }

    /// Create a monitor over a client shared with other users.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigError`] if the options are invalid.
    pub fn with_shared_client(client: Arc<C>, options: MonitorOptions) -> MonitorResult<Self> {
        options.validate()?;

        let shutdown = CancellationToken::new();
        Ok(Self {
            client,
            chain: RetainedChain::new(options.retention_limit()),
            queue: Mutex::new(TrailingPublishQueue::new(options.queue_capacity())),
            hub: Arc::new(SubscriberHub::new(
                options.subscriber_buffer_warning,
                shutdown.clone(),
            )),
            state: AtomicU8::new(MonitorState::Idle as u8),
            shutdown,
            unpublished: Mutex::new(Blocks::new()),
            options,
        })
    }

    /// Options the monitor was built with.
    #[must_use]
    pub const fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// The underlying chain client.
    #[must_use]
    pub const fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether `run` is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Stop the monitor for good.
    ///
    /// A running poll loop returns `Ok(())` promptly and every subscription
    /// is closed.
    pub fn stop(&self) {
        info!("Stopping monitor");
        self.state
            .store(MonitorState::Stopped as u8, Ordering::Release);
        self.shutdown.cancel();
        self.hub.close();
    }

    /// Subscribe to published event batches.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Snapshot of the retained window, oldest first.
    #[must_use]
    pub fn chain_snapshot(&self) -> Blocks {
        self.chain.blocks()
    }

    /// Head of the retained window.
    #[must_use]
    pub fn latest_block(&self) -> Option<Block> {
        self.chain.head()
    }

    /// Retained block with `hash`.
    #[must_use]
    pub fn block(&self, hash: B256) -> Option<Block> {
        self.chain.find_block(hash, None)
    }

    /// Retained canonical block at `number`.
    #[must_use]
    pub fn block_by_number(&self, number: u64) -> Option<Block> {
        self.chain.block_by_number(number, BlockEvent::Added)
    }

    /// Locate a transaction within the retained window.
    #[must_use]
    pub fn transaction(&self, hash: B256) -> Option<TxLocation> {
        self.chain.transaction(hash)
    }

    /// Run the poll loop until `ctx` is cancelled, [`stop`](Self::stop) is
    /// called, or a fatal error.
    ///
    /// Resumes from the head of the retained window if there is one, else
    /// from the configured start block, else from the latest block. Events
    /// a previous run built but did not publish go out first.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::AlreadyRunning`] if another `run` is in progress
    /// - [`MonitorError::Stopped`] if the monitor has been stopped
    /// - integrity violations and [`MonitorError::QueueFull`], which end
    ///   the loop
    pub async fn run(&self, ctx: CancellationToken) -> MonitorResult<()> {
        if let Err(current) = self.state.compare_exchange(
            MonitorState::Idle as u8,
            MonitorState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match MonitorState::from_u8(current) {
                MonitorState::Stopped => MonitorError::Stopped,
                _ => MonitorError::AlreadyRunning,
            });
        }

        // Fires on either the caller's token or stop()
        let token = self.shutdown.child_token();
        let link = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::select! {
                    () = ctx.cancelled() => token.cancel(),
                    () = token.cancelled() => {}
                }
            }
        });

        let (publish_tx, publish_rx) = mpsc::channel(1);
        let relay = tokio::spawn(relay(
            Arc::clone(&self.hub),
            publish_rx,
            self.shutdown.clone(),
            self.options.debug_logging,
        ));

        let mut events = std::mem::take(&mut *self.lock_unpublished());
        let result = self.poll_loop(&token, &publish_tx, &mut events).await;
        *self.lock_unpublished() = events;
        drop(publish_tx);

        token.cancel();
        if let Err(e) = link.await {
            warn!(error = %e, "Cancellation link ended abnormally");
        }

        // The sender is gone, so the relay drains what is left and exits
        if let Err(e) = relay.await {
            warn!(error = %e, "Broadcast relay ended abnormally");
        }

        // Back to Idle unless stop() got there first
        let _ = self.state.compare_exchange(
            MonitorState::Running as u8,
            MonitorState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match result {
            Err(MonitorError::Cancelled) => {
                info!("Monitor stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Monitor terminated");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn lock_unpublished(&self) -> MutexGuard<'_, Blocks> {
        self.unpublished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_loop(
        &self,
        shutdown: &CancellationToken,
        publish: &mpsc::Sender<Blocks>,
        events: &mut Blocks,
    ) -> MonitorResult<()> {
        let opts = &self.options;
        let fetcher = RetryingFetcher::new(
            Arc::clone(&self.client),
            opts.polling_interval,
            opts.timeout,
            opts.retry,
            shutdown.clone(),
        );
        let reconciler = ChainReconciler::new(
            &self.chain,
            &fetcher,
            opts.polling_interval,
            opts.max_unwind_pause,
            shutdown,
        )
        .with_debug_logging(opts.debug_logging);
        let attacher = LogAttacher::new(
            Arc::clone(&self.client),
            opts.timeout,
            opts.log_topics.clone(),
            shutdown.clone(),
        );

        let mut next_number = match self.chain.head() {
            Some(head) => Some(head.number + 1),
            None => opts.start_block,
        };
        match next_number {
            Some(number) => info!(block = number, "Monitor starting"),
            None => info!("Monitor starting from latest block"),
        }

        let mut interval = opts.polling_interval;

        loop {
            pause(shutdown, interval).await?;

            if let Some(head) = self.chain.head() {
                next_number = Some(head.number + 1);
            }

            let next = match fetcher.block_by_number(next_number).await {
                Ok(block) => {
                    interval /= 2;
                    block
                }
                Err(MonitorError::NotFound) => {
                    interval = opts.polling_interval;
                    continue;
                }
                Err(MonitorError::Cancelled) => return Err(MonitorError::Cancelled),
                Err(e) => {
                    warn!(block = ?next_number, error = %e, "Failed to fetch next block, retrying");
                    interval = opts.polling_interval;
                    continue;
                }
            };

            let (number, hash) = (next.number, next.hash);
            if let Err(e) = reconciler.reconcile(next, events).await {
                if matches!(e, MonitorError::Cancelled) || e.is_fatal() {
                    return Err(e);
                }
                warn!(
                    block = number,
                    %hash,
                    error = %e,
                    "Failed to build canonical chain, retrying"
                );
                pause(shutdown, opts.polling_interval).await?;
                continue;
            }

            if opts.with_logs {
                attacher.attach(events, &self.chain).await;
                attacher.backfill(&self.chain).await;
            } else {
                LogAttacher::<C>::stamp(events, &self.chain);
            }

            self.publish(shutdown, publish, std::mem::take(events)).await?;
        }
    }

    /// Enqueue `events` and hand the released prefix to the relay.
    async fn publish(
        &self,
        shutdown: &CancellationToken,
        relay: &mpsc::Sender<Blocks>,
        events: Blocks,
    ) -> MonitorResult<()> {
        let released = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.enqueue(events)?;

            let trail = self.options.trail_num_blocks_behind_head as u64;
            if trail == 0 {
                queue.dequeue(None)
            } else {
                match self.chain.head() {
                    Some(head) => queue.dequeue(Some(head.number.saturating_sub(trail))),
                    None => None,
                }
            }
        };

        if let Some(mut batch) = released {
            LogAttacher::<C>::refresh(&mut batch, &self.chain);
            tokio::select! {
                () = shutdown.cancelled() => return Err(MonitorError::Cancelled),
                res = relay.send(batch) => {
                    if res.is_err() {
                        return Err(MonitorError::Cancelled);
                    }
                }
            }
        }
        Ok(())
    }
}

async fn pause(shutdown: &CancellationToken, delay: Duration) -> MonitorResult<()> {
    tokio::select! {
        () = shutdown.cancelled() => Err(MonitorError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Broadcast released batches until the poll loop hangs up or shutdown.
async fn relay(
    hub: Arc<SubscriberHub>,
    mut released: mpsc::Receiver<Blocks>,
    shutdown: CancellationToken,
    debug_logging: bool,
) {
    loop {
        let batch = tokio::select! {
            () = shutdown.cancelled() => break,
            batch = released.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        if debug_logging {
            debug!(
                block = batch.latest_added().map(|b| b.number),
                events = batch.len(),
                reorg = batch.has_reorg(),
                "Publishing block events"
            );
        }
        hub.broadcast(&batch).await;
    }
}
