//! Fan-out of published batches to independent subscribers.
//!
//! Each subscriber gets a forwarding task that owns an unbounded backlog.
//! The hub hands a batch to the task through a one-slot channel and the task
//! passes it on whenever the subscriber is ready to receive, so a consumer
//! that stops reading only grows its own backlog:
//!
//! ```text
//! broadcast ──► input (1) ──► forwarder [backlog] ──► output (1) ──► Subscription
//!                                  │
//!                               done token
//! ```
//!
//! Every subscriber has a `done` token, a child of the hub's root token.
//! Cancelling it aborts in-flight broadcast sends to that subscriber and
//! stops its forwarder.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block::Blocks;

/// Default backlog length above which a slow subscriber is reported.
pub const DEFAULT_BUFFER_WARNING: usize = 100;

#[derive(Debug, Clone)]
struct Subscriber {
    input: mpsc::Sender<Blocks>,
    done: CancellationToken,
}

type Registry = Mutex<HashMap<u64, Subscriber>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The set of live subscribers.
#[derive(Debug)]
pub struct SubscriberHub {
    subscribers: Arc<Registry>,
    next_id: AtomicU64,
    buffer_warning: usize,
    root: CancellationToken,
}

impl SubscriberHub {
    /// Create a hub whose subscribers end when `root` is cancelled.
    #[must_use]
    pub fn new(buffer_warning: usize, root: CancellationToken) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            buffer_warning,
            root,
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.subscribers).is_empty()
    }

    /// Register a new subscriber.
    ///
    /// Must be called within a Tokio runtime, the forwarder is spawned on it.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let done = self.root.child_token();
        let (input_tx, input_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(1);

        tokio::spawn(forward(
            id,
            input_rx,
            output_tx,
            done.clone(),
            self.buffer_warning,
        ));

        lock(&self.subscribers).insert(
            id,
            Subscriber {
                input: input_tx,
                done: done.clone(),
            },
        );
        debug!(subscriber = id, "Subscriber added");

        Subscription {
            id,
            receiver: output_rx,
            done,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver `batch` to every live subscriber.
    ///
    /// A send waits for the subscriber's forwarder to take the batch, which
    /// only blocks while the forwarder is busy handing over the previous
    /// one. Sends to a subscriber whose `done` fires are abandoned.
    pub async fn broadcast(&self, batch: &Blocks) {
        // Sends happen outside the lock so unsubscribe never waits on them
        let subscribers: Vec<(u64, Subscriber)> = lock(&self.subscribers)
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, sub) in subscribers {
            if sub.done.is_cancelled() {
                dead.push(id);
                continue;
            }
            tokio::select! {
                () = sub.done.cancelled() => dead.push(id),
                res = sub.input.send(batch.clone()) => {
                    if res.is_err() {
                        dead.push(id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut registry = lock(&self.subscribers);
            for id in dead {
                if registry.remove(&id).is_some() {
                    debug!(subscriber = id, "Pruned closed subscriber");
                }
            }
        }
    }

    /// Cancel every subscriber and clear the set.
    pub fn close(&self) {
        let mut registry = lock(&self.subscribers);
        for sub in registry.values() {
            sub.done.cancel();
        }
        registry.clear();
    }
}

/// Unbounded mailbox between the hub and one subscriber.
///
/// Exits when `done` fires, when the subscriber drops its receiver, or once
/// the hub side is closed and the backlog is delivered.
async fn forward(
    id: u64,
    mut input: mpsc::Receiver<Blocks>,
    output: mpsc::Sender<Blocks>,
    done: CancellationToken,
    buffer_warning: usize,
) {
    let mut backlog: VecDeque<Blocks> = VecDeque::new();
    let mut input_open = true;

    loop {
        if !input_open && backlog.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            () = done.cancelled() => break,

            batch = input.recv(), if input_open => match batch {
                Some(batch) => {
                    backlog.push_back(batch);
                    if backlog.len() > buffer_warning {
                        warn!(
                            subscriber = id,
                            buffered = backlog.len(),
                            limit = buffer_warning,
                            "Subscriber backlog above limit"
                        );
                    }
                }
                None => input_open = false,
            },

            permit = output.reserve(), if !backlog.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(batch) = backlog.pop_front() {
                        permit.send(batch);
                    }
                }
                Err(_) => break,
            },
        }
    }

    debug!(subscriber = id, dropped = backlog.len(), "Subscriber forwarder exited");
}

/// A receiving handle on the monitor's published batches.
///
/// Batches arrive in publish order. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Blocks>,
    done: CancellationToken,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Identifier of this subscriber within its hub.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next batch, `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Blocks> {
        if self.done.is_cancelled() {
            return None;
        }
        tokio::select! {
            () = self.done.cancelled() => None,
            batch = self.receiver.recv() => batch,
        }
    }

    /// Token cancelled when the subscription closes, by
    /// [`unsubscribe`](Self::unsubscribe) or by the monitor stopping.
    #[must_use]
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Whether the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Close the subscription and leave the hub. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        self.done.cancel();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).remove(&self.id).is_some() {
                debug!(subscriber = self.id, "Subscriber removed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for Subscription {
    type Item = Blocks;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done.is_cancelled() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}
