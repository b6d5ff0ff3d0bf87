//! Publishing of reconciled block events.
//!
//! Event batches leave the poll loop through two stages:
//!
//! 1. [`TrailingPublishQueue`] holds them back until they trail the chain
//!    head by the configured margin
//! 2. [`SubscriberHub`] fans released batches out to every [`Subscription`]
//!
//! With a zero margin every batch is released as soon as it is enqueued.

pub mod hub;
pub mod queue;

pub use hub::{SubscriberHub, Subscription};
pub use queue::TrailingPublishQueue;
