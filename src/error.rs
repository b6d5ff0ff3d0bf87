//! Error types for the chain head monitor.
//!
//! This module provides a unified error type [`MonitorError`] covering every
//! failure the monitor can observe while polling, reconciling, enriching and
//! publishing blocks.
//!
//! # Design
//!
//! The variants fall into three groups:
//! - Expected conditions: [`MonitorError::NotFound`] (block not mined yet) and
//!   [`MonitorError::Cancelled`] (the root shutdown signal fired)
//! - Recoverable failures: [`MonitorError::RpcError`] and
//!   [`MonitorError::MaxAttemptsExceeded`], retried by the poll loop
//! - Fatal failures: chain integrity violations and
//!   [`MonitorError::QueueFull`], which stop [`Monitor::run`](crate::monitor::Monitor::run)
//!
//! # Example
//!
//! ```
//! use eth_head_monitor::error::{MonitorError, MonitorResult};
//!
//! fn validate_retention(limit: usize) -> MonitorResult<()> {
//!     if limit == 0 {
//!         return Err(MonitorError::config("retention limit cannot be zero", None));
//!     }
//!     Ok(())
//! }
//! ```

use alloy::primitives::B256;
use std::fmt;

/// Result type alias using [`MonitorError`].
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Unified error type for the chain head monitor.
#[derive(Debug)]
pub enum MonitorError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient RPC or transport failure.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested block is not available on the node (yet).
    NotFound,

    /// A pushed block does not link to the current chain head.
    UnexpectedParentHash {
        /// Hash of the current head
        expected: B256,
        /// Parent hash carried by the rejected block
        got: B256,
    },

    /// A pushed block does not carry the next sequential number.
    UnexpectedBlockNumber {
        /// Head number + 1
        expected: u64,
        /// Number carried by the rejected block
        got: u64,
    },

    /// The transport kept failing after the bounded number of retries.
    MaxAttemptsExceeded {
        /// Number of attempts made
        attempts: u32,
        /// Last error encountered
        last_error: String,
    },

    /// The trailing publish backlog would exceed its capacity.
    QueueFull {
        /// Configured capacity in blocks
        capacity: usize,
        /// Blocks already held back
        pending: usize,
        /// Blocks in the rejected batch
        incoming: usize,
    },

    /// `run` was called while the monitor is already running.
    AlreadyRunning,

    /// The monitor has been stopped and cannot be started again.
    Stopped,

    /// The root shutdown signal fired while an operation was waiting.
    Cancelled,
}

impl MonitorError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use eth_head_monitor::error::MonitorError;
    ///
    /// let err = MonitorError::config("RPC_URL not set", None);
    /// assert!(matches!(err, MonitorError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use eth_head_monitor::error::MonitorError;
    ///
    /// let err = MonitorError::rpc("connection reset", None);
    /// assert!(matches!(err, MonitorError::RpcError { .. }));
    /// ```
    #[must_use]
    pub fn rpc(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a max attempts exceeded error.
    #[must_use]
    pub fn max_attempts(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::MaxAttemptsExceeded {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Whether this error must terminate the run loop.
    ///
    /// Integrity violations mean reconciliation produced an inconsistent step,
    /// and a full queue means subscribers cannot keep up with the chain.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedParentHash { .. }
                | Self::UnexpectedBlockNumber { .. }
                | Self::QueueFull { .. }
        )
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::NotFound => write!(f, "Block not found"),
            Self::UnexpectedParentHash { expected, got } => {
                write!(f, "Unexpected parent hash: expected {expected}, got {got}")
            }
            Self::UnexpectedBlockNumber { expected, got } => {
                write!(f, "Unexpected block number: expected {expected}, got {got}")
            }
            Self::MaxAttemptsExceeded {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Max attempts ({attempts}) exceeded. Last error: {last_error}"
                )
            }
            Self::QueueFull {
                capacity,
                pending,
                incoming,
            } => {
                write!(
                    f,
                    "Publish queue is full: {pending} pending + {incoming} incoming > {capacity}"
                )
            }
            Self::AlreadyRunning => write!(f, "Monitor is already running"),
            Self::Stopped => write!(f, "Monitor has been stopped"),
            Self::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. } | Self::RpcError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            _ => None,
        }
    }
}

/// Convert from `eyre::Report` to `MonitorError`.
///
/// Reports that don't fit a specific category are treated as RPC errors.
impl From<eyre::Report> for MonitorError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}
