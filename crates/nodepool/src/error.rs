//! Dispatch-time errors, grounded in `examples/original_source/error.go`.
//!
//! Only the four kinds that actually abort a send are surfaced here
//! (spec.md §7 "Propagation"); per-attempt transport errors and invalid
//! statuses never reach the caller directly — they show up as entries in
//! the trace carried by the terminal error or the success metadata.

use crate::trace::ChainResponseMetadata;
use thiserror::Error;

/// Why a [`crate::Dispatcher::send`] call failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown chain: {chain_id}")]
    UnknownChain { chain_id: String },

    #[error("chain {chain_id} at full capacity")]
    ChainFull {
        chain_id: String,
        metadata: ChainResponseMetadata,
    },

    #[error("reached max retries on chain {chain_id}")]
    MaxRetries {
        chain_id: String,
        metadata: ChainResponseMetadata,
    },

    #[error("failed to buffer request body")]
    BodyReadError {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The caller's cancellation handle resolved while an attempt was
    /// in flight. Not one of spec.md §7's named kinds — added because §5
    /// requires the send to return promptly rather than keep retrying once
    /// the caller has given up.
    #[error("send on chain {chain_id} was cancelled")]
    Cancelled {
        chain_id: String,
        metadata: ChainResponseMetadata,
    },
}

impl DispatchError {
    /// The trace accumulated before this error was raised, if any
    /// (`UnknownChain` and `BodyReadError` occur before a trace exists).
    pub fn metadata(&self) -> Option<&ChainResponseMetadata> {
        match self {
            DispatchError::ChainFull { metadata, .. } => Some(metadata),
            DispatchError::MaxRetries { metadata, .. } => Some(metadata),
            DispatchError::Cancelled { metadata, .. } => Some(metadata),
            DispatchError::UnknownChain { .. } | DispatchError::BodyReadError { .. } => None,
        }
    }
}

/// A transport-level failure for a single attempt — never surfaced to the
/// caller directly, only recorded into a [`crate::trace::NodeTrace`] entry
/// and used to decide whether to retry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("attempt timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by [`crate::DispatcherBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatcherConfigError {
    #[error("duplicate chain id: {0}")]
    DuplicateChainId(String),
    #[error("dispatcher must have at least one chain")]
    NoChains,
    #[error("sync_interval must be > 0")]
    SyncIntervalNotPositive,
    #[error("no transport configured and the reqwest-transport default feature is disabled")]
    NoTransport,
}

/// Synthetic status keys used in `response_stats` / trace entries for
/// attempts that never reached a real HTTP status (spec.md §3, §4.2).
pub const STATUS_TIMEOUT: u16 = 408;
pub const STATUS_TRANSPORT_ERROR: u16 = 0;
pub const STATUS_CHAIN_FULL: u16 = 429;
pub const STATUS_MAX_RETRIES: u16 = 424;
