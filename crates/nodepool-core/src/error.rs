//! Construction-time validation errors.
//!
//! A process-wide fatal exit on bad constructor arguments is a fine default
//! for a binary but wrong for a library, so construction here returns a
//! typed error from a fallible builder instead; a caller that wants
//! fail-fast behavior can still `.expect()` it.

use thiserror::Error;

/// Errors returned by [`crate::node::NodeConfigBuilder::build`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeConfigError {
    #[error("node name cannot be empty")]
    EmptyName,
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("limit.count must be >= 1")]
    ZeroLimitCount,
    #[error("limit.per must be >= 1ms")]
    ZeroLimitPer,
    #[error("request_timeout must be >= 1ms")]
    ZeroRequestTimeout,
}

/// Errors returned by [`crate::chain::ChainConfigBuilder::build`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainConfigError {
    #[error("chain id cannot be empty")]
    EmptyId,
    #[error("tick_rate must be >= 50ms")]
    TickRateTooSmall,
    #[error("max_check_duration must be >= tick_rate")]
    MaxCheckDurationTooSmall,
    #[error("duplicate node name: {0}")]
    DuplicateNodeName(String),
    #[error("chain must have at least one node")]
    NoNodes,
}
