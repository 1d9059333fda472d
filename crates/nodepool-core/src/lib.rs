//! Node and chain primitives: windowed rate limiting, priority-based
//! selection, and the metrics a dispatcher needs to retry and report on
//! outbound HTTP calls across a pool of equivalent upstream nodes.
//!
//! This crate has no notion of a retry loop or a transport — see the
//! `nodepool` crate for the dispatcher that sits on top of it.

pub mod chain;
pub mod error;
pub mod events;
pub mod failure_codes;
pub mod limit;
pub mod node;
pub mod stats;

pub use chain::{Chain, ChainConfigBuilder, Reservation};
pub use error::{ChainConfigError, NodeConfigError};
pub use events::{ChainEvent, EventListener, EventListeners, FnListener, NodePoolEvent};
pub use failure_codes::DEFAULT_FAILURE_STATUS_CODES;
pub use limit::NodeLimit;
pub use node::{Node, NodeConfigBuilder, PreparedRequest, RequestMiddleware};
pub use stats::{ChainNodeStats, ChainStats};
