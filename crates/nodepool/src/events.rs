//! Dispatch-level events, layered on top of [`nodepool_core::ChainEvent`]
//! (reservation/release/disable events are emitted by the chain itself;
//! these three cover the parts only the dispatcher can see).

use nodepool_core::NodePoolEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// One attempt failed and the dispatcher is about to retry on another node.
    AttemptFailed {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
        status_code: u16,
    },
    /// A send completed successfully, possibly after retries.
    DispatchSucceeded {
        timestamp: Instant,
        chain_id: String,
        node_name: String,
        attempt: u32,
    },
    /// A send exhausted its retry budget or the chain had no candidate.
    DispatchExhausted {
        timestamp: Instant,
        chain_id: String,
        attempts: u32,
    },
}

impl NodePoolEvent for DispatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispatchEvent::AttemptFailed { .. } => "AttemptFailed",
            DispatchEvent::DispatchSucceeded { .. } => "DispatchSucceeded",
            DispatchEvent::DispatchExhausted { .. } => "DispatchExhausted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            DispatchEvent::AttemptFailed { timestamp, .. }
            | DispatchEvent::DispatchSucceeded { timestamp, .. }
            | DispatchEvent::DispatchExhausted { timestamp, .. } => *timestamp,
        }
    }
}
