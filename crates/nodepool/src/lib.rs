//! A client-side HTTP dispatcher that multiplexes outbound requests across
//! named chains of rate-limited, priority-ranked upstream nodes, retrying
//! on failure until success or exhaustion.
//!
//! Node/chain selection and windowed admission live in `nodepool-core`;
//! this crate adds the transport seam, the retry state machine, and the
//! background stats synchroniser on top of it.

pub mod cancellation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod request;
pub mod stats_sync;
pub mod trace;
pub mod transport;

pub use cancellation::Cancellation;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, DispatcherConfigError, TransportError};
pub use events::DispatchEvent;
pub use request::Request;
pub use stats_sync::SyncCallback;
pub use trace::{ChainResponseMetadata, NodeTrace};
pub use transport::{Transport, TransportResponse};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;

pub use nodepool_core::{
    Chain, ChainConfigBuilder, ChainConfigError, ChainEvent, ChainNodeStats, ChainStats,
    EventListener, EventListeners, FnListener, Node, NodeConfigBuilder, NodeConfigError,
    NodeLimit, NodePoolEvent, DEFAULT_FAILURE_STATUS_CODES,
};
