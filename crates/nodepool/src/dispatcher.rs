//! The per-request retry state machine, grounded in
//! `examples/original_source/eznode.go` (`Send`/`sendWithExclude`) and
//! `chain_response_metadata.go`, rewritten as an explicit loop per
//! DESIGN.md's "recursive retry" note rather than the source's self-recursion.

use crate::cancellation::Cancellation;
use crate::error::{
    DispatchError, DispatcherConfigError, TransportError, STATUS_CHAIN_FULL, STATUS_MAX_RETRIES,
    STATUS_TIMEOUT, STATUS_TRANSPORT_ERROR,
};
use crate::events::DispatchEvent;
use crate::request::Request;
use crate::stats_sync::{StatsSync, SyncCallback};
use crate::trace::{ChainResponseMetadata, NodeTrace};
use crate::transport::{Transport, TransportResponse};
use nodepool_core::{Chain, ChainStats, EventListener, EventListeners};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// A send against one or more nodes of a chain, with retry across failures.
pub struct Dispatcher {
    chains: HashMap<String, Arc<Chain>>,
    transport: Arc<dyn Transport>,
    events: EventListeners<DispatchEvent>,
    stats_sync: StatsSync,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Sends `request` against `chain_id`, retrying on other nodes in the
    /// chain until success or exhaustion. Equivalent to `send_to` with an
    /// empty `include` set.
    pub async fn send(
        &self,
        chain_id: &str,
        request: Request,
    ) -> Result<(TransportResponse, ChainResponseMetadata), DispatchError> {
        self.send_with(chain_id, request, HashSet::new(), Cancellation::new())
            .await
    }

    /// Like [`Dispatcher::send`], restricted to nodes named in `include`.
    pub async fn send_to(
        &self,
        chain_id: &str,
        request: Request,
        include: HashSet<String>,
    ) -> Result<(TransportResponse, ChainResponseMetadata), DispatchError> {
        self.send_with(chain_id, request, include, Cancellation::new())
            .await
    }

    /// Like [`Dispatcher::send`], but the send aborts promptly once `cancel`
    /// resolves (spec.md §5 "Cancellation").
    pub async fn send_cancellable(
        &self,
        chain_id: &str,
        request: Request,
        cancel: Cancellation,
    ) -> Result<(TransportResponse, ChainResponseMetadata), DispatchError> {
        self.send_with(chain_id, request, HashSet::new(), cancel)
            .await
    }

    async fn send_with(
        &self,
        chain_id: &str,
        request: Request,
        include: HashSet<String>,
        cancel: Cancellation,
    ) -> Result<(TransportResponse, ChainResponseMetadata), DispatchError> {
        let chain = self
            .chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownChain {
                chain_id: chain_id.to_string(),
            })?;

        let requested_url = request.path.clone();
        let retry_count = chain.retry_count();
        let mut exclude: HashSet<String> = HashSet::new();
        let mut trace: Vec<NodeTrace> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled {
                    chain_id: chain_id.to_string(),
                    metadata: ChainResponseMetadata {
                        chain_id: chain_id.to_string(),
                        requested_url,
                        retry: attempt,
                        trace,
                    },
                });
            }

            if attempt > retry_count {
                self.record_exhausted(chain_id, attempt);
                trace.push(NodeTrace {
                    time: SystemTime::now(),
                    node_name: String::new(),
                    status_code: STATUS_MAX_RETRIES,
                    err: Some("reached max retries".to_string()),
                });
                return Err(DispatchError::MaxRetries {
                    chain_id: chain_id.to_string(),
                    metadata: ChainResponseMetadata {
                        chain_id: chain_id.to_string(),
                        requested_url,
                        retry: attempt,
                        trace,
                    },
                });
            }

            let reservation = chain
                .reserve_wait(&exclude, &include, cancel.cancelled())
                .await;

            let reservation = match reservation {
                Some(r) => r,
                None if cancel.is_cancelled() => {
                    return Err(DispatchError::Cancelled {
                        chain_id: chain_id.to_string(),
                        metadata: ChainResponseMetadata {
                            chain_id: chain_id.to_string(),
                            requested_url,
                            retry: attempt,
                            trace,
                        },
                    });
                }
                None => {
                    self.record_exhausted(chain_id, attempt);
                    trace.push(NodeTrace {
                        time: SystemTime::now(),
                        node_name: String::new(),
                        status_code: STATUS_CHAIN_FULL,
                        err: Some("chain at full capacity".to_string()),
                    });
                    return Err(DispatchError::ChainFull {
                        chain_id: chain_id.to_string(),
                        metadata: ChainResponseMetadata {
                            chain_id: chain_id.to_string(),
                            requested_url,
                            retry: attempt,
                            trace,
                        },
                    });
                }
            };

            let node = reservation.node;
            chain.schedule_release(node.name().to_string(), node.limit().per());

            let prepared = match request.prepare_against(node.base_url()) {
                Ok(p) => node.apply_middleware(p),
                Err(e) => {
                    return Err(DispatchError::BodyReadError {
                        source: Box::new(e),
                    })
                }
            };

            let deadline = node.request_timeout();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Timeout),
                r = self.transport.do_request(prepared, deadline) => r,
            };

            match outcome {
                Ok(response) if !chain.failure_status_codes().contains(&response.status) => {
                    trace.push(NodeTrace {
                        time: SystemTime::now(),
                        node_name: node.name().to_string(),
                        status_code: response.status,
                        err: None,
                    });

                    let recorded = Arc::clone(&node);
                    let status = response.status;
                    tokio::spawn(async move {
                        Chain::record_outcome(&recorded, status, false);
                    });

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "nodepool_dispatch_succeeded_total",
                        "chain" => chain_id.to_string(),
                    )
                    .increment(1);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        chain_id,
                        node_name = %node.name(),
                        attempt,
                        status = response.status,
                        "dispatch succeeded"
                    );

                    self.events.emit(&DispatchEvent::DispatchSucceeded {
                        timestamp: Instant::now(),
                        chain_id: chain_id.to_string(),
                        node_name: node.name().to_string(),
                        attempt,
                    });

                    return Ok((
                        response,
                        ChainResponseMetadata {
                            chain_id: chain_id.to_string(),
                            requested_url,
                            retry: attempt,
                            trace,
                        },
                    ));
                }
                Ok(response) => {
                    let status = response.status;
                    trace.push(NodeTrace {
                        time: SystemTime::now(),
                        node_name: node.name().to_string(),
                        status_code: status,
                        err: Some(format!("request failed with status code {status}")),
                    });

                    let recorded = Arc::clone(&node);
                    tokio::spawn(async move {
                        Chain::record_outcome(&recorded, status, true);
                    });

                    self.record_attempt_failed(chain_id, node.name(), status);

                    exclude.insert(node.name().to_string());
                    attempt += 1;
                }
                Err(transport_err) => {
                    let (status_key, message) = match &transport_err {
                        TransportError::Timeout => {
                            (STATUS_TIMEOUT, "attempt timed out".to_string())
                        }
                        TransportError::Other(e) => (STATUS_TRANSPORT_ERROR, e.to_string()),
                    };

                    trace.push(NodeTrace {
                        time: SystemTime::now(),
                        node_name: node.name().to_string(),
                        status_code: status_key,
                        err: Some(message),
                    });

                    let recorded = Arc::clone(&node);
                    tokio::spawn(async move {
                        Chain::record_outcome(&recorded, status_key, true);
                    });

                    self.record_attempt_failed(chain_id, node.name(), status_key);

                    exclude.insert(node.name().to_string());
                    attempt += 1;
                }
            }
        }
    }

    fn record_exhausted(&self, chain_id: &str, attempts: u32) {
        #[cfg(feature = "metrics")]
        metrics::counter!("nodepool_dispatch_exhausted_total", "chain" => chain_id.to_string())
            .increment(1);

        #[cfg(feature = "tracing")]
        tracing::warn!(chain_id, attempts, "dispatch exhausted");

        self.events.emit(&DispatchEvent::DispatchExhausted {
            timestamp: Instant::now(),
            chain_id: chain_id.to_string(),
            attempts,
        });
    }

    fn record_attempt_failed(&self, chain_id: &str, node_name: &str, status_code: u16) {
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "nodepool_attempts_failed_total",
            "chain" => chain_id.to_string(),
            "node" => node_name.to_string(),
        )
        .increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(chain_id, node_name, status_code, "attempt failed, retrying");

        self.events.emit(&DispatchEvent::AttemptFailed {
            timestamp: Instant::now(),
            chain_id: chain_id.to_string(),
            node_name: node_name.to_string(),
            status_code,
        });
    }

    pub fn disable_node(&self, chain_id: &str, node_name: &str) {
        if let Some(chain) = self.chains.get(chain_id) {
            chain.disable(node_name);
        }
    }

    pub fn enable_node(&self, chain_id: &str, node_name: &str) {
        if let Some(chain) = self.chains.get(chain_id) {
            chain.enable(node_name);
        }
    }

    pub fn disable_node_for(&self, chain_id: &str, node_name: &str, duration: Duration) {
        if let Some(chain) = self.chains.get(chain_id) {
            chain.disable_for(node_name.to_string(), duration);
        }
    }

    /// Snapshots every chain's stats (spec.md §4.5 `snapshot()`).
    pub fn stats(&self) -> Vec<ChainStats> {
        self.chains.values().map(|c| c.stats()).collect()
    }

    /// Restores `total_hits`/`response_stats`/`fails` per `(chain_id,
    /// node_name)`; `current_hits` is left untouched (spec.md §4.5 `load()`).
    pub fn load_stats(&self, snapshots: &[ChainStats]) {
        for snapshot in snapshots {
            if let Some(chain) = self.chains.get(&snapshot.id) {
                chain.load(snapshot);
            }
        }
    }

    /// Starts the periodic stats-sync ticker. Idempotent.
    pub async fn start_stats_sync(self: &Arc<Self>, callback: SyncCallback) {
        let dispatcher = Arc::clone(self);
        self.stats_sync
            .start(move || dispatcher.stats(), callback)
            .await;
    }

    /// Stops the periodic stats-sync ticker. Idempotent.
    pub async fn stop_stats_sync(&self) {
        self.stats_sync.stop().await;
    }

    pub async fn is_stats_sync_running(&self) -> bool {
        self.stats_sync.is_running().await
    }

    pub fn chain(&self, chain_id: &str) -> Option<&Arc<Chain>> {
        self.chains.get(chain_id)
    }
}

/// Validated construction of a [`Dispatcher`] (spec.md §6 "Dispatcher
/// public surface").
pub struct DispatcherBuilder {
    chains: Vec<Arc<Chain>>,
    transport: Option<Arc<dyn Transport>>,
    sync_interval: Duration,
    events: EventListeners<DispatchEvent>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            chains: Vec::new(),
            transport: None,
            sync_interval: Duration::from_secs(60),
            events: EventListeners::new(),
        }
    }

    pub fn chain(mut self, chain: Arc<Chain>) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn chains(mut self, chains: impl IntoIterator<Item = Arc<Chain>>) -> Self {
        self.chains.extend(chains);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener<DispatchEvent> + 'static,
    {
        self.events.add(listener);
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatcherConfigError> {
        if self.chains.is_empty() {
            return Err(DispatcherConfigError::NoChains);
        }
        if self.sync_interval.is_zero() {
            return Err(DispatcherConfigError::SyncIntervalNotPositive);
        }

        let mut chains = HashMap::with_capacity(self.chains.len());
        for chain in self.chains {
            let id = chain.id().to_string();
            if chains.insert(id.clone(), chain).is_some() {
                return Err(DispatcherConfigError::DuplicateChainId(id));
            }
        }

        let transport = self.transport.or_else(default_transport).ok_or(
            DispatcherConfigError::NoTransport,
        )?;

        Ok(Dispatcher {
            chains,
            transport,
            events: self.events,
            stats_sync: StatsSync::new(self.sync_interval),
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "reqwest-transport")]
fn default_transport() -> Option<Arc<dyn Transport>> {
    Some(Arc::new(crate::transport::ReqwestTransport::new()))
}

#[cfg(not(feature = "reqwest-transport"))]
fn default_transport() -> Option<Arc<dyn Transport>> {
    None
}
