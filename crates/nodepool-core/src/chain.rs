//! A chain owns a fixed set of nodes and implements priority- and
//! load-aware selection with windowed rate limiting, grounded in
//! `examples/original_source/chain.go` / `chain_disable_node.go` and, for
//! the concurrency model, spec.md §4.1/§4.4/§5.

use crate::error::ChainConfigError;
use crate::events::{ChainEvent, EventListener, EventListeners};
use crate::failure_codes::DEFAULT_FAILURE_STATUS_CODES;
use crate::node::Node;
use crate::stats::{ChainNodeStats, ChainStats};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Polling parameters used while a [`Chain`] waits for capacity to free up.
#[derive(Debug, Clone, Copy)]
pub struct CheckTick {
    pub tick_rate: Duration,
    pub max_check_duration: Duration,
}

impl CheckTick {
    pub fn new(tick_rate: Duration, max_check_duration: Duration) -> Self {
        Self {
            tick_rate,
            max_check_duration,
        }
    }
}

/// The admission state selection must check-and-update as a single atomic
/// operation across every node in the chain. Kept out of [`Node`] itself so
/// the metrics recorder can hold an `Arc<Node>` without ever needing this
/// lock (lock order: chain lock -> node stats lock, never the reverse, and
/// no lock is ever held across a transport call).
struct NodeAdmission {
    hits: u32,
    disabled: bool,
    /// Bumped on every `disable_for` call; a scheduled re-enable only takes
    /// effect if the epoch it captured is still current, implementing
    /// "last writer wins" for overlapping timed disables (Open Question (a)).
    disable_epoch: u64,
}

struct ChainState {
    admission: Vec<NodeAdmission>,
}

/// A named group of equivalent upstream nodes.
pub struct Chain {
    id: String,
    nodes: Vec<Arc<Node>>,
    state: Mutex<ChainState>,
    check_tick: CheckTick,
    failure_status_codes: HashSet<u16>,
    retry_count: u32,
    events: EventListeners<ChainEvent>,
}

/// A successfully reserved node, returned by [`Chain::reserve`] /
/// [`Chain::reserve_wait`]. Dropping it without sending a request still
/// schedules the release (see [`Chain::schedule_release`]) — callers should
/// always pair a successful reserve with exactly one `schedule_release`.
#[derive(Clone)]
pub struct Reservation {
    pub node: Arc<Node>,
}

impl Chain {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn failure_status_codes(&self) -> &HashSet<u16> {
        &self.failure_status_codes
    }

    pub fn events(&self) -> &EventListeners<ChainEvent> {
        &self.events
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name() == name)
    }

    /// One non-blocking attempt at selection (spec.md §4.1 "Selection rule").
    /// Evaluated under the chain's single lock: among nodes that are not
    /// disabled, not excluded, in `include` if non-empty, and under their
    /// limit, picks the highest-priority node, breaking ties by lowest
    /// current `hits`.
    pub fn reserve(&self, exclude: &HashSet<String>, include: &HashSet<String>) -> Option<Reservation> {
        let mut state = self.state.lock().unwrap();

        let mut best: Option<usize> = None;
        for (idx, (node, admission)) in self.nodes.iter().zip(state.admission.iter()).enumerate() {
            if admission.disabled {
                continue;
            }
            if exclude.contains(node.name()) {
                continue;
            }
            if !include.is_empty() && !include.contains(node.name()) {
                continue;
            }
            if admission.hits >= node.limit().count() {
                continue;
            }

            best = match best {
                None => Some(idx),
                Some(current) => {
                    let current_node = &self.nodes[current];
                    let current_admission = &state.admission[current];
                    if node.priority() > current_node.priority()
                        || (node.priority() == current_node.priority()
                            && admission.hits < current_admission.hits)
                    {
                        Some(idx)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let idx = best?;
        state.admission[idx].hits += 1;
        let node = Arc::clone(&self.nodes[idx]);
        drop(state);

        #[cfg(feature = "metrics")]
        metrics::counter!("nodepool_reservations_total", "chain" => self.id.clone(), "node" => node.name().to_string()).increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(chain_id = %self.id, node_name = %node.name(), "node reserved");

        self.events.emit(&ChainEvent::NodeReserved {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
            node_name: node.name().to_string(),
            wait: Duration::ZERO,
        });

        Some(Reservation { node })
    }

    /// Waits for capacity per spec.md §4.1 "Waiting": re-evaluates
    /// [`Chain::reserve`] every `tick_rate` up to `max_check_duration`
    /// total, or until `cancel` resolves, whichever comes first.
    pub async fn reserve_wait(
        &self,
        exclude: &HashSet<String>,
        include: &HashSet<String>,
        cancel: impl std::future::Future<Output = ()>,
    ) -> Option<Reservation> {
        if let Some(r) = self.reserve(exclude, include) {
            return Some(r);
        }

        let deadline = Instant::now() + self.check_tick.max_check_duration;
        let mut ticker = tokio::time::interval(self.check_tick.tick_rate);
        ticker.tick().await; // consume the immediate first tick

        tokio::pin!(cancel);

        loop {
            if Instant::now() >= deadline {
                self.record_exhaustion();
                return None;
            }

            tokio::select! {
                _ = &mut cancel => {
                    return None;
                }
                _ = ticker.tick() => {
                    if let Some(r) = self.reserve(exclude, include) {
                        return Some(r);
                    }
                    if Instant::now() >= deadline {
                        self.record_exhaustion();
                        return None;
                    }
                }
            }
        }
    }

    fn record_exhaustion(&self) {
        #[cfg(feature = "metrics")]
        metrics::counter!("nodepool_selection_exhausted_total", "chain" => self.id.clone())
            .increment(1);

        #[cfg(feature = "tracing")]
        tracing::warn!(chain_id = %self.id, "selection exhausted: no candidate node within max_check_duration");

        self.events.emit(&ChainEvent::SelectionExhausted {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
        });
    }

    /// Releases one reservation on `node_name` immediately. Normally called
    /// only by the task spawned from [`Chain::schedule_release`] after
    /// `per` has elapsed, never directly from the hot path.
    fn release(&self, node_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = self.find_index(node_name) {
            if state.admission[idx].hits > 0 {
                state.admission[idx].hits -= 1;
            }
        }
        drop(state);

        #[cfg(feature = "metrics")]
        metrics::counter!("nodepool_releases_total", "chain" => self.id.clone(), "node" => node_name.to_string()).increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(chain_id = %self.id, node_name, "node released");

        self.events.emit(&ChainEvent::NodeReleased {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
            node_name: node_name.to_string(),
        });
    }

    /// Schedules the deferred decrement that implements the windowed
    /// limiter (spec.md §4.1 "Release"): sleep `per`, then decrement
    /// `hits`. Spawned as a detached task so it outlives the caller's send.
    pub fn schedule_release(self: &Arc<Self>, node_name: String, per: Duration) {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            sleep(per).await;
            chain.release(&node_name);
        });
    }

    /// Sets `disabled = true` on the named node (spec.md §4.4).
    pub fn disable(&self, node_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = self.find_index(node_name) {
            state.admission[idx].disabled = true;
        }
        drop(state);

        #[cfg(feature = "tracing")]
        tracing::info!(chain_id = %self.id, node_name, "node disabled");

        self.events.emit(&ChainEvent::NodeDisabled {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
            node_name: node_name.to_string(),
        });
    }

    /// Clears `disabled` on the named node.
    pub fn enable(&self, node_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = self.find_index(node_name) {
            state.admission[idx].disabled = false;
        }
        drop(state);

        #[cfg(feature = "tracing")]
        tracing::info!(chain_id = %self.id, node_name, "node enabled");

        self.events.emit(&ChainEvent::NodeEnabled {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
            node_name: node_name.to_string(),
        });
    }

    /// Disables the named node, then schedules a re-enable after `duration`.
    /// Overlapping calls for the same node use "last writer wins": only the
    /// most recent `disable_for` call's timer actually re-enables the node
    /// (Open Question (a) in DESIGN.md).
    pub fn disable_for(self: &Arc<Self>, node_name: String, duration: Duration) {
        let epoch = {
            let mut state = self.state.lock().unwrap();
            match self.find_index(&node_name) {
                Some(idx) => {
                    state.admission[idx].disabled = true;
                    state.admission[idx].disable_epoch += 1;
                    state.admission[idx].disable_epoch
                }
                None => return,
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(chain_id = %self.id, %node_name, ?duration, "node disabled for duration");

        self.events.emit(&ChainEvent::NodeDisabled {
            timestamp: Instant::now(),
            chain_id: self.id.clone(),
            node_name: node_name.clone(),
        });

        let chain = Arc::clone(self);
        tokio::spawn(async move {
            sleep(duration).await;
            let mut state = chain.state.lock().unwrap();
            if let Some(idx) = chain.find_index(&node_name) {
                if state.admission[idx].disable_epoch == epoch {
                    state.admission[idx].disabled = false;
                    drop(state);

                    #[cfg(feature = "tracing")]
                    tracing::info!(chain_id = %chain.id, %node_name, "node re-enabled after timed disable");

                    chain.events.emit(&ChainEvent::NodeEnabled {
                        timestamp: Instant::now(),
                        chain_id: chain.id.clone(),
                        node_name,
                    });
                }
            }
        });
    }

    /// Records the outcome of one completed attempt (spec.md §4.3). Always
    /// called from a detached task by the dispatcher so it never blocks the
    /// send path.
    pub fn record_outcome(node: &Arc<Node>, status_key: u16, is_invalid: bool) {
        node.total_hits.fetch_add(1, Ordering::Relaxed);

        let mut stats = node.stats_lock.lock().unwrap();
        *stats.response_stats.entry(status_key).or_insert(0) += 1;
        if is_invalid {
            stats.fails += 1;
        }
    }

    /// Takes a consistent snapshot of every node for stats export and the
    /// sync loop (spec.md §4.5 `snapshot()`).
    pub fn stats(&self) -> ChainStats {
        let state = self.state.lock().unwrap();
        let nodes = self
            .nodes
            .iter()
            .zip(state.admission.iter())
            .map(|(node, admission)| {
                let stats = node.stats_lock.lock().unwrap();
                ChainNodeStats {
                    name: node.name().to_string(),
                    current_hits: admission.hits,
                    total_hits: node.total_hits(),
                    limits: node.limit().count(),
                    response_stats: stats.response_stats.clone(),
                    priority: node.priority(),
                    disabled: admission.disabled,
                    fails: stats.fails,
                }
            })
            .collect();
        drop(state);

        ChainStats {
            id: self.id.clone(),
            nodes,
        }
    }

    /// Restores `total_hits`, `response_stats`, and `fails` from a
    /// previously captured snapshot, matched by node name. `current_hits`
    /// is never restored — it reflects live in-flight state and must start
    /// at zero (spec.md §4.5 `load()`).
    pub fn load(&self, snapshot: &ChainStats) {
        for node_stats in &snapshot.nodes {
            if let Some(node) = self.nodes.iter().find(|n| n.name() == node_stats.name) {
                node.total_hits
                    .store(node_stats.total_hits, Ordering::Relaxed);
                let mut stats = node.stats_lock.lock().unwrap();
                stats.response_stats = node_stats.response_stats.clone();
                stats.fails = node_stats.fails;
            }
        }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }
}

/// Validated construction of a [`Chain`], mirroring spec.md §6's chain
/// construction parameters.
pub struct ChainConfigBuilder {
    id: String,
    nodes: Vec<Node>,
    tick_rate: Duration,
    max_check_duration: Duration,
    failure_status_codes: Option<Vec<u16>>,
    retry_count: u32,
    events: EventListeners<ChainEvent>,
}

impl ChainConfigBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            tick_rate: Duration::from_millis(100),
            max_check_duration: Duration::from_secs(1),
            failure_status_codes: None,
            retry_count: 0,
            events: EventListeners::new(),
        }
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener<ChainEvent> + 'static,
    {
        self.events.add(listener);
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn check_tick(mut self, tick_rate: Duration, max_check_duration: Duration) -> Self {
        self.tick_rate = tick_rate;
        self.max_check_duration = max_check_duration;
        self
    }

    pub fn failure_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.failure_status_codes = Some(codes);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn build(self) -> Result<Arc<Chain>, ChainConfigError> {
        if self.id.is_empty() {
            return Err(ChainConfigError::EmptyId);
        }
        if self.nodes.is_empty() {
            return Err(ChainConfigError::NoNodes);
        }
        if self.tick_rate < Duration::from_millis(50) {
            return Err(ChainConfigError::TickRateTooSmall);
        }
        if self.max_check_duration < self.tick_rate {
            return Err(ChainConfigError::MaxCheckDurationTooSmall);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name().to_string()) {
                return Err(ChainConfigError::DuplicateNodeName(node.name().to_string()));
            }
        }

        let admission = self
            .nodes
            .iter()
            .map(|_| NodeAdmission {
                hits: 0,
                disabled: false,
                disable_epoch: 0,
            })
            .collect();

        let failure_status_codes = self
            .failure_status_codes
            .unwrap_or_else(|| DEFAULT_FAILURE_STATUS_CODES.to_vec())
            .into_iter()
            .collect();

        Ok(Arc::new(Chain {
            id: self.id,
            nodes: self.nodes.into_iter().map(Arc::new).collect(),
            state: Mutex::new(ChainState { admission }),
            check_tick: CheckTick::new(self.tick_rate, self.max_check_duration),
            failure_status_codes,
            retry_count: self.retry_count,
            events: self.events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfigBuilder;
    use std::time::Duration;

    fn node(name: &str, count: u32, priority: u32) -> Node {
        NodeConfigBuilder::new(name, "http://example.com")
            .limit(count, Duration::from_secs(2))
            .priority(priority)
            .build()
            .unwrap()
    }

    #[test]
    fn simple_success_reserves_the_only_node() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .build()
            .unwrap();

        let r = chain.reserve(&HashSet::new(), &HashSet::new()).unwrap();
        assert_eq!(r.node.name(), "n");
    }

    #[test]
    fn exhaustion_returns_none_when_at_limit() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .build()
            .unwrap();
        {
            let mut state = chain.state.lock().unwrap();
            state.admission[0].hits = 10;
        }

        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_none());
    }

    #[test]
    fn tie_break_prefers_lower_hits_at_equal_priority() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("a", 10, 1))
            .node(node("b", 10, 1))
            .build()
            .unwrap();
        {
            let mut state = chain.state.lock().unwrap();
            state.admission[0].hits = 1; // a
            state.admission[1].hits = 0; // b
        }
        let r = chain.reserve(&HashSet::new(), &HashSet::new()).unwrap();
        assert_eq!(r.node.name(), "b");

        {
            let mut state = chain.state.lock().unwrap();
            state.admission[0].hits = 2; // a
            state.admission[1].hits = 3; // b (after first reservation above)
        }
        let r = chain.reserve(&HashSet::new(), &HashSet::new()).unwrap();
        assert_eq!(r.node.name(), "a");
    }

    #[test]
    fn disabled_node_is_never_selected() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .build()
            .unwrap();
        chain.disable("n");
        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_none());
    }

    #[test]
    fn include_restricts_to_named_nodes() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("a", 10, 1))
            .node(node("b", 10, 1))
            .build()
            .unwrap();

        let mut include = HashSet::new();
        include.insert("a".to_string());
        let r = chain.reserve(&HashSet::new(), &include).unwrap();
        assert_eq!(r.node.name(), "a");
    }

    #[test]
    fn exclude_removes_named_nodes() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("a", 10, 5))
            .node(node("b", 10, 1))
            .build()
            .unwrap();

        let mut exclude = HashSet::new();
        exclude.insert("a".to_string());
        let r = chain.reserve(&exclude, &HashSet::new()).unwrap();
        assert_eq!(r.node.name(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn release_restores_capacity() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 1, 1))
            .build()
            .unwrap();

        let r = chain.reserve(&HashSet::new(), &HashSet::new()).unwrap();
        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_none());

        chain.schedule_release("n".to_string(), Duration::from_secs(2));
        r.node.total_hits(); // keep reservation alive until release fires
        tokio::time::advance(Duration::from_millis(2_100)).await;

        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_disable_restores_selectability_after_duration() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .build()
            .unwrap();

        chain.disable_for("n".to_string(), Duration::from_secs(2));
        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_none());

        tokio::time::advance(Duration::from_millis(2_100)).await;
        assert!(chain.reserve(&HashSet::new(), &HashSet::new()).is_some());
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let err = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .node(node("n", 10, 1))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainConfigError::DuplicateNodeName("n".to_string()));
    }

    #[test]
    fn rejects_tick_rate_below_floor() {
        let err = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .check_tick(Duration::from_millis(10), Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(err, ChainConfigError::TickRateTooSmall);
    }

    #[test]
    fn load_restores_totals_but_not_current_hits() {
        let chain = ChainConfigBuilder::new("c")
            .node(node("n", 10, 1))
            .build()
            .unwrap();
        chain.reserve(&HashSet::new(), &HashSet::new()).unwrap();

        let mut snapshot = chain.stats();
        snapshot.nodes[0].total_hits = 42;
        snapshot.nodes[0].fails = 3;
        chain.load(&snapshot);

        let restored = chain.stats();
        assert_eq!(restored.nodes[0].total_hits, 42);
        assert_eq!(restored.nodes[0].fails, 3);
        assert_eq!(restored.nodes[0].current_hits, 1);
    }
}
