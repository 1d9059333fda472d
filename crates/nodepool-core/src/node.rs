//! A single upstream endpoint: its address, rate limit, priority, and
//! mutable reservation/metrics state.

use crate::error::NodeConfigError;
use crate::limit::NodeLimit;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// A pure request transformation applied after the selector has rewritten
/// the request's URL. Identity when not configured.
pub type RequestMiddleware = Arc<dyn Fn(PreparedRequest) -> PreparedRequest + Send + Sync>;

/// The minimal shape of a request this crate rewrites and replays: a path
/// (or full URL once rewritten), method, headers and a buffered body.
/// Constructing and inspecting the richer `http`/`reqwest` request types is
/// the caller's and the transport adapter's job respectively.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: http::Method,
    pub url: Url,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

/// Per-status-code response counters, plus the two synthetic keys described
/// in spec.md §3: `0` for a non-timeout transport error, `408` for a
/// timeout.
pub type ResponseStats = HashMap<u16, u64>;

/// Mutable counters guarded by the node's own lock (`response_stats`,
/// `fails`), separate from the chain lock that guards `hits`/`disabled`.
/// Matches the lock-order rule in spec.md §5: chain lock -> node stats lock,
/// never the reverse.
#[derive(Debug, Default)]
pub(crate) struct NodeStats {
    pub response_stats: ResponseStats,
    pub fails: u32,
}

/// One upstream endpoint within a [`crate::chain::Chain`].
///
/// Holds only the immutable configuration plus the two counters that are
/// *not* part of the chain's single selection lock (`total_hits`, an atomic;
/// `response_stats`/`fails`, under their own `stats_lock`). The mutable
/// admission state (`hits`, `disabled`) that selection must check-and-update
/// atomically across every node in the chain lives in the chain itself —
/// see `chain::NodeAdmission` — so that the metrics recorder can hold an
/// `Arc<Node>` and update counters without ever taking the chain lock.
pub struct Node {
    pub(crate) name: String,
    pub(crate) base_url: Url,
    pub(crate) limit: NodeLimit,
    pub(crate) request_timeout: Duration,
    pub(crate) priority: u32,
    pub(crate) middleware: Option<RequestMiddleware>,

    // Monotonic, lock-free.
    pub(crate) total_hits: std::sync::atomic::AtomicU64,

    // Guarded by `stats_lock`, independent of the chain lock.
    pub(crate) stats_lock: Mutex<NodeStats>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("limit", &self.limit)
            .field("priority", &self.priority)
            .finish()
    }
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn limit(&self) -> NodeLimit {
        self.limit
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Applies the node's middleware (identity if none configured) to a
    /// request whose URL has already been rewritten to point at this node.
    pub fn apply_middleware(&self, request: PreparedRequest) -> PreparedRequest {
        match &self.middleware {
            Some(f) => f(request),
            None => request,
        }
    }

    /// Prepends this node's base URL to `path`, producing the request URL
    /// actually sent on the wire. Literal string concatenation, not RFC3986
    /// reference resolution — `Url::join` would drop the base URL's own
    /// path component whenever `path` starts with `/`, which disagrees with
    /// `examples/original_source/chain_node.go`'s
    /// `parsedUrl.String() + request.URL.String()`.
    ///
    /// `url::Url` always serialises a bare authority with a trailing `/`
    /// (`http://host` becomes `http://host/`), which Go's `net/url` does
    /// not; trim that one synthetic slash before concatenating so a
    /// path-less base behaves the same as the source.
    pub fn resolve_url(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str();
        let base = if self.base_url.path() == "/" {
            base.trim_end_matches('/')
        } else {
            base
        };
        Url::parse(&format!("{base}{path}"))
    }
}

/// User-facing configuration for a single [`Node`], validated at
/// [`NodeConfigBuilder::build`] time (construction errors, not runtime
/// ones — matches spec.md §6).
pub struct NodeConfigBuilder {
    name: String,
    base_url: String,
    limit: Option<NodeLimit>,
    request_timeout: Duration,
    priority: u32,
    middleware: Option<RequestMiddleware>,
}

impl NodeConfigBuilder {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            limit: None,
            request_timeout: Duration::from_secs(1),
            priority: 0,
            middleware: None,
        }
    }

    pub fn limit(mut self, count: u32, per: Duration) -> Self {
        self.limit = Some(NodeLimit::new(count, per));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(PreparedRequest) -> PreparedRequest + Send + Sync + 'static,
    {
        self.middleware = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Node, NodeConfigError> {
        if self.name.is_empty() {
            return Err(NodeConfigError::EmptyName);
        }

        let base_url = Url::parse(&self.base_url)
            .map_err(|e| NodeConfigError::InvalidUrl(e.to_string()))?;

        let limit = self.limit.unwrap_or(NodeLimit::new(50, Duration::from_secs(1)));
        if limit.count() < 1 {
            return Err(NodeConfigError::ZeroLimitCount);
        }
        if limit.per().is_zero() {
            return Err(NodeConfigError::ZeroLimitPer);
        }
        if self.request_timeout.is_zero() {
            return Err(NodeConfigError::ZeroRequestTimeout);
        }

        Ok(Node {
            name: self.name,
            base_url,
            limit,
            request_timeout: self.request_timeout,
            priority: self.priority,
            middleware: self.middleware,
            total_hits: std::sync::atomic::AtomicU64::new(0),
            stats_lock: Mutex::new(NodeStats::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        let err = NodeConfigBuilder::new("", "http://example.com").build().unwrap_err();
        assert_eq!(err, NodeConfigError::EmptyName);
    }

    #[test]
    fn rejects_invalid_url() {
        let err = NodeConfigBuilder::new("n", "not a url").build().unwrap_err();
        assert!(matches!(err, NodeConfigError::InvalidUrl(_)));
    }

    #[test]
    fn rejects_zero_limit_count() {
        let err = NodeConfigBuilder::new("n", "http://example.com")
            .limit(0, Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(err, NodeConfigError::ZeroLimitCount);
    }

    #[test]
    fn defaults_are_sane() {
        let node = NodeConfigBuilder::new("n", "http://example.com").build().unwrap();
        assert_eq!(node.limit().count(), 50);
        assert_eq!(node.priority(), 0);
        assert_eq!(node.total_hits(), 0);
    }

    #[test]
    fn resolves_url_against_base() {
        let node = NodeConfigBuilder::new("n", "http://example.com").build().unwrap();
        let url = node.resolve_url("/v1/things").unwrap();
        assert_eq!(url.as_str(), "http://example.com/v1/things");
    }

    #[test]
    fn resolves_url_by_prepending_not_joining_when_base_has_a_path() {
        // a base carrying its own path must be kept, not replaced -- this
        // is literal prepending, not RFC3986 reference resolution.
        let node = NodeConfigBuilder::new("n", "http://example.com/api/v2")
            .build()
            .unwrap();
        let url = node.resolve_url("/users").unwrap();
        assert_eq!(url.as_str(), "http://example.com/api/v2/users");
    }
}
