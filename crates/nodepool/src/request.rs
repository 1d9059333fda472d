//! The caller-facing request shape: a path against a chain, not yet
//! resolved to any particular node's base URL.

use bytes::Bytes;
use nodepool_core::PreparedRequest;

/// A request to send through a [`crate::Dispatcher`]. `path` is resolved
/// against whichever node gets selected; the body is buffered once up
/// front and replayed verbatim on every retry attempt (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            path: path.into(),
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn new(method: http::Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Resolves this request against `base`, producing the node-bound
    /// [`PreparedRequest`] the transport actually sends. Prepends `base` to
    /// `path` by literal string concatenation (spec.md §4.2 "prepend the
    /// node's base URL"), not `Url::join`'s RFC3986 reference resolution,
    /// which would silently drop `base`'s own path component — see
    /// `nodepool_core::Node::resolve_url` for the matching logic.
    pub(crate) fn prepare_against(&self, base: &url::Url) -> Result<PreparedRequest, url::ParseError> {
        let base_str = base.as_str();
        let base_str = if base.path() == "/" {
            base_str.trim_end_matches('/')
        } else {
            base_str
        };
        let url = url::Url::parse(&format!("{base_str}{}", self.path))?;
        Ok(PreparedRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}
