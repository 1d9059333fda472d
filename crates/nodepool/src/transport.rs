//! The transport seam: executes one prepared request under a deadline.
//! Grounded in `examples/original_source/api_call.go`'s `apiCaller`
//! interface; connection pooling and TLS are delegated entirely to the
//! default adapter's `reqwest::Client`, never reimplemented here.

use crate::error::TransportError;
use nodepool_core::PreparedRequest;
use std::time::Duration;

/// The response a [`Transport`] hands back on success. Body is read
/// eagerly — streaming responses are out of scope (spec.md §1).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

/// Executes a single prepared request under a deadline, composed with
/// whatever cancellation the caller supplied to the dispatcher.
///
/// Implementations must respect `deadline` and must read the entire
/// response body before returning.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn do_request(
        &self,
        request: PreparedRequest,
        deadline: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// The default [`Transport`], backed by a pooled `reqwest::Client`
/// configured per `examples/original_source/eznode.go`'s
/// `createHttpClient`: up to 100 idle connections overall, 100 per host,
/// a 90s idle timeout, and (as a client-wide ceiling; the per-attempt
/// `deadline` passed to [`Transport::do_request`] is still the binding one)
/// a 15s default request timeout.
#[cfg(feature = "reqwest-transport")]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest-transport")]
impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest-transport")]
impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "reqwest-transport")]
#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn do_request(
        &self,
        request: PreparedRequest,
        deadline: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .timeout(deadline)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Other(Box::new(e))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Other(Box::new(e)))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
