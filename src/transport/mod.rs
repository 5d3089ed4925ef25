//! Transport abstraction.
//!
//! The dispatch engine never talks HTTP itself. Each pool issues requests
//! through a [`Transport`], so the wire layer (TLS, connection reuse,
//! proxy negotiation) stays behind one async trait. The crate ships
//! [`HttpTransport`] for production traffic and [`MockTransport`] for
//! tests and local experiments.

use async_trait::async_trait;

use crate::request::Request;
use crate::response::Response;

pub(crate) mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Errors produced while issuing a request over the wire.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// DNS resolution or TCP/TLS connect failed
    #[error("connect error: {0}")]
    Connect(String),

    /// The configured request timeout elapsed
    #[error("request timed out")]
    Timeout,

    /// The request failed after connecting
    #[error("transport failure: {0}")]
    Send(String),

    /// The response body could not be read
    #[error("error reading response body: {0}")]
    Body(String),

    /// The transport could not be constructed from its descriptor
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

/// A way to turn a [`Request`] into a [`Response`].
///
/// Implementations must be safe to share across a pool's worker set. The
/// returned response's `id` is stamped by the pool worker, not the
/// transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request and materialize the full response.
    ///
    /// Any HTTP status is an `Ok`; only failures to complete the exchange
    /// (DNS, connect, TLS, timeout, body read) are `Err`.
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;
}
