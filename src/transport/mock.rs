//! Mock transport for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportError};
use crate::request::Request;
use crate::response::Response;

type FailureRule = dyn Fn(&Request) -> Option<TransportError> + Send + Sync;

/// Configurable stub transport.
///
/// Answers every request with a fixed status after an optional simulated
/// latency, unless a failure rule claims the request first. Call counts
/// are tracked per instance, so per-pool instances double as dispatch
/// counters in tests.
pub struct MockTransport {
    status: u16,
    body: Vec<u8>,
    latency: Duration,
    failure: Option<Arc<FailureRule>>,
    calls: AtomicU64,
}

impl MockTransport {
    /// Create a mock that answers 200 with an empty body and no latency.
    pub fn new() -> Self {
        Self {
            status: 200,
            body: Vec::new(),
            latency: Duration::ZERO,
            failure: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Set the status answered for every request.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set the response body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Simulate per-request latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Install a failure rule. Requests for which the rule returns an
    /// error never produce a response.
    pub fn with_failure<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Request) -> Option<TransportError> + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(rule));
        self
    }

    /// How many requests reached this transport.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(rule) = &self.failure {
            if let Some(error) = rule(request) {
                return Err(error);
            }
        }

        Ok(Response {
            status: self.status,
            headers: HashMap::new(),
            reason: reason_for(self.status),
            version: "HTTP/1.1".to_string(),
            body: self.body.clone(),
            id: None,
        })
    }
}

fn reason_for(status: u16) -> Option<String> {
    match status {
        200 => Some("OK".to_string()),
        404 => Some("Not Found".to_string()),
        500 => Some("Internal Server Error".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_and_counts() {
        let mock = MockTransport::new().with_status(204).with_body("done");

        assert_eq!(mock.call_count(), 0);
        let response = mock.send(&Request::get("http://stub")).await.unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.body, b"done");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_rule() {
        let mock = MockTransport::new().with_failure(|req| {
            if req.id == Some(13) {
                Some(TransportError::Connect("refused".to_string()))
            } else {
                None
            }
        });

        assert!(mock.send(&Request::get("http://stub")).await.is_ok());
        let err = mock
            .send(&Request::get("http://stub").with_id(13))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        assert_eq!(mock.call_count(), 2);
    }
}
