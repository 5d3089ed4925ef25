//! Request outcome types delivered to callbacks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// A completed HTTP exchange.
///
/// The body is fully materialized before delivery; there is no streaming
/// surface. Any HTTP status counts as a `Response` on the default
/// configuration, including 4xx and 5xx.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers (values that are not valid UTF-8 are dropped)
    pub headers: HashMap<String, String>,
    /// Canonical reason phrase, when one exists for the status
    pub reason: Option<String>,
    /// Protocol version, e.g. `HTTP/1.1`
    pub version: String,
    /// Materialized response body
    pub body: Vec<u8>,
    /// Correlation id mirrored from the originating request
    pub id: Option<u64>,
}

impl Response {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A request that did not complete as an HTTP exchange.
///
/// Routed to ERROR callbacks. Carries the originating request id so the
/// caller can correlate the loss.
#[derive(Debug)]
pub struct Failure {
    /// What went wrong
    pub error: DispatchError,
    /// Correlation id mirrored from the originating request
    pub id: Option<u64>,
}

/// Internal carrier on a pool group's result channel.
#[derive(Debug)]
pub(crate) enum Outcome {
    Response(Response),
    Failure(Failure),
}
