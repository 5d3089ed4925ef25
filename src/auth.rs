//! Token rotation.
//!
//! Optional pool-level hook for upstreams that rate-limit per credential.
//! A shared ring of tokens is stamped into each request right before the
//! transport sees it, either as a query field or a header. Each token is
//! checked out at most once per `min_interval`; when every token is
//! cooling down, the soonest-available one is reused rather than stalling
//! the pool worker.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::request::Request;

/// Where the checked-out token is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Insert into the request's query/form fields
    Query,
    /// Insert as a request header
    Header,
}

/// Token-rotation configuration, passed via
/// [`Config::with_auth`](crate::Config::with_auth).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Credential pool, rotated across requests
    pub tokens: Vec<String>,
    /// Query field or header
    pub strategy: AuthStrategy,
    /// Field or header name the token is written under
    pub field: String,
    /// Per-token cool-down; defaults to `1/rate`
    pub min_interval: Option<Duration>,
}

impl AuthConfig {
    /// Create a rotation config.
    pub fn new(
        tokens: impl IntoIterator<Item = impl Into<String>>,
        strategy: AuthStrategy,
        field: impl Into<String>,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            strategy,
            field: field.into(),
            min_interval: None,
        }
    }

    /// Override the per-token cool-down.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = Some(min_interval);
        self
    }
}

/// Runtime rotation state shared by every pool worker.
#[derive(Debug)]
pub(crate) struct TokenRing {
    tokens: Vec<String>,
    min_interval: Duration,
    strategy: AuthStrategy,
    field: String,
    next_use: Mutex<Vec<Instant>>,
}

impl TokenRing {
    /// Build the ring; an empty token list yields no ring at all.
    pub(crate) fn new(config: AuthConfig, default_interval: Duration) -> Option<Self> {
        if config.tokens.is_empty() {
            return None;
        }
        let now = Instant::now();
        let count = config.tokens.len();
        Some(Self {
            tokens: config.tokens,
            min_interval: config.min_interval.unwrap_or(default_interval),
            strategy: config.strategy,
            field: config.field,
            next_use: Mutex::new(vec![now; count]),
        })
    }

    /// Stamp a token into the request.
    pub(crate) fn apply(&self, request: &mut Request) {
        let token = self.checkout();
        match self.strategy {
            AuthStrategy::Query => request.fields.insert(self.field.clone(), token),
            AuthStrategy::Header => request.headers.insert(self.field.clone(), token),
        };
    }

    /// Pick an eligible token at random, or the soonest-available one if
    /// every token is cooling down.
    fn checkout(&self) -> String {
        let now = Instant::now();
        let mut next_use = self.lock();

        let eligible: Vec<usize> = next_use
            .iter()
            .enumerate()
            .filter(|(_, at)| **at <= now)
            .map(|(i, _)| i)
            .collect();

        let index = if eligible.is_empty() {
            next_use
                .iter()
                .enumerate()
                .min_by_key(|(_, at)| **at)
                .map(|(i, _)| i)
                .unwrap_or(0)
        } else {
            eligible[rand::thread_rng().gen_range(0..eligible.len())]
        };

        next_use[index] = now + self.min_interval;
        self.tokens[index].clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Instant>> {
        self.next_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tokens_build_nothing() {
        let config = AuthConfig::new(Vec::<String>::new(), AuthStrategy::Query, "key");
        assert!(TokenRing::new(config, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_rotation_respects_cooldown() {
        let config = AuthConfig::new(["a", "b"], AuthStrategy::Query, "key")
            .with_min_interval(Duration::from_secs(60));
        let ring = TokenRing::new(config, Duration::from_millis(1)).unwrap();

        let first = ring.checkout();
        let second = ring.checkout();
        assert_ne!(first, second, "both tokens should be used before reuse");

        // everything is cooling down now; checkout still answers
        let third = ring.checkout();
        assert!(third == "a" || third == "b");
    }

    #[test]
    fn test_apply_query_and_header() {
        let query = AuthConfig::new(["tok"], AuthStrategy::Query, "key")
            .with_min_interval(Duration::ZERO);
        let ring = TokenRing::new(query, Duration::ZERO).unwrap();
        let mut request = Request::get("http://x");
        ring.apply(&mut request);
        assert_eq!(request.fields.get("key").map(String::as_str), Some("tok"));

        let header = AuthConfig::new(["tok"], AuthStrategy::Header, "authorization")
            .with_min_interval(Duration::ZERO);
        let ring = TokenRing::new(header, Duration::ZERO).unwrap();
        let mut request = Request::get("http://x");
        ring.apply(&mut request);
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("tok")
        );
    }
}
