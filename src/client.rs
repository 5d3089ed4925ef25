//! Client facade.
//!
//! Owns the configuration, the registered callbacks, and the shared
//! queue/store, and orchestrates a run: derive pool groups, build
//! transports, spawn pools, controllers, the ticket clock and the RPS
//! counter, then block until every submitted request has produced its
//! callback or a callback asked to exit.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::auth::{AuthConfig, TokenRing};
use crate::context::{Context, ShutdownFlag};
use crate::controller::{Callbacks, Controller};
use crate::error::ClientError;
use crate::pool::{Pool, PoolKind, PoolSpec};
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::response::{Failure, Response};
use crate::rps::{RpsCounter, RpsGauges};
use crate::store::Store;
use crate::transport::{HttpTransport, Transport};
use crate::transport::http::TransportOptions;

/// Engine configuration.
///
/// `rate` is the only required knob: permits per second handed to each
/// pool group. Everything else has a default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ticket rate per pool group, in permits per second
    pub rate: f64,
    /// Host-diversity hint for each pool's connection manager
    pub num_pools: usize,
    /// Per-pool in-flight cap; defaults to `rate` rounded up
    pub max_connections: Option<usize>,
    /// Whether the shared store is available to callbacks
    pub use_store: bool,
    /// Whether the RPS counter runs
    pub use_rps: bool,
    /// Route non-2xx completions to ERROR callbacks instead of RESPONSE
    pub classify_by_status: bool,
    /// Per-request timeout applied by the transport
    pub request_timeout: Option<Duration>,
    /// Optional token rotation applied before each request
    pub auth: Option<AuthConfig>,
}

impl Config {
    /// Configuration with the given rate and defaults for the rest.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            num_pools: 8,
            max_connections: None,
            use_store: true,
            use_rps: true,
            classify_by_status: false,
            request_timeout: None,
            auth: None,
        }
    }

    /// Set the host-diversity hint.
    pub fn with_num_pools(mut self, num_pools: usize) -> Self {
        self.num_pools = num_pools;
        self
    }

    /// Cap concurrent in-flight requests per pool.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Enable or disable the shared store.
    pub fn with_store(mut self, enabled: bool) -> Self {
        self.use_store = enabled;
        self
    }

    /// Enable or disable the RPS counter.
    pub fn with_rps(mut self, enabled: bool) -> Self {
        self.use_rps = enabled;
        self
    }

    /// Route non-2xx completions to ERROR callbacks.
    pub fn with_classify_by_status(mut self, enabled: bool) -> Self {
        self.classify_by_status = enabled;
        self
    }

    /// Apply a per-request timeout in the transport.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Rotate auth tokens into outbound requests.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    fn resolved_max_connections(&self) -> usize {
        self.max_connections
            .unwrap_or_else(|| self.rate.ceil() as usize)
            .max(1)
    }
}

/// Rate-limited bulk dispatch client.
///
/// Queue requests with [`submit`](Client::submit), register listeners
/// with [`on_response`](Client::on_response) and
/// [`on_error`](Client::on_error), then call [`run`](Client::run) to
/// drive everything to completion.
pub struct Client {
    config: Config,
    pools: Vec<PoolSpec>,
    callbacks: Callbacks,
    queue: Arc<RequestQueue>,
    store: Option<Arc<Store>>,
    shutdown: Arc<ShutdownFlag>,
    terminated: bool,
}

impl Client {
    /// Create a client with default configuration at the given rate.
    pub fn new(rate: f64, pools: Vec<PoolSpec>) -> Self {
        Self::with_config(Config::new(rate), pools)
    }

    /// Create a client from a full configuration.
    pub fn with_config(config: Config, pools: Vec<PoolSpec>) -> Self {
        let store = config.use_store.then(|| Arc::new(Store::new()));
        Self {
            config,
            pools,
            callbacks: Callbacks::default(),
            queue: Arc::new(RequestQueue::new()),
            store,
            shutdown: Arc::new(ShutdownFlag::default()),
            terminated: false,
        }
    }

    /// Queue a request for dispatch.
    ///
    /// Fails with [`ClientError::Terminated`] once [`run`](Client::run)
    /// has returned.
    pub fn submit(&self, request: Request) -> Result<(), ClientError> {
        self.queue.push(request)
    }

    /// Register a callback for completed HTTP exchanges.
    pub fn on_response<F>(&mut self, callback: F)
    where
        F: Fn(&Response, &mut Context<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_response.push(Box::new(callback));
    }

    /// Register a callback for requests that failed to complete.
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(&Failure, &mut Context<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_error.push(Box::new(callback));
    }

    /// Read a value from the shared store.
    pub fn store_get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        match &self.store {
            Some(store) => Ok(store.get(key)),
            None => Err(ClientError::StoreNotSupported),
        }
    }

    /// Write a value to the shared store.
    pub fn store_set(&self, key: impl Into<String>, value: Value) -> Result<(), ClientError> {
        match &self.store {
            Some(store) => {
                store.set(key, value);
                Ok(())
            }
            None => Err(ClientError::StoreNotSupported),
        }
    }

    /// Dispatch everything submitted so far and block until each request
    /// has produced exactly one callback, or until a callback calls
    /// [`Context::exit`].
    ///
    /// Fails fast with [`ClientError::NoListeners`] when nothing is
    /// registered, and with [`ClientError::Config`] for invalid
    /// configuration or unbuildable pool descriptors.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        if self.terminated {
            return Err(ClientError::Terminated);
        }
        if self.callbacks.is_empty() {
            return Err(ClientError::NoListeners);
        }
        if !(self.config.rate > 0.0) {
            return Err(ClientError::Config("rate must be positive".to_string()));
        }
        if self.pools.is_empty() {
            return Err(ClientError::Config(
                "at least one pool is required".to_string(),
            ));
        }

        let max_connections = self.config.resolved_max_connections();
        let transport_options = TransportOptions {
            num_pools: self.config.num_pools,
            max_connections,
            timeout: self.config.request_timeout,
        };
        let auth = self
            .config
            .auth
            .take()
            .and_then(|auth| {
                TokenRing::new(auth, Duration::from_secs_f64(1.0 / self.config.rate))
            })
            .map(Arc::new);

        // resolve every transport before anything is spawned, so a bad
        // descriptor fails the whole run instead of a partial start
        let groups = group_pools(std::mem::take(&mut self.pools));
        let mut resolved: Vec<Vec<(PoolSpec, Arc<dyn Transport>)>> = Vec::with_capacity(groups.len());
        for (group_index, specs) in groups.into_iter().enumerate() {
            let mut members = Vec::with_capacity(specs.len());
            for (pool_index, spec) in specs.into_iter().enumerate() {
                let transport: Arc<dyn Transport> = match &spec.kind {
                    PoolKind::Custom(transport) => Arc::clone(transport),
                    _ => Arc::new(
                        HttpTransport::for_spec(&spec, &transport_options).map_err(|e| {
                            ClientError::Config(format!(
                                "pool {group_index}.{pool_index}: {e}"
                            ))
                        })?,
                    ),
                };
                members.push((spec, transport));
            }
            resolved.push(members);
        }

        let (gauges, completions, rps_handle) = if self.config.use_rps {
            let (gauges, tx, handle) = RpsCounter::spawn();
            (gauges, Some(tx), Some(handle))
        } else {
            (Arc::new(RpsGauges::default()), None, None)
        };

        let callbacks = Arc::new(std::mem::take(&mut self.callbacks));
        let mut ticket_outlets = Vec::with_capacity(resolved.len());
        let mut controllers = Vec::with_capacity(resolved.len());

        for (group_index, members) in resolved.into_iter().enumerate() {
            let (ticket_tx, ticket_rx) = mpsc::channel(1);
            ticket_outlets.push(ticket_tx);

            // enough room for every worker of the group to post without
            // waiting on the controller
            let capacity = (max_connections * members.len()).max(1);
            let (results_tx, results_rx) = mpsc::channel(capacity);

            let mut pools = Vec::with_capacity(members.len());
            for (pool_index, (spec, transport)) in members.into_iter().enumerate() {
                let label = format!("{}-{group_index}.{pool_index}", spec.kind_label());
                pools.push(Pool::spawn(
                    label,
                    transport,
                    max_connections,
                    auth.clone(),
                    results_tx.clone(),
                ));
            }
            drop(results_tx);

            let controller = Controller {
                label: format!("group-{group_index}"),
                pools,
                queue: Arc::clone(&self.queue),
                tickets: ticket_rx,
                results: results_rx,
                callbacks: Arc::clone(&callbacks),
                store: self.store.clone(),
                gauges: Arc::clone(&gauges),
                completions: completions.clone(),
                shutdown: Arc::clone(&self.shutdown),
                classify_by_status: self.config.classify_by_status,
                pending: 0,
                cursor: 0,
            };
            controllers.push(tokio::spawn(controller.run()));
        }

        let clock = crate::ticket::TicketClock::spawn(
            self.config.rate,
            ticket_outlets,
            Arc::clone(&self.shutdown),
        );

        info!(
            rate = self.config.rate,
            groups = controllers.len(),
            queued = self.queue.len(),
            "dispatch engine running"
        );

        join_all(controllers).await;

        self.shutdown.request();
        let _ = clock.await;
        drop(completions);
        if let Some(handle) = rps_handle {
            let _ = handle.await;
        }

        self.queue.close();
        self.terminated = true;
        debug!("dispatch engine stopped");
        Ok(())
    }
}

/// Derive pool groups in first-seen order: pools sharing a group id are
/// co-scheduled, pools without one each get their own group.
fn group_pools(specs: Vec<PoolSpec>) -> Vec<Vec<PoolSpec>> {
    let mut groups: Vec<(Option<u64>, Vec<PoolSpec>)> = Vec::new();
    for spec in specs {
        match spec.group {
            Some(id) => {
                if let Some((_, members)) = groups.iter_mut().find(|(key, _)| *key == Some(id)) {
                    members.push(spec);
                } else {
                    groups.push((Some(id), vec![spec]));
                }
            }
            None => groups.push((None, vec![spec])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new(50.0);
        assert_eq!(config.num_pools, 8);
        assert_eq!(config.resolved_max_connections(), 50);
        assert!(config.use_store);
        assert!(config.use_rps);
        assert!(!config.classify_by_status);

        let config = Config::new(0.4);
        assert_eq!(config.resolved_max_connections(), 1);

        let config = Config::new(50.0).with_max_connections(3);
        assert_eq!(config.resolved_max_connections(), 3);
    }

    #[test]
    fn test_group_derivation() {
        let specs = vec![
            PoolSpec::direct().in_group(7),
            PoolSpec::direct(),
            PoolSpec::direct().in_group(7),
            PoolSpec::direct().in_group(2),
            PoolSpec::direct(),
        ];
        let groups = group_pools(specs);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1, 1, 1]);
        assert_eq!(groups[0][0].group, Some(7));
        assert_eq!(groups[0][1].group, Some(7));
        assert_eq!(groups[1][0].group, None);
    }

    #[tokio::test]
    async fn test_run_requires_listeners() {
        let mut client = Client::new(10.0, vec![PoolSpec::direct()]);
        assert!(matches!(
            client.run().await,
            Err(ClientError::NoListeners)
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_bad_rate() {
        let mut client = Client::new(0.0, vec![PoolSpec::direct()]);
        client.on_response(|_, _| {});
        assert!(matches!(client.run().await, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_requires_pools() {
        let mut client = Client::new(10.0, Vec::new());
        client.on_response(|_, _| {});
        assert!(matches!(client.run().await, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_store_disabled() {
        let config = Config::new(10.0).with_store(false);
        let client = Client::with_config(config, vec![PoolSpec::direct()]);
        assert!(matches!(
            client.store_get("k"),
            Err(ClientError::StoreNotSupported)
        ));
        assert!(matches!(
            client.store_set("k", serde_json::json!(1)),
            Err(ClientError::StoreNotSupported)
        ));
    }
}
