//! Connection pools.
//!
//! A [`PoolSpec`] describes where a pool's traffic goes (direct, through
//! an HTTP proxy, through a SOCKS proxy, or into a caller-supplied
//! transport) and which group it is scheduled in. At run time each spec
//! becomes a [`Pool`]: a fixed worker set issuing requests concurrently
//! up to `max_connections` in flight, posting every outcome on its
//! group's result channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::auth::TokenRing;
use crate::error::DispatchError;
use crate::request::Request;
use crate::response::{Failure, Outcome};
use crate::transport::Transport;

/// Where a pool's requests go.
pub(crate) enum PoolKind {
    Direct,
    HttpProxy {
        url: String,
        proxy_headers: HashMap<String, String>,
        basic_auth: Option<(String, String)>,
    },
    SocksProxy {
        url: String,
        credentials: Option<(String, String)>,
    },
    Custom(Arc<dyn Transport>),
}

impl PoolKind {
    fn label(&self) -> &'static str {
        match self {
            PoolKind::Direct => "direct",
            PoolKind::HttpProxy { .. } => "http-proxy",
            PoolKind::SocksProxy { .. } => "socks-proxy",
            PoolKind::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::HttpProxy { url, .. } => f.debug_struct("HttpProxy").field("url", url).finish(),
            PoolKind::SocksProxy { url, .. } => {
                f.debug_struct("SocksProxy").field("url", url).finish()
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Descriptor for one connection pool.
///
/// Pools sharing a group id are co-scheduled under one rate budget; pools
/// without a group id each form a singleton group with their own budget.
#[derive(Debug)]
pub struct PoolSpec {
    pub(crate) kind: PoolKind,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) group: Option<u64>,
}

impl PoolSpec {
    fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            headers: HashMap::new(),
            group: None,
        }
    }

    /// A pool that connects to upstreams directly.
    pub fn direct() -> Self {
        Self::new(PoolKind::Direct)
    }

    /// A pool that routes every request through an HTTP proxy.
    pub fn http_proxy(url: impl Into<String>) -> Self {
        Self::new(PoolKind::HttpProxy {
            url: url.into(),
            proxy_headers: HashMap::new(),
            basic_auth: None,
        })
    }

    /// A pool that routes every request through a SOCKS5 proxy.
    pub fn socks_proxy(url: impl Into<String>) -> Self {
        Self::new(PoolKind::SocksProxy {
            url: url.into(),
            credentials: None,
        })
    }

    /// A pool backed by a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::new(PoolKind::Custom(transport))
    }

    /// Add a default header applied to every request through this pool.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Place this pool in a scheduling group.
    pub fn in_group(mut self, group: u64) -> Self {
        self.group = Some(group);
        self
    }

    /// Add a header sent to the HTTP proxy itself. Ignored for other
    /// pool kinds.
    pub fn proxy_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let PoolKind::HttpProxy { proxy_headers, .. } = &mut self.kind {
            proxy_headers.insert(key.into(), value.into());
        }
        self
    }

    /// Authenticate against the HTTP proxy with basic auth. Ignored for
    /// other pool kinds.
    pub fn proxy_basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        if let PoolKind::HttpProxy { basic_auth, .. } = &mut self.kind {
            *basic_auth = Some((user.into(), pass.into()));
        }
        self
    }

    /// Authenticate against the SOCKS proxy. Ignored for other pool
    /// kinds.
    pub fn socks_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        if let PoolKind::SocksProxy { credentials, .. } = &mut self.kind {
            *credentials = Some((user.into(), pass.into()));
        }
        self
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        self.kind.label()
    }
}

struct PoolTask {
    request: Request,
    permit: OwnedSemaphorePermit,
}

/// Runtime pool: a worker set behind a task channel.
///
/// `submit` holds a semaphore permit per accepted request, so `pending`
/// never exceeds `max_connections` and submission waits once the pool is
/// saturated. Dropping the pool closes the task channel and the workers
/// drain out.
pub(crate) struct Pool {
    label: String,
    tasks: mpsc::UnboundedSender<PoolTask>,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
}

impl Pool {
    /// Start the worker set and hand back the submission handle.
    pub(crate) fn spawn(
        label: String,
        transport: Arc<dyn Transport>,
        max_connections: usize,
        auth: Option<Arc<TokenRing>>,
        results: mpsc::Sender<Outcome>,
    ) -> Self {
        let max_connections = max_connections.max(1);
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel::<PoolTask>();
        let tasks_rx = Arc::new(tokio::sync::Mutex::new(tasks_rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let draining = Arc::new(AtomicBool::new(false));

        debug!(pool = %label, workers = max_connections, "starting pool");

        for index in 0..max_connections {
            tokio::spawn(worker(
                label.clone(),
                index,
                Arc::clone(&transport),
                auth.clone(),
                Arc::clone(&tasks_rx),
                Arc::clone(&pending),
                Arc::clone(&draining),
                results.clone(),
            ));
        }

        Self {
            label,
            tasks: tasks_tx,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            pending,
            draining,
        }
    }

    /// Hand a request to the worker set. Waits while the pool is at its
    /// in-flight cap.
    pub(crate) async fn submit(&self, request: Request) -> Result<(), Failure> {
        let id = request.id;
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(Failure {
                    error: DispatchError::Shutdown,
                    id,
                })
            }
        };

        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tasks.send(PoolTask { request, permit }).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(Failure {
                error: DispatchError::Shutdown,
                id,
            });
        }
        Ok(())
    }

    /// Submitted-but-not-completed count.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Forced-shutdown mode: tasks still queued inside the pool are
    /// answered with a shutdown failure instead of touching the wire.
    pub(crate) fn drain(&self) {
        if !self.draining.swap(true, Ordering::AcqRel) {
            debug!(pool = %self.label, pending = self.pending(), "pool draining");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker(
    label: String,
    index: usize,
    transport: Arc<dyn Transport>,
    auth: Option<Arc<TokenRing>>,
    tasks: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PoolTask>>>,
    pending: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
    results: mpsc::Sender<Outcome>,
) {
    loop {
        let task = {
            let mut rx = tasks.lock().await;
            match rx.recv().await {
                Some(task) => task,
                None => {
                    debug!(pool = %label, worker = index, "worker shutting down");
                    return;
                }
            }
        };
        let PoolTask {
            mut request,
            permit,
        } = task;

        let outcome = if draining.load(Ordering::Acquire) {
            Outcome::Failure(Failure {
                error: DispatchError::Shutdown,
                id: request.id,
            })
        } else {
            if let Some(ring) = &auth {
                ring.apply(&mut request);
            }
            match transport.send(&request).await {
                Ok(mut response) => {
                    response.id = request.id;
                    Outcome::Response(response)
                }
                Err(error) => Outcome::Failure(Failure {
                    error: DispatchError::Transport(error),
                    id: request.id,
                }),
            }
        };

        pending.fetch_sub(1, Ordering::Relaxed);
        if results.send(outcome).await.is_err() {
            // the controller is gone; nothing left to report to
            return;
        }
        drop(permit);
    }
}
