//! Per-invocation callback context.
//!
//! Every callback receives `&mut Context` next to its outcome: the rate
//! gauges frozen at delivery time, the shared store (already locked, held
//! for the whole callback body), and the `retry`/`exit` control hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::MutexGuard;

use tokio::sync::watch;
use tracing::warn;

use crate::error::ClientError;
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::rps::RpsSnapshot;
use crate::store::StoreMap;

/// Run-wide shutdown request flag, set by [`Context::exit`] and observed
/// by every controller and the ticket clock.
///
/// Controllers poll [`is_requested`](ShutdownFlag::is_requested) on their
/// loop; the ticket clock sleeps a whole period at a time, so it gets a
/// watch channel to wake on instead.
#[derive(Debug)]
pub(crate) struct ShutdownFlag {
    requested: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            signal,
        }
    }
}

impl ShutdownFlag {
    pub(crate) fn request(&self) {
        self.requested.store(true, Ordering::Release);
        let _ = self.signal.send(true);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}

/// State handed to a callback alongside its [`Response`](crate::Response)
/// or [`Failure`](crate::Failure).
pub struct Context<'a> {
    rps: RpsSnapshot,
    store: Option<MutexGuard<'a, StoreMap>>,
    queue: &'a RequestQueue,
    shutdown: &'a ShutdownFlag,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        rps: RpsSnapshot,
        store: Option<MutexGuard<'a, StoreMap>>,
        queue: &'a RequestQueue,
        shutdown: &'a ShutdownFlag,
    ) -> Self {
        Self {
            rps,
            store,
            queue,
            shutdown,
        }
    }

    /// Average completions per second since the run started.
    pub fn rps(&self) -> f64 {
        self.rps.rps
    }

    /// Completions observed in the last second.
    pub fn rps1(&self) -> u64 {
        self.rps.rps1
    }

    /// Completions observed in the last ten seconds.
    pub fn rps10(&self) -> u64 {
        self.rps.rps10
    }

    /// The shared store, locked for the duration of this callback.
    ///
    /// Fails with [`ClientError::StoreNotSupported`] when the client was
    /// configured with `use_store = false`.
    pub fn store(&mut self) -> Result<&mut StoreMap, ClientError> {
        self.store
            .as_deref_mut()
            .ok_or(ClientError::StoreNotSupported)
    }

    /// Re-enqueue a request onto the main queue.
    ///
    /// The request is picked up by whichever controller wins it, exactly
    /// like a fresh `submit`.
    pub fn retry(&self, request: Request) {
        if self.queue.push(request).is_err() {
            warn!("retry dropped: client is shutting down");
        }
    }

    /// Request orderly shutdown: the ticket clock stops, controllers
    /// drain what is already in flight, and `run` returns.
    pub fn exit(&self) {
        self.shutdown.request();
    }
}
