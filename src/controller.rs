//! Group controllers.
//!
//! One controller task owns each pool group. It consumes the shared
//! request queue under ticket gating, dispatches to the least-loaded pool
//! of its group, and drains completions into the registered callbacks.
//! The store mutex is held for the whole delivery of one outcome, and a
//! panicking callback is contained here rather than taking the
//! controller down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::context::{Context, ShutdownFlag};
use crate::error::DispatchError;
use crate::pool::Pool;
use crate::queue::RequestQueue;
use crate::response::{Failure, Outcome, Response};
use crate::rps::RpsGauges;
use crate::store::Store;

pub(crate) type ResponseCallback = Box<dyn Fn(&Response, &mut Context<'_>) + Send + Sync>;
pub(crate) type ErrorCallback = Box<dyn Fn(&Failure, &mut Context<'_>) + Send + Sync>;

/// Registered listeners, shared by every controller.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) on_response: Vec<ResponseCallback>,
    pub(crate) on_error: Vec<ErrorCallback>,
}

impl Callbacks {
    pub(crate) fn is_empty(&self) -> bool {
        self.on_response.is_empty() && self.on_error.is_empty()
    }
}

/// How often an otherwise idle controller re-checks for termination.
const IDLE_TICK: Duration = Duration::from_millis(10);

pub(crate) struct Controller {
    pub(crate) label: String,
    pub(crate) pools: Vec<Pool>,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) tickets: mpsc::Receiver<()>,
    pub(crate) results: mpsc::Receiver<Outcome>,
    pub(crate) callbacks: Arc<Callbacks>,
    pub(crate) store: Option<Arc<Store>>,
    pub(crate) gauges: Arc<RpsGauges>,
    pub(crate) completions: Option<mpsc::UnboundedSender<()>>,
    pub(crate) shutdown: Arc<ShutdownFlag>,
    pub(crate) classify_by_status: bool,
    pub(crate) pending: usize,
    pub(crate) cursor: usize,
}

impl Controller {
    pub(crate) async fn run(mut self) {
        debug!(group = %self.label, pools = self.pools.len(), "controller started");

        let mut idle = tokio::time::interval(IDLE_TICK);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            while let Ok(outcome) = self.results.try_recv() {
                self.complete(outcome);
            }

            let draining = self.shutdown.is_requested();
            if draining {
                for pool in &self.pools {
                    pool.drain();
                }
            }
            if self.pending == 0 && (draining || self.queue.is_empty()) {
                break;
            }

            tokio::select! {
                biased;
                Some(outcome) = self.results.recv() => {
                    self.complete(outcome);
                }
                Some(()) = self.tickets.recv(), if !draining => {
                    // an empty queue forfeits the permit
                    if let Some(request) = self.queue.try_pop() {
                        self.dispatch(request).await;
                    }
                }
                _ = idle.tick() => {}
            }
        }

        debug!(group = %self.label, "controller finished");
    }

    /// Send one consumed ticket's worth of work to the least-loaded pool.
    async fn dispatch(&mut self, request: crate::request::Request) {
        let index = match self.select_pool() {
            Some(index) => index,
            None => return,
        };

        self.pending += 1;
        if let Err(failure) = self.pools[index].submit(request).await {
            self.complete(Outcome::Failure(failure));
        }
    }

    /// Least-pending pool of the group. The scan starts one pool later on
    /// each dispatch so that ties rotate instead of pinning the group's
    /// first pool.
    fn select_pool(&mut self) -> Option<usize> {
        let count = self.pools.len();
        if count == 0 {
            return None;
        }
        let start = self.cursor % count;
        self.cursor = self.cursor.wrapping_add(1);

        let mut best = start;
        let mut best_pending = self.pools[start].pending();
        for offset in 1..count {
            let index = (start + offset) % count;
            let pending = self.pools[index].pending();
            if pending < best_pending {
                best = index;
                best_pending = pending;
            }
        }
        Some(best)
    }

    fn complete(&mut self, outcome: Outcome) {
        self.pending = self.pending.saturating_sub(1);
        if let Some(completions) = &self.completions {
            let _ = completions.send(());
        }
        self.deliver(outcome);
    }

    /// Run the registered callbacks for one outcome, holding the store
    /// mutex across all of them.
    fn deliver(&self, outcome: Outcome) {
        let guard = self.store.as_ref().map(|store| store.lock());
        let mut ctx = Context::new(
            self.gauges.snapshot(),
            guard,
            self.queue.as_ref(),
            self.shutdown.as_ref(),
        );

        match outcome {
            Outcome::Response(response)
                if self.classify_by_status && !response.is_success() =>
            {
                let failure = Failure {
                    error: DispatchError::Status(response.status),
                    id: response.id,
                };
                for callback in &self.callbacks.on_error {
                    invoke(|| callback(&failure, &mut ctx), &self.label);
                }
            }
            Outcome::Response(response) => {
                for callback in &self.callbacks.on_response {
                    invoke(|| callback(&response, &mut ctx), &self.label);
                }
            }
            Outcome::Failure(failure) => {
                for callback in &self.callbacks.on_error {
                    invoke(|| callback(&failure, &mut ctx), &self.label);
                }
            }
        }
    }
}

/// Contain a panicking callback.
fn invoke(callback: impl FnOnce(), label: &str) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(group = %label, %message, "callback panicked; continuing");
    }
}
