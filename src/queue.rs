//! Shared request queue.
//!
//! Multi-producer (submitters and `retry`), multi-consumer (one controller
//! per pool group). Controllers only ever poll it non-blockingly, so a
//! mutex-guarded deque is all the structure needed; a consumed ticket
//! whose `try_pop` comes back empty is simply forfeited.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::ClientError;
use crate::request::Request;

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    items: Mutex<VecDeque<Request>>,
    closed: AtomicBool,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request. Fails once the owning client has finished its
    /// run and closed the queue.
    pub(crate) fn push(&self, request: Request) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Terminated);
        }
        self.lock().push_back(request);
        Ok(())
    }

    /// Non-blocking FIFO pop.
    pub(crate) fn try_pop(&self) -> Option<Request> {
        self.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Stop accepting new requests.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Request>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
