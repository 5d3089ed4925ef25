//! Completion-rate counter.
//!
//! A single task subscribes to completion events from every controller and
//! maintains three gauges: the instantaneous average since start, the
//! count of completions in the last second, and the count in the last ten
//! seconds. Controllers read the gauges when building a callback context;
//! reads may lag a completion or two behind, which is fine for a gauge.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Point-in-time view of the completion rate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RpsSnapshot {
    /// Average completions per second since the run started
    pub rps: f64,
    /// Completions in the last second
    pub rps1: u64,
    /// Completions in the last ten seconds
    pub rps10: u64,
}

/// Lock-free gauge cell, written by the counter task and read by
/// controllers.
#[derive(Debug, Default)]
pub(crate) struct RpsGauges {
    rps_bits: AtomicU64,
    rps1: AtomicU64,
    rps10: AtomicU64,
}

impl RpsGauges {
    pub(crate) fn snapshot(&self) -> RpsSnapshot {
        RpsSnapshot {
            rps: f64::from_bits(self.rps_bits.load(Ordering::Relaxed)),
            rps1: self.rps1.load(Ordering::Relaxed),
            rps10: self.rps10.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, rps: f64, rps1: u64, rps10: u64) {
        self.rps_bits.store(rps.to_bits(), Ordering::Relaxed);
        self.rps1.store(rps1, Ordering::Relaxed);
        self.rps10.store(rps10, Ordering::Relaxed);
    }
}

pub(crate) struct RpsCounter;

impl RpsCounter {
    /// Spawn the counter task. The task ends when every sender clone has
    /// been dropped.
    pub(crate) fn spawn() -> (Arc<RpsGauges>, mpsc::UnboundedSender<()>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gauges = Arc::new(RpsGauges::default());
        let handle = tokio::spawn(count(rx, Arc::clone(&gauges)));
        (gauges, tx, handle)
    }
}

async fn count(mut events: mpsc::UnboundedReceiver<()>, gauges: Arc<RpsGauges>) {
    let start = Instant::now();
    let mut total: u64 = 0;
    // events younger than one second
    let mut window1: VecDeque<Instant> = VecDeque::new();
    // events aged out of window1 but younger than ten seconds
    let mut window9: VecDeque<Instant> = VecDeque::new();

    while events.recv().await.is_some() {
        let now = Instant::now();
        total += 1;
        window1.push_back(now);

        while let Some(front) = window1.front().copied() {
            if now.duration_since(front) <= Duration::from_secs(1) {
                break;
            }
            window1.pop_front();
            window9.push_back(front);
        }
        while let Some(front) = window9.front().copied() {
            if now.duration_since(front) <= Duration::from_secs(10) {
                break;
            }
            window9.pop_front();
        }

        let elapsed = now.duration_since(start).as_secs_f64().max(f64::EPSILON);
        gauges.publish(
            total as f64 / elapsed,
            window1.len() as u64,
            (window1.len() + window9.len()) as u64,
        );
    }

    debug!(total, "rps counter stopped");
}
