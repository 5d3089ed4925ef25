//! Ticket clock: the sole enforcement point of the rate ceiling.
//!
//! One task ticks every `1/rate` seconds and offers one permit to every
//! controller. Ticket channels have capacity 1 and the offer is a
//! `try_send`, so a controller can bank at most one unconsumed permit;
//! anything beyond that is forfeited. Each pool group is therefore
//! limited independently at the configured rate, and the aggregate
//! ceiling is `rate * groups`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::context::ShutdownFlag;

pub(crate) struct TicketClock;

impl TicketClock {
    pub(crate) fn spawn(
        rate: f64,
        outlets: Vec<mpsc::Sender<()>>,
        shutdown: Arc<ShutdownFlag>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs_f64((1.0 / rate).max(1e-6));
        tokio::spawn(tick_loop(period, outlets, shutdown))
    }
}

async fn tick_loop(period: Duration, outlets: Vec<mpsc::Sender<()>>, shutdown: Arc<ShutdownFlag>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
        if shutdown.is_requested() {
            break;
        }

        let mut open = 0usize;
        for outlet in &outlets {
            match outlet.try_send(()) {
                Ok(()) => open += 1,
                // the controller still holds its previous permit
                Err(mpsc::error::TrySendError::Full(())) => open += 1,
                Err(mpsc::error::TrySendError::Closed(())) => {}
            }
        }
        if open == 0 {
            break;
        }
    }

    debug!("ticket clock stopped");
}
