//! Periodic expiration of stale reservations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::ledger::Ledger;

pub struct Sweeper {
    ledger: Arc<Ledger>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(ledger: Arc<Ledger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    /// Run one sweep, returning how many bookings expired. Errors are
    /// logged; the next tick tries again.
    pub fn sweep_once(&self) -> usize {
        match self.ledger.expire_stale() {
            Ok(0) => 0,
            Ok(expired) => {
                info!(expired, "expired stale reservations");
                expired
            }
            Err(e) => {
                warn!(reason = %e, "expiration sweep failed");
                0
            }
        }
    }

    /// Sweep on every tick until `shutdown` changes or its sender is dropped.
    /// The first sweep runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("expiration sweeper stopped");
    }
}
