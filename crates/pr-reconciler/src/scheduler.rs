//! Periodic cycle scheduling.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::reconciler::Reconciler;
use crate::store::StateStore;

/// Runs reconciliation cycles on a fixed interval until cancelled.
///
/// Cycles never overlap: the next tick is only awaited once the previous
/// cycle has finished, and a cycle that overruns delays the schedule
/// instead of producing a burst of catch-up ticks.
pub struct Scheduler {
    reconciler: Reconciler,
    interval: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run until `cancel` fires. The first cycle starts immediately.
    ///
    /// Returns the number of cycles started.
    pub async fn run(&self, store: &mut StateStore, cancel: CancellationToken) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconciliation scheduler"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(cycles, "Scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    debug!(cycle = cycles, "Scheduler tick");
                    let report = self.reconciler.run_cycle(store, &cancel).await;
                    if report.cancelled {
                        info!(cycles, "Scheduler stopping after interrupted cycle");
                        break;
                    }
                }
            }
        }

        cycles
    }
}
