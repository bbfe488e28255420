use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::connectivity::Connectivity;
use crate::queue::OfflineQueue;
use crate::transport::SyncTransport;

/// Periodic drain driver: every interval, if the network is up, drains the
/// three record kinds. The drains of one tick start in a fixed order
/// (stops, refuelings, deliveries) and run concurrently with each other,
/// but all of them are awaited before the next tick is scheduled, so a
/// kind's drain is never re-entered.
pub struct SyncScheduler<T> {
    queue: Arc<OfflineQueue<T>>,
    connectivity: Arc<dyn Connectivity>,
    interval: Duration,
}

impl<T: SyncTransport> SyncScheduler<T> {
    pub fn new(
        queue: Arc<OfflineQueue<T>>,
        connectivity: Arc<dyn Connectivity>,
        interval: Duration,
    ) -> Self {
        SyncScheduler {
            queue,
            connectivity,
            interval,
        }
    }

    /// Runs until the shutdown signal flips true or its sender is dropped.
    /// The loop only exits between ticks, so teardown is deterministic.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "sync scheduler started, drain interval {:.0}s",
            self.interval.as_secs_f64()
        );
        loop {
            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if !self.connectivity.is_up() {
                log::debug!("offline, skipping drain tick");
                continue;
            }

            tokio::join!(
                self.queue.drain_stops(),
                self.queue.drain_refuelings(),
                self.queue.drain_deliveries(),
            );
        }
        log::info!("sync scheduler stopped");
    }
}
