//! Background eviction task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::store::CacheStore;

/// Handle to a running housekeeper. Dropping it stops the task.
#[derive(Debug)]
pub struct HousekeeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HousekeeperHandle {
    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HousekeeperHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Run [`CacheStore::run_eviction_pass`] every `interval` on the current
/// tokio runtime.
///
/// The task holds only a weak reference and exits once the store is dropped.
pub fn spawn_housekeeper(store: &Arc<CacheStore>, interval: Duration) -> HousekeeperHandle {
    let weak: Weak<CacheStore> = Arc::downgrade(store);
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(interval_ms = interval.as_millis(), "Cache housekeeper started");

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let Some(store) = weak.upgrade() else { break };
                    let report = store.run_eviction_pass();
                    if report.total() > 0 {
                        debug!(expired = report.expired, reclaimed = report.reclaimed, "Housekeeping pass");
                    }
                }
            }
        }
        info!("Cache housekeeper stopped");
    });

    HousekeeperHandle {
        stop: Some(stop_tx),
        task: Some(task),
    }
}
