use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::xp_sync::SyncCoordinator;

/// Periodic XP sync. The first tick fires at start; a tick is skipped when a
/// manual run happened within the last half interval.
pub struct SyncScheduler {
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn start(coordinator: Arc<SyncCoordinator>, interval: Duration) -> Self {
        info!("XP sync scheduled every {:?}", interval);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match coordinator.run_if_stale(interval / 2).await {
                    None => info!("Skipping scheduled XP sync, last run is recent"),
                    Some(Ok(summary)) => info!(
                        "Scheduled XP sync done: {} ok, {} failed, {} skipped",
                        summary.success, summary.failed, summary.skipped
                    ),
                    Some(Err(e)) => error!("Scheduled XP sync failed: {}", e),
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the timer task, including a run that is in flight
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        info!("XP sync scheduler stopped");
    }
}
