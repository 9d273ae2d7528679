//! Reconciliation scheduler
//!
//! Background task that sweeps expired pending matches. It polls quickly
//! while pending matches exist and backs off when there is nothing to do.

use crate::matchmaking::pending::{PendingMatchLifecycle, SweepOutcome};
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default delay while pending matches exist
pub const DEFAULT_BUSY_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay when nothing is pending
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(20);

pub struct ReconciliationScheduler {
    lifecycle: PendingMatchLifecycle,
    metrics: Arc<MetricsCollector>,
    busy_interval: Duration,
    idle_interval: Duration,
}

impl ReconciliationScheduler {
    pub fn new(lifecycle: PendingMatchLifecycle, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            lifecycle,
            metrics,
            busy_interval: DEFAULT_BUSY_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, busy: Duration, idle: Duration) -> Self {
        self.busy_interval = busy;
        self.idle_interval = idle;
        self
    }

    /// Delay before the next sweep
    pub fn next_delay(&self, outcome: Option<&SweepOutcome>) -> Duration {
        match outcome {
            Some(outcome) if outcome.has_work() => self.busy_interval,
            _ => self.idle_interval,
        }
    }

    /// Run the loop on the runtime until `shutdown` turns true or its sender
    /// is dropped
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Reconciliation scheduler started (busy {:?}, idle {:?})",
            self.busy_interval, self.idle_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let timer = self.metrics.start_timer();
            let outcome = match self.lifecycle.sweep_with_shutdown(&shutdown).await {
                Ok(outcome) => {
                    self.metrics.record_sweep(outcome.expired, timer.stop());
                    Some(outcome)
                }
                Err(e) => {
                    error!("Reconciliation sweep failed: {:#}", e);
                    None
                }
            };

            let delay = self.next_delay(outcome.as_ref());
            debug!("Next sweep in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::active::ActiveMatchManager;
    use crate::matchmaking::queue::QueueManager;
    use crate::rating::{RatingPipeline, ScriptedRatingClient};
    use crate::store::{InMemoryStore, Store};
    use crate::types::PendingMatchStatus;

    fn scheduler(store: Arc<InMemoryStore>) -> (ReconciliationScheduler, QueueManager) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let pipeline = Arc::new(RatingPipeline::new(
            store.clone(),
            Arc::new(ScriptedRatingClient::new().unwrap()),
            metrics.clone(),
        ));
        let queue = QueueManager::new(store.clone(), metrics.clone())
            .with_acceptance_window(Duration::from_millis(50));
        let active = ActiveMatchManager::new(store.clone(), pipeline, metrics.clone());
        let lifecycle = PendingMatchLifecycle::new(store, queue.clone(), active, metrics.clone());

        let scheduler = ReconciliationScheduler::new(lifecycle, metrics)
            .with_intervals(Duration::from_millis(20), Duration::from_secs(60));
        (scheduler, queue)
    }

    #[test]
    fn test_delay_adapts_to_pending_work() {
        let store = Arc::new(InMemoryStore::new());
        let (scheduler, _) = scheduler(store);

        let busy = SweepOutcome {
            pending_seen: 2,
            expired: 0,
        };
        assert_eq!(scheduler.next_delay(Some(&busy)), Duration::from_millis(20));
        assert_eq!(
            scheduler.next_delay(Some(&SweepOutcome::default())),
            Duration::from_secs(60)
        );
        assert_eq!(scheduler.next_delay(None), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_loop_expires_matches_and_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let (scheduler, queue) = scheduler(store.clone());
        for player in 1..=4 {
            queue.enqueue(player).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handle = scheduler.spawn(rx);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let declined = store
            .pending_matches_with_status(PendingMatchStatus::Declined)
            .await
            .unwrap();
        assert_eq!(declined.len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
