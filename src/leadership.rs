use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::failover::FailoverCoordinator;

/// Forwards leadership changes from an election mechanism to the coordinator.
///
/// The election side publishes `true` while this process leads. The current
/// value is applied on start, then every change after it.
pub struct LeadershipWatcher {
    coordinator: Arc<FailoverCoordinator>,
    leadership: watch::Receiver<bool>,
}

impl LeadershipWatcher {
    pub fn new(coordinator: Arc<FailoverCoordinator>, leadership: watch::Receiver<bool>) -> Self {
        Self {
            coordinator,
            leadership,
        }
    }

    /// Runs until `shutdown` fires or the sender is dropped, then steps down.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let initial = *self.leadership.borrow_and_update();
        self.coordinator.set_leadership(initial).await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = self.leadership.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Leadership source closed, stepping down");
                        break;
                    }
                    let is_leader = *self.leadership.borrow_and_update();
                    self.coordinator.set_leadership(is_leader).await;
                }
            }
        }

        self.coordinator.shutdown().await;
    }
}
