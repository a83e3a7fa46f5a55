use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{LivenessRecord, Membership, NodeAddress};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::failover::FailoverCoordinator;

/// Detects nodes whose heartbeats stopped and reports them to the coordinator.
///
/// Only acts while the coordinator is active. A node is due when its heartbeat
/// is stale, or when a recovery reset it to never-alive because work was left
/// behind. A due node is flipped to dead with a compare-and-swap on its
/// liveness version, and reported only if that swap wins, so a node is never
/// reported twice for the same missed heartbeat or the same reset.
pub struct HeartbeatMonitor {
    membership: Arc<dyn Membership>,
    coordinator: Arc<FailoverCoordinator>,
    config: MonitorConfig,
}

impl HeartbeatMonitor {
    pub fn new(
        membership: Arc<dyn Membership>,
        coordinator: Arc<FailoverCoordinator>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            membership,
            coordinator,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if !self.coordinator.is_active() {
                        continue;
                    }
                    if let Err(e) = self.check_once(Utc::now()).await {
                        tracing::warn!(error = %e, "Heartbeat check failed");
                    }
                }
            }
        }
    }

    /// One pass over the liveness table as of `now`. Returns the nodes reported.
    pub async fn check_once(&self, now: DateTime<Utc>) -> Result<Vec<NodeAddress>> {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout())
            .unwrap_or(chrono::Duration::seconds(10));

        let mut reported = Vec::new();
        for (node, record) in self.membership.list_liveness().await? {
            if !is_due(&record, now, timeout) {
                continue;
            }
            let applied = self
                .membership
                .compare_and_set_liveness(&node, record.version, record.marked_dead())
                .await?;
            if !applied {
                tracing::debug!(node = %node, "Liveness changed concurrently, skipping");
                continue;
            }
            if record.needs_recovery() {
                tracing::warn!(node = %node, "Node still holds work from an earlier recovery");
            } else {
                tracing::warn!(node = %node, last_heartbeat = ?record.last_heartbeat, "Heartbeat timed out");
            }
            if self.coordinator.report_node_down(node.as_str()) {
                reported.push(node);
            }
        }
        Ok(reported)
    }
}

fn is_expired(record: &LivenessRecord, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    match record.last_heartbeat {
        Some(at) => record.alive && now - at > timeout,
        None => false,
    }
}

fn is_due(record: &LivenessRecord, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    is_expired(record, now, timeout) || record.needs_recovery()
}
