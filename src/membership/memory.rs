//! In-process membership table.
//!
//! Not shared across processes. The binary seeds it from the configured peer
//! list; tests drive it directly through [`InMemoryMembership::heartbeat`] and
//! [`InMemoryMembership::mark_dead`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LivenessRecord, Membership, NodeAddress};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct InMemoryMembership {
    records: RwLock<BTreeMap<NodeAddress, LivenessRecord>>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table where every listed node is alive as of now.
    pub fn with_alive_nodes<I, A>(nodes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<NodeAddress>,
    {
        let now = Utc::now();
        let records = nodes
            .into_iter()
            .map(|node| (node.into(), LivenessRecord::alive_at(now, 1)))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Records a heartbeat at the current time.
    pub async fn heartbeat(&self, node: &NodeAddress) {
        self.heartbeat_at(node, Utc::now()).await;
    }

    pub async fn heartbeat_at(&self, node: &NodeAddress, at: DateTime<Utc>) {
        let mut records = self.records.write().await;
        let version = records.get(node).map(|r| r.version + 1).unwrap_or(1);
        records.insert(node.clone(), LivenessRecord::alive_at(at, version));
    }

    /// Flips `node` to dead without going through the heartbeat monitor.
    pub async fn mark_dead(&self, node: &NodeAddress) {
        let mut records = self.records.write().await;
        let record = records
            .get(node)
            .map(LivenessRecord::marked_dead)
            .unwrap_or_else(LivenessRecord::never_alive);
        records.insert(node.clone(), record);
        tracing::debug!(node = %node, "Node marked dead");
    }

    pub async fn record(&self, node: &NodeAddress) -> Option<LivenessRecord> {
        self.records.read().await.get(node).cloned()
    }
}

#[async_trait]
impl Membership for InMemoryMembership {
    async fn is_alive(&self, node: &NodeAddress) -> Result<bool> {
        Ok(self
            .records
            .read()
            .await
            .get(node)
            .map(|r| r.alive)
            .unwrap_or(false))
    }

    async fn liveness(&self, node: &NodeAddress) -> Result<LivenessRecord> {
        Ok(self
            .records
            .read()
            .await
            .get(node)
            .cloned()
            .unwrap_or_else(LivenessRecord::never_alive))
    }

    async fn list_alive_nodes(&self) -> Result<Vec<NodeAddress>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.alive)
            .map(|(node, _)| node.clone())
            .collect())
    }

    async fn list_liveness(&self) -> Result<Vec<(NodeAddress, LivenessRecord)>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(node, r)| (node.clone(), r.clone()))
            .collect())
    }

    async fn reset_liveness(
        &self,
        node: &NodeAddress,
        record: LivenessRecord,
        synchronized: bool,
    ) -> Result<()> {
        // Every write already holds the table lock, so a synchronized reset
        // needs nothing extra here.
        self.records.write().await.insert(node.clone(), record);
        tracing::debug!(node = %node, synchronized, "Liveness record reset");
        Ok(())
    }

    async fn compare_and_set_liveness(
        &self,
        node: &NodeAddress,
        expected_version: u64,
        record: LivenessRecord,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        let current = records.get(node).map(|r| r.version).unwrap_or(0);
        if current != expected_version {
            return Ok(false);
        }
        records.insert(node.clone(), record);
        Ok(true)
    }
}
