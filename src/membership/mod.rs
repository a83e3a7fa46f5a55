//! Cluster membership as seen by the coordinator.
//!
//! The heartbeat transport is owned elsewhere. The coordinator only needs to
//! read liveness, list alive nodes, and fence liveness updates so that two
//! actors never recover the same node at once.
//!
//! - [`Membership`]: the contract
//! - [`memory::InMemoryMembership`]: single-process implementation
//! - [`monitor::HeartbeatMonitor`]: turns missed heartbeats into dead-node reports

pub mod memory;
pub mod monitor;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `host:port` identifier of a worker node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for NodeAddress {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Liveness state of one node plus the fencing token used for
/// compare-and-swap updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub alive: bool,
    pub version: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl LivenessRecord {
    pub fn alive_at(at: DateTime<Utc>, version: u64) -> Self {
        Self {
            alive: true,
            version,
            last_heartbeat: Some(at),
        }
    }

    /// Synthetic state for a node that has never reported in. Writing it back
    /// marks the node as still needing recovery.
    pub fn never_alive() -> Self {
        Self {
            alive: false,
            version: 0,
            last_heartbeat: None,
        }
    }

    /// True for the state written by [`LivenessRecord::never_alive`] after a
    /// recovery that left work behind. Detection treats it as a fresh death.
    pub fn needs_recovery(&self) -> bool {
        !self.alive && self.version == 0 && self.last_heartbeat.is_none()
    }

    /// Copy of this record flipped to dead, with the version bumped.
    pub fn marked_dead(&self) -> Self {
        Self {
            alive: false,
            version: self.version + 1,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

#[async_trait]
pub trait Membership: Send + Sync {
    async fn is_alive(&self, node: &NodeAddress) -> Result<bool>;

    /// Returns the liveness record for `node`; unknown nodes read as
    /// [`LivenessRecord::never_alive`].
    async fn liveness(&self, node: &NodeAddress) -> Result<LivenessRecord>;

    async fn list_alive_nodes(&self) -> Result<Vec<NodeAddress>>;

    async fn list_liveness(&self) -> Result<Vec<(NodeAddress, LivenessRecord)>>;

    /// Overwrites the record unconditionally. With `synchronized` the write is
    /// serialized against concurrent compare-and-swap updates.
    async fn reset_liveness(
        &self,
        node: &NodeAddress,
        record: LivenessRecord,
        synchronized: bool,
    ) -> Result<()>;

    /// Writes `record` only if the stored version equals `expected_version`.
    /// Returns whether the write was applied.
    async fn compare_and_set_liveness(
        &self,
        node: &NodeAddress,
        expected_version: u64,
        record: LivenessRecord,
    ) -> Result<bool>;
}
