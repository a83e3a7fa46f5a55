use std::net::SocketAddr;
use std::time::Duration;

use crate::membership::NodeAddress;

/// Tuning for the failover coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address this process is reachable at. Recovery triggers for this
    /// address are delivered in-process instead of over the network.
    pub local_address: NodeAddress,
    /// Maximum number of rows read per page while reclaiming a dead node.
    pub page_size: usize,
    /// How often the job-graph checker runs while active.
    pub graph_check_interval_ms: u64,
    /// Retries scheduled after a migration leaves work behind on a dead node.
    pub cascade_max_retries: u32,
    pub cascade_backoff_base_ms: u64,
    pub cascade_backoff_max_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_address: NodeAddress::new("127.0.0.1:8090"),
            page_size: 1000,
            graph_check_interval_ms: 300_000,
            cascade_max_retries: 3,
            cascade_backoff_base_ms: 1_000,
            cascade_backoff_max_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(local_address: impl Into<NodeAddress>) -> Self {
        Self {
            local_address: local_address.into(),
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_graph_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.graph_check_interval_ms = interval_ms;
        self
    }

    pub fn with_cascade_retry(mut self, max_retries: u32, base_ms: u64, max_ms: u64) -> Self {
        self.cascade_max_retries = max_retries;
        self.cascade_backoff_base_ms = base_ms;
        self.cascade_backoff_max_ms = max_ms.max(base_ms);
        self
    }

    pub fn graph_check_interval(&self) -> Duration {
        Duration::from_millis(self.graph_check_interval_ms.max(1))
    }

    /// Backoff before cascade retry `attempt` (1-based), without jitter.
    pub fn cascade_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .cascade_backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.cascade_backoff_max_ms);
        Duration::from_millis(delay)
    }
}

/// Settings for the heartbeat monitor that turns missed heartbeats into
/// dead-node reports.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 2_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub peers: Vec<NodeAddress>,
    /// Timeout for a single recovery-trigger request to a peer.
    pub notify_timeout_ms: u64,
    pub coordinator: CoordinatorConfig,
    pub monitor: MonitorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            peers: Vec::new(),
            notify_timeout_ms: 3_000,
            coordinator: CoordinatorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Creates a node config whose advertised address matches `listen_addr`.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            coordinator: CoordinatorConfig::new(listen_addr.to_string()),
            ..Default::default()
        }
    }

    pub fn with_advertised_address(mut self, address: impl Into<NodeAddress>) -> Self {
        self.coordinator.local_address = address.into();
        self
    }

    pub fn with_peer(mut self, addr: impl Into<NodeAddress>) -> Self {
        self.peers.push(addr.into());
        self
    }

    pub fn local_address(&self) -> &NodeAddress {
        &self.coordinator.local_address
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
