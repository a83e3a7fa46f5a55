use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::failover::{Collaborators, FailoverCoordinator};
use crate::graph::InMemoryGraphTrigger;
use crate::leadership::LeadershipWatcher;
use crate::membership::memory::InMemoryMembership;
use crate::membership::monitor::HeartbeatMonitor;
use crate::partition::NoWeighting;
use crate::recovery::{HttpRecoveryNotifier, RecoverySignal};
use crate::store::memory::{InMemoryCacheStore, InMemoryJobStore};

/// A single process wiring the coordinator to in-memory collaborators.
pub struct Node {
    pub config: NodeConfig,
    pub membership: Arc<InMemoryMembership>,
    pub jobs: Arc<InMemoryJobStore>,
    pub cache: Arc<InMemoryCacheStore>,
    pub signal: Arc<RecoverySignal>,
    pub coordinator: Arc<FailoverCoordinator>,
    leadership_tx: watch::Sender<bool>,
}

impl Node {
    /// # Errors
    ///
    /// Returns an error if the HTTP client for peer notifications cannot be built.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let local = config.local_address().clone();
        let membership = Arc::new(InMemoryMembership::with_alive_nodes(
            std::iter::once(local).chain(config.peers.iter().cloned()),
        ));
        let jobs = Arc::new(InMemoryJobStore::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let signal = Arc::new(RecoverySignal::new());
        let notifier = Arc::new(HttpRecoveryNotifier::new(config.notify_timeout())?);

        let deps = Collaborators {
            membership: membership.clone(),
            jobs: jobs.clone(),
            cache: cache.clone(),
            weigher: Arc::new(NoWeighting),
            graph: Arc::new(InMemoryGraphTrigger::new()),
            notifier,
            local: signal.clone(),
        };
        let coordinator = Arc::new(FailoverCoordinator::new(config.coordinator.clone(), deps));
        let (leadership_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            membership,
            jobs,
            cache,
            signal,
            coordinator,
            leadership_tx,
        })
    }

    /// Publishes a leadership change to the coordinator.
    pub fn set_leader(&self, is_leader: bool) {
        self.leadership_tx.send_replace(is_leader);
    }

    /// Runs every subsystem until `shutdown` fires:
    /// the leadership watcher, the heartbeat monitor, a local heartbeat and
    /// the node API server (in the foreground).
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let watcher = LeadershipWatcher::new(
            self.coordinator.clone(),
            self.leadership_tx.subscribe(),
        );
        let watcher_shutdown = shutdown.clone();
        let watcher_handle = tokio::spawn(async move { watcher.run(watcher_shutdown).await });

        let monitor = HeartbeatMonitor::new(
            self.membership.clone(),
            self.coordinator.clone(),
            self.config.monitor.clone(),
        );
        let monitor_shutdown = shutdown.clone();
        tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        let membership = self.membership.clone();
        let local = self.config.local_address().clone();
        let beat_interval = self.config.monitor.check_interval();
        let beat_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(beat_interval);
            loop {
                tokio::select! {
                    _ = beat_shutdown.cancelled() => break,
                    _ = interval.tick() => membership.heartbeat(&local).await,
                }
            }
        });

        let api_state = ApiState {
            coordinator: self.coordinator.clone(),
            local: self.signal.clone(),
        };
        run_api(self.config.listen_addr, api_state, shutdown).await;

        if let Err(e) = watcher_handle.await {
            tracing::error!(error = %e, "Leadership watcher ended abnormally");
        }
        tracing::info!(node = %self.config.local_address(), "Node stopped");
        Ok(())
    }
}
