//! Failover coordinator.
//!
//! Runs on every node, does work only while this node holds leadership:
//!
//! - **Intake**: [`FailoverCoordinator::report_node_down`] queues a dead node
//!   without blocking the caller.
//! - **Node recovery worker**: drains the queue one node at a time. For each
//!   node it moves unfinished jobs and cached submissions to alive nodes,
//!   then tells every alive node to re-scan its work.
//! - **Job graph checker**: periodically makes sure today's job graph exists,
//!   so a leader promoted mid-day still gets one.
//!
//! # Lifecycle
//!
//! ```text
//! Standby --set_leadership(true)--> Active --set_leadership(false)--> Standby
//! ```
//!
//! Repeated signals for the current state are no-ops. Going to standby lets
//! the recovery worker finish the node it is on; the graph checker and any
//! pending cascade retries are cancelled immediately.

mod intake;
mod reclaim;
mod workers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::graph::JobGraphTrigger;
use crate::membership::{Membership, NodeAddress};
use crate::partition::PartitionWeigher;
use crate::recovery::{LocalRecovery, RecoveryNotifier};
use crate::store::{JobStore, SubmissionCacheStore};

use intake::IntakeQueue;
use workers::WorkerGroup;

pub use reclaim::generate_error_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Standby,
    Active,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Standby => write!(f, "standby"),
            CoordinatorState::Active => write!(f, "active"),
        }
    }
}

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn Membership>,
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn SubmissionCacheStore>,
    pub weigher: Arc<dyn PartitionWeigher>,
    pub graph: Arc<dyn JobGraphTrigger>,
    pub notifier: Arc<dyn RecoveryNotifier>,
    pub local: Arc<dyn LocalRecovery>,
}

/// Outcome of one recovery cycle for one dead node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub node: NodeAddress,
    /// The node read as alive again and nothing was moved.
    pub skipped_alive: bool,
    pub jobs_reassigned: usize,
    pub artifacts_reassigned: usize,
    /// Cache records that could not be read and were recorded as submit failures.
    pub artifacts_failed: usize,
    /// Work was still owned by the dead node after the pass.
    pub leftover: bool,
    pub notified: Vec<NodeAddress>,
    pub notify_failures: Vec<NodeAddress>,
}

struct Lifecycle {
    state: CoordinatorState,
    group: Option<WorkerGroup>,
    /// Recovery workers from earlier activations still finishing a node.
    draining: Vec<JoinHandle<()>>,
}

pub struct FailoverCoordinator {
    config: CoordinatorConfig,
    deps: Collaborators,
    intake: Arc<IntakeQueue>,
    lifecycle: Mutex<Lifecycle>,
    active: AtomicBool,
    /// Consecutive cascades per dead node.
    cascades: Mutex<HashMap<NodeAddress, u32>>,
}

impl FailoverCoordinator {
    pub fn new(config: CoordinatorConfig, deps: Collaborators) -> Self {
        Self {
            config,
            deps,
            intake: Arc::new(IntakeQueue::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: CoordinatorState::Standby,
                group: None,
                draining: Vec::new(),
            }),
            active: AtomicBool::new(false),
            cascades: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn local_address(&self) -> &NodeAddress {
        &self.config.local_address
    }

    pub fn state(&self) -> CoordinatorState {
        if self.active.load(Ordering::SeqCst) {
            CoordinatorState::Active
        } else {
            CoordinatorState::Standby
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == CoordinatorState::Active
    }

    /// Reports waiting in the intake queue.
    pub fn pending_reports(&self) -> usize {
        self.intake.pending()
    }

    /// Applies a leadership change. Safe to call repeatedly with the same value.
    pub async fn set_leadership(self: &Arc<Self>, is_leader: bool) {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.draining.retain(|h| !h.is_finished());

        match (is_leader, lifecycle.state) {
            (true, CoordinatorState::Standby) => {
                self.deps.graph.set_active(true).await;
                lifecycle.group = Some(WorkerGroup::spawn(self.clone()));
                lifecycle.state = CoordinatorState::Active;
                self.active.store(true, Ordering::SeqCst);
                tracing::warn!(node = %self.config.local_address, "Failover coordinator active");
            }
            (false, CoordinatorState::Active) => {
                self.deps.graph.set_active(false).await;
                if let Some(group) = lifecycle.group.take() {
                    let recovery = group.stop();
                    lifecycle.draining.push(recovery);
                }
                lifecycle.state = CoordinatorState::Standby;
                self.active.store(false, Ordering::SeqCst);
                tracing::warn!(node = %self.config.local_address, "Failover coordinator on standby");
            }
            (_, state) => {
                tracing::debug!(is_leader, state = %state, "Leadership unchanged");
            }
        }
    }

    /// Queues `node` for recovery. Blank addresses are ignored. Never blocks.
    pub fn report_node_down(&self, node: &str) -> bool {
        let node = NodeAddress::new(node.trim());
        if node.is_blank() {
            return false;
        }
        tracing::info!(node = %node, "Node reported down");
        self.intake.push(node)
    }

    /// Drops the cache entry for `job_id` and marks the job as failed to submit.
    ///
    /// Safe to repeat: a missing cache entry is not an error. A blank `job_id`
    /// names no job and is ignored.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete or the status update fails.
    pub async fn deal_submit_fail_job(&self, job_id: &str, error_message: &str) -> Result<()> {
        if job_id.trim().is_empty() {
            tracing::warn!("Submit failure for blank job id ignored");
            return Ok(());
        }
        let deleted = self.deps.cache.delete(job_id).await?;
        let message = generate_error_message(job_id, error_message);
        self.deps
            .jobs
            .mark_submit_failed(job_id, crate::store::JobStatus::SubmitFailed, &message)
            .await?;
        tracing::info!(job_id, deleted, "Job marked as submit failed");
        Ok(())
    }

    /// Goes to standby and waits for every recovery worker to finish.
    pub async fn shutdown(self: &Arc<Self>) {
        self.set_leadership(false).await;
        let draining = std::mem::take(&mut self.lifecycle.lock().await.draining);
        for handle in draining {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Recovery worker ended abnormally");
            }
        }
    }

    /// Cancellation scope for work tied to the current activation.
    async fn activation_scope(&self) -> Option<tokio_util::sync::CancellationToken> {
        self.lifecycle
            .lock()
            .await
            .group
            .as_ref()
            .map(WorkerGroup::hard_stop)
    }
}
