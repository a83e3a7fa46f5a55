use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::FailoverCoordinator;
use crate::graph::today_key;

/// Background tasks of one activation.
pub(super) struct WorkerGroup {
    /// Stops the recovery worker between nodes.
    soft_stop: CancellationToken,
    /// Stops the graph checker and pending cascade retries at once.
    hard_stop: CancellationToken,
    recovery: JoinHandle<()>,
    graph_checker: JoinHandle<()>,
}

impl WorkerGroup {
    pub(super) fn spawn(coordinator: Arc<FailoverCoordinator>) -> Self {
        let soft_stop = CancellationToken::new();
        let hard_stop = CancellationToken::new();

        let recovery = tokio::spawn(run_recovery_worker(coordinator.clone(), soft_stop.clone()));
        let graph_checker = tokio::spawn(run_graph_checker(coordinator, hard_stop.clone()));

        Self {
            soft_stop,
            hard_stop,
            recovery,
            graph_checker,
        }
    }

    pub(super) fn hard_stop(&self) -> CancellationToken {
        self.hard_stop.clone()
    }

    /// Stops the group. Returns the recovery worker, which may still be
    /// finishing its current node.
    pub(super) fn stop(self) -> JoinHandle<()> {
        self.soft_stop.cancel();
        self.hard_stop.cancel();
        self.graph_checker.abort();
        self.recovery
    }
}

/// Drains the intake queue, one dead node at a time.
async fn run_recovery_worker(coordinator: Arc<FailoverCoordinator>, stop: CancellationToken) {
    // Waits here while a worker from an earlier activation finishes its node.
    let mut intake = tokio::select! {
        _ = stop.cancelled() => return,
        guard = coordinator.intake.lock_receiver() => guard,
    };
    tracing::info!("Node recovery worker started");

    loop {
        let node = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = intake.recv() => match next {
                Some(node) => node,
                None => break,
            },
        };
        coordinator.intake.mark_dequeued();

        // Not raced against `stop`: a node is always processed to the end.
        coordinator.recover_node(&node).await;
    }

    tracing::info!("Node recovery worker stopped");
}

/// Makes sure today's job graph exists. The first tick fires immediately.
async fn run_graph_checker(coordinator: Arc<FailoverCoordinator>, stop: CancellationToken) {
    let mut interval = tokio::time::interval(coordinator.config.graph_check_interval());

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let day = today_key();
                if let Err(e) = coordinator.deps.graph.ensure_built(&day).await {
                    tracing::error!(day = %day, error = %e, "Job graph check failed");
                }
            }
        }
    }
}
