use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use super::{FailoverCoordinator, RecoveryReport};
use crate::error::Result;
use crate::membership::{LivenessRecord, NodeAddress};
use crate::partition::{distribute, Distribution};
use crate::store::{CacheStage, JobStatus, ScheduleKind, SubmissionArtifact};

/// Builds the error text stored on a job that failed to submit.
pub fn generate_error_message(job_id: &str, message: &str) -> String {
    format!(
        "{} job {} submit failed: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        job_id,
        message
    )
}

#[derive(Debug, Default)]
struct ReclaimOutcome {
    skipped_alive: bool,
    reassigned: usize,
    failed: usize,
    leftover: bool,
}

impl ReclaimOutcome {
    fn skipped() -> Self {
        Self {
            skipped_alive: true,
            ..Default::default()
        }
    }
}

impl FailoverCoordinator {
    /// Runs one recovery cycle for `node` in the caller's task, waiting until
    /// no recovery worker holds the intake. Meant for admin tooling and tests;
    /// production reports go through [`FailoverCoordinator::report_node_down`].
    #[doc(hidden)]
    pub async fn recover_node_exclusive(&self, node: &NodeAddress) -> RecoveryReport {
        let _intake = self.intake.lock_receiver().await;
        self.recover_node(node).await
    }

    /// Runs one full recovery cycle for `node`: jobs, then cached submissions,
    /// then the recovery-trigger broadcast. Errors are logged, never returned.
    pub(crate) async fn recover_node(&self, node: &NodeAddress) -> RecoveryReport {
        let cycle_id = Uuid::new_v4();
        tracing::warn!(node = %node, cycle_id = %cycle_id, "Node recovery started");

        let jobs = match self.reclaim_jobs(node, cycle_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(node = %node, cycle_id = %cycle_id, error = %e, "Job reclamation failed");
                ReclaimOutcome::default()
            }
        };
        let artifacts = match self.reclaim_artifacts(node, cycle_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(node = %node, cycle_id = %cycle_id, error = %e, "Submission reclamation failed");
                ReclaimOutcome::default()
            }
        };

        let leftover = jobs.leftover || artifacts.leftover;
        if jobs.skipped_alive || artifacts.skipped_alive || !leftover {
            // Revived or drained: the next incident gets a fresh retry budget.
            self.cascades.lock().await.remove(node);
        }
        if leftover {
            self.schedule_cascade_retry(node).await;
        }

        let (notified, notify_failures) = self.broadcast_recovery(cycle_id).await;

        tracing::warn!(
            node = %node,
            cycle_id = %cycle_id,
            jobs = jobs.reassigned,
            artifacts = artifacts.reassigned,
            failed = artifacts.failed,
            leftover,
            "Node recovery finished"
        );

        RecoveryReport {
            node: node.clone(),
            skipped_alive: jobs.skipped_alive && artifacts.skipped_alive,
            jobs_reassigned: jobs.reassigned,
            artifacts_reassigned: artifacts.reassigned,
            artifacts_failed: artifacts.failed,
            leftover,
            notified,
            notify_failures,
        }
    }

    /// Moves the dead node's unfinished jobs, split by schedule kind.
    async fn reclaim_jobs(&self, node: &NodeAddress, cycle_id: Uuid) -> Result<ReclaimOutcome> {
        // The queue can hold stale reports; trust only a fresh read.
        if self.deps.membership.is_alive(node).await? {
            tracing::info!(node = %node, cycle_id = %cycle_id, "Node is alive, skipping job recovery");
            return Ok(ReclaimOutcome::skipped());
        }

        let mut outcome = ReclaimOutcome::default();
        let mut after_id = 0;
        loop {
            let page = self
                .deps
                .jobs
                .list_unfinished_jobs(after_id, &JobStatus::UNFINISHED, node, self.config.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            let mut cron = Vec::new();
            let mut backfill = Vec::new();
            for job in page {
                match job.schedule_kind {
                    ScheduleKind::Cron => cron.push(job.id),
                    ScheduleKind::Backfill => backfill.push(job.id),
                }
            }

            let destinations = self.destinations(node).await?;
            outcome.reassigned += self
                .move_jobs(cron, ScheduleKind::Cron, &destinations)
                .await;
            outcome.reassigned += self
                .move_jobs(backfill, ScheduleKind::Backfill, &destinations)
                .await;
        }

        let remaining = self
            .deps
            .jobs
            .list_unfinished_jobs(0, &JobStatus::UNFINISHED, node, 1)
            .await?;
        if !remaining.is_empty() {
            tracing::warn!(node = %node, cycle_id = %cycle_id, "Jobs remain on dead node after migration");
            self.reset_liveness(node).await?;
            outcome.leftover = true;
        }

        Ok(outcome)
    }

    async fn move_jobs(
        &self,
        ids: Vec<u64>,
        kind: ScheduleKind,
        destinations: &[NodeAddress],
    ) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let weights = match self
            .deps
            .weigher
            .weight_for_schedule_kind(kind, ids.len())
            .await
        {
            Ok(weights) => weights,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Weigher failed, splitting evenly");
                None
            }
        };

        let plan = distribute(ids, weights, destinations);
        log_unassigned(&plan, "jobs");

        let mut moved = 0;
        for (dest, ids) in plan.assignments {
            match self.deps.jobs.reassign_owner(&dest, &ids).await {
                Ok(count) => {
                    tracing::info!(dest = %dest, kind = %kind, count, "Jobs reassigned");
                    moved += count;
                }
                Err(e) => {
                    tracing::error!(dest = %dest, kind = %kind, count = ids.len(), error = %e, "Failed to reassign jobs");
                }
            }
        }
        moved
    }

    /// Moves the dead node's cached submissions. Queued entries are weighted
    /// by resource group; submitted ones are split evenly.
    async fn reclaim_artifacts(&self, node: &NodeAddress, cycle_id: Uuid) -> Result<ReclaimOutcome> {
        if self.deps.membership.is_alive(node).await? {
            tracing::info!(node = %node, cycle_id = %cycle_id, "Node is alive, skipping submission recovery");
            return Ok(ReclaimOutcome::skipped());
        }

        let mut outcome = ReclaimOutcome::default();
        let mut after_id = 0;
        loop {
            let page = self
                .deps
                .cache
                .list_artifacts(after_id, node, None, None, self.config.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            let mut queued: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
            let mut submitted = Vec::new();
            for record in page {
                let record_id = record.id;
                let job_id = record.job_id.clone();
                match SubmissionArtifact::try_from(record) {
                    Ok(artifact) => match artifact.stage {
                        CacheStage::Queued => queued
                            .entry(artifact.resource_group)
                            .or_default()
                            .push(artifact.job_id),
                        CacheStage::Submitted => submitted.push(artifact.job_id),
                    },
                    Err(e) if job_id.trim().is_empty() => {
                        // No job to fail; drop just this row.
                        tracing::error!(record_id, error = %e, "Submission record without job id");
                        match self.deps.cache.delete_record(record_id).await {
                            Ok(_) => outcome.failed += 1,
                            Err(e) => {
                                tracing::error!(record_id, error = %e, "Failed to drop submission record");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(record_id, job_id = %job_id, error = %e, "Unreadable submission record");
                        let message = format!(
                            "This task stores information exception and cannot be converted. {}",
                            e
                        );
                        match self.deal_submit_fail_job(&job_id, &message).await {
                            Ok(()) => outcome.failed += 1,
                            Err(e) => {
                                tracing::error!(job_id = %job_id, error = %e, "Failed to record submit failure");
                            }
                        }
                    }
                }
            }

            let destinations = self.destinations(node).await?;
            for (group, job_ids) in queued {
                outcome.reassigned += self
                    .move_queued(group.as_deref(), job_ids, &destinations)
                    .await;
            }
            if !submitted.is_empty() {
                let plan = distribute(submitted, None, &destinations);
                log_unassigned(&plan, "submitted artifacts");
                outcome.reassigned += self.apply_artifact_plan(plan).await;
            }
        }

        let remaining = self
            .deps
            .cache
            .list_artifacts(0, node, None, None, 1)
            .await?;
        if !remaining.is_empty() {
            tracing::warn!(node = %node, cycle_id = %cycle_id, "Submissions remain on dead node after migration");
            self.reset_liveness(node).await?;
            outcome.leftover = true;
        }

        Ok(outcome)
    }

    async fn move_queued(
        &self,
        group: Option<&str>,
        job_ids: Vec<String>,
        destinations: &[NodeAddress],
    ) -> usize {
        let weights = match self
            .deps
            .weigher
            .weight_for_resource_group(group, job_ids.len())
            .await
        {
            Ok(weights) => weights,
            Err(e) => {
                tracing::warn!(group = ?group, error = %e, "Weigher failed, splitting evenly");
                None
            }
        };

        let plan = distribute(job_ids, weights, destinations);
        log_unassigned(&plan, "queued artifacts");
        self.apply_artifact_plan(plan).await
    }

    async fn apply_artifact_plan(&self, plan: Distribution<String>) -> usize {
        let mut moved = 0;
        for (dest, job_ids) in plan.assignments {
            match self.deps.cache.reassign_owner(&dest, &job_ids).await {
                Ok(count) => {
                    tracing::info!(dest = %dest, count, "Submissions reassigned");
                    moved += count;
                }
                Err(e) => {
                    tracing::error!(dest = %dest, count = job_ids.len(), error = %e, "Failed to reassign submissions");
                }
            }
        }
        moved
    }

    /// Alive nodes that can take over work from `dead`.
    async fn destinations(&self, dead: &NodeAddress) -> Result<Vec<NodeAddress>> {
        let mut alive = self.deps.membership.list_alive_nodes().await?;
        alive.retain(|n| n != dead);
        Ok(alive)
    }

    /// Marks `node` as never alive so the next detection cycle recovers it
    /// from scratch.
    async fn reset_liveness(&self, node: &NodeAddress) -> Result<()> {
        self.deps
            .membership
            .reset_liveness(node, LivenessRecord::never_alive(), true)
            .await
    }

    /// Re-queues `node` after a backoff, up to the configured retry budget.
    /// Attempts are only counted while active, since standby schedules nothing.
    async fn schedule_cascade_retry(&self, node: &NodeAddress) {
        let Some(scope) = self.activation_scope().await else {
            tracing::warn!(node = %node, "Coordinator on standby, cascade retry not scheduled");
            return;
        };

        let attempt = {
            let mut cascades = self.cascades.lock().await;
            let attempt = cascades.entry(node.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if attempt > self.config.cascade_max_retries {
            tracing::error!(
                node = %node,
                attempts = attempt - 1,
                "Cascade retries exhausted, waiting for the next node-down report"
            );
            return;
        }

        let delay = with_jitter(self.config.cascade_backoff(attempt));
        tracing::warn!(node = %node, attempt, delay_ms = delay.as_millis() as u64, "Cascade retry scheduled");

        let intake = self.intake.clone();
        let node = node.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {
                    tracing::debug!(node = %node, "Cascade retry cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    intake.push(node);
                }
            }
        });
    }

    /// Tells every alive node to re-scan its work. Best effort.
    async fn broadcast_recovery(&self, cycle_id: Uuid) -> (Vec<NodeAddress>, Vec<NodeAddress>) {
        let mut notified = Vec::new();
        let mut failed = Vec::new();

        let alive = match self.deps.membership.list_alive_nodes().await {
            Ok(alive) => alive,
            Err(e) => {
                tracing::error!(cycle_id = %cycle_id, error = %e, "Cannot list alive nodes for recovery broadcast");
                return (notified, failed);
            }
        };

        for target in alive {
            let result = if target == self.config.local_address {
                self.deps.local.trigger_self().await
            } else {
                self.deps.notifier.notify(&target).await
            };
            match result {
                Ok(()) => {
                    tracing::info!(target = %target, cycle_id = %cycle_id, "Recovery trigger sent");
                    notified.push(target);
                }
                Err(e) => {
                    tracing::warn!(target = %target, cycle_id = %cycle_id, error = %e, "Recovery trigger failed");
                    failed.push(target);
                }
            }
        }

        (notified, failed)
    }
}

fn log_unassigned<T>(plan: &Distribution<T>, what: &str) {
    if !plan.unassigned.is_empty() {
        tracing::warn!(
            count = plan.unassigned.len(),
            what,
            "No alive destination, work stays with the dead node"
        );
    }
}

/// Adds up to 10% random jitter.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = (delay.as_millis() as u64) / 10;
    if max_jitter == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    delay + Duration::from_millis(jitter)
}
