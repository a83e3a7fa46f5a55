//! Node recovery tests: reclaiming a dead node's jobs and cached submissions.
//!
//! Most tests run single cycles through `Harness::recover` on a standby
//! coordinator so each cycle is deterministic; the cascade tests go through
//! the intake queue and the recovery worker.


use std::sync::Arc;
use std::time::Duration;

use jobwarden::membership::LivenessRecord;
use jobwarden::partition::CapacityWeigher;
use jobwarden::store::{CacheRecord, CacheStage, JobInstance, JobStatus, ScheduleKind};
use test_harness::{addr, assert_eventually, Harness};

#[tokio::test]
async fn test_dead_node_jobs_split_evenly_by_kind() {
    let h = Harness::new("a:1", &["a:1", "b:1", "c:1"]);
    h.seed_jobs("d:1", ScheduleKind::Cron, 1, 7).await;
    h.seed_jobs("d:1", ScheduleKind::Backfill, 8, 4).await;

    let report = h.recover("d:1").await;

    assert!(!report.skipped_alive);
    assert!(!report.leftover);
    assert_eq!(report.jobs_reassigned, 11);
    assert_eq!(h.jobs_owned_by("d:1").await, 0);

    let cron: Vec<usize> = kind_counts(&h, ScheduleKind::Cron).await;
    let backfill: Vec<usize> = kind_counts(&h, ScheduleKind::Backfill).await;
    assert_eq!(cron, vec![3, 2, 2]);
    assert_eq!(backfill, vec![2, 1, 1]);

    // Local node is triggered in-process, peers over the notifier.
    assert_eq!(report.notified, vec![addr("a:1"), addr("b:1"), addr("c:1")]);
    assert_eq!(h.signal.generation(), 1);
    assert_eq!(h.notifier.sent(), vec![addr("b:1"), addr("c:1")]);
}

async fn kind_counts(h: &Harness, kind: ScheduleKind) -> Vec<usize> {
    let mut counts = Vec::new();
    for node in ["a:1", "b:1", "c:1"] {
        counts.push(h.jobs_owned_by_kind(node, kind).await);
    }
    counts
}

#[tokio::test]
async fn test_finished_jobs_stay_with_dead_node() {
    let h = Harness::new("a:1", &["a:1"]);
    h.jobs
        .insert(JobInstance::new(1, "done", "d:1", JobStatus::Finished, ScheduleKind::Cron))
        .await;
    h.jobs
        .insert(JobInstance::new(2, "live", "d:1", JobStatus::Waiting, ScheduleKind::Cron))
        .await;

    let report = h.recover("d:1").await;

    assert_eq!(report.jobs_reassigned, 1);
    assert!(!report.leftover);
    assert_eq!(h.jobs.get("done").await.unwrap().owner, addr("d:1"));
    assert_eq!(h.jobs.get("live").await.unwrap().owner, addr("a:1"));
}

#[tokio::test]
async fn test_paging_moves_every_job() {
    let h = Harness::with_config("a:1", &["a:1", "b:1"], |c| c.with_page_size(3));
    h.seed_jobs("d:1", ScheduleKind::Cron, 1, 10).await;

    let report = h.recover("d:1").await;

    assert_eq!(report.jobs_reassigned, 10);
    assert_eq!(h.jobs_owned_by("d:1").await, 0);
    assert_eq!(h.jobs_owned_by("a:1").await + h.jobs_owned_by("b:1").await, 10);
}

#[tokio::test]
async fn test_weighted_split_uses_capacity() {
    let weigher = Arc::new(CapacityWeigher::new([("a:1", 3), ("b:1", 1)]));
    let h = Harness::with_weigher("a:1", &["a:1", "b:1", "c:1"], weigher);
    h.seed_jobs("d:1", ScheduleKind::Cron, 1, 8).await;

    h.recover("d:1").await;

    assert_eq!(h.jobs_owned_by("a:1").await, 6);
    assert_eq!(h.jobs_owned_by("b:1").await, 2);
    assert_eq!(h.jobs_owned_by("c:1").await, 0);
}

#[tokio::test]
async fn test_alive_node_report_changes_nothing() {
    let h = Harness::new("a:1", &["a:1", "b:1"]);
    h.seed_jobs("b:1", ScheduleKind::Cron, 1, 5).await;
    h.seed_artifacts("b:1", CacheStage::Queued, Some("g1"), 1, 3).await;

    for _ in 0..2 {
        let report = h.recover("b:1").await;
        assert!(report.skipped_alive);
        assert_eq!(report.jobs_reassigned, 0);
        assert_eq!(report.artifacts_reassigned, 0);
        assert_eq!(h.jobs_owned_by("b:1").await, 5);
        assert_eq!(h.artifacts_owned_by("b:1").await, 3);
    }
}

#[tokio::test]
async fn test_artifacts_split_by_stage_and_group() {
    let h = Harness::new("a:1", &["a:1", "b:1"]);
    h.seed_artifacts("d:1", CacheStage::Queued, Some("g1"), 1, 4).await;
    h.seed_artifacts("d:1", CacheStage::Queued, None, 5, 2).await;
    h.seed_artifacts("d:1", CacheStage::Submitted, None, 7, 5).await;

    let report = h.recover("d:1").await;

    assert_eq!(report.artifacts_reassigned, 11);
    assert_eq!(report.artifacts_failed, 0);
    assert_eq!(h.artifacts_owned_by("d:1").await, 0);
    // g1: 2/2, ungrouped: 1/1, submitted: 3/2.
    assert_eq!(h.artifacts_owned_by("a:1").await, 6);
    assert_eq!(h.artifacts_owned_by("b:1").await, 5);
}

#[tokio::test]
async fn test_malformed_record_isolated_from_page() {
    let h = Harness::new("a:1", &["a:1", "b:1", "c:1"]);
    h.seed_artifacts("d:1", CacheStage::Queued, Some("g1"), 1, 4).await;
    h.cache
        .insert(CacheRecord {
            id: 5,
            job_id: "broken-5".to_string(),
            owner: addr("d:1"),
            stage: 0,
            resource_group: Some("g1".to_string()),
        })
        .await;
    h.seed_artifacts("d:1", CacheStage::Queued, Some("g1"), 6, 5).await;
    h.jobs
        .insert(JobInstance::new(
            100,
            "broken-5",
            "a:1",
            JobStatus::Submitting,
            ScheduleKind::Cron,
        ))
        .await;

    let report = h.recover("d:1").await;

    assert_eq!(report.artifacts_failed, 1);
    assert_eq!(report.artifacts_reassigned, 9);
    assert!(!report.leftover);
    assert_eq!(h.cache.len().await, 9);
    assert!(h.cache.get("broken-5").await.is_none());

    let job = h.jobs.get("broken-5").await.unwrap();
    assert_eq!(job.status, JobStatus::SubmitFailed);
    let error = job.error.unwrap();
    assert!(error.contains("broken-5"), "error was: {}", error);
    assert!(error.contains("cannot be converted"), "error was: {}", error);
}

#[tokio::test]
async fn test_deal_submit_fail_job_is_idempotent() {
    let h = Harness::new("a:1", &["a:1"]);
    h.seed_artifacts("a:1", CacheStage::Submitted, None, 1, 1).await;
    h.jobs
        .insert(JobInstance::new(1, "sub-1", "a:1", JobStatus::Running, ScheduleKind::Cron))
        .await;

    h.coordinator
        .deal_submit_fail_job("sub-1", "engine rejected")
        .await
        .unwrap();
    h.coordinator
        .deal_submit_fail_job("sub-1", "engine rejected")
        .await
        .unwrap();

    assert!(h.cache.is_empty().await);
    let job = h.jobs.get("sub-1").await.unwrap();
    assert_eq!(job.status, JobStatus::SubmitFailed);
    assert!(job.error.unwrap().ends_with("engine rejected"));
}

#[tokio::test]
async fn test_no_alive_nodes_keeps_work_and_resets_liveness() {
    let h = Harness::new("a:1", &[]);
    h.seed_jobs("d:1", ScheduleKind::Cron, 1, 3).await;
    h.seed_artifacts("d:1", CacheStage::Submitted, None, 1, 2).await;

    let report = h.recover("d:1").await;

    assert!(report.leftover);
    assert_eq!(report.jobs_reassigned, 0);
    assert!(report.notified.is_empty());
    assert_eq!(h.jobs_owned_by("d:1").await, 3);
    assert_eq!(h.artifacts_owned_by("d:1").await, 2);
    assert_eq!(
        h.membership.record(&addr("d:1")).await,
        Some(LivenessRecord::never_alive())
    );
}

#[tokio::test]
async fn test_unreachable_peer_does_not_stop_broadcast() {
    let h = Harness::new("a:1", &["a:1", "b:1", "c:1"]);
    h.notifier.set_unreachable(&addr("b:1"));

    let report = h.recover("d:1").await;

    assert_eq!(report.notify_failures, vec![addr("b:1")]);
    assert_eq!(report.notified, vec![addr("a:1"), addr("c:1")]);
}

#[tokio::test]
async fn test_cascade_recovers_after_destination_failure_reported() {
    // b:1 is the only destination and dies while x:1's work moves to it.
    let h = Harness::new("l:1", &["b:1"]);
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 4).await;
    h.seed_jobs("b:1", ScheduleKind::Cron, 10, 2).await;
    h.flaky_jobs.fail_reassign_to(Some(addr("b:1")));

    let first = h.recover("x:1").await;
    assert!(first.leftover);
    assert_eq!(h.jobs_owned_by("x:1").await, 4);
    assert_eq!(
        h.membership.record(&addr("x:1")).await,
        Some(LivenessRecord::never_alive())
    );
    assert!(!h.membership.record(&addr("b:1")).await.unwrap().alive);

    // A replacement joins; b:1's failure is reported independently.
    h.flaky_jobs.fail_reassign_to(None);
    h.membership.heartbeat(&addr("e:1")).await;

    let b = h.recover("b:1").await;
    let x = h.recover("x:1").await;

    assert!(!b.leftover);
    assert!(!x.leftover);
    assert_eq!(h.jobs_owned_by("x:1").await, 0);
    assert_eq!(h.jobs_owned_by("b:1").await, 0);
    assert_eq!(h.jobs_owned_by("e:1").await, 6);
}

#[tokio::test]
async fn test_cascade_retry_requeues_dead_node() {
    let h = Harness::new("a:1", &["a:1", "b:1"]);
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 6).await;
    h.flaky_jobs.fail_reassign_to(Some(addr("b:1")));

    h.coordinator.set_leadership(true).await;
    assert!(h.coordinator.report_node_down("x:1"));

    let jobs = h.jobs.clone();
    assert_eventually(
        || {
            let jobs = jobs.clone();
            async move { jobs.jobs_owned_by(&addr("a:1")).await.len() == 6 }
        },
        Duration::from_secs(3),
        "retry should move the leftover jobs to the surviving node",
    )
    .await;
    assert!(h.flaky_jobs.scans() >= 2);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_cascade_retries_are_bounded() {
    let h = Harness::new("a:1", &[]);
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 2).await;

    h.coordinator.set_leadership(true).await;
    h.coordinator.report_node_down("x:1");

    // One report plus three retries at 20, 40 and 80ms (plus jitter).
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(h.flaky_jobs.scans(), 4);
    assert_eq!(h.coordinator.pending_reports(), 0);
    assert_eq!(h.jobs_owned_by("x:1").await, 2);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_standby_cancels_pending_cascade_retry() {
    let h = Harness::with_config("a:1", &[], |c| c.with_cascade_retry(3, 300, 300));
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 2).await;

    h.coordinator.set_leadership(true).await;
    h.coordinator.report_node_down("x:1");

    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 1 }
        },
        Duration::from_secs(2),
        "first recovery cycle should run",
    )
    .await;

    h.coordinator.set_leadership(false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(h.flaky_jobs.scans(), 1);
    assert_eq!(h.coordinator.pending_reports(), 0);
}

#[tokio::test]
async fn test_revived_node_gets_fresh_retry_budget() {
    let h = Harness::with_config("a:1", &[], |c| c.with_cascade_retry(1, 10, 10));
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 2).await;
    h.coordinator.set_leadership(true).await;

    // First incident: one report plus one retry.
    h.coordinator.report_node_down("x:1");
    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 2 }
        },
        Duration::from_secs(2),
        "first incident should use its single retry",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.flaky_jobs.scans(), 2);

    // x:1 comes back and a stale report for it is skipped.
    h.membership.heartbeat(&addr("x:1")).await;
    h.coordinator.report_node_down("x:1");
    let notifier = h.notifier.clone();
    assert_eventually(
        || {
            let notifier = notifier.clone();
            async move { notifier.sent().contains(&addr("x:1")) }
        },
        Duration::from_secs(2),
        "skipped cycle should still broadcast",
    )
    .await;
    assert_eq!(h.flaky_jobs.scans(), 2);

    // Second incident gets the full budget again.
    h.membership.mark_dead(&addr("x:1")).await;
    h.coordinator.report_node_down("x:1");
    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 4 }
        },
        Duration::from_secs(2),
        "second incident should retry once more",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.flaky_jobs.scans(), 4);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_report_after_exhausted_retries_migrates_work() {
    let h = Harness::with_config("a:1", &[], |c| c.with_cascade_retry(1, 10, 10));
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 3).await;
    h.seed_artifacts("x:1", CacheStage::Submitted, None, 1, 2).await;
    h.coordinator.set_leadership(true).await;

    h.coordinator.report_node_down("x:1");
    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 2 }
        },
        Duration::from_secs(2),
        "retries should run out",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.jobs_owned_by("x:1").await, 3);

    // A destination joins and the node is reported again.
    h.membership.heartbeat(&addr("b:1")).await;
    h.coordinator.report_node_down("x:1");

    let jobs = h.jobs.clone();
    assert_eventually(
        || {
            let jobs = jobs.clone();
            async move { jobs.jobs_owned_by(&addr("b:1")).await.len() == 3 }
        },
        Duration::from_secs(2),
        "later report should move the stranded jobs",
    )
    .await;
    assert_eq!(h.artifacts_owned_by("b:1").await, 2);
    assert_eq!(h.jobs_owned_by("x:1").await, 0);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_leftover_on_standby_keeps_retry_budget() {
    let h = Harness::with_config("a:1", &[], |c| c.with_cascade_retry(1, 10, 10));
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 2).await;

    // Leftover cycles on standby schedule nothing and spend no retries.
    assert!(h.recover("x:1").await.leftover);
    assert!(h.recover("x:1").await.leftover);
    assert_eq!(h.flaky_jobs.scans(), 2);
    assert_eq!(h.coordinator.pending_reports(), 0);

    h.coordinator.set_leadership(true).await;
    h.coordinator.report_node_down("x:1");
    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 4 }
        },
        Duration::from_secs(2),
        "active incident should still get its retry",
    )
    .await;

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_standby_during_cycle_then_report_migrates_work() {
    let h = Harness::new("a:1", &["b:1"]);
    h.seed_jobs("x:1", ScheduleKind::Cron, 1, 4).await;
    h.flaky_jobs.fail_reassign_to(Some(addr("b:1")));
    h.flaky_jobs.set_reassign_delay(Duration::from_millis(100));

    h.coordinator.set_leadership(true).await;
    h.coordinator.report_node_down("x:1");
    let store = h.flaky_jobs.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move { store.scans() == 1 }
        },
        Duration::from_secs(2),
        "recovery should start",
    )
    .await;

    // Activation ends while the cycle is still writing.
    h.coordinator.set_leadership(false).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.flaky_jobs.scans(), 1);
    assert_eq!(h.jobs_owned_by("x:1").await, 4);
    assert_eq!(h.coordinator.pending_reports(), 0);

    h.flaky_jobs.fail_reassign_to(None);
    h.flaky_jobs.set_reassign_delay(Duration::ZERO);
    h.membership.heartbeat(&addr("b:1")).await;
    h.coordinator.set_leadership(true).await;
    h.coordinator.report_node_down("x:1");

    let jobs = h.jobs.clone();
    assert_eventually(
        || {
            let jobs = jobs.clone();
            async move { jobs.jobs_owned_by(&addr("b:1")).await.len() == 4 }
        },
        Duration::from_secs(2),
        "report after reactivation should move the jobs",
    )
    .await;

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_blank_job_id_record_only_drops_its_own_row() {
    let h = Harness::new("a:1", &["a:1", "b:1"]);
    h.cache
        .insert(CacheRecord::new(1, "", "d:1", CacheStage::Queued, None))
        .await;
    h.cache
        .insert(CacheRecord::new(2, "", "b:1", CacheStage::Queued, None))
        .await;
    h.seed_artifacts("d:1", CacheStage::Submitted, None, 3, 2).await;

    let report = h.recover("d:1").await;

    assert_eq!(report.artifacts_failed, 1);
    assert_eq!(report.artifacts_reassigned, 2);
    assert!(!report.leftover);
    assert_eq!(h.artifacts_owned_by("d:1").await, 0);
    assert_eq!(h.cache.len().await, 3);
    let b_rows = h.cache.records_owned_by(&addr("b:1")).await;
    assert!(b_rows.iter().any(|r| r.id == 2));
}

#[tokio::test]
async fn test_deal_submit_fail_job_ignores_blank_id() {
    let h = Harness::new("a:1", &["a:1"]);
    h.cache
        .insert(CacheRecord::new(1, "", "a:1", CacheStage::Queued, None))
        .await;

    h.coordinator
        .deal_submit_fail_job("  ", "engine rejected")
        .await
        .unwrap();

    assert_eq!(h.cache.len().await, 1);
}
