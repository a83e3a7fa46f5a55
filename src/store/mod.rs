//! Read/write contracts for scheduled jobs and cached submissions.
//!
//! Both stores are owned by the surrounding scheduler. The coordinator only
//! pages through a dead node's rows, rewrites their owner, and records
//! submission failures.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::membership::NodeAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    NotSubmitted,
    Submitting,
    Waiting,
    Running,
    Restarting,
    Finished,
    Failed,
    SubmitFailed,
    Canceled,
}

impl JobStatus {
    /// Statuses a dead node's jobs can be in and still need a new owner.
    pub const UNFINISHED: [JobStatus; 5] = [
        JobStatus::NotSubmitted,
        JobStatus::Submitting,
        JobStatus::Waiting,
        JobStatus::Running,
        JobStatus::Restarting,
    ];

    pub fn is_unfinished(self) -> bool {
        Self::UNFINISHED.contains(&self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::NotSubmitted => write!(f, "not_submitted"),
            JobStatus::Submitting => write!(f, "submitting"),
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Restarting => write!(f, "restarting"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::SubmitFailed => write!(f, "submit_failed"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleKind {
    Cron,
    Backfill,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Cron => write!(f, "cron"),
            ScheduleKind::Backfill => write!(f, "backfill"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Row id, ascending in insertion order. Used as the paging key.
    pub id: u64,
    pub job_id: String,
    pub owner: NodeAddress,
    pub status: JobStatus,
    pub schedule_kind: ScheduleKind,
    pub error: Option<String>,
}

impl JobInstance {
    pub fn new(
        id: u64,
        job_id: impl Into<String>,
        owner: impl Into<NodeAddress>,
        status: JobStatus,
        schedule_kind: ScheduleKind,
    ) -> Self {
        Self {
            id,
            job_id: job_id.into(),
            owner: owner.into(),
            status,
            schedule_kind,
            error: None,
        }
    }
}

/// Position of a submission in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheStage {
    /// Waiting in the store for submission; still contends for its resource group.
    Queued,
    /// Already handed to the compute engine.
    Submitted,
}

impl CacheStage {
    pub fn code(self) -> i32 {
        match self {
            CacheStage::Queued => 1,
            CacheStage::Submitted => 2,
        }
    }
}

impl TryFrom<i32> for CacheStage {
    type Error = i32;

    fn try_from(code: i32) -> std::result::Result<Self, i32> {
        match code {
            1 => Ok(CacheStage::Queued),
            2 => Ok(CacheStage::Submitted),
            other => Err(other),
        }
    }
}

/// A submission cache row as stored. Fields are not validated until the row
/// is converted into a [`SubmissionArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: u64,
    pub job_id: String,
    pub owner: NodeAddress,
    pub stage: i32,
    pub resource_group: Option<String>,
}

impl CacheRecord {
    pub fn new(
        id: u64,
        job_id: impl Into<String>,
        owner: impl Into<NodeAddress>,
        stage: CacheStage,
        resource_group: Option<&str>,
    ) -> Self {
        Self {
            id,
            job_id: job_id.into(),
            owner: owner.into(),
            stage: stage.code(),
            resource_group: resource_group.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionArtifact {
    pub id: u64,
    pub job_id: String,
    pub owner: NodeAddress,
    pub stage: CacheStage,
    pub resource_group: Option<String>,
}

impl TryFrom<CacheRecord> for SubmissionArtifact {
    type Error = WardenError;

    fn try_from(record: CacheRecord) -> Result<Self> {
        if record.job_id.trim().is_empty() {
            return Err(WardenError::InvalidRecord {
                record_id: record.id,
                reason: "empty job id".to_string(),
            });
        }
        let stage =
            CacheStage::try_from(record.stage).map_err(|code| WardenError::InvalidRecord {
                record_id: record.id,
                reason: format!("unknown stage code {}", code),
            })?;
        Ok(Self {
            id: record.id,
            job_id: record.job_id,
            owner: record.owner,
            stage,
            resource_group: record.resource_group,
        })
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs owned by `owner` with a status in `statuses` and a row id greater
    /// than `after_id`, ascending by id, at most `limit` rows.
    async fn list_unfinished_jobs(
        &self,
        after_id: u64,
        statuses: &[JobStatus],
        owner: &NodeAddress,
        limit: usize,
    ) -> Result<Vec<JobInstance>>;

    /// Moves the jobs with the given row ids to `dest` in one batch.
    async fn reassign_owner(&self, dest: &NodeAddress, ids: &[u64]) -> Result<usize>;

    async fn mark_submit_failed(&self, job_id: &str, status: JobStatus, message: &str)
        -> Result<()>;
}

#[async_trait]
pub trait SubmissionCacheStore: Send + Sync {
    /// Cache rows owned by `owner` after `after_id`, ascending by id. `stage`
    /// and `group` narrow the result when set.
    async fn list_artifacts(
        &self,
        after_id: u64,
        owner: &NodeAddress,
        stage: Option<CacheStage>,
        group: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CacheRecord>>;

    /// Moves the rows for the given job ids to `dest` in one batch.
    async fn reassign_owner(&self, dest: &NodeAddress, job_ids: &[String]) -> Result<usize>;

    /// Deletes the row for `job_id`. Returns false if there was none.
    async fn delete(&self, job_id: &str) -> Result<bool>;

    /// Deletes the row with primary key `id`. Used for rows whose job id
    /// cannot be trusted. Returns false if there was none.
    async fn delete_record(&self, id: u64) -> Result<bool>;
}
