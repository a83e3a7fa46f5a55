//! In-memory job and submission cache stores.
//!
//! No durability and no cross-process sharing. Rows are kept in a `BTreeMap`
//! keyed by row id so paging matches what an indexed SQL query would return.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheRecord, CacheStage, JobInstance, JobStatus, JobStore, SubmissionCacheStore};
use crate::error::Result;
use crate::membership::NodeAddress;

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<u64, JobInstance>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: JobInstance) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobInstance> {
        self.jobs
            .read()
            .await
            .values()
            .find(|j| j.job_id == job_id)
            .cloned()
    }

    pub async fn jobs_owned_by(&self, owner: &NodeAddress) -> Vec<JobInstance> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| &j.owner == owner)
            .cloned()
            .collect()
    }

    pub async fn all_jobs(&self) -> Vec<JobInstance> {
        self.jobs.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list_unfinished_jobs(
        &self,
        after_id: u64,
        statuses: &[JobStatus],
        owner: &NodeAddress,
        limit: usize,
    ) -> Result<Vec<JobInstance>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .range(after_id.saturating_add(1)..)
            .map(|(_, job)| job)
            .filter(|job| &job.owner == owner && statuses.contains(&job.status))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn reassign_owner(&self, dest: &NodeAddress, ids: &[u64]) -> Result<usize> {
        let mut jobs = self.jobs.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(job) = jobs.get_mut(id) {
                job.owner = dest.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_submit_failed(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.values_mut().find(|j| j.job_id == job_id) {
            job.status = status;
            job.error = Some(message.to_string());
        } else {
            tracing::debug!(job_id, "No job row to mark as submit failed");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    records: RwLock<BTreeMap<u64, CacheRecord>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: CacheRecord) {
        self.records.write().await.insert(record.id, record);
    }

    pub async fn get(&self, job_id: &str) -> Option<CacheRecord> {
        self.records
            .read()
            .await
            .values()
            .find(|r| r.job_id == job_id)
            .cloned()
    }

    pub async fn records_owned_by(&self, owner: &NodeAddress) -> Vec<CacheRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SubmissionCacheStore for InMemoryCacheStore {
    async fn list_artifacts(
        &self,
        after_id: u64,
        owner: &NodeAddress,
        stage: Option<CacheStage>,
        group: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CacheRecord>> {
        let records = self.records.read().await;
        Ok(records
            .range(after_id.saturating_add(1)..)
            .map(|(_, record)| record)
            .filter(|r| &r.owner == owner)
            .filter(|r| stage.map_or(true, |s| r.stage == s.code()))
            .filter(|r| group.map_or(true, |g| r.resource_group.as_deref() == Some(g)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn reassign_owner(&self, dest: &NodeAddress, job_ids: &[String]) -> Result<usize> {
        let mut records = self.records.write().await;
        let mut updated = 0;
        for record in records.values_mut() {
            if job_ids.contains(&record.job_id) {
                record.owner = dest.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.job_id != job_id);
        Ok(records.len() != before)
    }

    async fn delete_record(&self, id: u64) -> Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}
