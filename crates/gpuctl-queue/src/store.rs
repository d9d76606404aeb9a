use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gpuctl_proto::{Job, JobFilter, JobPriority, JobStatus, QueueStats};
use tokio::sync::Mutex;

use crate::error::Result;

/// Storage backend for the job queue (spec §4.6). Business logic — what
/// counts as "due", retry scheduling, attempt bookkeeping — lives in
/// [`crate::JobQueue`]; the store only persists state transitions.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Step (a): move due retry-set jobs into pending. Returns count moved.
    async fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Step (b): atomically pop the top pending job into processing with
    /// `started_at = now`.
    async fn pop_next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    async fn mark_completed(&self, job: Job, now: DateTime<Utc>) -> Result<()>;
    async fn mark_retry(&self, job: Job) -> Result<()>;
    async fn mark_failed(&self, job: Job, now: DateTime<Utc>) -> Result<()>;

    /// Move processing jobs older than `stale_after` back to pending,
    /// preserving `attempts` (spec §4.6 `performRecoveryTasks`).
    async fn recover_stale_processing(&self, stale_after: Duration, now: DateTime<Utc>) -> Result<usize>;

    /// Trim completed/failed jobs older than `older_than`.
    async fn trim_terminal(&self, older_than: Duration, now: DateTime<Utc>) -> Result<usize>;

    async fn stats(&self) -> Result<QueueStats>;
}

type SortKey = (Reverse<JobPriority>, DateTime<Utc>, String);

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    pending: BTreeSet<SortKey>,
    processing: HashMap<String, DateTime<Utc>>,
    retry: BTreeSet<(DateTime<Utc>, String)>,
    completed: BTreeSet<(DateTime<Utc>, String)>,
    failed: BTreeSet<(DateTime<Utc>, String)>,
}

/// Ephemeral in-process store; recovery is a no-op since nothing survives
/// a restart (spec §4.6 "Memory fallback").
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_job(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pending.insert(job.sort_key());
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| filter.status.map(|s| s == j.status).unwrap_or(true))
            .filter(|j| filter.job_type.map(|t| t == j.job_type()).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let due: Vec<(DateTime<Utc>, String)> = inner.retry.iter().take_while(|(at, _)| *at <= now).cloned().collect();
        for entry in &due {
            inner.retry.remove(entry);
        }
        let mut promoted = 0;
        for (_, id) in due {
            if let Some(job) = inner.jobs.get(&id).cloned() {
                inner.pending.insert(job.sort_key());
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn pop_next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let Some(key) = inner.pending.iter().next().cloned() else {
            return Ok(None);
        };
        inner.pending.remove(&key);
        let id = key.2;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        let popped = job.clone();
        inner.processing.insert(id, now);
        Ok(Some(popped))
    }

    async fn mark_completed(&self, job: Job, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(&job.id);
        let mut job = job;
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        inner.completed.insert((now, job.id.clone()));
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn mark_retry(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(&job.id);
        let mut job = job;
        job.status = JobStatus::Pending;
        let retry_at = job.next_retry_at.expect("mark_retry requires next_retry_at to be set");
        inner.retry.insert((retry_at, job.id.clone()));
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn mark_failed(&self, job: Job, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(&job.id);
        let mut job = job;
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        inner.failed.insert((now, job.id.clone()));
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn recover_stale_processing(&self, stale_after: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let cutoff = now - chrono::Duration::from_std(stale_after).unwrap_or_default();
        let stale: Vec<String> = inner
            .processing
            .iter()
            .filter(|(_, started_at)| **started_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.processing.remove(id);
            if let Some(job) = inner.jobs.get_mut(id) {
                job.status = JobStatus::Pending;
                job.started_at = None;
                inner.pending.insert(job.sort_key());
            }
        }
        Ok(stale.len())
    }

    async fn trim_terminal(&self, older_than: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut removed = 0;
        let stale_completed: Vec<(DateTime<Utc>, String)> =
            inner.completed.iter().take_while(|(at, _)| *at < cutoff).cloned().collect();
        for entry in stale_completed {
            inner.completed.remove(&entry);
            inner.jobs.remove(&entry.1);
            removed += 1;
        }
        let stale_failed: Vec<(DateTime<Utc>, String)> =
            inner.failed.iter().take_while(|(at, _)| *at < cutoff).cloned().collect();
        for entry in stale_failed {
            inner.failed.remove(&entry);
            inner.jobs.remove(&entry.1);
            removed += 1;
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let inner = self.inner.lock().await;
        Ok(QueueStats {
            pending: inner.pending.len(),
            processing: inner.processing.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            retry: inner.retry.len(),
        })
    }
}
