use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gpuctl_proto::{Job, JobFilter, JobPriority, JobStatus, QueueStats};
use redis::AsyncCommands;

use crate::error::Result;
use crate::store::QueueStore;

const KEY_PENDING: &str = "queue:pending";
const KEY_PROCESSING: &str = "queue:processing";
const KEY_RETRY: &str = "queue:retry";
const KEY_COMPLETED: &str = "queue:completed";
const KEY_FAILED: &str = "queue:failed";

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

/// `score = -priority*1e13 + createdAtMs` (spec §4.6): higher priority sorts
/// first (more negative), ties broken by earlier `createdAt`.
fn pending_score(priority: JobPriority, created_at_ms: i64) -> f64 {
    let weight = match priority {
        JobPriority::Low => 1.0,
        JobPriority::Normal => 2.0,
        JobPriority::High => 3.0,
    };
    weight * -1e13 + created_at_ms as f64
}

/// Redis-backed persistence with the literal keyspace from spec §4.6.
pub struct RedisQueueStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisQueueStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    async fn put_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.manager.clone();
        let data = serde_json::to_string(job)?;
        let _: () = conn.hset(job_key(&job.id), "data", data).await?;
        Ok(())
    }

    async fn read_job(&self, id: &str) -> Result<Option<Job>> {
        let mut conn = self.manager.clone();
        let data: Option<String> = conn.hget(job_key(id), "data").await?;
        Ok(data.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn remove_from(&self, set: &str, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zrem(set, id).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn insert_job(&self, job: Job) -> Result<()> {
        let mut conn = self.manager.clone();
        self.put_job(&job).await?;
        let score = pending_score(job.priority, job.created_at.timestamp_millis());
        let _: () = conn.zadd(KEY_PENDING, &job.id, score).await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.read_job(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut conn = self.manager.clone();
        let set = match filter.status {
            Some(JobStatus::Pending) => KEY_PENDING,
            Some(JobStatus::Processing) => KEY_PROCESSING,
            Some(JobStatus::Completed) => KEY_COMPLETED,
            Some(JobStatus::Failed) => KEY_FAILED,
            None => KEY_PENDING,
        };
        let ids: Vec<String> = if filter.status.is_some() {
            conn.zrange(set, 0, -1).await?
        } else {
            let mut all = Vec::new();
            for s in [KEY_PENDING, KEY_PROCESSING, KEY_COMPLETED, KEY_FAILED] {
                let mut chunk: Vec<String> = conn.zrange(s, 0, -1).await?;
                all.append(&mut chunk);
            }
            all
        };

        let mut jobs = Vec::new();
        for id in ids {
            if let Some(job) = self.read_job(&id).await? {
                if filter.job_type.map(|t| t == job.job_type()).unwrap_or(true) {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.manager.clone();
        let now_ms = now.timestamp_millis() as f64;
        let due: Vec<String> = conn.zrangebyscore(KEY_RETRY, f64::MIN, now_ms).await?;
        for id in &due {
            self.remove_from(KEY_RETRY, id).await?;
            if let Some(job) = self.read_job(id).await? {
                let score = pending_score(job.priority, job.created_at.timestamp_millis());
                let _: () = conn.zadd(KEY_PENDING, id, score).await?;
            }
        }
        Ok(due.len())
    }

    async fn pop_next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut conn = self.manager.clone();
        let top: Vec<(String, f64)> = conn.zpopmin(KEY_PENDING, 1).await?;
        let Some((id, _score)) = top.into_iter().next() else {
            return Ok(None);
        };
        let Some(mut job) = self.read_job(&id).await? else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        self.put_job(&job).await?;
        let _: () = conn.zadd(KEY_PROCESSING, &id, now.timestamp_millis() as f64).await?;
        Ok(Some(job))
    }

    async fn mark_completed(&self, mut job: Job, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.manager.clone();
        self.remove_from(KEY_PROCESSING, &job.id).await?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        self.put_job(&job).await?;
        let _: () = conn.zadd(KEY_COMPLETED, &job.id, now.timestamp_millis() as f64).await?;
        Ok(())
    }

    async fn mark_retry(&self, mut job: Job) -> Result<()> {
        let mut conn = self.manager.clone();
        self.remove_from(KEY_PROCESSING, &job.id).await?;
        job.status = JobStatus::Pending;
        let retry_at = job.next_retry_at.expect("mark_retry requires next_retry_at to be set");
        self.put_job(&job).await?;
        let _: () = conn.zadd(KEY_RETRY, &job.id, retry_at.timestamp_millis() as f64).await?;
        Ok(())
    }

    async fn mark_failed(&self, mut job: Job, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.manager.clone();
        self.remove_from(KEY_PROCESSING, &job.id).await?;
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        self.put_job(&job).await?;
        let _: () = conn.zadd(KEY_FAILED, &job.id, now.timestamp_millis() as f64).await?;
        Ok(())
    }

    async fn recover_stale_processing(&self, stale_after: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.manager.clone();
        let cutoff_ms = (now - chrono::Duration::from_std(stale_after).unwrap_or_default()).timestamp_millis() as f64;
        let stale: Vec<String> = conn.zrangebyscore(KEY_PROCESSING, f64::MIN, cutoff_ms).await?;
        for id in &stale {
            self.remove_from(KEY_PROCESSING, id).await?;
            if let Some(mut job) = self.read_job(id).await? {
                job.status = JobStatus::Pending;
                job.started_at = None;
                self.put_job(&job).await?;
                let score = pending_score(job.priority, job.created_at.timestamp_millis());
                let _: () = conn.zadd(KEY_PENDING, id, score).await?;
            }
        }
        Ok(stale.len())
    }

    async fn trim_terminal(&self, older_than: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.manager.clone();
        let cutoff_ms = (now - chrono::Duration::from_std(older_than).unwrap_or_default()).timestamp_millis() as f64;
        let mut removed = 0;
        for set in [KEY_COMPLETED, KEY_FAILED] {
            let stale: Vec<String> = conn.zrangebyscore(set, f64::MIN, cutoff_ms).await?;
            for id in &stale {
                self.remove_from(set, id).await?;
                let _: () = conn.del(job_key(id)).await?;
            }
            removed += stale.len();
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.manager.clone();
        Ok(QueueStats {
            pending: conn.zcard(KEY_PENDING).await?,
            processing: conn.zcard(KEY_PROCESSING).await?,
            completed: conn.zcard(KEY_COMPLETED).await?,
            failed: conn.zcard(KEY_FAILED).await?,
            retry: conn.zcard(KEY_RETRY).await?,
        })
    }
}
