use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gpuctl_proto::{Job, JobFilter, JobPayload, JobPriority, JobType, QueueStats};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::QueueStore;

/// A job handler is a pure function from `Job` to a pass/fail outcome
/// (spec §4.7): the queue owns attempt counting, retry scheduling, and
/// terminal-state transitions; handlers only report success or failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub maintenance_interval: Duration,
    pub stale_processing_threshold: Duration,
    pub terminal_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            poll_interval: Duration::from_millis(500),
            maintenance_interval: Duration::from_secs(60),
            stale_processing_threshold: Duration::from_secs(300),
            terminal_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Exponential backoff clamped to `[1s, 5min]` (spec §4.6: "linear or
/// exponential; minimum 1s, maximum 5min").
fn retry_backoff(attempts: u32) -> Duration {
    let base_ms: u64 = 1000;
    let ms = base_ms.saturating_mul(1u64 << attempts.saturating_sub(1).min(8));
    Duration::from_millis(ms.clamp(1000, 5 * 60 * 1000))
}

/// Job Queue (C6, spec §4.6).
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    maintenance: StdMutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            handlers: RwLock::new(HashMap::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            workers: StdMutex::new(Vec::new()),
            maintenance: StdMutex::new(None),
        }
    }

    pub async fn add_job(&self, payload: JobPayload, priority: JobPriority, max_attempts: Option<u32>) -> Result<String> {
        let job = Job::new(payload, priority, max_attempts, Utc::now());
        let id = job.id.clone();
        self.store.insert_job(job).await?;
        Ok(id)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn get_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.store.list_jobs(&filter).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    pub async fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert(job_type, handler);
    }

    pub async fn cleanup(&self, older_than: Duration) -> Result<usize> {
        self.store.trim_terminal(older_than, Utc::now()).await
    }

    /// `performRecoveryTasks` (spec §4.6): run once at boot, before
    /// `startProcessing`, so stale processing jobs and due retries rejoin
    /// the pending queue.
    pub async fn perform_recovery_tasks(&self) -> Result<()> {
        let now = Utc::now();
        let recovered = self.store.recover_stale_processing(self.config.stale_processing_threshold, now).await?;
        let promoted = self.store.promote_due_retries(now).await?;
        if recovered > 0 || promoted > 0 {
            info!(recovered, promoted, "job queue recovery complete");
        }
        Ok(())
    }

    pub fn start_processing(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = spawn_workers(self);
        self.workers.lock().unwrap().append(&mut workers);
        let maintenance = tokio::spawn(run_maintenance(self.clone()));
        *self.maintenance.lock().unwrap() = Some(maintenance);
    }

    pub fn stop_processing(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Waits up to `grace` for in-flight jobs to drain, then returns
    /// regardless, logging the ids still outstanding.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.stop_processing();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let stats = self.get_stats().await?;
            if stats.processing == 0 || tokio::time::Instant::now() >= deadline {
                if stats.processing > 0 {
                    let remaining = self.get_jobs(JobFilter { status: Some(gpuctl_proto::JobStatus::Processing), ..Default::default() }).await?;
                    let ids: Vec<String> = remaining.iter().map(|j| j.id.clone()).collect();
                    warn!(?ids, "shutdown grace period elapsed with jobs still processing");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        for handle in self.workers.lock().unwrap().drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.maintenance.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn execute_one(self: &Arc<Self>) -> bool {
        let now = Utc::now();
        if let Err(err) = self.store.promote_due_retries(now).await {
            warn!(%err, "failed to promote due retries");
        }

        let job = match self.store.pop_next_pending(now).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(err) => {
                warn!(%err, "failed to pop next pending job");
                return false;
            }
        };

        let job_type = job.job_type();
        let handler = self.handlers.read().await.get(&job_type).cloned();
        let mut job = job;
        job.attempts += 1;

        let outcome = match &handler {
            None => Err(format!("no handler registered for job type {job_type}")),
            Some(handler) => handler.handle(&job).await,
        };

        let now = Utc::now();
        match outcome {
            Ok(()) => {
                debug!(job_id = %job.id, %job_type, "job completed");
                if let Err(err) = self.store.mark_completed(job, now).await {
                    error!(%err, "failed to persist job completion");
                }
            }
            Err(message) => {
                job.error = Some(message);
                if job.attempts >= job.max_attempts {
                    warn!(job_id = %job.id, %job_type, attempts = job.attempts, "job failed permanently");
                    if let Err(err) = self.store.mark_failed(job, now).await {
                        error!(%err, "failed to persist job failure");
                    }
                } else {
                    let delay = retry_backoff(job.attempts);
                    job.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                    warn!(job_id = %job.id, %job_type, attempts = job.attempts, delay_ms = delay.as_millis() as u64, "job failed, scheduling retry");
                    if let Err(err) = self.store.mark_retry(job).await {
                        error!(%err, "failed to schedule job retry");
                    }
                }
            }
        }
        true
    }
}

fn spawn_workers(queue: &Arc<JobQueue>) -> Vec<JoinHandle<()>> {
    (0..queue.config.worker_count.max(1))
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(run_worker(queue))
        })
        .collect()
}

async fn run_worker(queue: Arc<JobQueue>) {
    while queue.running.load(Ordering::SeqCst) {
        let worked = queue.execute_one().await;
        if !worked {
            tokio::time::sleep(queue.config.poll_interval).await;
        }
    }
}

async fn run_maintenance(queue: Arc<JobQueue>) {
    loop {
        tokio::time::sleep(queue.config.maintenance_interval).await;
        if !queue.running.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = queue.perform_recovery_tasks().await {
            warn!(%err, "maintenance recovery tick failed");
        }
        if let Err(err) = queue.cleanup(queue.config.terminal_retention).await {
            warn!(%err, "maintenance trim tick failed");
        }
    }
}
