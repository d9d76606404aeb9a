use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use gpuctl_proto::{JobFilter, JobPayload, JobPriority, JobStatus, JobType};
use gpuctl_queue::JobQueue;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct MigrationSchedulerConfig {
    pub tick_interval: Duration,
    pub dry_run: bool,
}

impl Default for MigrationSchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(15 * 60), dry_run: false }
    }
}

/// Migration Scheduler (C9, spec §4.9): a periodic ticker, grounded on
/// `gpuctl-queue`'s own maintenance loop (spawn-sleep-check-running). Each
/// tick enqueues a `MIGRATE_SPOT_INSTANCES` job unless one is already
/// `pending` or `processing` — overlap prevention lives entirely in this
/// dedup check, not a distributed lock.
pub struct MigrationScheduler {
    queue: Arc<JobQueue>,
    config: MigrationSchedulerConfig,
    running: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    handle: StdMutex<Option<JoinHandle<()>>>,
    recent_outcomes: Arc<StdMutex<VecDeque<bool>>>,
}

const HEALTH_WINDOW: usize = 10;

impl MigrationScheduler {
    pub fn new(queue: Arc<JobQueue>, config: MigrationSchedulerConfig) -> Self {
        Self {
            queue,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            handle: StdMutex::new(None),
            recent_outcomes: Arc::new(StdMutex::new(VecDeque::with_capacity(HEALTH_WINDOW))),
        }
    }

    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.tick_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }
    }

    /// One tick: dedup-check, then enqueue. Public so tests and the `gpuctl
    /// migrate` maintenance subcommand can trigger it without waiting for
    /// the full `tick_interval`.
    pub async fn tick(&self) -> Option<String> {
        match self.has_overlapping_job().await {
            Ok(true) => {
                info!("migration job already pending or processing, skipping tick");
                None
            }
            Ok(false) => match self
                .queue
                .add_job(JobPayload::MigrateSpotInstances { dry_run: self.config.dry_run }, JobPriority::Normal, None)
                .await
            {
                Ok(id) => {
                    self.record_outcome(true);
                    Some(id)
                }
                Err(err) => {
                    warn!(%err, "failed to enqueue migration job");
                    self.record_outcome(false);
                    None
                }
            },
            Err(err) => {
                warn!(%err, "failed to check for overlapping migration jobs");
                self.record_outcome(false);
                None
            }
        }
    }

    async fn has_overlapping_job(&self) -> gpuctl_queue::Result<bool> {
        let pending = self
            .queue
            .get_jobs(JobFilter { status: Some(JobStatus::Pending), job_type: Some(JobType::MigrateSpotInstances), limit: Some(1) })
            .await?;
        if !pending.is_empty() {
            return Ok(true);
        }
        let processing = self
            .queue
            .get_jobs(JobFilter { status: Some(JobStatus::Processing), job_type: Some(JobType::MigrateSpotInstances), limit: Some(1) })
            .await?;
        Ok(!processing.is_empty())
    }

    fn record_outcome(&self, success: bool) {
        let mut outcomes = self.recent_outcomes.lock().unwrap();
        outcomes.push_back(success);
        if outcomes.len() > HEALTH_WINDOW {
            outcomes.pop_front();
        }
    }

    /// `false` when enabled but not running, when shutting down, or when
    /// the failure rate over the last 10 ticks is `>= 50%` (spec §4.9).
    pub fn is_healthy(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let outcomes = self.recent_outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return true;
        }
        let failures = outcomes.iter().filter(|ok| !**ok).count();
        (failures as f64 / outcomes.len() as f64) < 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuctl_queue::{MemoryQueueStore, QueueConfig};

    fn queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::new(Arc::new(MemoryQueueStore::new()), QueueConfig::default()))
    }

    #[tokio::test]
    async fn tick_enqueues_a_migration_job_when_none_is_in_flight() {
        let queue = queue();
        let scheduler = Arc::new(MigrationScheduler::new(queue.clone(), MigrationSchedulerConfig::default()));
        let job_id = scheduler.tick().await;
        assert!(job_id.is_some());
        assert!(scheduler.is_healthy());
    }

    #[tokio::test]
    async fn tick_skips_when_a_migration_job_is_already_pending() {
        let queue = queue();
        let scheduler = Arc::new(MigrationScheduler::new(queue.clone(), MigrationSchedulerConfig::default()));
        let first = scheduler.tick().await;
        assert!(first.is_some());
        let second = scheduler.tick().await;
        assert!(second.is_none());

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn not_yet_started_scheduler_reports_unhealthy() {
        let queue = queue();
        let scheduler = MigrationScheduler::new(queue, MigrationSchedulerConfig::default());
        assert!(!scheduler.is_healthy());
    }
}
