//! Job queue data model, owned exclusively by the job queue (C6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Declaration order doubles as the `Ord` ranking: `Low < Normal < High`,
/// matching the `low=1, normal=2, high=3` weights from spec §3 — higher
/// sorts first in the pending queue (spec §4.6 ordering rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Payload carried by each job type (spec §4.7). A discriminated union
/// rather than an inheritance hierarchy, per the "Polymorphism" design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    CreateInstance {
        instance_id: String,
        name: String,
        product_name: String,
        template_id: String,
        gpu_num: u8,
        rootfs_size: u32,
        region: String,
        webhook_url: Option<String>,
    },
    MonitorInstance {
        instance_id: String,
        novita_instance_id: String,
        webhook_url: Option<String>,
        start_time: DateTime<Utc>,
        max_wait_time_ms: u64,
        health_check_config: Option<crate::health::HealthCheckConfig>,
        target_port: Option<u16>,
    },
    MonitorStartup {
        instance_id: String,
        novita_instance_id: String,
        operation_id: String,
        webhook_url: Option<String>,
        start_time: DateTime<Utc>,
        max_wait_time_ms: u64,
        health_check_config: Option<crate::health::HealthCheckConfig>,
        target_port: Option<u16>,
    },
    SendWebhook {
        url: String,
        payload: serde_json::Value,
    },
    MigrateSpotInstances {
        dry_run: bool,
    },
    AutoStopCheck {
        idle_threshold_ms: u64,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::CreateInstance { .. } => JobType::CreateInstance,
            Self::MonitorInstance { .. } => JobType::MonitorInstance,
            Self::MonitorStartup { .. } => JobType::MonitorStartup,
            Self::SendWebhook { .. } => JobType::SendWebhook,
            Self::MigrateSpotInstances { .. } => JobType::MigrateSpotInstances,
            Self::AutoStopCheck { .. } => JobType::AutoStopCheck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    CreateInstance,
    MonitorInstance,
    MonitorStartup,
    SendWebhook,
    MigrateSpotInstances,
    AutoStopCheck,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateInstance => "CREATE_INSTANCE",
            Self::MonitorInstance => "MONITOR_INSTANCE",
            Self::MonitorStartup => "MONITOR_STARTUP",
            Self::SendWebhook => "SEND_WEBHOOK",
            Self::MigrateSpotInstances => "MIGRATE_SPOT_INSTANCES",
            Self::AutoStopCheck => "AUTO_STOP_CHECK",
        };
        write!(f, "{s}")
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(payload: JobPayload, priority: JobPriority, max_attempts: Option<u32>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("job_{}", Ulid::new().to_string().to_lowercase()),
            payload,
            status: JobStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            created_at,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            error: None,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// Sort key used by the pending queue: higher priority first, then
    /// earlier `created_at`, then `id` as the final tie-break (spec §4.6).
    pub fn sort_key(&self) -> (std::cmp::Reverse<JobPriority>, DateTime<Utc>, String) {
        (std::cmp::Reverse(self.priority), self.created_at, self.id.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retry: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = Job::new(
            JobPayload::AutoStopCheck { idle_threshold_ms: 1000 },
            JobPriority::High,
            None,
            now(),
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.job_type(), JobType::AutoStopCheck);
    }

    #[test]
    fn priority_ordering_is_high_first() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn sort_key_orders_by_priority_then_created_then_id() {
        let a = Job::new(JobPayload::AutoStopCheck { idle_threshold_ms: 1 }, JobPriority::Low, None, now());
        let b = Job::new(JobPayload::AutoStopCheck { idle_threshold_ms: 1 }, JobPriority::High, None, now());
        let mut jobs = vec![a.sort_key(), b.sort_key()];
        jobs.sort();
        assert_eq!(jobs[0].0, std::cmp::Reverse(JobPriority::High));
    }
}
