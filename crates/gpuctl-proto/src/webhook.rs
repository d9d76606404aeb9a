//! Internal webhook payload shape (spec §6). Delivery itself is an external
//! collaborator (`gpuctl-webhook`); this crate only owns the wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::health::HealthCheckResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Creating,
    Starting,
    HealthChecking,
    Ready,
    Failed,
    StartupInitiated,
    Stopped,
    Migrated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub instance_id: String,
    pub novita_instance_id: Option<String>,
    pub status: WebhookStatus,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub operation_id: Option<String>,
    pub elapsed_time_ms: Option<u64>,
    pub health_check_result: Option<HealthCheckResult>,
    pub health_check_status: Option<String>,
    pub health_check_started_at: Option<DateTime<Utc>>,
    pub health_check_completed_at: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    pub fn new(instance_id: String, status: WebhookStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            novita_instance_id: None,
            status,
            timestamp,
            data: None,
            error: None,
            operation_id: None,
            elapsed_time_ms: None,
            health_check_result: None,
            health_check_status: None,
            health_check_started_at: None,
            health_check_completed_at: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_health_check_result(mut self, result: HealthCheckResult) -> Self {
        self.health_check_result = Some(result);
        self
    }

    /// Best-effort idempotency key receivers are told to dedupe by (spec §7).
    pub fn idempotency_key(&self) -> String {
        format!("{}:{:?}:{}", self.instance_id, self.status, self.timestamp.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_for_identical_fields() {
        let ts = Utc::now();
        let a = WebhookPayload::new("inst_1".into(), WebhookStatus::Ready, ts);
        let b = WebhookPayload::new("inst_1".into(), WebhookStatus::Ready, ts);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }

    #[test]
    fn idempotency_key_differs_on_status() {
        let ts = Utc::now();
        let a = WebhookPayload::new("inst_1".into(), WebhookStatus::Ready, ts);
        let b = WebhookPayload::new("inst_1".into(), WebhookStatus::Failed, ts);
        assert_ne!(a.idempotency_key(), b.idempotency_key());
    }
}
