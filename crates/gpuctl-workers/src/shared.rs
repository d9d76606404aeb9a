use std::time::Duration;

use gpuctl_proto::{JobPayload, JobPriority, WebhookPayload};
use gpuctl_queue::JobQueue;
use tracing::warn;

/// Tuning shared by the two polling handlers. `poll_delay` paces
/// re-enqueued `MONITOR_INSTANCE`/`MONITOR_STARTUP` ticks; spec §6 lists
/// `POLL_INTERVAL_SECONDS` as the config knob this is read from.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { poll_delay: Duration::from_secs(5) }
    }
}

/// Best-effort webhook emission: failures to enqueue are logged, never
/// propagated (spec §4.7 `SEND_WEBHOOK`: "fire-and-forget from the
/// workflow's perspective").
pub async fn emit_webhook(queue: &JobQueue, url: Option<String>, payload: WebhookPayload) {
    let Some(url) = url else { return };
    let instance_id = payload.instance_id.clone();
    let body = serde_json::to_value(payload).unwrap_or_default();
    if let Err(err) = queue.add_job(JobPayload::SendWebhook { url, payload: body }, JobPriority::Normal, None).await {
        warn!(%err, %instance_id, "failed to enqueue webhook");
    }
}
