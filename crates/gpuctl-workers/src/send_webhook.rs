use std::sync::Arc;

use async_trait::async_trait;
use gpuctl_proto::{Job, JobPayload, WebhookPayload};
use gpuctl_queue::JobHandler;
use gpuctl_webhook::WebhookClient;

/// `SEND_WEBHOOK` (spec §4.7): delivers a previously-built
/// [`WebhookPayload`] to the instance's configured URL. Delivery is
/// best-effort from the workflow's perspective; a failed attempt here is
/// fatal only to this job, which the queue retries per its own policy
/// (spec §4.6).
pub struct SendWebhookHandler {
    webhook_client: Arc<dyn WebhookClient>,
}

impl SendWebhookHandler {
    pub fn new(webhook_client: Arc<dyn WebhookClient>) -> Self {
        Self { webhook_client }
    }
}

#[async_trait]
impl JobHandler for SendWebhookHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let JobPayload::SendWebhook { url, payload } = &job.payload else {
            return Err("SEND_WEBHOOK handler received a mismatched payload".to_string());
        };

        let payload: WebhookPayload = serde_json::from_value(payload.clone()).map_err(|err| err.to_string())?;
        self.webhook_client.deliver(url, &payload).await.map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gpuctl_proto::{JobPriority, WebhookStatus};
    use gpuctl_webhook::RecordingWebhookClient;

    #[tokio::test]
    async fn delivers_the_deserialized_payload_to_the_configured_url() {
        let client = Arc::new(RecordingWebhookClient::new());
        let handler = SendWebhookHandler::new(client.clone());

        let payload = WebhookPayload::new("inst_1".to_string(), WebhookStatus::Ready, Utc::now());
        let job = Job::new(
            JobPayload::SendWebhook {
                url: "https://example.com/hook".to_string(),
                payload: serde_json::to_value(&payload).unwrap(),
            },
            JobPriority::Normal,
            None,
            Utc::now(),
        );

        handler.handle(&job).await.unwrap();
        let delivered = client.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "https://example.com/hook");
        assert_eq!(delivered[0].1.instance_id, "inst_1");
    }

    #[tokio::test]
    async fn mismatched_payload_is_rejected() {
        let client = Arc::new(RecordingWebhookClient::new());
        let handler = SendWebhookHandler::new(client);
        let job = Job::new(JobPayload::AutoStopCheck { idle_threshold_ms: 1000 }, JobPriority::Normal, None, Utc::now());
        assert!(handler.handle(&job).await.is_err());
    }
}
