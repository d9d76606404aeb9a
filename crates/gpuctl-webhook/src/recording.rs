use async_trait::async_trait;
use gpuctl_proto::WebhookPayload;
use tokio::sync::Mutex;

use crate::client::WebhookClient;
use crate::error::Result;

/// In-memory stand-in for [`HttpWebhookClient`](crate::HttpWebhookClient),
/// used by `gpuctl-workers`' `SEND_WEBHOOK` handler tests (spec §9 "Test
/// mocking hooks").
#[derive(Default)]
pub struct RecordingWebhookClient {
    delivered: Mutex<Vec<(String, WebhookPayload)>>,
}

impl RecordingWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<(String, WebhookPayload)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        self.delivered.lock().await.push((url.to_string(), payload.clone()));
        Ok(())
    }
}
