use std::time::Duration;

use async_trait::async_trait;
use gpuctl_proto::WebhookPayload;
use tracing::debug;

use crate::error::{Result, WebhookError};

/// The webhook delivery collaborator (spec §2/§6: "a black box that either
/// resolves or rejects"). Interface-typed per the "Test mocking hooks"
/// design note so `SEND_WEBHOOK` handler tests run without network access.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()>;
}

pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build webhook HTTP client");
        Self { client }
    }
}

impl Default for HttpWebhookClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        let idempotency_key = payload.idempotency_key();
        let response = self
            .client
            .post(url)
            .header("X-Idempotency-Key", &idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| WebhookError { url: url.to_string(), reason: err.to_string() })?;

        if !response.status().is_success() {
            return Err(WebhookError {
                url: url.to_string(),
                reason: format!("receiver returned status {}", response.status()),
            });
        }

        debug!(url, idempotency_key, "webhook delivered");
        Ok(())
    }
}
