use std::time::Duration;

use async_trait::async_trait;
use gpuctl_proto::HealthCheckErrorKind;
use reqwest::redirect::Policy;
use reqwest::Client;

/// Outcome of a single HTTP probe attempt.
pub struct ProbeOutcome {
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<HealthCheckErrorKind>,
}

/// Interface-typed per the "Test mocking hooks" design note (spec §9) so
/// `HealthChecker` can be exercised without the network.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeOutcome;
}

/// Real HTTP prober (spec §4.5 step 3): GET with `maxRedirects=0` and the
/// fixed header set, classifying failures per §4.5.1.
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointProber for HttpProber {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeOutcome {
        let started = std::time::Instant::now();
        let result = self
            .client
            .get(endpoint)
            .timeout(timeout)
            .header("User-Agent", "HealthChecker/1.0")
            .header("Accept", "*/*")
            .header("Cache-Control", "no-cache")
            .header("Connection", "close")
            .header("X-Health-Check", "true")
            .send()
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..400).contains(&status) {
                    ProbeOutcome { success: true, response_time_ms, error: None }
                } else {
                    ProbeOutcome {
                        success: false,
                        response_time_ms: 0,
                        error: Some(crate::classify::classify_status(status)),
                    }
                }
            }
            Err(err) => ProbeOutcome {
                success: false,
                response_time_ms: 0,
                error: Some(crate::classify::classify_reqwest_error(&err)),
            },
        }
    }
}
