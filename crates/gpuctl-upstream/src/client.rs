use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gpuctl_proto::{Product, TemplateConfiguration};
use rand::Rng;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::circuit::{CircuitBreaker, CircuitDecision};
use crate::error::{Result, UpstreamError};
use crate::wire::{
    normalize_envs, normalize_instance, normalize_product, flatten_ports, NormalizedInstance,
    RawInstance, RawListInstancesResponse, RawProductsResponse, RawRegistryAuthResponse,
    RawTemplateResponse,
};

#[derive(Debug, Clone)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub product_id: String,
    pub gpu_num: u8,
    pub rootfs_size: u32,
    pub image_url: String,
    pub image_auth: Option<String>,
    pub ports: String,
    pub envs: serde_json::Value,
    pub cluster_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub message: String,
    pub new_instance_id: Option<String>,
    pub error: Option<String>,
}

/// The typed upstream collaborator (C2, spec §4.2). Interface-typed per the
/// "Test mocking hooks" design note so the §8 test suite runs without
/// network access.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get_products(&self, product_name: &str, region: &str) -> Result<Vec<Product>>;
    async fn get_template(&self, id: &str) -> Result<TemplateConfiguration>;
    async fn get_registry_auth(&self, id: &str) -> Result<Option<(String, String)>>;
    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<String>;
    async fn start_instance(&self, novita_id: &str) -> Result<()>;
    async fn get_instance(&self, novita_id: &str) -> Result<NormalizedInstance>;
    async fn list_instances(&self, page: u32, page_size: u32) -> Result<Vec<NormalizedInstance>>;
    async fn migrate_instance(&self, novita_id: &str) -> Result<MigrationOutcome>;
    async fn instance_exists(&self, novita_id: &str) -> Result<bool>;
    async fn health_check(&self) -> Result<()>;

    /// Retries only on `RateLimitError`/`TimeoutError`/`NetworkError`/
    /// `ServerError`; sleeps `baseDelay * 2^(attempt-1) * jitter(0.5..1.5)`
    /// before retrying; exhausts at `max_attempts` (spec §4.2).
    async fn start_instance_with_retry(&self, novita_id: &str, max_attempts: u32) -> Result<()> {
        let base_delay = Duration::from_secs(1);
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.start_instance(novita_id).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let delay = base_delay.mul_f64(2f64.powi(attempt as i32 - 1) * jitter);
                    warn!(%novita_id, attempt, ?delay, error = %err, "start_instance failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(UpstreamError::Timeout))
    }
}

pub struct HttpUpstreamClient {
    client: Client,
    base_url: String,
    api_key: String,
    breaker: Mutex<CircuitBreaker>,
}

impl HttpUpstreamClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(UpstreamError::from)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            breaker: Mutex::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn guarded<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        {
            let mut breaker = self.breaker.lock().await;
            if breaker.poll() == CircuitDecision::Reject {
                return Err(UpstreamError::CircuitOpen { operation: operation.to_string() });
            }
        }
        let result = call().await;
        let mut breaker = self.breaker.lock().await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(err) if err.is_retryable() => breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
        response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status == StatusCode::OK || status.is_success() {
            response.json::<T>().await.map_err(|e| UpstreamError::Decode(e.to_string()))
        } else {
            let retry_after = Self::retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            Err(UpstreamError::from_status(status.as_u16(), body, retry_after))
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn get_products(&self, product_name: &str, region: &str) -> Result<Vec<Product>> {
        self.guarded("get_products", || async {
            let response = self
                .client
                .get(self.url("/v1/products"))
                .bearer_auth(&self.api_key)
                .query(&[
                    ("billingMethod", "spot"),
                    ("productName", product_name),
                    ("region", region),
                ])
                .send()
                .await?;
            let parsed: RawProductsResponse = Self::handle_response(response).await?;
            Ok(parsed.data.into_iter().map(|p| normalize_product(p, region)).collect())
        })
        .await
    }

    async fn get_template(&self, id: &str) -> Result<TemplateConfiguration> {
        self.guarded("get_template", || async {
            let response = self
                .client
                .get(self.url("/v1/template"))
                .bearer_auth(&self.api_key)
                .query(&[("templateId", id)])
                .send()
                .await?;
            let parsed: RawTemplateResponse = Self::handle_response(response).await?;
            Ok(TemplateConfiguration {
                image_url: parsed.template.image,
                image_auth: parsed.template.image_auth,
                ports: flatten_ports(parsed.template.ports),
                envs: normalize_envs(parsed.template.envs),
            })
        })
        .await
    }

    async fn get_registry_auth(&self, id: &str) -> Result<Option<(String, String)>> {
        self.guarded("get_registry_auth", || async {
            let response = self
                .client
                .get(self.url("/v1/repository/auths"))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let parsed: RawRegistryAuthResponse = Self::handle_response(response).await?;
            Ok(parsed
                .data
                .into_iter()
                .find(|auth| auth.id == id)
                .map(|auth| (auth.username, auth.password)))
        })
        .await
    }

    async fn create_instance(&self, req: CreateInstanceRequest) -> Result<String> {
        self.guarded("create_instance", || async {
            let body = serde_json::json!({
                "name": req.name,
                "productId": req.product_id,
                "gpuNum": req.gpu_num,
                "rootfsSize": req.rootfs_size,
                "imageUrl": req.image_url,
                "kind": "gpu",
                "billingMode": "spot",
                "imageAuth": req.image_auth,
                "ports": req.ports,
                "envs": req.envs,
                "clusterId": req.cluster_id,
            });
            let response = self
                .client
                .post(self.url("/v1/gpu/instance/create"))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            #[derive(serde::Deserialize)]
            struct CreateResponse {
                id: String,
            }
            let parsed: CreateResponse = Self::handle_response(response).await?;
            Ok(parsed.id)
        })
        .await
    }

    async fn start_instance(&self, novita_id: &str) -> Result<()> {
        self.guarded("start_instance", || async {
            let response = self
                .client
                .post(self.url(&format!("/v1/gpu/instance/{novita_id}/start")))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let retry_after = Self::retry_after_secs(&response);
                let body = response.text().await.unwrap_or_default();
                Err(UpstreamError::from_status(status.as_u16(), body, retry_after))
            }
        })
        .await
    }

    async fn get_instance(&self, novita_id: &str) -> Result<NormalizedInstance> {
        self.guarded("get_instance", || async {
            let response = self
                .client
                .get(self.url("/v1/gpu/instance"))
                .bearer_auth(&self.api_key)
                .query(&[("instanceId", novita_id)])
                .send()
                .await?;
            let raw: RawInstance = Self::handle_response(response).await?;
            Ok(normalize_instance(raw))
        })
        .await
    }

    async fn list_instances(&self, page: u32, page_size: u32) -> Result<Vec<NormalizedInstance>> {
        self.guarded("list_instances", || async {
            let response = self
                .client
                .get(self.url("/v1/gpu/instances"))
                .bearer_auth(&self.api_key)
                .query(&[("page", page), ("pageSize", page_size)])
                .send()
                .await?;
            let parsed: RawListInstancesResponse = Self::handle_response(response).await?;
            Ok(parsed.data.into_iter().map(normalize_instance).collect())
        })
        .await
    }

    async fn migrate_instance(&self, novita_id: &str) -> Result<MigrationOutcome> {
        self.guarded("migrate_instance", || async {
            let response = self
                .client
                .post(self.url("/gpu-instance/openapi/v1/gpu/instance/migrate"))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({ "instanceId": novita_id }))
                .send()
                .await?;
            #[derive(serde::Deserialize)]
            struct MigrateResponse {
                message: String,
                #[serde(default, rename = "newInstanceId")]
                new_instance_id: Option<String>,
                #[serde(default)]
                error: Option<String>,
            }
            let parsed: MigrateResponse = Self::handle_response(response).await?;
            Ok(MigrationOutcome {
                message: parsed.message,
                new_instance_id: parsed.new_instance_id,
                error: parsed.error,
            })
        })
        .await
    }

    async fn instance_exists(&self, novita_id: &str) -> Result<bool> {
        match self.get_instance(novita_id).await {
            Ok(_) => Ok(true),
            Err(UpstreamError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let started = Utc::now();
        self.get_products("health-check-probe", "CN-HK-01").await.map(|_| ())?;
        debug!(elapsed_ms = (Utc::now() - started).num_milliseconds(), "upstream health check ok");
        Ok(())
    }
}

pub type SharedUpstreamClient = Arc<dyn UpstreamClient>;
