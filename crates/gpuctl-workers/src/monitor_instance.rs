use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gpuctl_health::HealthChecker;
use gpuctl_instance::InstanceService;
use gpuctl_proto::{
    HealthCheckConfig, HealthCheckState, HealthCheckStatus, HealthCheckResult, Instance, InstanceStatus, Job,
    JobPayload, JobPriority, OverallHealthStatus, WebhookPayload, WebhookStatus,
};
use gpuctl_queue::{JobHandler, JobQueue};
use gpuctl_upstream::SharedUpstreamClient;
use tracing::warn;

use crate::shared::{emit_webhook, MonitorConfig};

/// `MONITOR_INSTANCE` (spec §4.7): polls upstream status until the instance
/// reaches `ready` or a terminal failure, running the health-check phase
/// (C5) once ports are running.
pub struct MonitorInstanceHandler {
    instance_service: Arc<InstanceService>,
    upstream: SharedUpstreamClient,
    health_checker: Arc<HealthChecker>,
    queue: Arc<JobQueue>,
    config: MonitorConfig,
}

impl MonitorInstanceHandler {
    pub fn new(
        instance_service: Arc<InstanceService>,
        upstream: SharedUpstreamClient,
        health_checker: Arc<HealthChecker>,
        queue: Arc<JobQueue>,
        config: MonitorConfig,
    ) -> Self {
        Self { instance_service, upstream, health_checker, queue, config }
    }

    async fn fail(&self, instance_id: &str, webhook_url: Option<String>, message: String, health_result: Option<HealthCheckResult>) {
        let result = self
            .instance_service
            .update_instance_state(instance_id, |i| {
                i.status = InstanceStatus::Failed;
                i.last_error = Some(message.clone());
                if let Some(hc) = &mut i.health_check {
                    hc.status = HealthCheckStatus::Failed;
                    hc.completed_at = Some(Utc::now());
                }
            })
            .await;
        if result.is_err() {
            warn!(%instance_id, "could not mark instance failed during monitor tick");
            return;
        }
        let mut payload = WebhookPayload::new(instance_id.to_string(), WebhookStatus::Failed, Utc::now()).with_error(message);
        if let Some(result) = health_result {
            payload = payload.with_health_check_result(result);
        }
        emit_webhook(&self.queue, webhook_url, payload).await;
    }

    async fn requeue(&self, payload: JobPayload) {
        tokio::time::sleep(self.config.poll_delay).await;
        if let Err(err) = self.queue.add_job(payload, JobPriority::High, None).await {
            warn!(%err, "failed to re-enqueue MONITOR_INSTANCE");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_running(
        &self,
        job: &Job,
        instance: Instance,
        port_mappings: Vec<gpuctl_proto::PortMapping>,
        webhook_url: Option<String>,
        health_check_config: Option<HealthCheckConfig>,
        target_port: Option<u16>,
    ) -> Result<(), String> {
        let instance_id = instance.id.clone();

        if port_mappings.is_empty() {
            self.instance_service
                .update_instance_state(&instance_id, |i| {
                    i.status = InstanceStatus::Ready;
                    i.timestamps.ready = Some(Utc::now());
                })
                .await
                .map_err(|e| e.to_string())?;
            emit_webhook(&self.queue, webhook_url, WebhookPayload::new(instance_id, WebhookStatus::Ready, Utc::now())).await;
            return Ok(());
        }

        let entering = instance.status != InstanceStatus::HealthChecking;
        let existing = instance.health_check.clone();
        let started_at = existing.as_ref().and_then(|s| s.started_at).unwrap_or_else(Utc::now);
        let mut requested_config = health_check_config.unwrap_or_default();
        if let Some(port) = target_port {
            requested_config.target_port = Some(port);
        }
        let probe_config = existing.as_ref().map(|s| s.config).unwrap_or(requested_config);

        let result = self.health_checker.perform_health_checks(&port_mappings, probe_config).await;
        let mut results = existing.map(|s| s.results).unwrap_or_default();
        results.push(result.clone());

        self.instance_service
            .update_instance_state(&instance_id, |i| {
                i.status = InstanceStatus::HealthChecking;
                i.health_check = Some(HealthCheckState {
                    status: HealthCheckStatus::InProgress,
                    config: probe_config,
                    results: results.clone(),
                    started_at: Some(started_at),
                    completed_at: None,
                });
            })
            .await
            .map_err(|e| e.to_string())?;

        if entering {
            emit_webhook(&self.queue, webhook_url.clone(), WebhookPayload::new(instance_id.clone(), WebhookStatus::HealthChecking, Utc::now())).await;
        }

        match result.overall_status {
            OverallHealthStatus::Healthy => {
                self.instance_service
                    .update_instance_state(&instance_id, |i| {
                        i.status = InstanceStatus::Ready;
                        i.timestamps.ready = Some(Utc::now());
                        if let Some(hc) = &mut i.health_check {
                            hc.status = HealthCheckStatus::Completed;
                            hc.completed_at = Some(Utc::now());
                        }
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                let payload = WebhookPayload::new(instance_id, WebhookStatus::Ready, Utc::now()).with_health_check_result(result);
                emit_webhook(&self.queue, webhook_url, payload).await;
                Ok(())
            }
            OverallHealthStatus::Partial | OverallHealthStatus::Unhealthy => {
                let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
                if elapsed_ms > probe_config.max_wait_time_ms {
                    let message = format!("Health check timeout after {elapsed_ms}ms (max: {}ms)", probe_config.max_wait_time_ms);
                    self.fail(&instance_id, webhook_url, message.clone(), Some(result)).await;
                    Err(message)
                } else {
                    self.requeue(job.payload.clone()).await;
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for MonitorInstanceHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let JobPayload::MonitorInstance {
            instance_id,
            novita_instance_id,
            webhook_url,
            start_time,
            max_wait_time_ms,
            health_check_config,
            target_port,
        } = &job.payload
        else {
            return Err("MONITOR_INSTANCE handler received a mismatched payload".to_string());
        };

        let now = Utc::now();
        if (now - *start_time).num_milliseconds().max(0) as u64 > *max_wait_time_ms {
            let message = format!("instance startup timed out after {max_wait_time_ms}ms");
            self.fail(instance_id, webhook_url.clone(), message.clone(), None).await;
            return Err(message);
        }

        let normalized = self.upstream.get_instance(novita_instance_id).await.map_err(|err| err.to_string())?;
        let instance = self.instance_service.get_local(instance_id).await.map_err(|e| e.to_string())?;

        match normalized.status.as_str() {
            "running" => {
                self.handle_running(job, instance, normalized.port_mappings, webhook_url.clone(), health_check_config.clone(), *target_port)
                    .await
            }
            "starting" | "created" => {
                self.instance_service
                    .update_instance_state(instance_id, |i| i.status = InstanceStatus::Starting)
                    .await
                    .map_err(|e| e.to_string())?;
                self.requeue(job.payload.clone()).await;
                Ok(())
            }
            "exited" | "failed" => {
                let message = format!("upstream reports instance {}", normalized.status);
                self.fail(instance_id, webhook_url.clone(), message.clone(), None).await;
                Err(message)
            }
            other => {
                warn!(%instance_id, status = other, "unrecognized upstream status during monitor tick");
                self.requeue(job.payload.clone()).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuctl_cache::{Cache, MemoryBackend};
    use gpuctl_health::{EndpointProber, ProbeOutcome};
    use gpuctl_instance::{InstanceService, InstanceServiceConfig};
    use gpuctl_proto::{
        Availability, CreateInstanceRequest, EnvVar, HealthCheckErrorKind, InstanceConfiguration, InstanceTimestamps,
        PortKind, Product, TemplateConfiguration,
    };
    use gpuctl_queue::{MemoryQueueStore, QueueConfig};
    use gpuctl_resolver::{ProductResolver, TemplateResolver};
    use gpuctl_upstream::{MigrationOutcome, NormalizedInstance, UpstreamClient, UpstreamError};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    struct ScriptedUpstream {
        response: StdMutex<Option<NormalizedInstance>>,
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn get_products(&self, _name: &str, _region: &str) -> gpuctl_upstream::Result<Vec<Product>> {
            unimplemented!()
        }
        async fn get_template(&self, _id: &str) -> gpuctl_upstream::Result<TemplateConfiguration> {
            unimplemented!()
        }
        async fn get_registry_auth(&self, _id: &str) -> gpuctl_upstream::Result<Option<(String, String)>> {
            unimplemented!()
        }
        async fn create_instance(&self, _req: gpuctl_upstream::CreateInstanceRequest) -> gpuctl_upstream::Result<String> {
            unimplemented!()
        }
        async fn start_instance(&self, _novita_id: &str) -> gpuctl_upstream::Result<()> {
            unimplemented!()
        }
        async fn get_instance(&self, _novita_id: &str) -> gpuctl_upstream::Result<NormalizedInstance> {
            self.response.lock().unwrap().clone().ok_or(UpstreamError::NotFound)
        }
        async fn list_instances(&self, _page: u32, _page_size: u32) -> gpuctl_upstream::Result<Vec<NormalizedInstance>> {
            unimplemented!()
        }
        async fn migrate_instance(&self, _novita_id: &str) -> gpuctl_upstream::Result<MigrationOutcome> {
            unimplemented!()
        }
        async fn instance_exists(&self, _novita_id: &str) -> gpuctl_upstream::Result<bool> {
            unimplemented!()
        }
        async fn health_check(&self) -> gpuctl_upstream::Result<()> {
            Ok(())
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl EndpointProber for AlwaysHealthy {
        async fn probe(&self, _endpoint: &str, _timeout: std::time::Duration) -> ProbeOutcome {
            ProbeOutcome { success: true, response_time_ms: 5, error: None }
        }
    }

    struct AlwaysUnhealthy;
    #[async_trait]
    impl EndpointProber for AlwaysUnhealthy {
        async fn probe(&self, _endpoint: &str, _timeout: std::time::Duration) -> ProbeOutcome {
            ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::ClientError) }
        }
    }

    fn cache(name: &str) -> Arc<Cache> {
        Arc::new(Cache::new(name, Arc::new(MemoryBackend::new()), 100, StdDuration::from_secs(60)))
    }

    async fn seeded_instance(service: &InstanceService, id: &str, ports: Vec<gpuctl_proto::PortMapping>) {
        service
            .create_instance_with_id(
                id.to_string(),
                CreateInstanceRequest {
                    name: "worker-a".into(),
                    product_name: "RTX 4090 24GB".into(),
                    template_id: "107672".into(),
                    gpu_num: 1,
                    rootfs_size: 20,
                    region: None,
                    webhook_url: Some("https://example.com/hook".into()),
                },
            )
            .await
            .unwrap();
        let _ = ports;
    }

    fn harness(
        upstream_response: Option<NormalizedInstance>,
        prober: Arc<dyn EndpointProber>,
    ) -> (Arc<InstanceService>, Arc<JobQueue>, Arc<MonitorInstanceHandler>) {
        let upstream: SharedUpstreamClient = Arc::new(ScriptedUpstream { response: StdMutex::new(upstream_response) });
        let products = Arc::new(ProductResolver::new(upstream.clone(), cache("products")));
        let templates = Arc::new(TemplateResolver::new(upstream.clone(), cache("templates")));
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryQueueStore::new()), QueueConfig::default()));
        let service = Arc::new(InstanceService::new(
            upstream.clone(),
            products,
            templates,
            cache("instances"),
            queue.clone(),
            InstanceServiceConfig::default(),
        ));
        let checker = Arc::new(HealthChecker::with_prober(prober));
        let handler = Arc::new(MonitorInstanceHandler::new(
            service.clone(),
            upstream,
            checker,
            queue.clone(),
            MonitorConfig { poll_delay: StdDuration::from_millis(1) },
        ));
        (service, queue, handler)
    }

    fn monitor_job(instance_id: &str, novita_id: &str, start_time: chrono::DateTime<Utc>, max_wait_time_ms: u64) -> Job {
        Job::new(
            JobPayload::MonitorInstance {
                instance_id: instance_id.to_string(),
                novita_instance_id: novita_id.to_string(),
                webhook_url: Some("https://example.com/hook".into()),
                start_time,
                max_wait_time_ms,
                health_check_config: None,
                target_port: None,
            },
            JobPriority::High,
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn running_with_no_ports_marks_ready_immediately() {
        let upstream_response = NormalizedInstance {
            novita_id: "novita_1".into(),
            status: "running".into(),
            region: "CN-HK-01".into(),
            gpu_num: 1,
            created_at: Utc::now(),
            port_mappings: vec![],
            spot_status: None,
            spot_reclaim_time: None,
        };
        let (service, _queue, handler) = harness(Some(upstream_response), Arc::new(AlwaysHealthy));
        seeded_instance(&service, "inst_1", vec![]).await;
        let now = Utc::now();
        let job = monitor_job("inst_1", "novita_1", now, 300_000);

        handler.handle(&job).await.unwrap();
        let instance = service.get_local("inst_1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Ready);
        assert!(instance.timestamps.ready.is_some());
    }

    #[tokio::test]
    async fn running_with_healthy_ports_reaches_ready_after_one_tick() {
        let upstream_response = NormalizedInstance {
            novita_id: "novita_1".into(),
            status: "running".into(),
            region: "CN-HK-01".into(),
            gpu_num: 1,
            created_at: Utc::now(),
            port_mappings: vec![gpuctl_proto::PortMapping { port: 8080, endpoint: "http://localhost:8080".into(), kind: PortKind::Http }],
            spot_status: None,
            spot_reclaim_time: None,
        };
        let (service, queue, handler) = harness(Some(upstream_response), Arc::new(AlwaysHealthy));
        seeded_instance(&service, "inst_1", vec![]).await;
        let now = Utc::now();
        let job = monitor_job("inst_1", "novita_1", now, 300_000);

        handler.handle(&job).await.unwrap();
        let instance = service.get_local("inst_1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Ready);
        assert_eq!(instance.health_check.unwrap().status, HealthCheckStatus::Completed);

        let stats = queue.get_stats().await.unwrap();
        assert!(stats.pending >= 2, "expected health_checking + ready webhooks enqueued");
    }

    #[tokio::test]
    async fn overall_timeout_marks_instance_failed() {
        let (service, _queue, handler) = harness(None, Arc::new(AlwaysHealthy));
        seeded_instance(&service, "inst_1", vec![]).await;
        let stale_start = Utc::now() - chrono::Duration::milliseconds(5_000);
        let job = monitor_job("inst_1", "novita_1", stale_start, 1_000);

        let err = handler.handle(&job).await.unwrap_err();
        assert!(err.contains("timed out"));
        let instance = service.get_local("inst_1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn health_check_timeout_marks_instance_failed() {
        let upstream_response = NormalizedInstance {
            novita_id: "novita_1".into(),
            status: "running".into(),
            region: "CN-HK-01".into(),
            gpu_num: 1,
            created_at: Utc::now(),
            port_mappings: vec![gpuctl_proto::PortMapping { port: 8080, endpoint: "http://localhost:8080".into(), kind: PortKind::Http }],
            spot_status: None,
            spot_reclaim_time: None,
        };
        let (service, _queue, handler) = harness(Some(upstream_response), Arc::new(AlwaysUnhealthy));
        seeded_instance(&service, "inst_1", vec![]).await;

        // Seed a health check state whose startedAt is already past max_wait_time_ms.
        service
            .update_instance_state("inst_1", |i| {
                i.status = InstanceStatus::HealthChecking;
                i.health_check = Some(HealthCheckState {
                    status: HealthCheckStatus::InProgress,
                    config: HealthCheckConfig { max_wait_time_ms: 1, ..HealthCheckConfig::default() },
                    results: vec![],
                    started_at: Some(Utc::now() - chrono::Duration::milliseconds(50)),
                    completed_at: None,
                });
            })
            .await
            .unwrap();

        let now = Utc::now();
        let job = monitor_job("inst_1", "novita_1", now, 300_000);
        let err = handler.handle(&job).await.unwrap_err();
        assert!(err.contains("Health check timeout"));
        let instance = service.get_local("inst_1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
    }

    #[allow(dead_code)]
    fn unused(_: InstanceConfiguration, _: InstanceTimestamps, _: Availability, _: EnvVar) {}
}
