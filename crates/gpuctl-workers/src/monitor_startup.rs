use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gpuctl_health::HealthChecker;
use gpuctl_instance::InstanceService;
use gpuctl_proto::{
    HealthCheckConfig, HealthCheckState, HealthCheckStatus, HealthCheckResult, Instance, InstanceStatus, Job,
    JobPayload, JobPriority, OverallHealthStatus, StartupOperationStatus, WebhookPayload, WebhookStatus,
};
use gpuctl_queue::{JobHandler, JobQueue};
use gpuctl_upstream::SharedUpstreamClient;
use tracing::warn;

use crate::shared::{emit_webhook, MonitorConfig};

/// `MONITOR_STARTUP` (spec §4.7): as for `MONITOR_INSTANCE`, tied to a
/// Startup Operation instead of a bare instance id. Every status transition
/// also stamps a phase on the operation, which is removed once it reaches a
/// terminal state (`completed` or `failed`).
pub struct MonitorStartupHandler {
    instance_service: Arc<InstanceService>,
    upstream: SharedUpstreamClient,
    health_checker: Arc<HealthChecker>,
    queue: Arc<JobQueue>,
    config: MonitorConfig,
}

impl MonitorStartupHandler {
    pub fn new(
        instance_service: Arc<InstanceService>,
        upstream: SharedUpstreamClient,
        health_checker: Arc<HealthChecker>,
        queue: Arc<JobQueue>,
        config: MonitorConfig,
    ) -> Self {
        Self { instance_service, upstream, health_checker, queue, config }
    }

    async fn touch_operation<F>(&self, instance_id: &str, mutate: F)
    where
        F: FnOnce(&mut gpuctl_proto::StartupOperation),
    {
        if let Some(mut op) = self.instance_service.active_operation(instance_id).await {
            mutate(&mut op);
            self.instance_service.update_operation(op).await;
        }
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
            warn!(%instance_id, "could not mark instance failed during startup monitor tick");
            return;
        }
        self.touch_operation(instance_id, |op| {
            op.status = StartupOperationStatus::Failed;
            op.error = Some(message.clone());
        })
        .await;
        self.instance_service.remove_operation(instance_id).await;

        let mut payload = WebhookPayload::new(instance_id.to_string(), WebhookStatus::Failed, Utc::now()).with_error(message);
        if let Some(result) = health_result {
            payload = payload.with_health_check_result(result);
        }
        emit_webhook(&self.queue, webhook_url, payload).await;
    }

    async fn requeue(&self, payload: JobPayload) {
        tokio::time::sleep(self.config.poll_delay).await;
        if let Err(err) = self.queue.add_job(payload, JobPriority::High, None).await {
            warn!(%err, "failed to re-enqueue MONITOR_STARTUP");
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
            self.touch_operation(&instance_id, |op| {
                op.status = StartupOperationStatus::Completed;
                op.phases.completed = Some(Utc::now());
            })
            .await;
            self.instance_service.remove_operation(&instance_id).await;
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
            self.touch_operation(&instance_id, |op| {
                op.status = StartupOperationStatus::HealthChecking;
                op.phases.health_checking = Some(Utc::now());
            })
            .await;
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
                self.touch_operation(&instance_id, |op| {
                    op.status = StartupOperationStatus::Completed;
                    op.phases.completed = Some(Utc::now());
                })
                .await;
                self.instance_service.remove_operation(&instance_id).await;
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
impl JobHandler for MonitorStartupHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let JobPayload::MonitorStartup {
            instance_id,
            novita_instance_id,
            operation_id: _,
            webhook_url,
            start_time,
            max_wait_time_ms,
            health_check_config,
            target_port,
        } = &job.payload
        else {
            return Err("MONITOR_STARTUP handler received a mismatched payload".to_string());
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
                self.touch_operation(instance_id, |op| {
                    op.status = StartupOperationStatus::Monitoring;
                    op.phases.instance_starting.get_or_insert(Utc::now());
                })
                .await;
                self.requeue(job.payload.clone()).await;
                Ok(())
            }
            "exited" | "failed" => {
                let message = format!("upstream reports instance {}", normalized.status);
                self.fail(instance_id, webhook_url.clone(), message.clone(), None).await;
                Err(message)
            }
            other => {
                warn!(%instance_id, status = other, "unrecognized upstream status during startup monitor tick");
                self.requeue(job.payload.clone()).await;
                Ok(())
            }
        }
    }
}
