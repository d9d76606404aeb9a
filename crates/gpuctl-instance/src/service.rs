use std::sync::Arc;

use chrono::Utc;
use gpuctl_cache::Cache;
use gpuctl_proto::instance::new_legacy_id;
use gpuctl_proto::validation::{validate_gpu_num, validate_non_empty, validate_rootfs_size, validate_webhook_url};
use gpuctl_proto::{
    CreateInstanceRequest, CreateInstanceResult, HealthCheckConfig, Instance, InstanceConfiguration,
    InstanceLookup, InstanceStatus, InstanceTimestamps, JobPayload, JobPriority, StartupOperation,
    StartupOperationStatus, WebhookPayload, WebhookStatus,
};
use gpuctl_queue::JobQueue;
use gpuctl_resolver::{ProductResolver, TemplateResolver};
use gpuctl_upstream::{CreateInstanceRequest as UpstreamCreateInstanceRequest, SharedUpstreamClient, UpstreamError};
use tracing::{info, warn};

use crate::error::{InstanceServiceError, Result};
use crate::operations::StartupOperationTracker;
use crate::store::InstanceStore;

#[derive(Debug, Clone)]
pub struct InstanceServiceConfig {
    pub default_region: String,
    pub startup_default_max_wait_ms: u64,
    pub start_max_attempts: u32,
}

impl Default for InstanceServiceConfig {
    fn default() -> Self {
        Self {
            default_region: "CN-HK-01".to_string(),
            startup_default_max_wait_ms: 300_000,
            start_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListInstancesOptions {
    pub status: Option<InstanceStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StartInstanceResult {
    pub operation_id: String,
    pub status: InstanceStatus,
    pub estimated_ready_time: chrono::DateTime<Utc>,
}

fn encode_ports(ports: &[gpuctl_proto::PortMapping]) -> String {
    ports
        .iter()
        .map(|p| {
            let kind = match p.kind {
                gpuctl_proto::PortKind::Http => "http",
                gpuctl_proto::PortKind::Https => "https",
                gpuctl_proto::PortKind::Tcp => "tcp",
                gpuctl_proto::PortKind::Udp => "udp",
            };
            format!("{}/{kind}", p.port)
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Instance Service (C8, spec §4.1): the sole owner and mutator of instance
/// state, widening [`InstanceStore`]'s single-map-behind-a-lock pattern with
/// product/template resolution, startup-operation tracking, and job-queue
/// orchestration.
pub struct InstanceService {
    store: InstanceStore,
    operations: StartupOperationTracker,
    cache: Arc<Cache>,
    upstream: SharedUpstreamClient,
    products: Arc<ProductResolver>,
    templates: Arc<TemplateResolver>,
    queue: Arc<JobQueue>,
    config: InstanceServiceConfig,
}

impl InstanceService {
    pub fn new(
        upstream: SharedUpstreamClient,
        products: Arc<ProductResolver>,
        templates: Arc<TemplateResolver>,
        cache: Arc<Cache>,
        queue: Arc<JobQueue>,
        config: InstanceServiceConfig,
    ) -> Self {
        Self {
            store: InstanceStore::new(),
            operations: StartupOperationTracker::new(),
            cache,
            upstream,
            products,
            templates,
            queue,
            config,
        }
    }

    /// Replaces the instance record in place, enforcing the status graph
    /// (Invariant 1) and invalidating the cached record on every status
    /// change (Invariant 5). Used for every mutation in this service.
    pub async fn update_instance_state<F>(&self, id: &str, mutate: F) -> Result<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        let Some(mut instance) = self.store.get(id).await else {
            return Err(InstanceServiceError::NotFound(id.to_string()));
        };
        let previous_status = instance.status;
        mutate(&mut instance);
        if instance.status != previous_status && !previous_status.can_transition_to(instance.status) {
            return Err(InstanceServiceError::InvalidTransition(format!(
                "{id}: {previous_status} -> {}",
                instance.status
            )));
        }
        self.store.replace(instance.clone()).await;
        if instance.status != previous_status {
            self.cache.delete(id).await?;
        }
        Ok(instance)
    }

    async fn fail_and_notify(&self, id: &str, message: String) {
        let failed = self
            .update_instance_state(id, |instance| {
                instance.status = InstanceStatus::Failed;
                instance.last_error = Some(message.clone());
            })
            .await;
        let Ok(instance) = failed else {
            warn!(%id, "could not mark instance failed; it may not have been created yet");
            return;
        };
        if let Some(url) = instance.webhook_url.clone() {
            let payload = WebhookPayload::new(id.to_string(), WebhookStatus::Failed, Utc::now()).with_error(message);
            let body = serde_json::to_value(payload).unwrap_or_default();
            if let Err(err) = self.queue.add_job(JobPayload::SendWebhook { url, payload: body }, JobPriority::Normal, None).await {
                warn!(%err, %id, "failed to enqueue failure webhook");
            }
        }
    }

    pub async fn create_instance(&self, req: CreateInstanceRequest) -> Result<CreateInstanceResult> {
        let now = Utc::now();
        let instance_id = new_legacy_id(now.timestamp_millis() as u64);
        self.create_instance_with_id(instance_id, req).await
    }

    /// Identical to [`Self::create_instance`] but for callers that already
    /// hold an assigned id (the `CREATE_INSTANCE` job handler, spec §4.7,
    /// whose payload carries `instanceId` rather than letting this service
    /// mint one).
    pub async fn create_instance_with_id(&self, instance_id: String, req: CreateInstanceRequest) -> Result<CreateInstanceResult> {
        validate_non_empty("name", &req.name).map_err(InstanceServiceError::Validation)?;
        validate_non_empty("productName", &req.product_name).map_err(InstanceServiceError::Validation)?;
        validate_non_empty("templateId", &req.template_id).map_err(InstanceServiceError::Validation)?;
        validate_gpu_num(req.gpu_num).map_err(InstanceServiceError::Validation)?;
        validate_rootfs_size(req.rootfs_size).map_err(InstanceServiceError::Validation)?;
        validate_webhook_url(req.webhook_url.as_deref()).map_err(InstanceServiceError::Validation)?;

        let region = req.region.clone().unwrap_or_else(|| self.config.default_region.clone());
        let product = self.products.get_optimal_product(&req.product_name, &region).await?;
        let template = self.templates.get_template(&req.template_id).await?;

        let image_auth = match &template.image_auth {
            Some(reference) => self
                .upstream
                .get_registry_auth(reference)
                .await?
                .map(|(username, password)| format!("{username}:{password}")),
            None => None,
        };

        let now = Utc::now();
        let instance = Instance {
            id: instance_id.clone(),
            novita_id: None,
            name: req.name.clone(),
            status: InstanceStatus::Creating,
            product_id: product.product.id.clone(),
            template_id: req.template_id.clone(),
            configuration: InstanceConfiguration {
                gpu_num: req.gpu_num,
                rootfs_size: req.rootfs_size,
                region: product.region_used.clone(),
                image_url: template.image_url.clone(),
                image_auth: image_auth.clone(),
                ports: template.ports.clone(),
                envs: template.envs.clone(),
            },
            timestamps: InstanceTimestamps { created: Some(now), ..Default::default() },
            health_check: None,
            webhook_url: req.webhook_url.clone(),
            last_error: None,
        };
        self.store.insert(instance).await;

        let create_result = self
            .upstream
            .create_instance(UpstreamCreateInstanceRequest {
                name: req.name.clone(),
                product_id: product.product.id.clone(),
                gpu_num: req.gpu_num,
                rootfs_size: req.rootfs_size,
                image_url: template.image_url.clone(),
                image_auth,
                ports: encode_ports(&template.ports),
                envs: serde_json::to_value(&template.envs).unwrap_or_default(),
                cluster_id: None,
            })
            .await;
        let novita_id = match create_result {
            Ok(id) => id,
            Err(err) => {
                self.fail_and_notify(&instance_id, err.to_string()).await;
                return Err(err.into());
            }
        };
        self.update_instance_state(&instance_id, |instance| instance.novita_id = Some(novita_id.clone())).await?;

        if let Err(err) = self.upstream.start_instance(&novita_id).await {
            self.fail_and_notify(&instance_id, err.to_string()).await;
            return Err(err.into());
        }
        let updated = self.update_instance_state(&instance_id, |instance| instance.status = InstanceStatus::Starting).await?;

        let max_wait_ms = self.config.startup_default_max_wait_ms;
        self.queue
            .add_job(
                JobPayload::MonitorInstance {
                    instance_id: instance_id.clone(),
                    novita_instance_id: novita_id.clone(),
                    webhook_url: req.webhook_url.clone(),
                    start_time: now,
                    max_wait_time_ms: max_wait_ms,
                    health_check_config: None,
                    target_port: None,
                },
                JobPriority::High,
                None,
            )
            .await?;

        info!(%instance_id, novita_id = %novita_id, "instance creation initiated");
        Ok(CreateInstanceResult {
            instance_id,
            novita_instance_id: novita_id,
            status: updated.status,
            estimated_ready_time: now + chrono::Duration::milliseconds(max_wait_ms as i64),
            message: "instance creation initiated".to_string(),
        })
    }

    pub async fn start_instance(
        &self,
        lookup: InstanceLookup,
        id_or_name: &str,
        health_check_config: Option<HealthCheckConfig>,
    ) -> Result<StartInstanceResult> {
        let instance = match lookup {
            InstanceLookup::Id => self.store.get(id_or_name).await,
            InstanceLookup::Name => self.store.get_by_name(id_or_name).await,
        }
        .ok_or_else(|| InstanceServiceError::NotFound(id_or_name.to_string()))?;

        if instance.status != InstanceStatus::Exited {
            return Err(InstanceServiceError::InvalidTransition(format!(
                "{} is {} (expected exited)",
                instance.id, instance.status
            )));
        }
        let Some(novita_id) = instance.novita_id.clone() else {
            return Err(InstanceServiceError::InvalidTransition(format!("{} has no upstream id", instance.id)));
        };

        let now = Utc::now();
        let operation = StartupOperation::new(instance.id.clone(), novita_id.clone(), now);
        let operation_id = operation.operation_id.clone();
        if !self.operations.start(operation.clone()).await {
            return Err(InstanceServiceError::OperationInProgress(instance.id.clone()));
        }

        if let Err(err) = self.upstream.start_instance_with_retry(&novita_id, self.config.start_max_attempts).await {
            let mut failed_op = operation;
            failed_op.status = StartupOperationStatus::Failed;
            failed_op.error = Some(err.to_string());
            self.operations.update(failed_op).await;
            self.operations.remove(&instance.id).await;
            return Err(err.into());
        }

        let updated = self.update_instance_state(&instance.id, |i| i.status = InstanceStatus::Starting).await?;

        let max_wait_ms = health_check_config
            .as_ref()
            .map(|c| c.max_wait_time_ms)
            .unwrap_or(self.config.startup_default_max_wait_ms);
        self.queue
            .add_job(
                JobPayload::MonitorStartup {
                    instance_id: instance.id.clone(),
                    novita_instance_id: novita_id.clone(),
                    operation_id: operation_id.clone(),
                    webhook_url: instance.webhook_url.clone(),
                    start_time: now,
                    max_wait_time_ms: max_wait_ms,
                    health_check_config,
                    target_port: None,
                },
                JobPriority::High,
                None,
            )
            .await?;

        if let Some(url) = instance.webhook_url.clone() {
            let payload = WebhookPayload::new(instance.id.clone(), WebhookStatus::StartupInitiated, now);
            let body = serde_json::to_value(payload).unwrap_or_default();
            if let Err(err) = self.queue.add_job(JobPayload::SendWebhook { url, payload: body }, JobPriority::Normal, None).await {
                warn!(%err, instance_id = %instance.id, "failed to enqueue startup_initiated webhook");
            }
        }

        Ok(StartInstanceResult {
            operation_id,
            status: updated.status,
            estimated_ready_time: now + chrono::Duration::milliseconds(max_wait_ms as i64),
        })
    }

    /// No upstream "stop instance" endpoint is listed among the external
    /// interfaces (spec §6): stopping is a local-only transition, left for
    /// upstream polling (via `getInstanceStatus`/`MONITOR_INSTANCE`) to
    /// eventually reconcile into `stopped`/`exited`.
    pub async fn stop_instance(&self, id: &str) -> Result<Instance> {
        let instance = self.store.get(id).await.ok_or_else(|| InstanceServiceError::NotFound(id.to_string()))?;
        if instance.status != InstanceStatus::Ready {
            return Err(InstanceServiceError::InvalidTransition(format!(
                "{id} is {} (expected ready)",
                instance.status
            )));
        }
        self.update_instance_state(id, |i| i.status = InstanceStatus::Stopping).await
    }

    pub async fn get_instance_status(&self, id: &str) -> Result<Instance> {
        if let Some(cached) = self.cache.get::<Instance>(id).await? {
            return Ok(cached);
        }
        let instance = self.store.get(id).await.ok_or_else(|| InstanceServiceError::NotFound(id.to_string()))?;
        let Some(novita_id) = instance.novita_id.clone() else {
            self.cache.set(id, instance.clone(), None).await?;
            return Ok(instance);
        };
        match self.upstream.get_instance(&novita_id).await {
            Ok(_normalized) => {
                self.cache.set(id, instance.clone(), None).await?;
                Ok(instance)
            }
            Err(UpstreamError::NotFound) => {
                self.handle_instance_not_found(id, &novita_id).await?;
                Err(InstanceServiceError::NotFound(id.to_string()))
            }
            Err(err) => {
                warn!(%err, %id, "transient upstream error, serving last-known instance state");
                Ok(instance)
            }
        }
    }

    pub async fn list_instances(&self, opts: ListInstancesOptions) -> Result<Vec<Instance>> {
        let mut instances = self.store.list().await;
        if let Some(status) = opts.status {
            instances.retain(|i| i.status == status);
        }
        instances.sort_by(|a, b| b.timestamps.created.cmp(&a.timestamps.created));
        if let Some(limit) = opts.limit {
            instances.truncate(limit);
        }
        Ok(instances)
    }

    /// Raw store lookup, bypassing the cache/upstream reconciliation that
    /// [`Self::get_instance_status`] performs. Used by job handlers (C7) that
    /// already hold an authoritative `novitaInstanceId` and need the current
    /// local record to build their next transition.
    pub async fn get_local(&self, id: &str) -> Result<Instance> {
        self.store.get(id).await.ok_or_else(|| InstanceServiceError::NotFound(id.to_string()))
    }

    /// Startup Operation accessors for `MONITOR_STARTUP` (spec §4.7), which
    /// tracks phase timestamps on the same operation `startInstance` created.
    pub async fn active_operation(&self, instance_id: &str) -> Option<StartupOperation> {
        self.operations.active_for(instance_id).await
    }

    pub async fn update_operation(&self, operation: StartupOperation) {
        self.operations.update(operation).await
    }

    pub async fn remove_operation(&self, instance_id: &str) -> Option<StartupOperation> {
        self.operations.remove(instance_id).await
    }

    /// Adopts an upstream-only instance as a local record (Startup Sync,
    /// spec §4.10): a best-effort, read-only entry so `list_instances` is
    /// complete after a restart. Not actively monitored unless a later
    /// operation targets it.
    pub async fn adopt_instance(&self, instance: Instance) {
        self.store.insert(instance).await;
    }

    pub async fn find_instance_by_name(&self, name: &str) -> Result<Instance> {
        self.store.get_by_name(name).await.ok_or_else(|| InstanceServiceError::NotFound(name.to_string()))
    }

    /// Invariant 6: a 404 for `novitaId` is authoritative. Removes the
    /// instance and any in-flight startup operation, and invalidates the
    /// cache.
    pub async fn handle_instance_not_found(&self, id: &str, upstream_id: &str) -> Result<()> {
        info!(%id, novita_id = %upstream_id, "upstream reports instance gone, removing local state");
        self.store.remove(id).await;
        self.cache.delete(id).await?;
        self.operations.remove(id).await;
        Ok(())
    }
}
