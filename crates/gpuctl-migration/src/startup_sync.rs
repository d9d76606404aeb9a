use std::sync::Arc;

use chrono::Utc;
use gpuctl_instance::{InstanceService, ListInstancesOptions};
use gpuctl_proto::{Instance, InstanceConfiguration, InstanceStatus, InstanceTimestamps};
use gpuctl_upstream::{NormalizedInstance, SharedUpstreamClient};
use tracing::{info, warn};

/// Startup Sync (C10, spec §4.10). Runs once at boot, after the job queue's
/// own recovery pass, and is also exposed as the `gpuctl sync` maintenance
/// subcommand for operator-triggered reconciliation.
pub struct StartupSync {
    instance_service: Arc<InstanceService>,
    upstream: SharedUpstreamClient,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub adopted: usize,
    pub removed: usize,
}

fn map_upstream_status(status: &str) -> InstanceStatus {
    match status {
        "running" => InstanceStatus::Running,
        "starting" | "created" => InstanceStatus::Starting,
        "exited" => InstanceStatus::Exited,
        "failed" => InstanceStatus::Failed,
        _ => InstanceStatus::Creating,
    }
}

impl StartupSync {
    pub fn new(instance_service: Arc<InstanceService>, upstream: SharedUpstreamClient) -> Self {
        Self { instance_service, upstream }
    }

    pub async fn run(&self) -> Result<SyncReport, String> {
        let upstream_instances = self.upstream.list_instances(1, 1000).await.map_err(|err| err.to_string())?;
        let local_instances = self
            .instance_service
            .list_instances(ListInstancesOptions::default())
            .await
            .map_err(|err| err.to_string())?;

        let mut report = SyncReport::default();
        report.adopted = self.adopt_unknown(&upstream_instances, &local_instances).await;
        report.removed = self.remove_vanished(&upstream_instances, &local_instances).await;
        info!(adopted = report.adopted, removed = report.removed, "startup sync complete");
        Ok(report)
    }

    async fn adopt_unknown(&self, upstream_instances: &[NormalizedInstance], local_instances: &[Instance]) -> usize {
        let known: std::collections::HashSet<&str> =
            local_instances.iter().filter_map(|i| i.novita_id.as_deref()).collect();

        let mut adopted = 0;
        for upstream in upstream_instances {
            if known.contains(upstream.novita_id.as_str()) {
                continue;
            }
            let instance = Instance {
                id: format!("adopted_{}", upstream.novita_id),
                novita_id: Some(upstream.novita_id.clone()),
                name: format!("adopted-{}", upstream.novita_id),
                status: map_upstream_status(&upstream.status),
                product_id: String::new(),
                template_id: String::new(),
                configuration: InstanceConfiguration {
                    gpu_num: upstream.gpu_num as u8,
                    rootfs_size: 0,
                    region: upstream.region.clone(),
                    image_url: String::new(),
                    image_auth: None,
                    ports: upstream.port_mappings.clone(),
                    envs: vec![],
                },
                timestamps: InstanceTimestamps { created: Some(upstream.created_at), ..Default::default() },
                health_check: None,
                webhook_url: None,
                last_error: None,
            };
            self.instance_service.adopt_instance(instance).await;
            adopted += 1;
        }
        adopted
    }

    async fn remove_vanished(&self, upstream_instances: &[NormalizedInstance], local_instances: &[Instance]) -> usize {
        let present: std::collections::HashSet<&str> = upstream_instances.iter().map(|u| u.novita_id.as_str()).collect();

        let mut removed = 0;
        for instance in local_instances {
            let Some(novita_id) = &instance.novita_id else { continue };
            if present.contains(novita_id.as_str()) {
                continue;
            }
            if let Err(err) = self.instance_service.handle_instance_not_found(&instance.id, novita_id).await {
                warn!(%err, id = %instance.id, "failed to remove vanished instance during startup sync");
                continue;
            }
            removed += 1;
        }
        removed
    }
}
