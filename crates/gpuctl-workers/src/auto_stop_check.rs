use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gpuctl_instance::{InstanceService, ListInstancesOptions};
use gpuctl_proto::{InstanceStatus, Job, JobPayload};
use gpuctl_queue::JobHandler;
use tracing::{info, warn};

/// `AUTO_STOP_CHECK` (spec §4.7): scans idle instances and stops them.
///
/// The spec's wording ("instances with status=running") predates this
/// status graph: `running` is the brief window between upstream boot and
/// the first health-check tick, not a resting state an idle timer would
/// ever catch one parked in, and the only legal edge into `stopping` is
/// from `ready` (see `InstanceStatus::can_transition_to`). This scans
/// `ready` instances instead, reading "running" as informal shorthand for
/// "actively serving."
pub struct AutoStopCheckHandler {
    instance_service: Arc<InstanceService>,
}

impl AutoStopCheckHandler {
    pub fn new(instance_service: Arc<InstanceService>) -> Self {
        Self { instance_service }
    }
}

#[async_trait]
impl JobHandler for AutoStopCheckHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let JobPayload::AutoStopCheck { idle_threshold_ms } = &job.payload else {
            return Err("AUTO_STOP_CHECK handler received a mismatched payload".to_string());
        };

        let candidates = self
            .instance_service
            .list_instances(ListInstancesOptions { status: Some(InstanceStatus::Ready), limit: None })
            .await
            .map_err(|err| err.to_string())?;

        let now = Utc::now();
        let mut stopped = 0usize;
        for instance in candidates {
            let reference = instance
                .timestamps
                .last_used
                .or(instance.timestamps.started)
                .or(instance.timestamps.created);
            let Some(reference) = reference else { continue };
            let idle_ms = (now - reference).num_milliseconds().max(0) as u64;
            if idle_ms < *idle_threshold_ms {
                continue;
            }
            match self.instance_service.stop_instance(&instance.id).await {
                Ok(_) => {
                    info!(id = %instance.id, idle_ms, "stopped idle instance");
                    stopped += 1;
                }
                Err(err) => warn!(id = %instance.id, %err, "failed to stop idle instance"),
            }
        }
        info!(stopped, "auto stop check complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuctl_cache::{Cache, MemoryBackend};
    use gpuctl_instance::InstanceServiceConfig;
    use gpuctl_proto::{Availability, EnvVar, JobPriority, PortKind, PortMapping, Product, TemplateConfiguration};
    use gpuctl_queue::{JobQueue, MemoryQueueStore, QueueConfig};
    use gpuctl_resolver::{ProductResolver, TemplateResolver};
    use gpuctl_upstream::{MigrationOutcome, NormalizedInstance, SharedUpstreamClient, UpstreamClient};
    use std::time::Duration as StdDuration;

    struct StubUpstream;

    #[async_trait]
    impl UpstreamClient for StubUpstream {
        async fn get_products(&self, _name: &str, _region: &str) -> gpuctl_upstream::Result<Vec<Product>> {
            Ok(vec![Product {
                id: "prod_1".into(),
                name: "RTX 4090 24GB".into(),
                region: "CN-HK-01".into(),
                spot_price: 0.4,
                on_demand_price: 0.8,
                gpu_type: "RTX4090".into(),
                gpu_memory: 24,
                availability: Availability::Available,
            }])
        }
        async fn get_template(&self, _id: &str) -> gpuctl_upstream::Result<TemplateConfiguration> {
            Ok(TemplateConfiguration {
                image_url: "registry/example:latest".into(),
                image_auth: None,
                ports: vec![PortMapping { port: 8080, endpoint: "http://localhost:8080".into(), kind: PortKind::Http }],
                envs: vec![EnvVar { key: "FOO".into(), value: "bar".into() }],
            })
        }
        async fn get_registry_auth(&self, _id: &str) -> gpuctl_upstream::Result<Option<(String, String)>> {
            Ok(None)
        }
        async fn create_instance(&self, _req: gpuctl_upstream::CreateInstanceRequest) -> gpuctl_upstream::Result<String> {
            Ok("novita_1".to_string())
        }
        async fn start_instance(&self, _novita_id: &str) -> gpuctl_upstream::Result<()> {
            Ok(())
        }
        async fn get_instance(&self, novita_id: &str) -> gpuctl_upstream::Result<NormalizedInstance> {
            Ok(NormalizedInstance {
                novita_id: novita_id.to_string(),
                status: "running".into(),
                region: "CN-HK-01".into(),
                gpu_num: 1,
                created_at: Utc::now(),
                port_mappings: vec![],
                spot_status: None,
                spot_reclaim_time: None,
            })
        }
        async fn list_instances(&self, _page: u32, _page_size: u32) -> gpuctl_upstream::Result<Vec<NormalizedInstance>> {
            Ok(vec![])
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

    fn cache(name: &str) -> Arc<Cache> {
        Arc::new(Cache::new(name, Arc::new(MemoryBackend::new()), 100, StdDuration::from_secs(60)))
    }

    async fn seeded_ready_instance(service: &InstanceService, last_used_ms_ago: i64) -> String {
        let created = service
            .create_instance(gpuctl_proto::CreateInstanceRequest {
                name: "worker-a".into(),
                product_name: "RTX 4090 24GB".into(),
                template_id: "107672".into(),
                gpu_num: 1,
                rootfs_size: 20,
                region: None,
                webhook_url: None,
            })
            .await
            .unwrap();
        service
            .update_instance_state(&created.instance_id, |i| {
                i.status = InstanceStatus::Ready;
                i.timestamps.last_used = Some(Utc::now() - chrono::Duration::milliseconds(last_used_ms_ago));
            })
            .await
            .unwrap();
        created.instance_id
    }

    fn harness() -> (Arc<InstanceService>, Arc<JobQueue>) {
        let upstream: SharedUpstreamClient = Arc::new(StubUpstream);
        let products = Arc::new(ProductResolver::new(upstream.clone(), cache("products")));
        let templates = Arc::new(TemplateResolver::new(upstream.clone(), cache("templates")));
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryQueueStore::new()), QueueConfig::default()));
        let service = Arc::new(InstanceService::new(
            upstream,
            products,
            templates,
            cache("instances"),
            queue.clone(),
            InstanceServiceConfig::default(),
        ));
        (service, queue)
    }

    #[tokio::test]
    async fn stops_instances_idle_past_the_threshold() {
        let (service, _queue) = harness();
        let idle_id = seeded_ready_instance(&service, 120_000).await;
        let fresh_id = seeded_ready_instance(&service, 1_000).await;

        let handler = AutoStopCheckHandler::new(service.clone());
        let job = Job::new(JobPayload::AutoStopCheck { idle_threshold_ms: 60_000 }, JobPriority::Normal, None, Utc::now());
        handler.handle(&job).await.unwrap();

        let idle_instance = service.get_local(&idle_id).await.unwrap();
        assert_eq!(idle_instance.status, InstanceStatus::Stopping);

        let fresh_instance = service.get_local(&fresh_id).await.unwrap();
        assert_eq!(fresh_instance.status, InstanceStatus::Ready);
    }
}
