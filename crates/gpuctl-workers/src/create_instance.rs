use std::sync::Arc;

use async_trait::async_trait;
use gpuctl_instance::InstanceService;
use gpuctl_proto::{CreateInstanceRequest, Job, JobPayload};
use gpuctl_queue::JobHandler;

/// `CREATE_INSTANCE` (spec §4.7). A queued alternative to
/// [`InstanceService::create_instance`]'s synchronous path (spec §4.1,
/// §2 overview): same steps, driven by a job with a pre-assigned
/// `instanceId` instead of one minted on the caller's behalf. Success and
/// failure handling (storing `novitaId`, enqueuing `MONITOR_INSTANCE`,
/// marking `failed` and sending a webhook on any step failure) all live in
/// [`InstanceService::create_instance_with_id`]; this handler only adapts
/// the job payload into a request and reports pass/fail to the queue.
pub struct CreateInstanceHandler {
    instance_service: Arc<InstanceService>,
}

impl CreateInstanceHandler {
    pub fn new(instance_service: Arc<InstanceService>) -> Self {
        Self { instance_service }
    }
}

#[async_trait]
impl JobHandler for CreateInstanceHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let JobPayload::CreateInstance {
            instance_id,
            name,
            product_name,
            template_id,
            gpu_num,
            rootfs_size,
            region,
            webhook_url,
        } = &job.payload
        else {
            return Err("CREATE_INSTANCE handler received a mismatched payload".to_string());
        };

        let request = CreateInstanceRequest {
            name: name.clone(),
            product_name: product_name.clone(),
            template_id: template_id.clone(),
            gpu_num: *gpu_num,
            rootfs_size: *rootfs_size,
            region: Some(region.clone()),
            webhook_url: webhook_url.clone(),
        };

        self.instance_service
            .create_instance_with_id(instance_id.clone(), request)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gpuctl_cache::{Cache, MemoryBackend};
    use gpuctl_instance::InstanceServiceConfig;
    use gpuctl_proto::{Availability, EnvVar, InstanceStatus, PortKind, PortMapping, Product, TemplateConfiguration};
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
                status: "starting".into(),
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

    #[tokio::test]
    async fn create_instance_job_mints_the_payloads_instance_id() {
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

        let payload = JobPayload::CreateInstance {
            instance_id: "inst_fixed_1".to_string(),
            name: "worker-a".to_string(),
            product_name: "RTX 4090 24GB".to_string(),
            template_id: "107672".to_string(),
            gpu_num: 1,
            rootfs_size: 20,
            region: "CN-HK-01".to_string(),
            webhook_url: None,
        };
        let job = Job::new(payload, gpuctl_proto::JobPriority::Normal, None, Utc::now());

        let handler = CreateInstanceHandler::new(service.clone());
        handler.handle(&job).await.unwrap();

        let instance = service.get_local("inst_fixed_1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Starting);
        assert_eq!(instance.novita_id.as_deref(), Some("novita_1"));
    }
}
