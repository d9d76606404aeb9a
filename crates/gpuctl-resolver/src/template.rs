use std::sync::Arc;
use std::time::Duration;

use gpuctl_cache::Cache;
use gpuctl_proto::product::normalize_template_id;
use gpuctl_proto::validation::validate_port;
use gpuctl_proto::TemplateConfiguration;
use gpuctl_upstream::SharedUpstreamClient;
use tracing::debug;

use crate::error::{ResolverError, Result};

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Template Resolver (C4, spec §4.4).
pub struct TemplateResolver {
    upstream: SharedUpstreamClient,
    cache: Arc<Cache>,
}

impl TemplateResolver {
    pub fn new(upstream: SharedUpstreamClient, cache: Arc<Cache>) -> Self {
        Self { upstream, cache }
    }

    pub async fn get_template(&self, id: &str) -> Result<TemplateConfiguration> {
        self.get_template_configuration(id).await
    }

    pub async fn get_template_configuration(&self, id: &str) -> Result<TemplateConfiguration> {
        let normalized = normalize_template_id(id).ok_or_else(|| ResolverError::InvalidTemplateId(id.to_string()))?;

        if let Some(cached) = self.cache.get::<TemplateConfiguration>(&normalized).await? {
            debug!(template_id = %normalized, "template resolver cache hit");
            return Ok(cached);
        }

        let config = self.upstream.get_template(&normalized).await?;
        validate_template_configuration(&config)?;
        self.cache.set(&normalized, config.clone(), Some(CACHE_TTL)).await?;
        Ok(config)
    }
}

/// Validates `imageUrl` non-empty; each port in `[1, 65535]`; each env has a
/// non-empty key and a string value (spec §4.4).
fn validate_template_configuration(config: &TemplateConfiguration) -> Result<()> {
    if config.image_url.trim().is_empty() {
        return Err(ResolverError::InvalidTemplate("imageUrl must be non-empty".to_string()));
    }
    for port in &config.ports {
        validate_port(port.port as u32).map_err(ResolverError::InvalidTemplate)?;
    }
    for env in &config.envs {
        if env.key.trim().is_empty() {
            return Err(ResolverError::InvalidTemplate("env key must be non-empty".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpuctl_proto::{EnvVar, PortKind, PortMapping, Product};
    use gpuctl_upstream::{CreateInstanceRequest, MigrationOutcome, NormalizedInstance, UpstreamClient};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockUpstream {
        config: TemplateConfiguration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl UpstreamClient for MockUpstream {
        async fn get_products(&self, _: &str, _: &str) -> gpuctl_upstream::Result<Vec<Product>> {
            unimplemented!()
        }
        async fn get_template(&self, _id: &str) -> gpuctl_upstream::Result<TemplateConfiguration> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.config.clone())
        }
        async fn get_registry_auth(&self, _: &str) -> gpuctl_upstream::Result<Option<(String, String)>> {
            unimplemented!()
        }
        async fn create_instance(&self, _: CreateInstanceRequest) -> gpuctl_upstream::Result<String> {
            unimplemented!()
        }
        async fn start_instance(&self, _: &str) -> gpuctl_upstream::Result<()> {
            unimplemented!()
        }
        async fn get_instance(&self, _: &str) -> gpuctl_upstream::Result<NormalizedInstance> {
            unimplemented!()
        }
        async fn list_instances(&self, _: u32, _: u32) -> gpuctl_upstream::Result<Vec<NormalizedInstance>> {
            unimplemented!()
        }
        async fn migrate_instance(&self, _: &str) -> gpuctl_upstream::Result<MigrationOutcome> {
            unimplemented!()
        }
        async fn instance_exists(&self, _: &str) -> gpuctl_upstream::Result<bool> {
            unimplemented!()
        }
        async fn health_check(&self) -> gpuctl_upstream::Result<()> {
            unimplemented!()
        }
    }

    fn valid_config() -> TemplateConfiguration {
        TemplateConfiguration {
            image_url: "registry/example:latest".into(),
            image_auth: None,
            ports: vec![PortMapping { port: 8080, endpoint: "http://localhost:8080".into(), kind: PortKind::Http }],
            envs: vec![EnvVar { key: "FOO".into(), value: "bar".into() }],
        }
    }

    #[tokio::test]
    async fn repeated_get_template_hits_upstream_exactly_once() {
        let upstream = Arc::new(MockUpstream { config: valid_config(), calls: AtomicU32::new(0) });
        let cache = Arc::new(Cache::new("templates", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = TemplateResolver::new(upstream.clone(), cache);

        let a = resolver.get_template("107672").await.unwrap();
        let b = resolver.get_template("107672").await.unwrap();
        assert_eq!(a.image_url, b.image_url);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_empty_and_non_positive_ids() {
        let upstream = Arc::new(MockUpstream { config: valid_config(), calls: AtomicU32::new(0) });
        let cache = Arc::new(Cache::new("templates", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = TemplateResolver::new(upstream, cache);

        assert!(matches!(resolver.get_template("").await, Err(ResolverError::InvalidTemplateId(_))));
        assert!(matches!(resolver.get_template("0").await, Err(ResolverError::InvalidTemplateId(_))));
        assert!(matches!(resolver.get_template("abc").await, Err(ResolverError::InvalidTemplateId(_))));
    }

    #[tokio::test]
    async fn rejects_invalid_port_range() {
        let mut config = valid_config();
        config.ports.push(PortMapping { port: 0, endpoint: String::new(), kind: PortKind::Tcp });
        let upstream = Arc::new(MockUpstream { config, calls: AtomicU32::new(0) });
        let cache = Arc::new(Cache::new("templates", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = TemplateResolver::new(upstream, cache);
        assert!(matches!(resolver.get_template("1").await, Err(ResolverError::InvalidTemplate(_))));
    }
}
