use std::sync::Arc;
use std::time::Duration;

use gpuctl_cache::Cache;
use gpuctl_proto::{product::region_search_order, product::select_optimal, Availability, OptimalProductResult};
use gpuctl_upstream::SharedUpstreamClient;
use tracing::{debug, info};

use crate::error::{ResolverError, Result};

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Product Resolver (C3, spec §4.3).
pub struct ProductResolver {
    upstream: SharedUpstreamClient,
    cache: Arc<Cache>,
}

impl ProductResolver {
    pub fn new(upstream: SharedUpstreamClient, cache: Arc<Cache>) -> Self {
        Self { upstream, cache }
    }

    pub async fn get_optimal_product(&self, name: &str, region: &str) -> Result<OptimalProductResult> {
        self.get_optimal_product_with_fallback(name, Some(region), None).await
    }

    /// Tries `preferred_region` first, then the remaining regions in
    /// priority order (or a caller-supplied `regions` override). Returns on
    /// the first region with an available product.
    pub async fn get_optimal_product_with_fallback(
        &self,
        name: &str,
        preferred_region: Option<&str>,
        regions: Option<&[String]>,
    ) -> Result<OptimalProductResult> {
        let search_order = match regions {
            Some(list) => list.to_vec(),
            None => region_search_order(preferred_region),
        };

        for region in &search_order {
            let cache_key = format!("optimal:{name}:{region}");
            if let Some(cached) = self.cache.get::<OptimalProductResult>(&cache_key).await? {
                debug!(%name, %region, "product resolver cache hit");
                return Ok(cached);
            }

            let products = self.upstream.get_products(name, region).await?;
            let available: Vec<_> = products
                .into_iter()
                .filter(|p| p.availability == Availability::Available)
                .collect();
            if available.is_empty() {
                debug!(%name, %region, "no available products, trying next region");
                continue;
            }

            let Some(best) = select_optimal(&available) else {
                continue;
            };
            let result = OptimalProductResult {
                product: best.clone(),
                region_used: region.clone(),
            };
            self.cache.set(&cache_key, result.clone(), Some(CACHE_TTL)).await?;
            info!(%name, region_used = %region, product_id = %result.product.id, "resolved optimal product");
            return Ok(result);
        }

        Err(ResolverError::NoOptimalProduct(name.to_string()))
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpuctl_proto::{Product, TemplateConfiguration};
    use gpuctl_upstream::{CreateInstanceRequest, MigrationOutcome, NormalizedInstance, UpstreamClient};
    use std::sync::Mutex;

    struct MockUpstream {
        products_by_region: Mutex<std::collections::HashMap<String, Vec<Product>>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl UpstreamClient for MockUpstream {
        async fn get_products(&self, _name: &str, region: &str) -> gpuctl_upstream::Result<Vec<Product>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.products_by_region.lock().unwrap().get(region).cloned().unwrap_or_default())
        }
        async fn get_template(&self, _: &str) -> gpuctl_upstream::Result<TemplateConfiguration> {
            unimplemented!()
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

    fn product(id: &str, region: &str, spot: f64, available: bool) -> Product {
        Product {
            id: id.into(),
            name: "RTX 4090 24GB".into(),
            region: region.into(),
            spot_price: spot,
            on_demand_price: spot * 2.0,
            gpu_type: "RTX4090".into(),
            gpu_memory: 24,
            availability: if available { Availability::Available } else { Availability::Unavailable },
        }
    }

    #[tokio::test]
    async fn region_fallback_matches_spec_scenario_5() {
        let mut by_region = std::collections::HashMap::new();
        by_region.insert("AS-SGP-02".to_string(), vec![]);
        by_region.insert("CN-HK-01".to_string(), vec![]);
        by_region.insert("AS-IN-01".to_string(), vec![product("prod_in", "AS-IN-01", 0.5, true)]);
        let upstream: SharedUpstreamClient = Arc::new(MockUpstream {
            products_by_region: Mutex::new(by_region),
            calls: Mutex::new(0),
        });
        let cache = Arc::new(Cache::new("products", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = ProductResolver::new(upstream.clone(), cache);

        let result = resolver.get_optimal_product_with_fallback("RTX 4090 24GB", None, None).await.unwrap();
        assert_eq!(result.product.id, "prod_in");
        assert_eq!(result.region_used, "AS-IN-01");
        assert_eq!(*upstream.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn repeated_lookup_hits_cache_after_first_resolution() {
        let mut by_region = std::collections::HashMap::new();
        by_region.insert("AS-SGP-02".to_string(), vec![product("prod_a", "AS-SGP-02", 0.4, true)]);
        let upstream = Arc::new(MockUpstream { products_by_region: Mutex::new(by_region), calls: Mutex::new(0) });
        let cache = Arc::new(Cache::new("products", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = ProductResolver::new(upstream.clone(), cache);

        resolver.get_optimal_product("x", "AS-SGP-02").await.unwrap();
        resolver.get_optimal_product("x", "AS-SGP-02").await.unwrap();
        assert_eq!(*upstream.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausting_all_regions_fails_with_named_error() {
        let upstream = Arc::new(MockUpstream { products_by_region: Mutex::new(Default::default()), calls: Mutex::new(0) });
        let cache = Arc::new(Cache::new("products", Arc::new(gpuctl_cache::MemoryBackend::new()), 100, CACHE_TTL));
        let resolver = ProductResolver::new(upstream, cache);
        let err = resolver.get_optimal_product_with_fallback("ghost", None, None).await.unwrap_err();
        assert!(matches!(err, ResolverError::NoOptimalProduct(_)));
    }
}
