use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use crate::backend::{CacheBackend, FallbackBackend, MemoryBackend, RedisBackend};
use crate::cache::{Cache, DEFAULT_TTL};
use crate::error::{CacheError, Result};
use crate::metrics::{CacheMetrics, CacheStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Redis,
    Fallback,
}

/// Owns named caches (spec §4.8 "Cache Manager").
pub struct CacheManager {
    redis_url: Option<String>,
    default_max_size: usize,
    caches: RwLock<HashMap<String, Arc<Cache>>>,
}

impl CacheManager {
    pub fn new(redis_url: Option<String>, default_max_size: usize) -> Self {
        Self {
            redis_url,
            default_max_size,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the named cache, creating it with the requested backend on
    /// first use. `backend = Fallback` requires `redis_url` to be set; it
    /// falls back to `Memory` transparently if Redis is unreachable.
    pub async fn get_cache(&self, name: &str, backend: BackendKind) -> Result<Arc<Cache>> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Ok(cache.clone());
        }
        let mut caches = self.caches.write().await;
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }

        let backend_impl: Arc<dyn CacheBackend> = match backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Redis => {
                let url = self.redis_url.as_deref().ok_or_else(|| CacheError::UnknownCache(name.to_string()))?;
                Arc::new(RedisBackend::connect(url).await?)
            }
            BackendKind::Fallback => {
                let url = self.redis_url.as_deref().ok_or_else(|| CacheError::UnknownCache(name.to_string()))?;
                let redis = RedisBackend::connect(url).await?;
                Arc::new(FallbackBackend::new(redis, Arc::new(MemoryBackend::new())))
            }
        };

        let cache = Arc::new(Cache::new(name, backend_impl, self.default_max_size, DEFAULT_TTL));
        caches.insert(name.to_string(), cache.clone());
        info!(cache = %name, ?backend, "initialized cache");
        Ok(cache)
    }

    pub async fn get_all_stats(&self) -> HashMap<String, CacheStats> {
        let caches = self.caches.read().await;
        let mut stats = HashMap::new();
        for (name, cache) in caches.iter() {
            stats.insert(name.clone(), cache.get_stats().await);
        }
        stats
    }

    pub async fn get_all_metrics(&self) -> HashMap<String, CacheMetrics> {
        let caches = self.caches.read().await;
        let mut metrics = HashMap::new();
        for (name, cache) in caches.iter() {
            metrics.insert(name.clone(), cache.get_metrics().await);
        }
        metrics
    }

    pub async fn clear_all(&self) -> Result<()> {
        for cache in self.caches.read().await.values() {
            cache.clear().await?;
        }
        Ok(())
    }

    pub async fn cleanup_all_expired(&self) -> Result<usize> {
        let mut total = 0usize;
        for cache in self.caches.read().await.values() {
            total += cache.cleanup_expired().await?;
        }
        Ok(total)
    }

    pub async fn destroy_all(&self) -> Result<()> {
        for cache in self.caches.read().await.values() {
            cache.destroy().await?;
        }
        self.caches.write().await.clear();
        Ok(())
    }
}

impl std::fmt::Debug for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}
