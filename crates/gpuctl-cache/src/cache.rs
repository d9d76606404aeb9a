use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{decode, encode, CacheBackend};
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::metrics::{CacheMetrics, CacheStats};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A single named cache (spec §4.8). Generic get/set accept any
/// `Serialize`/`DeserializeOwned` value; the backend only ever sees the
/// serialized [`CacheEntry`] envelope.
pub struct Cache {
    name: String,
    max_size: usize,
    default_ttl_ms: u64,
    backend: Arc<dyn CacheBackend>,
    /// Last-accessed index used for LRU eviction decisions without needing
    /// to deserialize every entry in the namespace (spec §4.8: "LRU eviction
    /// requires iterating keys in the namespace — bounded by maxSize").
    access_index: RwLock<HashMap<String, chrono::DateTime<Utc>>>,
    metrics: RwLock<CacheMetrics>,
}

impl Cache {
    pub fn new(name: impl Into<String>, backend: Arc<dyn CacheBackend>, max_size: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_size,
            default_ttl_ms: default_ttl.as_millis() as u64,
            backend,
            access_index: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
        }
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("cache:{}:{}", self.name, key)
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let full_key = self.namespaced_key(key);
        let Some(raw) = self.backend.get_raw(&full_key).await? else {
            self.metrics.write().await.misses += 1;
            return Ok(None);
        };
        let mut entry = decode(&raw)?;
        let now = Utc::now();
        if entry.is_expired(now) {
            self.backend.delete_raw(&full_key).await?;
            self.access_index.write().await.remove(key);
            self.metrics.write().await.misses += 1;
            return Ok(None);
        }
        entry.touch(now);
        self.access_index.write().await.insert(key.to_string(), now);
        self.backend.set_raw(&full_key, encode(&entry)?, entry.ttl_ms).await?;
        self.metrics.write().await.hits += 1;
        Ok(Some(serde_json::from_value(entry.value)?))
    }

    pub async fn set<V: Serialize>(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()> {
        let ttl_ms = ttl.map(|t| t.as_millis() as u64).unwrap_or(self.default_ttl_ms);
        let is_new_key = !self.access_index.read().await.contains_key(key);
        if is_new_key && self.access_index.read().await.len() >= self.max_size {
            self.evict_lru().await?;
        }
        let entry = CacheEntry::new(serde_json::to_value(value)?, ttl_ms);
        let full_key = self.namespaced_key(key);
        self.backend.set_raw(&full_key, encode(&entry)?, ttl_ms).await?;
        self.access_index.write().await.insert(key.to_string(), entry.last_accessed);
        self.metrics.write().await.sets += 1;
        Ok(())
    }

    /// Evicts the entry with the oldest `last_accessed` timestamp. Updating
    /// an existing key never triggers eviction (spec §4.8 LRU rule).
    async fn evict_lru(&self) -> Result<()> {
        let oldest_key = {
            let index = self.access_index.read().await;
            index.iter().min_by_key(|(_, ts)| **ts).map(|(k, _)| k.clone())
        };
        if let Some(key) = oldest_key {
            debug!(cache = %self.name, %key, "evicting least-recently-used entry");
            self.backend.delete_raw(&self.namespaced_key(&key)).await?;
            self.access_index.write().await.remove(&key);
            self.metrics.write().await.evictions += 1;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.backend.delete_raw(&self.namespaced_key(key)).await?;
        self.access_index.write().await.remove(key);
        if removed {
            self.metrics.write().await.deletes += 1;
        }
        Ok(removed)
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get::<serde_json::Value>(key).await?.is_some())
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear_raw(&format!("cache:{}:", self.name)).await?;
        self.access_index.write().await.clear();
        Ok(())
    }

    pub async fn size(&self) -> usize {
        self.access_index.read().await.len()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.access_index.read().await.keys().cloned().collect()
    }

    pub async fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let Some(raw) = self.backend.get_raw(&self.namespaced_key(key)).await? else {
            return Ok(None);
        };
        let entry = decode(&raw)?;
        Ok(Some(Duration::from_millis(entry.ttl_ms)))
    }

    pub async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool> {
        let full_key = self.namespaced_key(key);
        let Some(raw) = self.backend.get_raw(&full_key).await? else {
            return Ok(false);
        };
        let mut entry = decode(&raw)?;
        entry.ttl_ms = ttl.as_millis() as u64;
        self.backend.set_raw(&full_key, encode(&entry)?, entry.ttl_ms).await?;
        Ok(true)
    }

    /// Removes all expired entries in this cache's namespace.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let keys: Vec<String> = self.access_index.read().await.keys().cloned().collect();
        let mut removed = 0usize;
        let now = Utc::now();
        for key in keys {
            let full_key = self.namespaced_key(&key);
            if let Some(raw) = self.backend.get_raw(&full_key).await? {
                if decode(&raw)?.is_expired(now) {
                    self.backend.delete_raw(&full_key).await?;
                    self.access_index.write().await.remove(&key);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub async fn get_stats(&self) -> CacheStats {
        CacheStats {
            size: self.size().await,
            max_size: self.max_size,
        }
    }

    pub async fn get_metrics(&self) -> CacheMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn get_hit_ratio(&self) -> f64 {
        self.metrics.read().await.hit_ratio()
    }

    pub async fn reset_metrics(&self) {
        *self.metrics.write().await = CacheMetrics::default();
    }

    /// Tears down this cache's state. There is no background timer to stop
    /// here (periodic cleanup is driven externally by the Cache Manager);
    /// see spec §4.8 "destroy()".
    pub async fn destroy(&self) -> Result<()> {
        self.clear().await
    }
}
