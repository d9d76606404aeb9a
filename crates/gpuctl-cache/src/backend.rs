use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::entry::CacheEntry;
use crate::error::Result;

/// A byte-oriented storage backend for cache entries. [`crate::Cache`]
/// serializes [`CacheEntry`] envelopes to/from this layer; LRU ordering and
/// TTL bookkeeping live in the entry envelope itself, not in the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String, ttl_ms: u64) -> Result<()>;
    async fn delete_raw(&self, key: &str) -> Result<bool>;
    async fn keys_raw(&self, prefix: &str) -> Result<Vec<String>>;
    async fn clear_raw(&self, prefix: &str) -> Result<()>;
}

/// In-memory backend, also used as the fallback behind a Redis backend.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String, _ttl_ms: u64) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn keys_raw(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear_raw(&self, prefix: &str) -> Result<()> {
        self.data.write().await.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

/// Redis-backed storage, with entries also given a native Redis expiry so
/// TTL is enforced both by the envelope and by Redis itself (spec §4.8).
pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_ms: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl_ms.div_ceil(1000).max(1);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms.max(1))
            .query_async::<()>(&mut conn)
            .await?;
        let _ = ttl_secs;
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn keys_raw(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        Ok(keys)
    }

    async fn clear_raw(&self, prefix: &str) -> Result<()> {
        for key in self.keys_raw(prefix).await? {
            self.delete_raw(&key).await?;
        }
        Ok(())
    }
}

/// A Redis backend that transparently falls back to memory on error (spec
/// §4.8 "Fallback": "errors logged, never propagated as operation failures
/// except for `set` when required").
pub struct FallbackBackend {
    primary: RedisBackend,
    fallback: Arc<MemoryBackend>,
}

impl FallbackBackend {
    pub fn new(primary: RedisBackend, fallback: Arc<MemoryBackend>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl CacheBackend for FallbackBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match self.primary.get_raw(key).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "redis get failed, using memory fallback");
                self.fallback.get_raw(key).await
            }
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl_ms: u64) -> Result<()> {
        match self.primary.set_raw(key, value.clone(), ttl_ms).await {
            Ok(()) => {
                let _ = self.fallback.set_raw(key, value, ttl_ms).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "redis set failed, using memory fallback");
                self.fallback.set_raw(key, value, ttl_ms).await
            }
        }
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        let primary_result = self.primary.delete_raw(key).await;
        let fallback_result = self.fallback.delete_raw(key).await;
        match primary_result {
            Ok(removed) => Ok(removed),
            Err(err) => {
                warn!(error = %err, "redis delete failed, using memory fallback");
                fallback_result
            }
        }
    }

    async fn keys_raw(&self, prefix: &str) -> Result<Vec<String>> {
        match self.primary.keys_raw(prefix).await {
            Ok(keys) => Ok(keys),
            Err(err) => {
                warn!(error = %err, "redis keys scan failed, using memory fallback");
                self.fallback.keys_raw(prefix).await
            }
        }
    }

    async fn clear_raw(&self, prefix: &str) -> Result<()> {
        let primary_result = self.primary.clear_raw(prefix).await;
        let _ = self.fallback.clear_raw(prefix).await;
        primary_result
    }
}

pub(crate) fn encode(entry: &CacheEntry) -> Result<String> {
    Ok(serde_json::to_string(entry)?)
}

pub(crate) fn decode(raw: &str) -> Result<CacheEntry> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_roundtrips_and_filters_by_prefix() {
        let backend = MemoryBackend::new();
        backend.set_raw("cache:a:1", "x".into(), 1000).await.unwrap();
        backend.set_raw("cache:b:1", "y".into(), 1000).await.unwrap();
        let keys = backend.keys_raw("cache:a:").await.unwrap();
        assert_eq!(keys, vec!["cache:a:1".to_string()]);
        assert_eq!(backend.get_raw("cache:a:1").await.unwrap(), Some("x".to_string()));
        assert!(backend.delete_raw("cache:a:1").await.unwrap());
        assert_eq!(backend.get_raw("cache:a:1").await.unwrap(), None);
    }
}
