use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The envelope stored per key, mirroring `MetricStore`'s `MetricPoint` /
/// retention-window discipline, generalized to hold an arbitrary value
/// plus TTL and LRU bookkeeping (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, ttl_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            value,
            timestamp: now,
            ttl_ms,
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.timestamp).num_milliseconds() > self.ttl_ms as i64
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}
