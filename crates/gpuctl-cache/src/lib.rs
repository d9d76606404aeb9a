//! Unified LRU/TTL cache layer (C1, spec §4.8).
//!
//! Generalizes `MetricStore` (a retention-windowed time series
//! behind a lock) into a generic key-value cache with hit/miss/eviction
//! metrics, a Redis backend, and an in-memory fallback.

#![forbid(unsafe_code)]

mod backend;
mod cache;
mod entry;
mod error;
mod manager;
mod metrics;

pub use backend::{CacheBackend, FallbackBackend, MemoryBackend, RedisBackend};
pub use cache::{Cache, DEFAULT_TTL};
pub use error::{CacheError, Result};
pub use manager::{BackendKind, CacheManager};
pub use metrics::{CacheMetrics, CacheStats};
