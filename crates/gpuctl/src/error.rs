//! Boot-time error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("configuration error: {0}")]
    Config(#[from] gpuctl_config::ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] gpuctl_cache::CacheError),

    #[error("queue error: {0}")]
    Queue(#[from] gpuctl_queue::QueueError),

    #[error("upstream error: {0}")]
    Upstream(#[from] gpuctl_upstream::UpstreamError),

    #[error("startup sync error: {0}")]
    Sync(String),
}

pub type Result<T> = std::result::Result<T, BootError>;
