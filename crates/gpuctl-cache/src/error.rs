use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache {0} not found")]
    UnknownCache(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
