#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("job {0} not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
