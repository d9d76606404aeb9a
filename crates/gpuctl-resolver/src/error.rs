use gpuctl_upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("No optimal product found for {0} in any available region")]
    NoOptimalProduct(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid template id: {0}")]
    InvalidTemplateId(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("cache error: {0}")]
    Cache(#[from] gpuctl_cache::CacheError),
}

pub type Result<T> = std::result::Result<T, ResolverError>;
