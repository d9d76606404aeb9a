use gpuctl_cache::CacheError;
use gpuctl_proto::ControlPlaneError;
use gpuctl_queue::QueueError;
use gpuctl_resolver::ResolverError;
use gpuctl_upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("illegal instance state transition: {0}")]
    InvalidTransition(String),

    #[error("startup operation already in progress for instance {0}")]
    OperationInProgress(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<InstanceServiceError> for ControlPlaneError {
    fn from(err: InstanceServiceError) -> Self {
        match err {
            InstanceServiceError::Validation(msg) => ControlPlaneError::Validation(msg),
            InstanceServiceError::NotFound(msg) => ControlPlaneError::NotFound(msg),
            InstanceServiceError::InvalidTransition(msg) => ControlPlaneError::InstanceNotStartable(msg),
            InstanceServiceError::OperationInProgress(id) => ControlPlaneError::StartupOperationInProgress(id),
            InstanceServiceError::Upstream(err) => err.into(),
            InstanceServiceError::Resolver(ResolverError::Upstream(err)) => err.into(),
            InstanceServiceError::Resolver(err) => ControlPlaneError::Internal(err.to_string()),
            InstanceServiceError::Cache(err) => ControlPlaneError::Internal(err.to_string()),
            InstanceServiceError::Queue(err) => ControlPlaneError::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstanceServiceError>;
