//! The error taxonomy shared across the control plane (spec §7).
//!
//! Crate-local errors (e.g. `gpuctl_upstream::UpstreamError`) convert into
//! [`ControlPlaneError`] only at the boundary where a caller needs the
//! unified, HTTP-mappable shape — they are not threaded through every crate.

use thiserror::Error;

/// The error taxonomy exposed to callers of the instance service and job
/// handlers.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: u64,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream server error: {0}")]
    Server(String),

    #[error("resource constraints: {0}")]
    ResourceConstraints(String),

    #[error("instance not startable: {0}")]
    InstanceNotStartable(String),

    #[error("startup operation already in progress for instance {0}")]
    StartupOperationInProgress(String),

    #[error("startup failed in phase {phase}: {reason}")]
    StartupFailed { phase: String, reason: String },

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("client error: {0}")]
    Client(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// HTTP status this error would map to if surfaced over a wire (spec §7).
    /// The control plane itself does not own routing; this is offered purely
    /// as a mapping table for the (out-of-scope) HTTP layer to consume.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Authentication(_) => 401,
            Self::RateLimit { .. } => 429,
            Self::Timeout(_) => 504,
            Self::Network(_) => 502,
            Self::Server(_) => 502,
            Self::ResourceConstraints(_) => 409,
            Self::InstanceNotStartable(_) => 409,
            Self::StartupOperationInProgress(_) => 409,
            Self::StartupFailed { .. } => 502,
            Self::HealthCheckFailed(_) => 503,
            Self::Client(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// True if a retry of the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout(_) | Self::Network(_) | Self::Server(_)
        )
    }
}
