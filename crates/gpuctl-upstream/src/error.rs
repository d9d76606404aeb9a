use gpuctl_proto::ControlPlaneError;
use thiserror::Error;

/// HTTP-specific error categorization for the upstream client (spec §4.2).
/// Kept separate from [`ControlPlaneError`] so retry logic can match on it
/// directly; it converts into the shared taxonomy only at the boundary,
/// mirroring the crate-local `NodeError`/`MetricsError` pattern used
/// elsewhere in this workspace.
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    #[error("upstream authentication failed")]
    Authentication,

    #[error("not found")]
    NotFound,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("upstream server error: status {status}")]
    Server { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("client error: status {status}, body: {body}")]
    Client { status: u16, body: String },

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("circuit breaker open, rejecting call to {operation}")]
    CircuitOpen { operation: String },
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout | Self::Network(_) | Self::Server { .. }
        )
    }

    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 => Self::Authentication,
            404 => Self::NotFound,
            429 => Self::RateLimit { retry_after_secs: retry_after_secs.unwrap_or(1) },
            500..=599 => Self::Server { status },
            400..=499 => Self::Client { status, body },
            _ => Self::Decode(format!("unexpected status {status}")),
        }
    }
}

impl From<UpstreamError> for ControlPlaneError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Authentication => ControlPlaneError::Authentication(err.to_string()),
            UpstreamError::NotFound => ControlPlaneError::NotFound(err.to_string()),
            UpstreamError::RateLimit { retry_after_secs } => ControlPlaneError::RateLimit {
                message: err.to_string(),
                retry_after_secs,
            },
            UpstreamError::Server { .. } => ControlPlaneError::Server(err.to_string()),
            UpstreamError::Network(_) => ControlPlaneError::Network(err.to_string()),
            UpstreamError::Timeout => ControlPlaneError::Timeout(err.to_string()),
            UpstreamError::Client { .. } => ControlPlaneError::Client(err.to_string()),
            UpstreamError::Decode(_) => ControlPlaneError::Internal(err.to_string()),
            UpstreamError::CircuitOpen { .. } => ControlPlaneError::Network(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Network(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_categorization_matches_spec_table() {
        assert!(matches!(UpstreamError::from_status(401, String::new(), None), UpstreamError::Authentication));
        assert!(matches!(UpstreamError::from_status(404, String::new(), None), UpstreamError::NotFound));
        assert!(matches!(
            UpstreamError::from_status(429, String::new(), None),
            UpstreamError::RateLimit { retry_after_secs: 1 }
        ));
        assert!(matches!(
            UpstreamError::from_status(503, String::new(), None),
            UpstreamError::Server { status: 503 }
        ));
        assert!(matches!(
            UpstreamError::from_status(418, String::new(), None),
            UpstreamError::Client { status: 418, .. }
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after_header_value() {
        assert!(matches!(
            UpstreamError::from_status(429, String::new(), Some(30)),
            UpstreamError::RateLimit { retry_after_secs: 30 }
        ));
    }

    #[test]
    fn retryable_classification_matches_retry_policy() {
        assert!(UpstreamError::RateLimit { retry_after_secs: 1 }.is_retryable());
        assert!(UpstreamError::Timeout.is_retryable());
        assert!(UpstreamError::Network("x".into()).is_retryable());
        assert!(UpstreamError::Server { status: 500 }.is_retryable());
        assert!(!UpstreamError::Authentication.is_retryable());
        assert!(!UpstreamError::NotFound.is_retryable());
        assert!(!UpstreamError::Client { status: 400, body: String::new() }.is_retryable());
    }
}
