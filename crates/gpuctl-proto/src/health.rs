//! Health check data model (C5, spec §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::PortKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_wait_time_ms: u64,
    pub target_port: Option<u16>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_attempts: 3,
            retry_delay_ms: 2_000,
            max_wait_time_ms: 300_000,
            target_port: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointCheckResult {
    pub port: u16,
    pub endpoint: String,
    #[serde(rename = "type")]
    pub kind: PortKind,
    pub status: EndpointStatus,
    pub response_time_ms: u64,
    pub last_checked: DateTime<Utc>,
    pub error: Option<HealthCheckErrorKind>,
}

/// The error taxonomy for endpoint probes (spec §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthCheckErrorKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    DnsResolutionFailed,
    NetworkUnreachable,
    BadGateway,
    ServiceUnavailable,
    ServerError,
    ClientError,
    SslError,
    InvalidResponse,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl HealthCheckErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionRefused
                | Self::ConnectionReset
                | Self::DnsResolutionFailed
                | Self::NetworkUnreachable
                | Self::BadGateway
                | Self::ServiceUnavailable
                | Self::ServerError
        )
    }

    pub fn severity(self) -> ErrorSeverity {
        match self {
            Self::Timeout | Self::ConnectionRefused | Self::ConnectionReset => ErrorSeverity::Medium,
            Self::DnsResolutionFailed | Self::NetworkUnreachable => ErrorSeverity::High,
            Self::BadGateway | Self::ServiceUnavailable | Self::ServerError => ErrorSeverity::Medium,
            Self::ClientError => ErrorSeverity::Low,
            Self::SslError => ErrorSeverity::Critical,
            Self::InvalidResponse | Self::Unknown => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealthStatus {
    Healthy,
    Partial,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub overall_status: OverallHealthStatus,
    pub endpoints: Vec<EndpointCheckResult>,
    pub checked_at: DateTime<Utc>,
    pub total_response_time_ms: u64,
}

impl HealthCheckResult {
    /// Aggregation rule from spec §4.5 step 4 / §8 property 5: all healthy →
    /// healthy; all unhealthy or no endpoints → unhealthy; mixed → partial.
    pub fn aggregate(endpoints: Vec<EndpointCheckResult>, checked_at: DateTime<Utc>) -> Self {
        let overall_status = if endpoints.is_empty() {
            OverallHealthStatus::Unhealthy
        } else if endpoints.iter().all(|e| e.status == EndpointStatus::Healthy) {
            OverallHealthStatus::Healthy
        } else if endpoints.iter().all(|e| e.status == EndpointStatus::Unhealthy) {
            OverallHealthStatus::Unhealthy
        } else {
            OverallHealthStatus::Partial
        };
        let total_response_time_ms = endpoints
            .iter()
            .filter(|e| e.status == EndpointStatus::Healthy)
            .map(|e| e.response_time_ms)
            .sum();
        Self {
            overall_status,
            endpoints,
            checked_at,
            total_response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckStatus {
    InProgress,
    Completed,
    Failed,
}

/// The in-progress/terminal health-check record attached to an instance
/// (spec §3, `Instance.healthCheck`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckState {
    pub status: HealthCheckStatus,
    pub config: HealthCheckConfig,
    pub results: Vec<HealthCheckResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(status: EndpointStatus, response_time_ms: u64) -> EndpointCheckResult {
        EndpointCheckResult {
            port: 8080,
            endpoint: "http://localhost:8080".into(),
            kind: PortKind::Http,
            status,
            response_time_ms,
            last_checked: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn all_healthy_aggregates_healthy_and_sums_response_time() {
        let result = HealthCheckResult::aggregate(
            vec![endpoint(EndpointStatus::Healthy, 150), endpoint(EndpointStatus::Healthy, 200)],
            Utc::now(),
        );
        assert_eq!(result.overall_status, OverallHealthStatus::Healthy);
        assert_eq!(result.total_response_time_ms, 350);
    }

    #[test]
    fn mixed_aggregates_partial_and_unhealthy_contributes_zero() {
        let result = HealthCheckResult::aggregate(
            vec![endpoint(EndpointStatus::Healthy, 150), endpoint(EndpointStatus::Unhealthy, 0)],
            Utc::now(),
        );
        assert_eq!(result.overall_status, OverallHealthStatus::Partial);
        assert_eq!(result.total_response_time_ms, 150);
    }

    #[test]
    fn empty_endpoints_aggregates_unhealthy() {
        let result = HealthCheckResult::aggregate(vec![], Utc::now());
        assert_eq!(result.overall_status, OverallHealthStatus::Unhealthy);
        assert_eq!(result.total_response_time_ms, 0);
    }

    #[test]
    fn error_kind_retryability_and_severity() {
        assert!(HealthCheckErrorKind::Timeout.is_retryable());
        assert_eq!(HealthCheckErrorKind::Timeout.severity(), ErrorSeverity::Medium);
        assert!(!HealthCheckErrorKind::ClientError.is_retryable());
        assert_eq!(HealthCheckErrorKind::SslError.severity(), ErrorSeverity::Critical);
        assert!(!HealthCheckErrorKind::SslError.is_retryable());
        assert_eq!(HealthCheckErrorKind::DnsResolutionFailed.severity(), ErrorSeverity::High);
    }
}
